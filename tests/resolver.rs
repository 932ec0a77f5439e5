//! Resolver behaviour on generated corpora: determinism, caching and tie-breaking.

mod common;

use common::synthetic_listing;
use dexpatch::prelude::*;

fn corpus() -> Result<Corpus> {
    Corpus::from_listing(&synthetic_listing(64, 16, 41))
}

fn needle() -> Fingerprint {
    Fingerprint::builder("needle")
        .returns("I")
        .string("needle")
        .build()
}

fn returns_seven() -> Fingerprint {
    Fingerprint::builder("returns-seven")
        .returns("I")
        .pattern(PatternEntry::adjacent(InstructionMatcher::Literal {
            opcode: Some(Opcode::Const16),
            value: 7,
        }))
        .build()
}

#[test]
fn parallel_scan_matches_sequential() -> Result<()> {
    let corpus = corpus()?;
    let sequential = Resolver::new(&EngineConfig::sequential());
    let parallel = Resolver::new(&EngineConfig::default().with_parallelism(true, 0));

    for fingerprint in [needle(), returns_seven()] {
        let a = sequential.resolve(&fingerprint, &corpus)?;
        let b = parallel.resolve(&fingerprint, &corpus)?;
        assert!(a.is_some());
        assert_eq!(a, b);
    }
    Ok(())
}

#[test]
fn needle_resolution_details() -> Result<()> {
    let corpus = corpus()?;
    let resolver = Resolver::default();
    let found = resolver.require(&needle(), &corpus)?;

    assert_eq!(found.class_name, "Lcom/example/gen/C41;");
    assert_eq!(found.method.to_string(), "Lcom/example/gen/C41;->m0()I");
    assert_eq!(found.strings.len(), 1);
    assert_eq!(found.strings[0].value, "needle");
    assert_eq!(found.strings[0].index, 0);
    assert!(found.pattern.is_none());
    Ok(())
}

#[test]
fn resolution_is_cached_and_stable() -> Result<()> {
    let corpus = corpus()?;
    let resolver = Resolver::default();
    assert!(resolver.is_empty());

    let first = resolver.resolve(&needle(), &corpus)?;
    assert!(resolver.is_cached("needle"));
    let second = resolver.resolve(&needle(), &corpus)?;
    assert_eq!(first, second);
    assert_eq!(resolver.get("needle"), first);
    assert_eq!(resolver.len(), 1);

    let missing = Fingerprint::builder("missing").string("haystack").build();
    assert_eq!(resolver.resolve(&missing, &corpus)?, None);
    assert!(resolver.is_cached("missing"));
    assert_eq!(resolver.get("missing"), None);

    resolver.clear();
    assert!(resolver.is_empty());
    Ok(())
}

#[test]
fn resolve_all_keeps_input_order() -> Result<()> {
    let corpus = corpus()?;
    let resolver = Resolver::new(&EngineConfig::default().with_parallelism(true, 0));
    let fingerprints = vec![
        returns_seven(),
        Fingerprint::builder("missing").string("haystack").build(),
        needle(),
    ];

    let results = resolver.resolve_all(&fingerprints, &corpus)?;
    assert_eq!(results.len(), 3);
    assert_eq!(
        results[0].as_ref().map(|r| r.fingerprint.as_str()),
        Some("returns-seven")
    );
    assert!(results[1].is_none());
    assert_eq!(
        results[2].as_ref().map(|r| r.class_name.as_str()),
        Some("Lcom/example/gen/C41;")
    );
    Ok(())
}

#[test]
fn ambiguous_fingerprint_takes_first_in_corpus_order() -> Result<()> {
    let corpus = corpus()?;
    // every class has an m7 returning 7
    let found = Resolver::default().require(&returns_seven(), &corpus)?;
    assert_eq!(found.method.to_string(), "Lcom/example/gen/C0;->m7()I");

    let pattern = found.pattern.as_ref().map(|m| (m.start, m.end));
    assert_eq!(pattern, Some((0, 0)));
    Ok(())
}

#[test]
fn ambiguous_fingerprint_rejected_when_strict() -> Result<()> {
    let corpus = corpus()?;
    let resolver = Resolver::new(&EngineConfig::strict());
    match resolver.resolve(&returns_seven(), &corpus) {
        Err(Error::AmbiguousFingerprint {
            fingerprint,
            candidates,
        }) => {
            assert_eq!(fingerprint, "returns-seven");
            assert_eq!(candidates.len(), 64);
        }
        other => panic!("expected an ambiguity error, got {other:?}"),
    }
    assert!(!resolver.is_cached("returns-seven"));
    Ok(())
}

#[test]
fn class_suffix_narrows_candidates() -> Result<()> {
    let corpus = corpus()?;
    let fingerprint = Fingerprint::builder("c12-seven")
        .class_suffix("/C12;")
        .opcodes(&[Opcode::Const16, Opcode::Return])
        .custom(|method, _| method.name() == "m7")
        .build();
    let found = Resolver::new(&EngineConfig::strict()).require(&fingerprint, &corpus)?;
    assert_eq!(found.method.to_string(), "Lcom/example/gen/C12;->m7()I");
    Ok(())
}
