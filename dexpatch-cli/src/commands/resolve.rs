use std::path::Path;

use dexpatch::{Patch, Resolver};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::{load_corpus, load_plan},
    output::{print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
struct ResolvedEntry {
    fingerprint: String,
    method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pattern: Option<(usize, usize)>,
    strings: Vec<(String, usize)>,
}

#[derive(Debug, Serialize)]
struct ResolveOutput {
    plan: String,
    resolved: usize,
    unresolved: usize,
    fingerprints: Vec<ResolvedEntry>,
}

pub fn run(path: &Path, plan_path: &Path, opts: &GlobalOptions) -> anyhow::Result<()> {
    let corpus = load_corpus(path)?;
    let plan = load_plan(plan_path)?;
    let resolver = Resolver::new(&plan.engine_config());

    let fingerprints = plan.fingerprints()?;
    let results = resolver.resolve_all(&fingerprints, &corpus)?;

    let entries: Vec<ResolvedEntry> = fingerprints
        .iter()
        .zip(results)
        .map(|(fingerprint, result)| match result {
            Some(resolution) => ResolvedEntry {
                fingerprint: fingerprint.name().to_string(),
                method: Some(resolution.method.to_string()),
                pattern: resolution.pattern.map(|m| (m.start, m.end)),
                strings: resolution
                    .strings
                    .into_iter()
                    .map(|s| (s.value, s.index))
                    .collect(),
            },
            None => ResolvedEntry {
                fingerprint: fingerprint.name().to_string(),
                method: None,
                pattern: None,
                strings: Vec::new(),
            },
        })
        .collect();

    let resolved = entries.iter().filter(|e| e.method.is_some()).count();
    let output = ResolveOutput {
        plan: plan.name().to_string(),
        resolved,
        unresolved: entries.len() - resolved,
        fingerprints: entries,
    };

    print_output(&output, opts, |out| {
        let mut tw = TabWriter::new(&[
            ("Fingerprint", Align::Left),
            ("Method", Align::Left),
            ("Pattern", Align::Left),
        ]);
        for e in &out.fingerprints {
            tw.row(vec![
                e.fingerprint.clone(),
                e.method.clone().unwrap_or_else(|| "<unresolved>".to_string()),
                e.pattern
                    .map_or_else(|| "-".to_string(), |(start, end)| format!("{start}..={end}")),
            ]);
        }
        tw.print();
        println!(
            "\n{}: {} resolved, {} unresolved.",
            out.plan, out.resolved, out.unresolved
        );
    })?;

    if output.unresolved > 0 {
        anyhow::bail!("{} fingerprint(s) did not resolve", output.unresolved);
    }
    Ok(())
}
