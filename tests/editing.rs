//! Corpus-level editing: edits survive a listing round trip and failed edits leave no trace.

mod common;

use common::method;
use dexpatch::prelude::*;
use tempfile::tempdir;

const LISTING: &str = r#"
.class public final Lcom/example/Totals;
.super Ljava/lang/Object;

.method public static sum(I)I
    .registers 3
    const/4 v0, 0x0
    const/4 v1, 0x0
    :loop
    if-ge v1, p0, :done
    add-int/2addr v0, v1
    add-int/lit8 v1, v1, 0x1
    goto :loop
    :done
    return v0
.end method

.method public static native hash(I)I
.end method

.end class
"#;

const TOTALS: &str = "Lcom/example/Totals;";

fn sum_handle(corpus: &Corpus) -> Result<MethodHandle> {
    corpus
        .find_methods(TOTALS, "sum")?
        .first()
        .copied()
        .ok_or_else(|| Error::MethodNotFound {
            class: TOTALS.to_string(),
            method: "sum".to_string(),
        })
}

#[test]
fn edit_loop_and_reload() -> Result<()> {
    let mut corpus = Corpus::from_listing(LISTING)?;
    let handle = sum_handle(&corpus)?;

    // clamp negative counts to zero before entering the loop
    corpus.get_method_mut(handle)?.edit()?.insert_at(
        0,
        Block::parse(&[
            "if-gez p0, :counted",
            "const/4 p0, 0x0",
            ":counted",
        ])?,
    )?;

    let sum = method(&corpus, TOTALS, "sum")?;
    assert_eq!(sum.instructions().len(), 9);
    assert_eq!(sum.label_index("counted"), Some(2));
    assert_eq!(sum.label_index("loop"), Some(4));
    assert_eq!(sum.label_index("done"), Some(8));
    assert_eq!(sum.locals(), 2);

    let dir = tempdir()?;
    let path = dir.path().join("totals.smali");
    corpus.write_to(&path)?;
    let reloaded = Corpus::from_path(&path)?;
    assert_eq!(reloaded, corpus);
    Ok(())
}

#[test]
fn failed_edit_is_not_committed() -> Result<()> {
    let mut corpus = Corpus::from_listing(LISTING)?;
    let before = corpus.clone();
    let handle = sum_handle(&corpus)?;

    let mut editor = corpus.get_method_mut(handle)?.edit()?;
    let result = editor.insert_at(0, Block::parse(&["goto :nowhere"])?);
    assert!(matches!(result, Err(Error::UndefinedLabel { .. })));

    // dropping :done while "if-ge" still branches to it
    let result = editor.replace_from(5, Block::parse(&["return v0"])?);
    assert!(result.is_err());

    assert_eq!(corpus, before);
    Ok(())
}

#[test]
fn native_and_finalized_methods_are_not_editable() -> Result<()> {
    let mut corpus = Corpus::from_listing(LISTING)?;

    let hash = corpus
        .find_methods(TOTALS, "hash")?
        .first()
        .copied()
        .ok_or_else(|| Error::ResolutionFailure {
            fingerprint: "hash".to_string(),
        })?;
    assert!(matches!(
        corpus.get_method_mut(hash)?.edit(),
        Err(Error::NoMethodBody(_))
    ));

    corpus.finalize()?;
    let handle = sum_handle(&corpus)?;
    assert!(matches!(
        corpus.get_method_mut(handle)?.edit(),
        Err(Error::MethodFinalized(_))
    ));
    Ok(())
}
