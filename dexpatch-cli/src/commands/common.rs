use std::path::Path;

use anyhow::Context;
use dexpatch::{plan::PatchPlan, Corpus};

/// Load a smali listing.
pub fn load_corpus(path: &Path) -> anyhow::Result<Corpus> {
    Corpus::from_path(path).with_context(|| format!("failed to load listing: {}", path.display()))
}

/// Load and validate a patch plan.
pub fn load_plan(path: &Path) -> anyhow::Result<PatchPlan> {
    PatchPlan::from_path(path).with_context(|| format!("failed to load plan: {}", path.display()))
}

/// Write a corpus back as listing.
pub fn write_corpus(corpus: &Corpus, path: &Path) -> anyhow::Result<()> {
    corpus
        .write_to(path)
        .with_context(|| format!("failed to write listing: {}", path.display()))
}
