use std::path::Path;

use dexpatch::PatchContext;
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::{load_corpus, load_plan, write_corpus},
    output::{print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
struct ApplyOutput {
    plan: String,
    output: String,
    patches: Vec<PatchEntry>,
}

#[derive(Debug, Serialize)]
struct PatchEntry {
    name: String,
    fingerprints: usize,
    elapsed_ms: f64,
}

pub fn run(
    path: &Path,
    plan_path: &Path,
    output_path: &Path,
    opts: &GlobalOptions,
) -> anyhow::Result<()> {
    let corpus = load_corpus(path)?;
    let plan = load_plan(plan_path)?;

    let mut ctx = PatchContext::with_config(corpus, plan.engine_config());
    let applied = ctx.apply(&[&plan])?;
    let corpus = ctx.into_corpus();
    write_corpus(&corpus, output_path)?;

    let output = ApplyOutput {
        plan: plan.name.clone(),
        output: output_path.display().to_string(),
        patches: applied
            .into_iter()
            .map(|p| PatchEntry {
                name: p.name,
                fingerprints: p.fingerprints,
                elapsed_ms: p.elapsed.as_secs_f64() * 1000.0,
            })
            .collect(),
    };

    print_output(&output, opts, |out| {
        let mut tw = TabWriter::new(&[
            ("Patch", Align::Left),
            ("Fingerprints", Align::Right),
            ("Time (ms)", Align::Right),
        ]);
        for p in &out.patches {
            tw.row(vec![
                p.name.clone(),
                p.fingerprints.to_string(),
                format!("{:.2}", p.elapsed_ms),
            ]);
        }
        tw.print();
        println!("\nWrote {}", out.output);
    })
}
