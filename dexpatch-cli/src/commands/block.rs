use std::path::Path;

use anyhow::Context;
use dexpatch::{
    gate::{ConditionGate, StaticAccessor},
    model::MethodRef,
    neutralize::{Neutralizer, ReturnSpec},
};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::{load_corpus, write_corpus},
    output::{print_output, Align, TabWriter},
};

pub struct BlockOptions<'a> {
    pub class: &'a str,
    pub methods: &'a [String],
    pub returns: &'a str,
    pub accessor: Option<&'a str>,
    pub key: &'a str,
    pub output: &'a Path,
    pub global: &'a GlobalOptions,
}

#[derive(Debug, Serialize)]
struct BlockOutput {
    owner: String,
    returns: String,
    output: String,
    blocked: Vec<BlockedEntry>,
}

#[derive(Debug, Serialize)]
struct BlockedEntry {
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    gate_label: Option<String>,
}

pub fn run(path: &Path, opts: &BlockOptions<'_>) -> anyhow::Result<()> {
    let mut corpus = load_corpus(path)?;
    let spec: ReturnSpec = opts
        .returns
        .parse()
        .with_context(|| format!("invalid --returns value '{}'", opts.returns))?;

    let gate = opts
        .accessor
        .map(|accessor| -> anyhow::Result<ConditionGate> {
            let reader = StaticAccessor::new(opts.key, MethodRef::parse(accessor)?)?;
            Ok(ConditionGate::new(Box::new(reader)))
        })
        .transpose()?;

    let mut neutralizer = Neutralizer::new();
    if let Some(gate) = &gate {
        neutralizer = neutralizer.gate(gate);
    }
    let report = neutralizer.block_methods(&mut corpus, opts.class, opts.methods, spec)?;
    write_corpus(&corpus, opts.output)?;

    let output = BlockOutput {
        owner: report.owner,
        returns: report.spec.to_string(),
        output: opts.output.display().to_string(),
        blocked: report
            .blocked
            .into_iter()
            .map(|b| BlockedEntry {
                method: b.method.to_string(),
                gate_label: b.gate_label,
            })
            .collect(),
    };

    print_output(&output, opts.global, |out| {
        let mut tw = TabWriter::new(&[("Method", Align::Left), ("Gate", Align::Left)]);
        for b in &out.blocked {
            tw.row(vec![
                b.method.clone(),
                b.gate_label
                    .as_ref()
                    .map_or_else(|| "-".to_string(), |l| format!(":{l}")),
            ]);
        }
        tw.print();
        println!(
            "\nBlocked {} method(s) of {} with {}; wrote {}",
            out.blocked.len(),
            out.owner,
            out.returns,
            out.output
        );
    })
}
