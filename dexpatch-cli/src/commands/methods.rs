use std::path::Path;

use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::load_corpus,
    output::{print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
struct MethodEntry {
    handle: String,
    access: String,
    class: String,
    method: String,
    instructions: usize,
}

#[derive(Debug, Serialize)]
struct MethodsOutput {
    methods: Vec<MethodEntry>,
    count: usize,
}

pub fn run(path: &Path, class_filter: Option<&str>, opts: &GlobalOptions) -> anyhow::Result<()> {
    let corpus = load_corpus(path)?;
    let filter = class_filter.map(str::to_lowercase);

    let methods: Vec<MethodEntry> = corpus
        .methods()
        .filter(|(_, class, _)| {
            filter
                .as_deref()
                .map_or(true, |f| class.name().as_str().to_lowercase().contains(f))
        })
        .map(|(handle, class, method)| MethodEntry {
            handle: handle.to_string(),
            access: method.flags().keywords().join(" "),
            class: class.name().to_string(),
            method: format!("{}{}", method.name(), method.descriptor()),
            instructions: method.instructions().len(),
        })
        .collect();

    let output = MethodsOutput {
        count: methods.len(),
        methods,
    };

    print_output(&output, opts, |out| {
        let mut tw = TabWriter::new(&[
            ("Handle", Align::Left),
            ("Access", Align::Left),
            ("Class", Align::Left),
            ("Method", Align::Left),
            ("Insns", Align::Right),
        ]);
        for e in &out.methods {
            tw.row(vec![
                e.handle.clone(),
                e.access.clone(),
                e.class.clone(),
                e.method.clone(),
                e.instructions.to_string(),
            ]);
        }
        tw.print();
        println!("\n{} method(s) listed.", out.count);
    })
}
