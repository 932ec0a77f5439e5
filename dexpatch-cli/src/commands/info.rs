use std::path::Path;

use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::load_corpus,
    output::{print_fields, print_output},
};

#[derive(Debug, Serialize)]
pub struct CorpusInfo {
    pub class_count: usize,
    pub method_count: usize,
    pub bodyless_methods: usize,
    pub instruction_count: usize,
    pub code_units: u64,
    pub label_count: usize,
    pub largest_method: Option<String>,
}

pub fn run(path: &Path, opts: &GlobalOptions) -> anyhow::Result<()> {
    let corpus = load_corpus(path)?;

    let mut info = CorpusInfo {
        class_count: corpus.classes().len(),
        method_count: corpus.method_count(),
        bodyless_methods: 0,
        instruction_count: 0,
        code_units: 0,
        label_count: 0,
        largest_method: None,
    };

    let mut largest = 0;
    for (_, _, method) in corpus.methods() {
        if !method.has_body() {
            info.bodyless_methods += 1;
            continue;
        }
        info.instruction_count += method.instructions().len();
        info.label_count += method.labels().len();
        let units = method.code_offsets().last().copied().unwrap_or(0);
        info.code_units += u64::from(units);
        if units > largest {
            largest = units;
            info.largest_method = Some(method.id().to_string());
        }
    }

    print_output(&info, opts, |info| {
        print_fields(&[
            ("Classes", info.class_count.to_string()),
            (
                "Methods",
                format!("{} ({} abstract/native)", info.method_count, info.bodyless_methods),
            ),
            ("Instructions", info.instruction_count.to_string()),
            ("Code units", info.code_units.to_string()),
            ("Labels", info.label_count.to_string()),
            (
                "Largest method",
                info.largest_method.clone().unwrap_or_else(|| "-".to_string()),
            ),
        ]);
    })
}
