mod ads;

pub use ads::*;

use crate::{
    model::{Corpus, Method},
    Result,
};

// Helper function to parse a single method listing inside a throwaway class
pub fn parse_method(text: &str) -> Result<Method> {
    let listing = format!(
        ".class public Lcom/example/Fixture;\n.super Ljava/lang/Object;\n{text}\n.end class\n"
    );
    let corpus = Corpus::from_listing(&listing)?;
    let method = corpus
        .methods()
        .next()
        .map(|(_, _, method)| method.clone())
        .ok_or_else(|| malformed_error!("Fixture holds no method"));
    method
}
