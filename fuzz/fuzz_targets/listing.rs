#![no_main]

use libfuzzer_sys::fuzz_target;
use dexpatch::Corpus;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(corpus) = Corpus::from_listing(text) {
            let _ = Corpus::from_listing(&corpus.to_listing());
        }
    }
});
