//! Fingerprint resolution with a per-run result cache.
//!
//! The [`Resolver`] binds each [`Fingerprint`] to at most one method of a [`Corpus`]. It is
//! read-only with respect to the corpus and `Sync`, so independent fingerprints can be
//! resolved concurrently ([`Resolver::resolve_all`]). Results, including "no match", are cached
//! by fingerprint name in a [`DashMap`] for the lifetime of the resolver; errors are not
//! cached.
//!
//! # Tie-break
//!
//! A fingerprint that matches several methods is ambiguous. Under
//! [`AmbiguityPolicy::FirstMatch`] the first match in corpus order (class load order, then
//! method declaration order) wins and every candidate is logged at `warn` level. This keeps
//! runs deterministic but silently depends on corpus order, so fingerprints should be made
//! specific enough to match once. [`AmbiguityPolicy::Reject`] turns ambiguity into
//! [`crate::Error::AmbiguousFingerprint`].

use dashmap::DashMap;
use log::{debug, warn};
use rayon::prelude::*;

use crate::{
    config::{AmbiguityPolicy, EngineConfig},
    fingerprint::{
        pattern::{find_pattern, PatternMatch},
        Fingerprint,
    },
    model::{Class, Corpus, Method, MethodHandle, MethodId, Opcode},
    Error, Result,
};

/// Position of a required string literal inside the resolved method.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StringMatch {
    /// The literal value
    pub value: String,
    /// Index of the first `const-string` loading it
    pub index: usize,
}

/// A fingerprint bound to exactly one method.
///
/// Indices in [`Resolution::pattern`] and [`Resolution::strings`] refer to the method body as
/// it was when the fingerprint was resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Name of the resolved fingerprint
    pub fingerprint: String,
    /// Address of the method in the corpus
    pub handle: MethodHandle,
    /// Descriptor of the defining class
    pub class_name: String,
    /// Identity of the method
    pub method: MethodId,
    /// Pattern match, if the fingerprint declares a pattern
    pub pattern: Option<PatternMatch>,
    /// String literal matches, in declaration order
    pub strings: Vec<StringMatch>,
}

impl Resolution {
    /// The resolved method.
    #[must_use]
    pub fn method<'c>(&self, corpus: &'c Corpus) -> Option<&'c Method> {
        corpus.method(self.handle)
    }

    /// Mutable access to the resolved method.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::Error::Malformed`] error if the handle does not belong to `corpus`.
    pub fn method_mut<'c>(&self, corpus: &'c mut Corpus) -> Result<&'c mut Method> {
        corpus.get_method_mut(self.handle)
    }
}

struct Candidate {
    handle: MethodHandle,
    pattern: Option<PatternMatch>,
    strings: Vec<StringMatch>,
}

/// Resolves fingerprints against a corpus and caches the results.
pub struct Resolver {
    cache: DashMap<String, Option<Resolution>>,
    ambiguity: AmbiguityPolicy,
    parallel: bool,
    parallel_threshold: usize,
}

impl Default for Resolver {
    fn default() -> Self {
        Resolver::new(&EngineConfig::default())
    }
}

impl Resolver {
    /// Creates a resolver with an empty cache.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Resolver {
            cache: DashMap::new(),
            ambiguity: config.ambiguity,
            parallel: config.parallel_resolution,
            parallel_threshold: config.parallel_threshold,
        }
    }

    /// Resolves `fingerprint`, returning the cached result if it was resolved before.
    ///
    /// Returns `Ok(None)` if no method matches.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::AmbiguousFingerprint`] if several methods match and the policy
    /// is [`AmbiguityPolicy::Reject`].
    pub fn resolve(&self, fingerprint: &Fingerprint, corpus: &Corpus) -> Result<Option<Resolution>> {
        if let Some(cached) = self.cache.get(fingerprint.name()) {
            return Ok(cached.clone());
        }

        let mut candidates = self.scan(fingerprint, corpus);
        let resolution = if candidates.is_empty() {
            debug!("Fingerprint '{}' matched no method", fingerprint.name());
            None
        } else {
            if candidates.len() > 1 {
                let names: Vec<String> = candidates
                    .iter()
                    .filter_map(|c| corpus.method(c.handle))
                    .map(|m| m.id().to_string())
                    .collect();
                if self.ambiguity == AmbiguityPolicy::Reject {
                    return Err(Error::AmbiguousFingerprint {
                        fingerprint: fingerprint.name().to_string(),
                        candidates: names,
                    });
                }
                warn!(
                    "Fingerprint '{}' is ambiguous, using the first of: {}",
                    fingerprint.name(),
                    names.join(", ")
                );
            }

            let first = candidates.swap_remove(0);
            let resolution = build_resolution(fingerprint, corpus, first)?;
            debug!(
                "Fingerprint '{}' resolved to {}",
                fingerprint.name(),
                resolution.method
            );
            Some(resolution)
        };

        Ok(self
            .cache
            .entry(fingerprint.name().to_string())
            .or_insert(resolution)
            .clone())
    }

    /// Resolves `fingerprint` and fails if nothing matches.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ResolutionFailure`] if no method matches, and any error of
    /// [`Resolver::resolve`].
    pub fn require(&self, fingerprint: &Fingerprint, corpus: &Corpus) -> Result<Resolution> {
        self.resolve(fingerprint, corpus)?
            .ok_or_else(|| Error::ResolutionFailure {
                fingerprint: fingerprint.name().to_string(),
            })
    }

    /// Resolves several fingerprints, in parallel when enabled. Results are in input order.
    ///
    /// # Errors
    ///
    /// Returns the first error of [`Resolver::resolve`] in input order.
    pub fn resolve_all(
        &self,
        fingerprints: &[Fingerprint],
        corpus: &Corpus,
    ) -> Result<Vec<Option<Resolution>>> {
        if self.parallel {
            fingerprints
                .par_iter()
                .map(|fp| self.resolve(fp, corpus))
                .collect::<Vec<_>>()
                .into_iter()
                .collect()
        } else {
            fingerprints
                .iter()
                .map(|fp| self.resolve(fp, corpus))
                .collect()
        }
    }

    /// The cached result for a fingerprint name, if it was resolved and matched.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Resolution> {
        self.cache.get(name).and_then(|entry| entry.clone())
    }

    /// Whether a fingerprint name has a cached result (match or no match).
    #[must_use]
    pub fn is_cached(&self, name: &str) -> bool {
        self.cache.contains_key(name)
    }

    /// Number of cached results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether nothing has been resolved yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Drops every cached result. Only needed when the corpus is reloaded.
    pub fn clear(&self) {
        self.cache.clear();
    }

    fn scan(&self, fingerprint: &Fingerprint, corpus: &Corpus) -> Vec<Candidate> {
        if self.parallel && corpus.method_count() > self.parallel_threshold {
            let methods: Vec<(MethodHandle, &Class, &Method)> = corpus.methods().collect();
            methods
                .par_iter()
                .filter_map(|(handle, class, method)| evaluate(fingerprint, *handle, class, method))
                .collect()
        } else {
            corpus
                .methods()
                .filter_map(|(handle, class, method)| evaluate(fingerprint, handle, class, method))
                .collect()
        }
    }
}

fn evaluate(
    fingerprint: &Fingerprint,
    handle: MethodHandle,
    class: &Class,
    method: &Method,
) -> Option<Candidate> {
    if !fingerprint.matches_signature(class, method) {
        return None;
    }

    let strings = match_strings(fingerprint.strings(), method)?;

    let pattern = if fingerprint.pattern().is_empty() {
        None
    } else {
        Some(find_pattern(fingerprint.pattern(), method.instructions())?)
    };

    if !fingerprint.matches_custom(class, method) {
        return None;
    }

    Some(Candidate {
        handle,
        pattern,
        strings,
    })
}

fn match_strings(required: &[String], method: &Method) -> Option<Vec<StringMatch>> {
    required
        .iter()
        .map(|value| {
            method
                .instructions()
                .iter()
                .position(|insn| {
                    matches!(insn.opcode(), Opcode::ConstString | Opcode::ConstStringJumbo)
                        && insn.string() == Some(value.as_str())
                })
                .map(|index| StringMatch {
                    value: value.clone(),
                    index,
                })
        })
        .collect()
}

fn build_resolution(
    fingerprint: &Fingerprint,
    corpus: &Corpus,
    candidate: Candidate,
) -> Result<Resolution> {
    let class = corpus
        .classes()
        .get(candidate.handle.class)
        .ok_or_else(|| malformed_error!("Invalid method handle {}", candidate.handle))?;
    let method = corpus
        .method(candidate.handle)
        .ok_or_else(|| malformed_error!("Invalid method handle {}", candidate.handle))?;

    Ok(Resolution {
        fingerprint: fingerprint.name().to_string(),
        handle: candidate.handle,
        class_name: class.name().to_string(),
        method: method.id().clone(),
        pattern: candidate.pattern,
        strings: candidate.strings,
    })
}
