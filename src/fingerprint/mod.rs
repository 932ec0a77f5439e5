//! Declarative method signatures.
//!
//! A [`Fingerprint`] describes a method by structure instead of by name, so it keeps working
//! when the target is obfuscated and renamed between releases. It combines cheap metadata
//! constraints (access flags, return and parameter type prefixes, defining-class suffix) with
//! content constraints (an instruction [pattern](pattern), required string literals, and an
//! arbitrary predicate).
//!
//! Fingerprints are immutable pure data and carry no resolution state. Binding a fingerprint
//! to a method is the job of the [`Resolver`], which caches its results by fingerprint name;
//! names must therefore be unique within a run.
//!
//! # Examples
//!
//! ```rust
//! use dexpatch::fingerprint::{Fingerprint, PatternEntry};
//! use dexpatch::model::{AccessFlags, Opcode};
//!
//! let fingerprint = Fingerprint::builder("check-ad-eligibility")
//!     .access_flags(AccessFlags::PUBLIC | AccessFlags::FINAL)
//!     .returns("Lio/reactivex/Single;")
//!     .parameters(&["L"])
//!     .class_suffix("CheckAdEligibilityLambda;")
//!     .pattern(PatternEntry::adjacent(Opcode::InvokeStatic))
//!     .pattern(PatternEntry::adjacent(Opcode::MoveResultObject))
//!     .build();
//! assert_eq!(fingerprint.name(), "check-ad-eligibility");
//! ```

pub mod pattern;
mod resolver;

use std::{fmt, sync::Arc};

use crate::model::{AccessFlags, Class, Method};

pub use pattern::{find_pattern, InstructionMatcher, PatternEntry, PatternMatch, Placement};
pub use resolver::{Resolution, Resolver, StringMatch};

/// Custom predicate evaluated after every other constraint matched.
pub type CustomPredicate = Arc<dyn Fn(&Method, &Class) -> bool + Send + Sync>;

/// A declarative structural method signature.
#[derive(Clone)]
pub struct Fingerprint {
    name: String,
    access_flags: Option<AccessFlags>,
    return_type: Option<String>,
    parameters: Option<Vec<String>>,
    class_suffix: Option<String>,
    pattern: Vec<PatternEntry>,
    strings: Vec<String>,
    custom: Option<CustomPredicate>,
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fingerprint")
            .field("name", &self.name)
            .field("access_flags", &self.access_flags)
            .field("return_type", &self.return_type)
            .field("parameters", &self.parameters)
            .field("class_suffix", &self.class_suffix)
            .field("pattern", &self.pattern)
            .field("strings", &self.strings)
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

impl Fingerprint {
    /// Starts building a fingerprint with the given unique name.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> FingerprintBuilder {
        FingerprintBuilder {
            fingerprint: Fingerprint {
                name: name.into(),
                access_flags: None,
                return_type: None,
                parameters: None,
                class_suffix: None,
                pattern: Vec::new(),
                strings: Vec::new(),
                custom: None,
            },
        }
    }

    /// The fingerprint name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Required access flags (exact), if constrained.
    #[must_use]
    pub fn access_flags(&self) -> Option<AccessFlags> {
        self.access_flags
    }

    /// Required return type prefix, if constrained.
    #[must_use]
    pub fn return_type(&self) -> Option<&str> {
        self.return_type.as_deref()
    }

    /// Required parameter type prefixes, if constrained.
    #[must_use]
    pub fn parameters(&self) -> Option<&[String]> {
        self.parameters.as_deref()
    }

    /// Required defining-class suffix, if constrained.
    #[must_use]
    pub fn class_suffix(&self) -> Option<&str> {
        self.class_suffix.as_deref()
    }

    /// The instruction pattern.
    #[must_use]
    pub fn pattern(&self) -> &[PatternEntry] {
        &self.pattern
    }

    /// Required string literals.
    #[must_use]
    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    /// Checks the metadata constraints, cheapest first: access flags, return type, parameter
    /// arity and prefixes, class suffix.
    #[must_use]
    pub fn matches_signature(&self, class: &Class, method: &Method) -> bool {
        if let Some(flags) = self.access_flags {
            if method.flags() != flags {
                return false;
            }
        }

        if let Some(prefix) = &self.return_type {
            if !method.return_type().as_str().starts_with(prefix.as_str()) {
                return false;
            }
        }

        if let Some(prefixes) = &self.parameters {
            let actual = &method.descriptor().parameters;
            if actual.len() != prefixes.len() {
                return false;
            }
            let all = actual
                .iter()
                .zip(prefixes)
                .all(|(param, prefix)| param.as_str().starts_with(prefix.as_str()));
            if !all {
                return false;
            }
        }

        if let Some(suffix) = &self.class_suffix {
            if !class.name().as_str().ends_with(suffix.as_str()) {
                return false;
            }
        }

        true
    }

    /// Evaluates the custom predicate (true when none is set).
    #[must_use]
    pub fn matches_custom(&self, class: &Class, method: &Method) -> bool {
        self.custom
            .as_ref()
            .map_or(true, |predicate| predicate(method, class))
    }
}

/// Fluent builder for [`Fingerprint`]s.
///
/// Each method consumes and returns the builder; [`FingerprintBuilder::build`] yields the
/// immutable fingerprint.
pub struct FingerprintBuilder {
    fingerprint: Fingerprint,
}

impl FingerprintBuilder {
    /// Requires exactly these access flags.
    #[must_use]
    pub fn access_flags(mut self, flags: AccessFlags) -> Self {
        self.fingerprint.access_flags = Some(flags);
        self
    }

    /// Requires the return type descriptor to start with `prefix`.
    #[must_use]
    pub fn returns(mut self, prefix: impl Into<String>) -> Self {
        self.fingerprint.return_type = Some(prefix.into());
        self
    }

    /// Requires exactly `prefixes.len()` parameters, each starting with its prefix.
    #[must_use]
    pub fn parameters<S: AsRef<str>>(mut self, prefixes: &[S]) -> Self {
        self.fingerprint.parameters = Some(prefixes.iter().map(|p| p.as_ref().to_string()).collect());
        self
    }

    /// Requires the defining class descriptor to end with `suffix`.
    #[must_use]
    pub fn class_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.fingerprint.class_suffix = Some(suffix.into());
        self
    }

    /// Appends a pattern entry.
    #[must_use]
    pub fn pattern(mut self, entry: PatternEntry) -> Self {
        self.fingerprint.pattern.push(entry);
        self
    }

    /// Appends adjacent opcode entries.
    #[must_use]
    pub fn opcodes(mut self, opcodes: &[crate::model::Opcode]) -> Self {
        self.fingerprint
            .pattern
            .extend(opcodes.iter().map(|op| PatternEntry::adjacent(*op)));
        self
    }

    /// Requires a `const-string` with this exact value somewhere in the body.
    #[must_use]
    pub fn string(mut self, value: impl Into<String>) -> Self {
        self.fingerprint.strings.push(value.into());
        self
    }

    /// Adds a custom predicate, evaluated last.
    #[must_use]
    pub fn custom<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Method, &Class) -> bool + Send + Sync + 'static,
    {
        self.fingerprint.custom = Some(Arc::new(predicate));
        self
    }

    /// Finishes the fingerprint.
    #[must_use]
    pub fn build(self) -> Fingerprint {
        self.fingerprint
    }
}
