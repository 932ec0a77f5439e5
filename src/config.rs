//! Configuration for resolution and patching.
//!
//! This module provides [`EngineConfig`], shared by the [`crate::fingerprint::Resolver`], the
//! [`crate::patch::MethodEditor`] instances opened through a [`crate::PatchContext`] and the
//! [`crate::gate::ConditionGate`]. It is a plain struct with public fields; presets and
//! `with_*` setters cover the common combinations. Plan files may embed it as JSON.

use serde::{Deserialize, Serialize};

/// How the resolver treats a fingerprint that matches more than one method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityPolicy {
    /// The first match in corpus order wins; every candidate is logged as a warning.
    #[default]
    FirstMatch,
    /// Ambiguity is a resolution failure ([`crate::Error::AmbiguousFingerprint`]).
    Reject,
}

impl AmbiguityPolicy {
    /// Returns a human-readable name for this policy.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::FirstMatch => "first match",
            Self::Reject => "reject",
        }
    }
}

/// Configuration for the resolution and patching engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Resolve independent fingerprints on the rayon thread pool (default: true).
    pub parallel_resolution: bool,

    /// Method count above which candidate scanning for a single fingerprint is split across
    /// threads (default: 4096).
    pub parallel_threshold: usize,

    /// Tie-break behaviour for fingerprints matching several methods.
    pub ambiguity: AmbiguityPolicy,

    /// Promote `goto` to `goto/16` / `goto/32` when an edit pushes its target out of reach
    /// (default: true).
    pub widen_branches: bool,

    /// Prefix of labels allocated by condition gates (default: `"gate"`).
    pub gate_label_prefix: String,

    /// Local register the condition gate and the neutralizer write to (default: 0).
    pub scratch_register: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallel_resolution: true,
            parallel_threshold: 4096,
            ambiguity: AmbiguityPolicy::FirstMatch,
            widen_branches: true,
            gate_label_prefix: "gate".to_string(),
            scratch_register: 0,
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a strict configuration: ambiguous fingerprints fail, branches are never
    /// rewritten behind the caller's back.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            ambiguity: AmbiguityPolicy::Reject,
            widen_branches: false,
            ..Self::default()
        }
    }

    /// Creates a single-threaded configuration, useful for reproducible logs and debugging.
    #[must_use]
    pub fn sequential() -> Self {
        Self {
            parallel_resolution: false,
            parallel_threshold: usize::MAX,
            ..Self::default()
        }
    }

    /// Sets the ambiguity policy.
    #[must_use]
    pub fn with_ambiguity(mut self, policy: AmbiguityPolicy) -> Self {
        self.ambiguity = policy;
        self
    }

    /// Enables or disables parallel resolution and sets the scan threshold.
    #[must_use]
    pub fn with_parallelism(mut self, enabled: bool, threshold: usize) -> Self {
        self.parallel_resolution = enabled;
        self.parallel_threshold = threshold;
        self
    }

    /// Sets the label prefix used by condition gates.
    #[must_use]
    pub fn with_gate_label_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.gate_label_prefix = prefix.into();
        self
    }

    /// Sets the scratch register.
    #[must_use]
    pub fn with_scratch_register(mut self, register: u16) -> Self {
        self.scratch_register = register;
        self
    }
}
