//! Declarative patch plans.
//!
//! A [`PatchPlan`] describes a patch as JSON data: an optional flag definition for condition
//! gates, an optional [`EngineConfig`], and an ordered list of steps. A `block` step
//! neutralizes methods by name, an `inject` step locates a method by fingerprint and inserts
//! listing-syntax code into it.
//!
//! ```json
//! {
//!   "name": "video-ads",
//!   "flag": {
//!     "reader": "static_accessor",
//!     "key": "block_video_ads",
//!     "method": "Lcom/example/Settings;->shouldShowAds()Z"
//!   },
//!   "steps": [
//!     { "action": "block", "owner": "Lcom/example/AdTracker;", "methods": ["track"], "returns": "V" },
//!     {
//!       "action": "inject",
//!       "fingerprint": { "name": "show-ad", "returns": "Z", "strings": ["ad_shown"] },
//!       "code": ["const/4 v0, 0x0", "return v0"],
//!       "gate": true
//!     }
//!   ]
//! }
//! ```
//!
//! Plans are validated when loaded: return specs, code lines, method references and flag
//! usage are checked before anything touches a corpus.

use std::{fs, path::Path};

use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    config::EngineConfig,
    context::{Patch, PatchContext},
    fingerprint::{Fingerprint, PatternEntry},
    gate::{ConditionGate, FlagReader, SettingsLookup, StaticAccessor},
    model::{AccessFlags, MethodRef},
    neutralize::{BlockStyle, Neutralizer, ReturnSpec},
    patch::Block,
    Error, Result,
};

/// How the flag of a condition gate is read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reader", rename_all = "snake_case")]
pub enum FlagSource {
    /// A static `()Z` accessor
    StaticAccessor {
        /// Settings key
        key: String,
        /// Accessor reference, `Lowner;->name()Z`
        method: String,
    },
    /// A static `(Ljava/lang/String;)Z` lookup receiving the key
    SettingsLookup {
        /// Settings key
        key: String,
        /// Lookup reference, `Lowner;->name(Ljava/lang/String;)Z`
        method: String,
    },
}

impl FlagSource {
    /// Creates the flag reader.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidDescriptor`] if the method reference is malformed or has
    /// the wrong signature.
    pub fn reader(&self) -> Result<Box<dyn FlagReader>> {
        Ok(match self {
            FlagSource::StaticAccessor { key, method } => {
                Box::new(StaticAccessor::new(key.clone(), MethodRef::parse(method)?)?)
            }
            FlagSource::SettingsLookup { key, method } => {
                Box::new(SettingsLookup::new(key.clone(), MethodRef::parse(method)?)?)
            }
        })
    }

    /// The settings key.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            FlagSource::StaticAccessor { key, .. } | FlagSource::SettingsLookup { key, .. } => key,
        }
    }
}

/// Serializable form of a [`Fingerprint`] (without custom predicate).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintDef {
    /// Unique fingerprint name
    pub name: String,
    /// Exact access flags as keywords, e.g. `["public", "final"]`
    pub access_flags: Option<Vec<String>>,
    /// Return type prefix
    pub returns: Option<String>,
    /// Parameter type prefixes
    pub parameters: Option<Vec<String>>,
    /// Defining-class suffix
    pub class_suffix: Option<String>,
    /// Instruction pattern
    pub pattern: Vec<PatternEntry>,
    /// Required string literals
    pub strings: Vec<String>,
}

impl FingerprintDef {
    /// Builds the fingerprint.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::Error::Malformed`] error for an empty name or an unknown access flag
    /// keyword.
    pub fn to_fingerprint(&self) -> Result<Fingerprint> {
        if self.name.is_empty() {
            return Err(malformed_error!("Fingerprint definitions need a name"));
        }

        let mut builder = Fingerprint::builder(self.name.clone());
        if let Some(keywords) = &self.access_flags {
            let mut flags = AccessFlags::empty();
            for keyword in keywords {
                flags |= AccessFlags::from_keyword(keyword).ok_or_else(|| {
                    malformed_error!("Unknown access flag '{}' in fingerprint '{}'", keyword, self.name)
                })?;
            }
            builder = builder.access_flags(flags);
        }
        if let Some(returns) = &self.returns {
            builder = builder.returns(returns.clone());
        }
        if let Some(parameters) = &self.parameters {
            builder = builder.parameters(parameters);
        }
        if let Some(suffix) = &self.class_suffix {
            builder = builder.class_suffix(suffix.clone());
        }
        for entry in &self.pattern {
            builder = builder.pattern(entry.clone());
        }
        for value in &self.strings {
            builder = builder.string(value.clone());
        }
        Ok(builder.build())
    }
}

/// Reference point of an inject step's index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    /// The first instruction of the method
    #[default]
    MethodStart,
    /// The first instruction of the pattern match
    PatternStart,
    /// The instruction after the last pattern match
    PatternEnd,
}

/// Neutralizes methods by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockStep {
    /// Owner type descriptor
    pub owner: String,
    /// Method names; every overload is blocked
    pub methods: Vec<String>,
    /// The constant to return, e.g. `"Z:0"`
    pub returns: ReturnSpec,
    /// Whether the early return sits behind the plan's flag
    #[serde(default)]
    pub gate: bool,
}

/// Inserts code into a fingerprint-located method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectStep {
    /// The target
    pub fingerprint: FingerprintDef,
    /// Reference point of `index`
    #[serde(default)]
    pub anchor: Anchor,
    /// Instruction offset from the anchor
    #[serde(default)]
    pub index: usize,
    /// Listing-syntax lines; `:name` lines declare block labels
    pub code: Vec<String>,
    /// Whether the code sits behind the plan's flag
    #[serde(default)]
    pub gate: bool,
    /// Prepend or replace
    #[serde(default)]
    pub mode: BlockStyle,
}

impl InjectStep {
    fn position(&self, ctx: &PatchContext) -> Result<usize> {
        let resolution = ctx.resolution(&self.fingerprint.name)?;
        let base = match self.anchor {
            Anchor::MethodStart => 0,
            Anchor::PatternStart | Anchor::PatternEnd => {
                let found = resolution.pattern.as_ref().ok_or_else(|| {
                    malformed_error!(
                        "Fingerprint '{}' has no pattern to anchor on",
                        self.fingerprint.name
                    )
                })?;
                if self.anchor == Anchor::PatternStart {
                    found.start
                } else {
                    found.end + 1
                }
            }
        };
        base.checked_add(self.index).ok_or_else(|| Error::IndexOutOfBounds {
            method: resolution.method.to_string(),
            index: self.index,
            len: resolution
                .method(ctx.corpus())
                .map_or(0, |method| method.instructions().len()),
        })
    }
}

/// One plan step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlanStep {
    /// See [`BlockStep`]
    Block(BlockStep),
    /// See [`InjectStep`]
    Inject(InjectStep),
}

/// A patch described as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchPlan {
    /// Patch name
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Flag read by gated steps
    #[serde(default)]
    pub flag: Option<FlagSource>,
    /// Engine settings for the run
    #[serde(default)]
    pub config: Option<EngineConfig>,
    /// Steps, applied in order
    pub steps: Vec<PlanStep>,
}

impl PatchPlan {
    /// Parses and validates a JSON plan.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::PlanError`] for invalid JSON or an invalid return spec, and the
    /// errors of [`PatchPlan::validate`].
    pub fn from_json(text: &str) -> Result<Self> {
        let plan: PatchPlan = serde_json::from_str(text)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Loads and validates a JSON plan file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if the file can not be read, and the errors of
    /// [`PatchPlan::from_json`].
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        PatchPlan::from_json(&text)
    }

    /// Renders the plan as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::PlanError`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The engine configuration of the plan, or the default.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        self.config.clone().unwrap_or_default()
    }

    /// Checks everything that can be checked without a corpus.
    ///
    /// # Errors
    ///
    /// - a [`crate::Error::Malformed`] error for gated steps without a flag, replace combined
    ///   with a gate, or a bad fingerprint definition
    /// - [`crate::Error::InvalidDescriptor`] for a bad flag method
    /// - [`crate::Error::ListingSyntax`] and model errors for bad code lines
    pub fn validate(&self) -> Result<()> {
        if let Some(flag) = &self.flag {
            flag.reader()?;
        }

        for step in &self.steps {
            let gated = match step {
                PlanStep::Block(block) => block.gate,
                PlanStep::Inject(inject) => {
                    inject.fingerprint.to_fingerprint()?;
                    Block::parse(&inject.code)?;
                    if inject.gate && inject.mode == BlockStyle::Replace {
                        return Err(malformed_error!(
                            "Inject step '{}' can not both replace and be gated",
                            inject.fingerprint.name
                        ));
                    }
                    inject.gate
                }
            };
            if gated && self.flag.is_none() {
                return Err(malformed_error!(
                    "Plan '{}' has gated steps but no flag",
                    self.name
                ));
            }
        }
        Ok(())
    }

    fn gate(&self, config: &EngineConfig) -> Result<Option<ConditionGate>> {
        self.flag
            .as_ref()
            .map(|flag| Ok(ConditionGate::with_config(flag.reader()?, config)))
            .transpose()
    }
}

impl Patch for PatchPlan {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        if self.description.is_empty() {
            "No description available"
        } else {
            &self.description
        }
    }

    fn fingerprints(&self) -> Result<Vec<Fingerprint>> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                PlanStep::Inject(inject) => Some(inject.fingerprint.to_fingerprint()),
                PlanStep::Block(_) => None,
            })
            .collect()
    }

    fn execute(&self, ctx: &mut PatchContext) -> Result<()> {
        let gate = self.gate(ctx.config())?;

        for step in &self.steps {
            let step_gate = match step {
                PlanStep::Block(BlockStep { gate: true, .. })
                | PlanStep::Inject(InjectStep { gate: true, .. }) => Some(
                    gate.as_ref()
                        .ok_or_else(|| malformed_error!("Plan '{}' has no flag", self.name))?,
                ),
                _ => None,
            };

            match step {
                PlanStep::Block(block) => {
                    let mut neutralizer = Neutralizer::with_config(ctx.config());
                    if let Some(gate) = step_gate {
                        neutralizer = neutralizer.gate(gate);
                    }
                    let report = neutralizer.block_methods(
                        ctx.corpus_mut(),
                        &block.owner,
                        &block.methods,
                        block.returns,
                    )?;
                    info!(
                        "{}: blocked {} methods of {}",
                        self.name,
                        report.blocked.len(),
                        block.owner
                    );
                }
                PlanStep::Inject(inject) => {
                    let handle = ctx.resolution(&inject.fingerprint.name)?.handle;
                    let index = inject.position(ctx)?;
                    let body = Block::parse(&inject.code)?;
                    let mut editor = ctx.editor(handle)?;
                    match (step_gate, inject.mode) {
                        (Some(gate), _) => {
                            gate.guard(&mut editor, index, body)?;
                        }
                        (None, BlockStyle::Prepend) => {
                            editor.insert_at(index, body)?;
                        }
                        (None, BlockStyle::Replace) => {
                            editor.replace_from(index, body)?;
                        }
                    }
                    info!(
                        "{}: injected {} instructions into {} at {}",
                        self.name,
                        inject.code.iter().filter(|l| !l.trim_start().starts_with(':')).count(),
                        editor.method().id(),
                        index
                    );
                }
            }
        }
        Ok(())
    }
}
