//! Patch orchestration.
//!
//! The [`PatchContext`] owns the corpus for the duration of a run together with the
//! [`Resolver`] and the [`EngineConfig`]. [`PatchContext::apply`] runs a list of [`Patch`]es in
//! two phases: every fingerprint declared by every patch is resolved first (all of them must
//! match), then the patches execute in order. The first failing patch aborts the run; patches
//! that already executed stay applied.
//!
//! Resolutions are taken before any patch runs, so their pattern and string indices describe
//! the unpatched bodies. A patch that edits a method another patch resolved has to account for
//! the shift itself.

use std::time::{Duration, Instant};

use log::{debug, info};

use crate::{
    config::EngineConfig,
    fingerprint::{Fingerprint, Resolution, Resolver},
    model::{Corpus, MethodHandle},
    patch::MethodEditor,
    Error, Result,
};

/// A unit of modification applied to a corpus.
///
/// Patches don't resolve their own targets. They declare fingerprints through
/// [`Patch::fingerprints`]; the context resolves them before the first patch runs and hands
/// out the results through [`PatchContext::resolution`].
pub trait Patch: Send + Sync {
    /// Unique name for logging and reports.
    fn name(&self) -> &str;

    /// Get a description of what this patch does.
    fn description(&self) -> &str {
        "No description available"
    }

    /// Fingerprints that must resolve before [`Patch::execute`] runs.
    ///
    /// # Errors
    ///
    /// Returns an error if a fingerprint can not be built; nothing executes in that case.
    fn fingerprints(&self) -> Result<Vec<Fingerprint>> {
        Ok(Vec::new())
    }

    /// Applies the patch.
    ///
    /// # Errors
    ///
    /// Returns an error if any edit fails. Edits committed before the failure stay in place.
    fn execute(&self, ctx: &mut PatchContext) -> Result<()>;
}

/// Summary of one executed patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedPatch {
    /// Name of the patch
    pub name: String,
    /// Number of fingerprints it declared
    pub fingerprints: usize,
    /// Wall time spent in [`Patch::execute`]
    pub elapsed: Duration,
}

/// State shared by all patches of a run.
pub struct PatchContext {
    corpus: Corpus,
    resolver: Resolver,
    config: EngineConfig,
}

impl PatchContext {
    /// Creates a context with the default configuration.
    #[must_use]
    pub fn new(corpus: Corpus) -> Self {
        PatchContext::with_config(corpus, EngineConfig::default())
    }

    /// Creates a context with `config`.
    #[must_use]
    pub fn with_config(corpus: Corpus, config: EngineConfig) -> Self {
        PatchContext {
            resolver: Resolver::new(&config),
            corpus,
            config,
        }
    }

    /// The corpus.
    #[must_use]
    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    /// Mutable access to the corpus.
    pub fn corpus_mut(&mut self) -> &mut Corpus {
        &mut self.corpus
    }

    /// Ends the run and returns the corpus.
    #[must_use]
    pub fn into_corpus(self) -> Corpus {
        self.corpus
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The resolver and its cache.
    #[must_use]
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Resolves `fingerprints` against the current corpus.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ResolutionFailure`] for the first fingerprint (in input order)
    /// without a match, or any error of [`Resolver::resolve_all`].
    pub fn resolve(&self, fingerprints: &[Fingerprint]) -> Result<Vec<Resolution>> {
        let results = self.resolver.resolve_all(fingerprints, &self.corpus)?;
        fingerprints
            .iter()
            .zip(results)
            .map(|(fingerprint, result)| {
                result.ok_or_else(|| Error::ResolutionFailure {
                    fingerprint: fingerprint.name().to_string(),
                })
            })
            .collect()
    }

    /// The resolution of a fingerprint resolved earlier in this run.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ResolutionFailure`] if `name` was never resolved or matched
    /// nothing.
    pub fn resolution(&self, name: &str) -> Result<Resolution> {
        self.resolver
            .get(name)
            .ok_or_else(|| Error::ResolutionFailure {
                fingerprint: name.to_string(),
            })
    }

    /// Opens an editor on a method, honouring [`EngineConfig::widen_branches`].
    ///
    /// # Errors
    ///
    /// Returns a [`crate::Error::Malformed`] error for a foreign handle and any error of
    /// [`MethodEditor::new`].
    pub fn editor(&mut self, handle: MethodHandle) -> Result<MethodEditor<'_>> {
        let widen = self.config.widen_branches;
        let method = self.corpus.get_method_mut(handle)?;
        Ok(MethodEditor::new(method)?.widen_branches(widen))
    }

    /// Resolves every declared fingerprint, then executes `patches` in order.
    ///
    /// # Errors
    ///
    /// Fails before any patch runs if a fingerprint does not resolve. Afterwards the first
    /// error of [`Patch::execute`] aborts the run.
    pub fn apply(&mut self, patches: &[&dyn Patch]) -> Result<Vec<AppliedPatch>> {
        let declared = patches
            .iter()
            .map(|p| p.fingerprints())
            .collect::<Result<Vec<_>>>()?;
        let all: Vec<Fingerprint> = declared.iter().flatten().cloned().collect();
        let resolved = self.resolve(&all)?;
        debug!(
            "Resolved {} fingerprints for {} patches",
            resolved.len(),
            patches.len()
        );

        let mut applied = Vec::with_capacity(patches.len());
        for (patch, fingerprints) in patches.iter().zip(&declared) {
            let start = Instant::now();
            patch.execute(self)?;
            let elapsed = start.elapsed();
            info!("Applied patch '{}' in {:?}", patch.name(), elapsed);
            applied.push(AppliedPatch {
                name: patch.name().to_string(),
                fingerprints: fingerprints.len(),
                elapsed,
            });
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::Opcode,
        neutralize::{Neutralizer, ReturnSpec},
        test::{ads_corpus, ADS_CLIENT, ADS_TRACKER},
    };

    struct ForceZeroCount;

    impl Patch for ForceZeroCount {
        fn name(&self) -> &str {
            "force-zero-count"
        }

        fn fingerprints(&self) -> Result<Vec<Fingerprint>> {
            Ok(vec![Fingerprint::builder("ad-count")
                .returns("I")
                .parameters::<&str>(&[])
                .opcodes(&[Opcode::Const16, Opcode::Return])
                .build()])
        }

        fn execute(&self, ctx: &mut PatchContext) -> Result<()> {
            let handle = ctx.resolution("ad-count")?.handle;
            ctx.editor(handle)?
                .replace_instruction(0, crate::model::listing::parse_instruction("const/4 v0, 0x0")?)?;
            Ok(())
        }
    }

    struct SilenceTracker;

    impl Patch for SilenceTracker {
        fn name(&self) -> &str {
            "silence-tracker"
        }

        fn execute(&self, ctx: &mut PatchContext) -> Result<()> {
            Neutralizer::with_config(ctx.config()).block_methods(
                ctx.corpus_mut(),
                ADS_TRACKER,
                &["track"],
                ReturnSpec::Void,
            )?;
            Ok(())
        }
    }

    struct Unresolvable;

    impl Patch for Unresolvable {
        fn name(&self) -> &str {
            "unresolvable"
        }

        fn fingerprints(&self) -> Result<Vec<Fingerprint>> {
            Ok(vec![Fingerprint::builder("missing").string("never there").build()])
        }

        fn execute(&self, _ctx: &mut PatchContext) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_apply_in_order() -> Result<()> {
        let mut ctx = PatchContext::new(ads_corpus()?);
        let applied = ctx.apply(&[&ForceZeroCount, &SilenceTracker])?;
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0].name, "force-zero-count");
        assert_eq!(applied[0].fingerprints, 1);

        let corpus = ctx.into_corpus();
        let handle = corpus.find_methods(ADS_CLIENT, "getAdCount")?[0];
        let first = corpus
            .method(handle)
            .map(|m| m.instructions()[0].to_string());
        assert_eq!(first.as_deref(), Some("const/4 v0, 0x0"));
        Ok(())
    }

    #[test]
    fn test_unresolved_fingerprint_stops_before_execution() -> Result<()> {
        let mut ctx = PatchContext::new(ads_corpus()?);
        let before = ctx.corpus().clone();
        let result = ctx.apply(&[&SilenceTracker, &Unresolvable]);
        assert!(matches!(
            result,
            Err(Error::ResolutionFailure { fingerprint }) if fingerprint == "missing"
        ));
        assert_eq!(ctx.corpus(), &before);
        Ok(())
    }

    #[test]
    fn test_editor_respects_finalized() -> Result<()> {
        let mut corpus = ads_corpus()?;
        corpus.finalize()?;
        let mut ctx = PatchContext::new(corpus);
        let handle = ctx.corpus().find_methods(ADS_CLIENT, "loadAd")?[0];
        assert!(matches!(ctx.editor(handle), Err(Error::MethodFinalized(_))));
        Ok(())
    }

    #[test]
    fn test_resolution_lookup() -> Result<()> {
        let ctx = PatchContext::new(ads_corpus()?);
        assert!(ctx.resolution("ad-count").is_err());
        ctx.resolve(&ForceZeroCount.fingerprints()?)?;
        assert_eq!(ctx.resolution("ad-count")?.method.name, "getAdCount");
        Ok(())
    }
}
