//! End-to-end test of a gated "block video ads" patch.
//!
//! The patch neutralizes the ad request entry points of several owner types and rewrites three
//! fingerprint-located methods so that, while the setting is enabled, they report that no ad
//! can be shown. With the setting disabled every patched method falls through to its original
//! code.

mod common;

use common::{load_sample, method, trace, Exit, SHOULD_BLOCK_VIDEO_ADS};
use dexpatch::prelude::*;

const VIDEO_AD_MANAGER: &str = "Ltv/twitch/android/shared/ads/VideoAdManager;";
const CHECK_LAMBDA: &str =
    "Ltv/twitch/android/shared/ads/VideoAdManager$checkAdEligibilityAndRequestAd$1;";
const PRESENTER: &str = "Ltv/twitch/android/shared/display/ads/theatre/StreamDisplayAdsPresenter;";
const CONTENT_CONFIG: &str = "Ltv/twitch/android/api/parsers/ContentConfigData;";
const AD_FORMAT_DECLINED: &str =
    "Ltv/twitch/android/shared/display/ads/theatre/StreamDisplayAdsPresenter$Action$AdFormatDeclined;";
const STATE_MACHINE_PLUS: &str = "Ltv/twitch/android/core/mvp/presenter/StateMachineKt;->plus(Ltv/twitch/android/core/mvp/presenter/PresenterState;Ltv/twitch/android/core/mvp/presenter/PresenterAction;)Ltv/twitch/android/core/mvp/presenter/StateAndAction;";

struct VideoAdsPatch {
    gate: ConditionGate,
}

impl VideoAdsPatch {
    fn new() -> Result<Self> {
        let reader = StaticAccessor::new(
            "revanced_block_video_ads",
            MethodRef::parse(SHOULD_BLOCK_VIDEO_ADS)?,
        )?;
        Ok(VideoAdsPatch {
            gate: ConditionGate::new(Box::new(reader)),
        })
    }

    fn check_ad_eligibility() -> Fingerprint {
        Fingerprint::builder("check-ad-eligibility-lambda")
            .access_flags(AccessFlags::PUBLIC | AccessFlags::FINAL)
            .returns("Lio/reactivex/Single;")
            .parameters(&["L"])
            .class_suffix("VideoAdManager$checkAdEligibilityAndRequestAd$1;")
            .custom(|method, _| method.name() == "apply")
            .build()
    }

    fn get_ready_to_show_ad() -> Fingerprint {
        Fingerprint::builder("get-ready-to-show-ad")
            .returns("Ltv/twitch/android/core/mvp/presenter/StateAndAction;")
            .parameters(&["L", "L"])
            .pattern(PatternEntry::adjacent(Opcode::IgetBoolean))
            .pattern(PatternEntry::adjacent(Opcode::IfEqz))
            .pattern(PatternEntry::anywhere(InstructionMatcher::Reference {
                opcode: Some(Opcode::SgetObject),
                target: format!("{AD_FORMAT_DECLINED}->INSTANCE:{AD_FORMAT_DECLINED}"),
            }))
            .build()
    }

    fn content_config_show_ads() -> Fingerprint {
        Fingerprint::builder("content-config-show-ads")
            .access_flags(AccessFlags::PUBLIC | AccessFlags::FINAL)
            .returns("Z")
            .parameters::<&str>(&[])
            .class_suffix("/ContentConfigData;")
            .opcodes(&[Opcode::IgetBoolean, Opcode::Return])
            .build()
    }

    fn block(&self, ctx: &mut PatchContext, owner: &str, names: &[&str], spec: ReturnSpec) -> Result<()> {
        Neutralizer::with_config(ctx.config())
            .gate(&self.gate)
            .block_methods(ctx.corpus_mut(), owner, names, spec)?;
        Ok(())
    }
}

impl Patch for VideoAdsPatch {
    fn name(&self) -> &str {
        "block-video-ads"
    }

    fn description(&self) -> &str {
        "Blocks video ads in streams and VODs"
    }

    fn fingerprints(&self) -> Result<Vec<Fingerprint>> {
        Ok(vec![
            Self::content_config_show_ads(),
            Self::check_ad_eligibility(),
            Self::get_ready_to_show_ad(),
        ])
    }

    fn execute(&self, ctx: &mut PatchContext) -> Result<()> {
        self.block(
            ctx,
            "Lcom/amazon/ads/video/player/AdsManagerImpl;",
            &["playAds"],
            ReturnSpec::Void,
        )?;
        self.block(
            ctx,
            VIDEO_AD_MANAGER,
            &["checkAdEligibilityAndRequestAd", "requestAd", "requestAds"],
            ReturnSpec::Void,
        )?;
        self.block(
            ctx,
            "Ltv/twitch/android/provider/experiments/helpers/DisplayAdsExperimentHelper;",
            &["areDisplayAdsEnabled"],
            ReturnSpec::Boolean(false),
        )?;
        self.block(
            ctx,
            "Ltv/twitch/android/shared/ads/MultiformatAdsExperiment;",
            &["shouldDisableClientSideLivePreroll", "shouldDisableClientSideVodPreroll"],
            ReturnSpec::Boolean(true),
        )?;

        // Pretend the player is ineligible for all ads
        let handle = ctx.resolution("check-ad-eligibility-lambda")?.handle;
        let body = Block::parse(&[
            "const/4 v0, 0x0",
            "invoke-static {v0}, Lio/reactivex/Single;->just(Ljava/lang/Object;)Lio/reactivex/Single;",
            "move-result-object p0",
            "return-object p0",
        ])?;
        self.gate.guard(&mut ctx.editor(handle)?, 0, body)?;

        let handle = ctx.resolution("get-ready-to-show-ad")?.handle;
        let mut asm = InstructionBuilder::new();
        asm.sget_object(
            Register::Param(2),
            FieldRef::parse(&format!("{AD_FORMAT_DECLINED}->INSTANCE:{AD_FORMAT_DECLINED}"))?,
        )?
        .invoke_static(
            &[Register::Param(1), Register::Param(2)],
            MethodRef::parse(STATE_MACHINE_PLUS)?,
        )?
        .move_result_object(Register::Param(1))?
        .return_object(Register::Param(1))?;
        self.gate.guard(&mut ctx.editor(handle)?, 0, asm.finish()?)?;

        // Spoof the showAds field; the skip label sits inside the inserted block
        let handle = ctx.resolution("content-config-show-ads")?.handle;
        let mut editor = ctx.editor(handle)?;
        let label = self.gate.fresh_label(editor.method());
        let mut block = self.gate.create_condition_block(&label)?;
        block.append(Block::parse(&[
            "const/4 v0, 0x0".to_string(),
            format!(":{label}"),
            "return v0".to_string(),
        ])?)?;
        editor.insert_at(0, block)?;
        Ok(())
    }
}

fn patched() -> Result<Corpus> {
    let mut ctx = PatchContext::new(load_sample("video_ads.smali")?);
    let patch = VideoAdsPatch::new()?;
    let applied = ctx.apply(&[&patch])?;
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].fingerprints, 3);
    Ok(ctx.into_corpus())
}

#[test]
fn video_ads_blocked_when_enabled() -> Result<()> {
    let corpus = patched()?;

    let areads = method(
        &corpus,
        "Ltv/twitch/android/provider/experiments/helpers/DisplayAdsExperimentHelper;",
        "areDisplayAdsEnabled",
    )?;
    assert_eq!(trace(areads, SHOULD_BLOCK_VIDEO_ADS, true).exit, Exit::Value(Some(0)));

    let preroll = method(
        &corpus,
        "Ltv/twitch/android/shared/ads/MultiformatAdsExperiment;",
        "shouldDisableClientSideLivePreroll",
    )?;
    assert_eq!(trace(preroll, SHOULD_BLOCK_VIDEO_ADS, true).exit, Exit::Value(Some(1)));

    for handle in corpus.find_methods(VIDEO_AD_MANAGER, "requestAd")? {
        let request = corpus
            .method(handle)
            .ok_or_else(|| Error::ResolutionFailure {
                fingerprint: "requestAd".to_string(),
            })?;
        let traced = trace(request, SHOULD_BLOCK_VIDEO_ADS, true);
        assert_eq!(traced.exit, Exit::Void);
        assert_eq!(traced.path, vec![0, 1, 2, 3]);
    }

    let show_ads = method(&corpus, CONTENT_CONFIG, "getShowAds")?;
    assert_eq!(trace(show_ads, SHOULD_BLOCK_VIDEO_ADS, true).exit, Exit::Value(Some(0)));

    // the lambda returns Single.just(...) which the tracer can't evaluate, but it must not
    // touch the original body
    let lambda = method(&corpus, CHECK_LAMBDA, "apply")?;
    let traced = trace(lambda, SHOULD_BLOCK_VIDEO_ADS, true);
    assert_eq!(traced.exit, Exit::Value(None));
    assert_eq!(traced.path, vec![0, 1, 2, 3, 4, 5, 6]);
    Ok(())
}

#[test]
fn video_ads_original_code_when_disabled() -> Result<()> {
    let corpus = patched()?;

    let preroll = method(
        &corpus,
        "Ltv/twitch/android/shared/ads/MultiformatAdsExperiment;",
        "shouldDisableClientSideLivePreroll",
    )?;
    // gate (3) + early return (2), then the original const/4 v0, 0x0
    let traced = trace(preroll, SHOULD_BLOCK_VIDEO_ADS, false);
    assert_eq!(traced.path, vec![0, 1, 2, 5, 6]);
    assert_eq!(traced.exit, Exit::Value(Some(0)));

    let lambda = method(&corpus, CHECK_LAMBDA, "apply")?;
    let traced = trace(lambda, SHOULD_BLOCK_VIDEO_ADS, false);
    assert_eq!(traced.path[..4], [0, 1, 2, 7]);

    let presenter = method(&corpus, PRESENTER, "getReadyToShowAdOrAbort")?;
    let traced = trace(presenter, SHOULD_BLOCK_VIDEO_ADS, false);
    // original iget-boolean, then an unknown branch condition
    assert_eq!(traced.path, vec![0, 1, 2, 7, 8]);
    assert_eq!(traced.exit, Exit::Unmodelled(8));

    let show_ads = method(&corpus, CONTENT_CONFIG, "getShowAds")?;
    let traced = trace(show_ads, SHOULD_BLOCK_VIDEO_ADS, false);
    // the skip label lands on the injected return, which returns the (false) flag
    assert_eq!(traced.path, vec![0, 1, 2, 4]);
    assert_eq!(traced.exit, Exit::Value(Some(0)));
    Ok(())
}

#[test]
fn video_ads_labels_consistent() -> Result<()> {
    let corpus = patched()?;

    let presenter = method(&corpus, PRESENTER, "getReadyToShowAdOrAbort")?;
    // 3 gate + 4 injected instructions shift the original :abort (5) to 12
    assert_eq!(presenter.label_index("abort"), Some(12));
    assert_eq!(presenter.instructions().len(), 16);
    assert_eq!(
        presenter.instructions()[3].to_string(),
        format!("sget-object p2, {AD_FORMAT_DECLINED}->INSTANCE:{AD_FORMAT_DECLINED}")
    );

    for (_, _, method) in corpus.methods() {
        dexpatch::patch::validate_method(method)?;
    }
    Ok(())
}

#[test]
fn video_ads_roundtrip_listing() -> Result<()> {
    let corpus = patched()?;
    let reparsed = Corpus::from_listing(&corpus.to_listing())?;
    assert_eq!(reparsed, corpus);
    Ok(())
}

#[test]
fn video_ads_missing_target_leaves_corpus_untouched() -> Result<()> {
    let mut corpus = load_sample("video_ads.smali")?;
    let before = corpus.clone();
    let result = Neutralizer::new().block_methods(
        &mut corpus,
        VIDEO_AD_MANAGER,
        &["requestAd", "requestMidroll"],
        ReturnSpec::Void,
    );
    assert!(matches!(result, Err(Error::MethodNotFound { .. })));
    assert_eq!(corpus, before);
    Ok(())
}
