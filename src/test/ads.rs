//! A small ad SDK used across the unit tests.

use crate::{model::Corpus, Result};

pub const ADS_CLIENT: &str = "Lcom/example/ads/AdClient;";
pub const ADS_TRACKER: &str = "Lcom/example/ads/AdTracker;";

pub const ADS_LISTING: &str = r#"
.class public Lcom/example/ads/AdClient;
.super Ljava/lang/Object;

.method public requestAd(I)Z
    .registers 3
    if-lez p1, :none
    const/4 v0, 0x1
    return v0
    :none
    const/4 v0, 0x0
    return v0
.end method

.method public requestAd(ILjava/lang/String;)Z
    .registers 4
    invoke-virtual {p0, p1}, Lcom/example/ads/AdClient;->requestAd(I)Z
    move-result v0
    return v0
.end method

.method public loadAd()V
    .registers 2
    const-string v0, "ad_unit_id"
    invoke-static {v0}, Lcom/example/ads/AdLoader;->load(Ljava/lang/String;)V
    return-void
.end method

.method public getAdCount()I
    .registers 2
    const/16 v0, 0xa
    return v0
.end method

.method public native nativeTrack()V
.end method

.end class

.class public final Lcom/example/ads/AdTracker;
.super Ljava/lang/Object;

.method public static track(Ljava/lang/String;J)V
    .registers 3
    return-void
.end method

.method public static getSessionId()J
    .registers 2
    const-wide v0, 0x1
    return-wide v0
.end method

.method public static getRate()F
    .registers 1
    const v0, 0x3f800000
    return v0
.end method

.method public static getRevenue()D
    .registers 2
    const-wide v0, 0x0
    return-wide v0
.end method

.method public static getSlot()S
    .registers 1
    const/4 v0, 0x5
    return v0
.end method

.method public static getBanner()Ljava/lang/Object;
    .registers 1
    const/4 v0, 0x0
    return-object v0
.end method

.end class
"#;

pub fn ads_corpus() -> Result<Corpus> {
    Corpus::from_listing(ADS_LISTING)
}
