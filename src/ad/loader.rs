//! Ad loading: turn a configured ad source into tracked, playable ads.
//!
//! URL sources are an ordered waterfall: each URL is tried in turn and the
//! first response yielding playable ads wins. A break whose waterfall is
//! exhausted resolves to no ads rather than an error, so content playback
//! is never blocked by a misbehaving ad server.

use crate::ad::selector::select_ads;
use crate::ad::tracked::TrackedAd;
use crate::config::{AdSource, CompanionOptions};
use crate::error::Result;
use crate::tracker::{Beacon, Tracker};
use crate::vast::fetch::{FetchOptions, VastFetcher};
use crate::vast::model::{Ad, CompanionCreative, CompanionVariation};
use std::sync::Arc;
use tracing::{info, warn};

pub struct AdLoader<F: VastFetcher> {
    fetcher: Arc<F>,
    beacon: Arc<dyn Beacon>,
    fetch_options: FetchOptions,
    companion_options: CompanionOptions,
}

impl<F: VastFetcher> AdLoader<F> {
    pub fn new(
        fetcher: Arc<F>,
        beacon: Arc<dyn Beacon>,
        fetch_options: FetchOptions,
        companion_options: CompanionOptions,
    ) -> Self {
        Self {
            fetcher,
            beacon,
            fetch_options,
            companion_options,
        }
    }

    /// Load and select the ads for one break.
    ///
    /// Returns an empty vec when the source yields nothing playable; only
    /// malformed inline XML surfaces as an error.
    pub async fn load_ads(&self, source: &AdSource) -> Result<Vec<TrackedAd>> {
        match source {
            AdSource::Xml(xml) => {
                let response = self.fetcher.parse_document(xml)?;
                match select_ads(&response) {
                    Ok(ads) => Ok(self.build_tracked(ads)),
                    Err(e) => {
                        warn!("Inline VAST document yielded no ads: {}", e);
                        Ok(Vec::new())
                    }
                }
            }
            AdSource::Url(urls) => Ok(self.load_from_waterfall(urls).await),
        }
    }

    async fn load_from_waterfall(&self, urls: &[String]) -> Vec<TrackedAd> {
        for url in urls {
            match self.fetcher.fetch(url, &self.fetch_options).await {
                Ok(response) => match select_ads(&response) {
                    Ok(ads) => {
                        info!("Loaded {} ad(s) from {}", ads.len(), url);
                        return self.build_tracked(ads);
                    }
                    Err(e) => {
                        warn!("No playable ads from {}: {}", url, e);
                    }
                },
                Err(e) => {
                    warn!("Ad tag request failed for {}: {}", url, e);
                }
            }
        }
        warn!("Ad waterfall exhausted ({} URL(s)), break has no ads", urls.len());
        Vec::new()
    }

    fn build_tracked(&self, ads: Vec<Ad>) -> Vec<TrackedAd> {
        ads.into_iter()
            .filter_map(|ad| self.track_ad(ad))
            .collect()
    }

    fn track_ad(&self, ad: Ad) -> Option<TrackedAd> {
        let creative = ad.linear_creative()?;
        let creative_id = creative.id.clone();
        let linear = creative.as_linear()?.clone();

        let companion_tracker = ad.companion_creative().and_then(|creative| {
            let companion = creative.as_companion()?;
            let variation = self.pick_companion_variation(companion)?.clone();
            Some(Arc::new(Tracker::new_companion(
                self.beacon.clone(),
                ad.clone(),
                creative.id.clone(),
                companion.clone(),
                variation,
            )))
        });

        let linear_tracker = Arc::new(Tracker::new_linear(
            self.beacon.clone(),
            ad,
            creative_id,
            linear,
        ));

        Some(TrackedAd::new(linear_tracker, companion_tracker))
    }

    /// First static-image variation that fits the configured slot.
    /// A zero max dimension means unconstrained.
    fn pick_companion_variation<'a>(
        &self,
        companion: &'a CompanionCreative,
    ) -> Option<&'a CompanionVariation> {
        let opts = &self.companion_options;
        companion.variations.iter().find(|v| {
            v.is_static_image()
                && (opts.max_width == 0 || v.width <= opts.max_width)
                && (opts.max_height == 0 || v.height <= opts.max_height)
        })
    }
}
