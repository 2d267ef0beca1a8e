//! Ad selection: reduce a resolved VAST response to the ads a single break
//! will play.

use crate::error::{AdCueError, Result};
use crate::vast::model::{Ad, VastResponse};
use tracing::debug;

/// Pick the ads to play from a VAST response.
///
/// Ads carrying a pod `sequence` attribute win and play back-to-back in
/// ascending sequence order. Without a pod, only the first playable
/// standalone ad is used. Ads without a linear creative holding media files
/// are never selected.
pub fn select_ads(response: &VastResponse) -> Result<Vec<Ad>> {
    if response.ads.is_empty() {
        return Err(AdCueError::NoAds("empty VAST response".to_string()));
    }

    let playable: Vec<&Ad> = response
        .ads
        .iter()
        .filter(|ad| ad.linear_creative().is_some())
        .collect();

    if playable.is_empty() {
        return Err(AdCueError::NoAds(
            "no ad with a playable linear creative".to_string(),
        ));
    }

    let mut pod: Vec<Ad> = playable
        .iter()
        .filter(|ad| ad.sequence.is_some())
        .map(|ad| (*ad).clone())
        .collect();

    if !pod.is_empty() {
        pod.sort_by_key(|ad| ad.sequence);
        debug!("Selected ad pod with {} ad(s)", pod.len());
        return Ok(pod);
    }

    debug!("Selected standalone ad {}", playable[0].id);
    Ok(vec![playable[0].clone()])
}
