//! Per-creative tracking: impression, quartile, terminal and interaction
//! reports fired as fire-and-forget beacons against the ad server.

use crate::metrics;
use crate::vast::model::{Ad, CompanionCreative, CompanionVariation, LinearCreative};
use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// VAST error code: ad server response retrieved after the player's deadline
pub const ERROR_VAST_LOAD_TIMEOUT: u32 = 301;
/// VAST error code: problem displaying the media file
pub const ERROR_MEDIA_PLAYBACK: u32 = 405;
/// VAST error code: general VPAID error
pub const ERROR_VPAID_GENERAL: u32 = 901;

/// Tracking events reported at most once per playback attempt.
/// Pause/resume, mute/unmute and fullscreen transitions repeat freely.
const ONCE_ONLY_EVENTS: [&str; 10] = [
    "creativeView",
    "start",
    "firstQuartile",
    "midpoint",
    "thirdQuartile",
    "complete",
    "skip",
    "close",
    "acceptInvitation",
    "minimize",
];

/// Guard key shared by the mutually-exclusive terminal reports
const TERMINAL_KEY: &str = "__terminal";

/// Tracking beacon transport. Implementations must never block the caller.
pub trait Beacon: Send + Sync {
    fn send(&self, url: &str, event: &str);
}

/// Fire-and-forget HTTP beacon sender
///
/// Spawns a background task per beacon. No retries -- best effort as per
/// the VAST spec.
#[derive(Clone, Debug)]
pub struct HttpBeacon {
    client: reqwest::Client,
}

impl HttpBeacon {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Beacon for HttpBeacon {
    fn send(&self, url: &str, event: &str) {
        let client = self.client.clone();
        let url = url.to_string();
        let event = event.to_string();
        tokio::spawn(async move {
            match client
                .get(&url)
                .timeout(Duration::from_secs(2))
                .send()
                .await
            {
                Ok(resp) => {
                    debug!("Tracking beacon: {} -> {} ({})", event, url, resp.status());
                    metrics::record_tracking_event(&event, "success");
                }
                Err(e) => {
                    warn!("Tracking beacon failed: {} ({})", event, e);
                    metrics::record_tracking_event(&event, "error");
                }
            }
        });
    }
}

/// The creative a tracker is bound to
#[derive(Debug, Clone)]
pub enum TrackedCreative {
    Linear(LinearCreative),
    Companion {
        companion: CompanionCreative,
        variation: CompanionVariation,
    },
}

#[derive(Debug, Default)]
struct TrackerState {
    impressed: bool,
    paused: bool,
    muted: bool,
    fullscreen: bool,
    asset_duration: Option<f64>,
    progress: f64,
}

/// Tracking handle bound to one Ad + Creative (+ Variation for companions).
///
/// Owns the mutable playback-reporting state for a single ad-playback
/// attempt; shared behind an `Arc` between the sequencer, the sandbox
/// handler and the UI intents.
pub struct Tracker {
    ad: Ad,
    creative_id: String,
    creative: TrackedCreative,
    beacon: Arc<dyn Beacon>,
    fired: DashMap<String, ()>,
    state: Mutex<TrackerState>,
}

impl Tracker {
    pub fn new_linear(beacon: Arc<dyn Beacon>, ad: Ad, creative_id: String, linear: LinearCreative) -> Self {
        let asset_duration = (linear.duration > 0.0).then_some(linear.duration);
        Self {
            ad,
            creative_id,
            creative: TrackedCreative::Linear(linear),
            beacon,
            fired: DashMap::new(),
            state: Mutex::new(TrackerState {
                asset_duration,
                ..Default::default()
            }),
        }
    }

    pub fn new_companion(
        beacon: Arc<dyn Beacon>,
        ad: Ad,
        creative_id: String,
        companion: CompanionCreative,
        variation: CompanionVariation,
    ) -> Self {
        Self {
            ad,
            creative_id,
            creative: TrackedCreative::Companion { companion, variation },
            beacon,
            fired: DashMap::new(),
            state: Mutex::new(TrackerState::default()),
        }
    }

    pub fn ad(&self) -> &Ad {
        &self.ad
    }

    pub fn creative_id(&self) -> &str {
        &self.creative_id
    }

    pub fn linear(&self) -> Option<&LinearCreative> {
        match &self.creative {
            TrackedCreative::Linear(linear) => Some(linear),
            _ => None,
        }
    }

    pub fn variation(&self) -> Option<&CompanionVariation> {
        match &self.creative {
            TrackedCreative::Companion { variation, .. } => Some(variation),
            _ => None,
        }
    }

    pub fn impressed(&self) -> bool {
        self.state().impressed
    }

    pub fn asset_duration(&self) -> Option<f64> {
        self.state().asset_duration
    }

    /// Backfill the asset duration once the player reports one
    pub fn set_asset_duration(&self, seconds: f64) {
        if seconds.is_finite() && seconds > 0.0 {
            self.state().asset_duration = Some(seconds);
        }
    }

    /// Report the impression (at most once), which also counts the creative view
    pub fn track_impression(&self) {
        {
            let mut state = self.state();
            if state.impressed {
                return;
            }
            state.impressed = true;
        }
        let urls = self.ad.impression_urls.clone();
        self.report("impression", &urls, None);
        self.track("creativeView");
    }

    /// Report playhead progress, firing `start` and quartile events as
    /// thresholds are crossed
    pub fn set_progress(&self, seconds: f64) {
        let duration = {
            let mut state = self.state();
            state.progress = seconds;
            state.asset_duration
        };

        if seconds > 0.0 {
            self.track("start");
        }

        let Some(duration) = duration else { return };
        if duration <= 0.0 {
            return;
        }

        let progress = seconds / duration;
        if progress >= 0.25 {
            self.track("firstQuartile");
        }
        if progress >= 0.50 {
            self.track("midpoint");
        }
        if progress >= 0.75 {
            self.track("thirdQuartile");
        }
    }

    /// Report a named tracking event. Once-only events are de-duplicated.
    pub fn track(&self, event: &str) {
        if ONCE_ONLY_EVENTS.contains(&event) && !self.once(event) {
            return;
        }
        let urls = self.tracking_urls(event);
        self.report(event, &urls, None);
    }

    /// Report normal completion. Mutually exclusive with `skip` and `error`.
    pub fn complete(&self) {
        if !self.once(TERMINAL_KEY) {
            return;
        }
        let urls = self.tracking_urls("complete");
        self.report("complete", &urls, None);
    }

    /// Report a user skip. Mutually exclusive with `complete` and `error`.
    pub fn skip(&self) {
        if !self.once(TERMINAL_KEY) {
            return;
        }
        let urls = self.tracking_urls("skip");
        self.report("skip", &urls, None);
    }

    /// Report a playback error with a fixed VAST error code.
    /// Mutually exclusive with `complete` and `skip`.
    pub fn error(&self, code: u32) {
        if !self.once(TERMINAL_KEY) {
            return;
        }
        if let Some(url) = &self.ad.error_url {
            self.report("error", std::slice::from_ref(url), Some(code));
        }
    }

    /// Report a click and resolve the click-through destination.
    ///
    /// The creative's own click-through URL wins; `fallback` (e.g. the URL a
    /// VPAID unit passed with `AdClickThru`) is used when the creative has
    /// none. Returns the resolved URL for the caller to open, if it is valid.
    pub fn click(&self, fallback: Option<&str>) -> Option<String> {
        if let TrackedCreative::Linear(linear) = &self.creative {
            self.report("click", &linear.click_tracking_urls, None);
        }

        let destination = match &self.creative {
            TrackedCreative::Linear(linear) => linear.click_through.as_deref(),
            TrackedCreative::Companion { variation, .. } => variation.click_through.as_deref(),
        };
        let destination = destination.or(fallback)?;

        match Url::parse(destination) {
            Ok(url) => Some(url.into()),
            Err(e) => {
                warn!("Discarding invalid click-through URL {}: {}", destination, e);
                None
            }
        }
    }

    /// Mirror the player's paused flag, reporting pause/resume transitions
    pub fn set_paused(&self, paused: bool) {
        let changed = {
            let mut state = self.state();
            let changed = state.paused != paused;
            state.paused = paused;
            changed
        };
        if changed {
            self.track(if paused { "pause" } else { "resume" });
        }
    }

    /// Mirror the player's muted flag, reporting mute/unmute transitions
    pub fn set_muted(&self, muted: bool) {
        let changed = {
            let mut state = self.state();
            let changed = state.muted != muted;
            state.muted = muted;
            changed
        };
        if changed {
            self.track(if muted { "mute" } else { "unmute" });
        }
    }

    /// Mirror the player's fullscreen flag
    pub fn set_fullscreen(&self, fullscreen: bool) {
        let changed = {
            let mut state = self.state();
            let changed = state.fullscreen != fullscreen;
            state.fullscreen = fullscreen;
            changed
        };
        if changed {
            self.track(if fullscreen { "fullscreen" } else { "exitFullscreen" });
        }
    }

    /// True once the named once-only event has been reported
    pub fn has_fired(&self, event: &str) -> bool {
        self.fired.contains_key(event)
    }

    fn tracking_urls(&self, event: &str) -> Vec<String> {
        let events = match &self.creative {
            TrackedCreative::Linear(linear) => &linear.tracking_events,
            TrackedCreative::Companion { companion, .. } => &companion.tracking_events,
        };
        events
            .iter()
            .filter(|t| t.event == event)
            .map(|t| t.url.clone())
            .collect()
    }

    fn report(&self, event: &str, urls: &[String], error_code: Option<u32>) {
        for url in urls {
            self.beacon.send(&expand_macros(url, error_code), event);
        }
    }

    /// Returns true the first time `key` is seen
    fn once(&self, key: &str) -> bool {
        self.fired.insert(key.to_string(), ()).is_none()
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("ad_id", &self.ad.id)
            .field("creative_id", &self.creative_id)
            .field("impressed", &self.impressed())
            .finish()
    }
}

/// Replace the VAST URL macros the beacons support
fn expand_macros(url: &str, error_code: Option<u32>) -> String {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();

    let mut expanded = url.replace("[CACHEBUSTING]", &timestamp.to_string());
    if let Some(code) = error_code {
        expanded = expanded.replace("[ERRORCODE]", &code.to_string());
    }
    expanded
}
