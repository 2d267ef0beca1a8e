//! Host player boundary.
//!
//! The controller never touches a rendering surface directly. It drives a
//! `MediaPlayer` implementation supplied by the embedding application and
//! observes playback through a broadcast event stream, so the whole ad
//! pipeline can be exercised against a scripted player in tests.

use crate::tracker::Tracker;
use crate::vast::model::MediaFile;
use tokio::sync::broadcast;

/// A playback source handed to the player for an ad
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub url: String,
    pub mime_type: String,
}

impl From<&MediaFile> for Source {
    fn from(media: &MediaFile) -> Self {
        Self {
            url: media.url.clone(),
            mime_type: media.mime_type.clone(),
        }
    }
}

/// Playback events observed from the host player.
///
/// `Ad*` variants are emitted while the player is in linear ad mode and
/// refer to the ad asset; the bare variants refer to content playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    AdPlay,
    AdTimeUpdate,
    AdPause,
    AdError,
    AdVolumeChange,
    AdEnded,
    FullscreenChange,
    TimeUpdate,
    /// Content is ready for a preroll break to start
    ReadyForPreroll,
    /// Content finished and a postroll break may start
    ReadyForPostroll,
    /// The player's ad-load deadline elapsed before ads were ready
    AdTimeout,
    Resize,
}

/// Control surface of the host player
pub trait MediaPlayer: Send + Sync + 'static {
    fn set_source(&self, sources: &[Source]);
    fn play(&self);
    fn pause(&self);

    fn current_time(&self) -> f64;
    /// NaN until the player has loaded metadata
    fn duration(&self) -> f64;
    fn remaining_time(&self) -> f64;

    fn volume(&self) -> f64;
    fn set_volume(&self, volume: f64);
    fn muted(&self) -> bool;
    fn set_muted(&self, muted: bool);

    fn is_fullscreen(&self) -> bool;
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn autoplay(&self) -> bool;

    fn start_linear_ad_mode(&self);
    fn end_linear_ad_mode(&self);
    /// Clear a latched media error so content playback can resume
    fn clear_error(&self);

    fn show_controls(&self);
    fn hide_controls(&self);

    /// Allow or block scrubbing on the current asset
    fn set_seek_enabled(&self, enabled: bool);

    fn events(&self) -> broadcast::Receiver<PlayerEvent>;
}

/// Opens click-through destinations (a browser tab in a real host)
pub trait LinkOpener: Send + Sync {
    fn open(&self, url: &str);
}

/// Companion banner rendition ready for display
#[derive(Debug, Clone, PartialEq)]
pub struct CompanionView {
    pub resource_url: String,
    pub width: u32,
    pub height: u32,
    pub click_url: Option<String>,
}

/// Slot the host renders companion banners into
pub trait CompanionSlot: Send + Sync {
    fn show(&self, view: &CompanionView);
    fn clear(&self);
}

/// User intents routed into the active ad break
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdBreakControl {
    /// Skip the current ad (the overlay only offers this once allowed)
    Skip,
    /// The user clicked the ad surface
    Click,
    ToggleMute,
}

/// Identity of the ad an `AdStart`/`AdEnd`/`AdSkip` notification refers to
#[derive(Debug, Clone, PartialEq)]
pub struct AdContext {
    pub media_files: Vec<MediaFile>,
    pub ad_sequence_id: Option<u32>,
    pub ad_id: String,
    pub creative_ad_id: String,
}

impl AdContext {
    pub fn from_tracker(tracker: &Tracker) -> Self {
        Self {
            media_files: tracker
                .linear()
                .map(|l| l.media_files.clone())
                .unwrap_or_default(),
            ad_sequence_id: tracker.ad().sequence,
            ad_id: tracker.ad().id.clone(),
            creative_ad_id: tracker.creative_id().to_string(),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub(crate) struct MockState {
        pub current_time: f64,
        pub duration: f64,
        pub volume: f64,
        pub muted: bool,
        pub fullscreen: bool,
        pub width: u32,
        pub height: u32,
        pub autoplay: bool,
        pub linear_ad_mode: bool,
        pub controls_visible: bool,
        pub sources: Vec<Source>,
        pub play_calls: u32,
        pub pause_calls: u32,
        pub errors_cleared: u32,
        pub seek_enabled: bool,
    }

    impl Default for MockState {
        fn default() -> Self {
            Self {
                current_time: 0.0,
                duration: f64::NAN,
                volume: 1.0,
                muted: false,
                fullscreen: false,
                width: 640,
                height: 360,
                autoplay: false,
                linear_ad_mode: false,
                controls_visible: true,
                sources: Vec::new(),
                play_calls: 0,
                pause_calls: 0,
                errors_cleared: 0,
                seek_enabled: true,
            }
        }
    }

    /// Scripted player: tests mutate the state and push events by hand
    pub(crate) struct MockPlayer {
        pub state: Mutex<MockState>,
        pub events: broadcast::Sender<PlayerEvent>,
    }

    impl Default for MockPlayer {
        fn default() -> Self {
            let (events, _) = broadcast::channel(64);
            Self {
                state: Mutex::new(MockState::default()),
                events,
            }
        }
    }

    impl MockPlayer {
        pub fn state(&self) -> MockState {
            self.state.lock().unwrap().clone()
        }

        pub fn set_time(&self, current_time: f64, duration: f64) {
            let mut state = self.state.lock().unwrap();
            state.current_time = current_time;
            state.duration = duration;
        }

        pub fn push(&self, event: PlayerEvent) {
            let _ = self.events.send(event);
        }
    }

    impl MediaPlayer for MockPlayer {
        fn set_source(&self, sources: &[Source]) {
            self.state.lock().unwrap().sources = sources.to_vec();
        }

        fn play(&self) {
            self.state.lock().unwrap().play_calls += 1;
        }

        fn pause(&self) {
            self.state.lock().unwrap().pause_calls += 1;
        }

        fn current_time(&self) -> f64 {
            self.state.lock().unwrap().current_time
        }

        fn duration(&self) -> f64 {
            self.state.lock().unwrap().duration
        }

        fn remaining_time(&self) -> f64 {
            let state = self.state.lock().unwrap();
            if state.duration.is_finite() {
                (state.duration - state.current_time).max(0.0)
            } else {
                0.0
            }
        }

        fn volume(&self) -> f64 {
            self.state.lock().unwrap().volume
        }

        fn set_volume(&self, volume: f64) {
            self.state.lock().unwrap().volume = volume;
        }

        fn muted(&self) -> bool {
            self.state.lock().unwrap().muted
        }

        fn set_muted(&self, muted: bool) {
            self.state.lock().unwrap().muted = muted;
        }

        fn is_fullscreen(&self) -> bool {
            self.state.lock().unwrap().fullscreen
        }

        fn width(&self) -> u32 {
            self.state.lock().unwrap().width
        }

        fn height(&self) -> u32 {
            self.state.lock().unwrap().height
        }

        fn autoplay(&self) -> bool {
            self.state.lock().unwrap().autoplay
        }

        fn start_linear_ad_mode(&self) {
            self.state.lock().unwrap().linear_ad_mode = true;
        }

        fn end_linear_ad_mode(&self) {
            self.state.lock().unwrap().linear_ad_mode = false;
        }

        fn clear_error(&self) {
            self.state.lock().unwrap().errors_cleared += 1;
        }

        fn show_controls(&self) {
            self.state.lock().unwrap().controls_visible = true;
        }

        fn hide_controls(&self) {
            self.state.lock().unwrap().controls_visible = false;
        }

        fn set_seek_enabled(&self, enabled: bool) {
            self.state.lock().unwrap().seek_enabled = enabled;
        }

        fn events(&self) -> broadcast::Receiver<PlayerEvent> {
            self.events.subscribe()
        }
    }

    /// Link opener that records opened URLs
    #[derive(Default)]
    pub(crate) struct RecordingOpener {
        pub opened: Mutex<Vec<String>>,
    }

    impl LinkOpener for RecordingOpener {
        fn open(&self, url: &str) {
            self.opened.lock().unwrap().push(url.to_string());
        }
    }
}

/// Notifications the controller publishes to the host integration
#[derive(Debug, Clone, PartialEq)]
pub enum PluginEvent {
    /// Ads were fetched and selected in time for the preroll slot
    AdsReady,
    /// Ads arrived too late or loading was abandoned
    AdsCanceled,
    NoPreroll,
    NoPostroll,
    AdStart(AdContext),
    AdEnd(AdContext),
    AdSkip(AdContext),
    /// Raw sandbox lifecycle event name, forwarded with a `vpaid.` prefix
    Vpaid(String),
    /// The ad overlay should render with the given state
    OverlayShow(crate::ui::OverlayState),
    OverlayHide,
}
