//! A selected ad paired with the trackers that report its playback.

use crate::tracker::Tracker;
use crate::vast::model::{LinearCreative, MediaFile};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// One playable ad with its linear tracker and, when the document carried a
/// usable companion banner, a companion tracker.
#[derive(Debug)]
pub struct TrackedAd {
    linear_tracker: Arc<Tracker>,
    companion_tracker: Option<Arc<Tracker>>,
    /// Force the ad to end once the reported duration elapses. Set for
    /// streaming media where the player never fires an ended event itself.
    skip_after_duration: AtomicBool,
}

impl TrackedAd {
    pub fn new(linear_tracker: Arc<Tracker>, companion_tracker: Option<Arc<Tracker>>) -> Self {
        Self {
            linear_tracker,
            companion_tracker,
            skip_after_duration: AtomicBool::new(false),
        }
    }

    pub fn linear_tracker(&self) -> &Arc<Tracker> {
        &self.linear_tracker
    }

    pub fn companion_tracker(&self) -> Option<&Arc<Tracker>> {
        self.companion_tracker.as_ref()
    }

    pub fn linear(&self) -> Option<&LinearCreative> {
        self.linear_tracker.linear()
    }

    /// True iff the ad carries plain video media (no sandbox required)
    pub fn has_video_media(&self) -> bool {
        self.linear().is_some_and(LinearCreative::has_video_media)
    }

    /// First media file that must run inside the interactive sandbox
    pub fn vpaid_media_file(&self) -> Option<&MediaFile> {
        self.linear()?.media_files.iter().find(|m| m.is_vpaid())
    }

    pub fn set_skip_after_duration(&self, value: bool) {
        self.skip_after_duration.store(value, Ordering::Relaxed);
    }

    pub fn skip_after_duration(&self) -> bool {
        self.skip_after_duration.load(Ordering::Relaxed)
    }
}
