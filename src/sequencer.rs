//! Ad break playback: runs the ads of one break back-to-back against the
//! host player, routing user intents and reporting through the trackers.
//!
//! A break never aborts early: an ad that fails to play reports its error
//! and the sequencer advances to the next one, so content playback always
//! resumes.

use crate::ad::tracked::TrackedAd;
use crate::config::PluginOptions;
use crate::metrics;
use crate::player::{
    AdBreakControl, AdContext, CompanionSlot, CompanionView, LinkOpener, MediaPlayer,
    PlayerEvent, PluginEvent, Source,
};
use crate::tracker::ERROR_MEDIA_PLAYBACK;
use crate::ui;
use crate::vpaid::{VpaidCancel, VpaidEnvironment, VpaidHandler};
use crate::vast::model::Delivery;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub struct AdBreakSequencer<P: MediaPlayer, E: VpaidEnvironment> {
    player: Arc<P>,
    vpaid: VpaidHandler<P, E>,
    opener: Arc<dyn LinkOpener>,
    companion_slot: Option<Arc<dyn CompanionSlot>>,
    options: PluginOptions,
    events: broadcast::Sender<PluginEvent>,
}

impl<P: MediaPlayer, E: VpaidEnvironment> AdBreakSequencer<P, E> {
    pub fn new(
        player: Arc<P>,
        vpaid: VpaidHandler<P, E>,
        opener: Arc<dyn LinkOpener>,
        companion_slot: Option<Arc<dyn CompanionSlot>>,
        options: PluginOptions,
        events: broadcast::Sender<PluginEvent>,
    ) -> Self {
        Self {
            player,
            vpaid,
            opener,
            companion_slot,
            options,
            events,
        }
    }

    /// Handle for tearing down an interactive ad that is still mid-handshake
    pub fn vpaid_canceller(&self) -> VpaidCancel {
        self.vpaid.canceller()
    }

    /// Play one ad break to completion
    pub async fn play_break(
        &self,
        ads: Vec<TrackedAd>,
        controls: &mut mpsc::Receiver<AdBreakControl>,
    ) {
        if ads.is_empty() {
            return;
        }

        info!("Starting ad break with {} ad(s)", ads.len());
        metrics::record_ad_break();
        self.player.start_linear_ad_mode();
        if !self.options.controls_enabled {
            self.player.hide_controls();
        }
        if !self.options.seek_enabled {
            self.player.set_seek_enabled(false);
        }

        for ad in &ads {
            // Intents aimed at the previous ad must not leak into this one
            while controls.try_recv().is_ok() {}

            self.show_companion(ad);

            if ad.vpaid_media_file().is_some() {
                // The previous video ad's overlay must not sit over the unit
                self.emit(PluginEvent::OverlayHide);
                if let Err(e) = self.vpaid.handle(ad, controls).await {
                    warn!("Interactive ad {} failed: {}", ad.linear_tracker().ad().id, e);
                }
                // The sandbox handler restores controls on teardown
                if !self.options.controls_enabled {
                    self.player.hide_controls();
                }
                continue;
            }

            match self.video_sources(ad) {
                Some(sources) => self.play_video_ad(ad, &sources, controls).await,
                None => {
                    warn!(
                        "Ad {} has no playable media file, skipping it",
                        ad.linear_tracker().ad().id
                    );
                }
            }
        }

        if self.options.companion.clear_on_break_end
            && let Some(slot) = &self.companion_slot
        {
            slot.clear();
        }
        self.emit(PluginEvent::OverlayHide);
        self.player.show_controls();
        self.player.set_seek_enabled(true);
        self.player.end_linear_ad_mode();
        info!("Ad break finished");
    }

    /// Media selection for plain video ads. Progressive files win; streaming
    /// files are only usable when a duration is known to end the ad on,
    /// since the player never fires an ended event for them.
    fn video_sources(&self, ad: &TrackedAd) -> Option<Vec<Source>> {
        let linear = ad.linear()?;
        let plain: Vec<_> = linear
            .media_files
            .iter()
            .filter(|m| m.api_framework.is_none())
            .collect();
        if plain.is_empty() {
            return None;
        }

        let progressive: Vec<Source> = plain
            .iter()
            .filter(|m| m.delivery == Delivery::Progressive)
            .map(|m| Source::from(*m))
            .collect();
        if !progressive.is_empty() {
            return Some(progressive);
        }

        if ad.linear_tracker().asset_duration().unwrap_or(0.0) >= 1.0 {
            ad.set_skip_after_duration(true);
            return Some(plain.into_iter().map(Source::from).collect());
        }
        None
    }

    async fn play_video_ad(
        &self,
        ad: &TrackedAd,
        sources: &[Source],
        controls: &mut mpsc::Receiver<AdBreakControl>,
    ) {
        let tracker = ad.linear_tracker().clone();
        let context = AdContext::from_tracker(&tracker);
        let mut player_events = self.player.events();

        self.player.set_source(sources);
        self.player.play();

        // Armed on first play for streaming media with a known duration
        let mut forced_end: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = sleep_until_opt(forced_end) => {
                    info!("Streaming ad reached its reported duration, skipping it");
                    tracker.skip();
                    self.emit(PluginEvent::AdSkip(context.clone()));
                    break;
                }

                event = player_events.recv() => {
                    match event {
                        Ok(PlayerEvent::AdPlay) => {
                            if !tracker.impressed() {
                                tracker.track_impression();
                                metrics::record_ad_played("video");
                                self.emit(PluginEvent::AdStart(context.clone()));
                                if ad.skip_after_duration()
                                    && let Some(duration) = tracker.asset_duration()
                                {
                                    forced_end =
                                        Some(Instant::now() + Duration::from_secs_f64(duration));
                                }
                            } else {
                                tracker.set_paused(false);
                            }
                        }
                        Ok(PlayerEvent::AdTimeUpdate) => {
                            let current = self.player.current_time();
                            let reported = self.player.duration();
                            if tracker.asset_duration().is_none() {
                                tracker.set_asset_duration(reported);
                            }
                            tracker.set_progress(current);
                            let duration = tracker.asset_duration().unwrap_or(reported);
                            self.emit(PluginEvent::OverlayShow(ui::overlay_state(
                                self.options.skip,
                                current,
                                duration,
                            )));
                        }
                        Ok(PlayerEvent::AdPause) => {
                            // The pause the player fires right before ended
                            // is not a user pause
                            if self.player.remaining_time() > 0.0 {
                                tracker.set_paused(true);
                            }
                        }
                        Ok(PlayerEvent::AdError) => {
                            warn!("Media error while playing ad {}", tracker.ad().id);
                            tracker.error(ERROR_MEDIA_PLAYBACK);
                            self.player.clear_error();
                            break;
                        }
                        Ok(PlayerEvent::AdVolumeChange) => {
                            let muted = self.player.muted() || self.player.volume() == 0.0;
                            tracker.set_muted(muted);
                        }
                        Ok(PlayerEvent::FullscreenChange) => {
                            tracker.set_fullscreen(self.player.is_fullscreen());
                        }
                        Ok(PlayerEvent::AdEnded) => {
                            tracker.complete();
                            self.emit(PluginEvent::AdEnd(context.clone()));
                            break;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!("Player event stream lagged by {}", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }

                control = controls.recv() => {
                    match control {
                        Some(AdBreakControl::Skip) => {
                            tracker.skip();
                            self.emit(PluginEvent::AdSkip(context.clone()));
                            break;
                        }
                        Some(AdBreakControl::Click) => {
                            if let Some(url) = tracker.click(None) {
                                self.player.pause();
                                self.opener.open(&url);
                            }
                        }
                        Some(AdBreakControl::ToggleMute) => {
                            self.player.set_muted(!self.player.muted());
                        }
                        None => break,
                    }
                }
            }
        }
    }

    fn show_companion(&self, ad: &TrackedAd) {
        let Some(slot) = &self.companion_slot else { return };
        let Some(tracker) = ad.companion_tracker() else { return };
        let Some(variation) = tracker.variation() else { return };
        let Some(resource) = &variation.static_resource else { return };

        slot.show(&CompanionView {
            resource_url: resource.clone(),
            width: variation.width,
            height: variation.height,
            click_url: variation.click_through.clone(),
        });
        tracker.track("creativeView");
    }

    fn emit(&self, event: PluginEvent) {
        let _ = self.events.send(event);
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VpaidOptions;
    use crate::player::testing::{MockPlayer, RecordingOpener};
    use crate::tracker::testing::RecordingBeacon;
    use crate::tracker::Tracker;
    use crate::vast::model::{Ad, LinearCreative, MediaFile, TrackingEvent};
    use crate::vpaid::NoSandbox;

    fn tracked_video_ad(beacon: Arc<RecordingBeacon>, duration: f64) -> TrackedAd {
        let ad = Ad {
            id: "ad-1".into(),
            impression_urls: vec!["http://t/imp".into()],
            error_url: Some("http://t/err?c=[ERRORCODE]".into()),
            ..Default::default()
        };
        let linear = LinearCreative {
            duration,
            media_files: vec![MediaFile {
                url: "https://cdn.example/ad.mp4".into(),
                mime_type: "video/mp4".into(),
                ..Default::default()
            }],
            tracking_events: ["start", "complete", "skip", "pause"]
                .iter()
                .map(|e| TrackingEvent {
                    event: e.to_string(),
                    url: format!("http://t/{}", e),
                })
                .collect(),
            click_through: Some("https://landing.example/".into()),
            ..Default::default()
        };
        TrackedAd::new(
            Arc::new(Tracker::new_linear(beacon, ad, "c1".into(), linear)),
            None,
        )
    }

    struct Fixture {
        player: Arc<MockPlayer>,
        beacon: Arc<RecordingBeacon>,
        opener: Arc<RecordingOpener>,
        sequencer: Arc<AdBreakSequencer<MockPlayer, NoSandbox>>,
        plugin_events: broadcast::Receiver<PluginEvent>,
    }

    fn fixture() -> Fixture {
        let player = Arc::new(MockPlayer::default());
        let beacon = Arc::new(RecordingBeacon::default());
        let opener = Arc::new(RecordingOpener::default());
        let (events, plugin_events) = broadcast::channel(64);
        let vpaid = VpaidHandler::new(
            player.clone(),
            Arc::new(NoSandbox),
            VpaidOptions::default(),
            opener.clone(),
            events.clone(),
        );
        let sequencer = Arc::new(AdBreakSequencer::new(
            player.clone(),
            vpaid,
            opener.clone(),
            None,
            PluginOptions::default(),
            events,
        ));
        Fixture {
            player,
            beacon,
            opener,
            sequencer,
            plugin_events,
        }
    }

    /// Let the spawned break task run to its next await point
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn collect_events(rx: &mut broadcast::Receiver<PluginEvent>) -> Vec<PluginEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_video_ad_plays_to_completion() {
        let mut f = fixture();
        let ads = vec![tracked_video_ad(f.beacon.clone(), 10.0)];
        let (_tx, mut ctrl) = mpsc::channel(8);

        let sequencer = f.sequencer.clone();
        let task = tokio::spawn(async move { sequencer.play_break(ads, &mut ctrl).await });
        settle().await;

        assert!(f.player.state().linear_ad_mode);
        assert!(!f.player.state().seek_enabled);
        assert_eq!(f.player.state().sources[0].url, "https://cdn.example/ad.mp4");

        f.player.push(PlayerEvent::AdPlay);
        f.player.set_time(3.0, 10.0);
        f.player.push(PlayerEvent::AdTimeUpdate);
        f.player.push(PlayerEvent::AdEnded);
        task.await.unwrap();

        assert_eq!(f.beacon.count("impression"), 1);
        assert_eq!(f.beacon.count("start"), 1);
        assert_eq!(f.beacon.count("complete"), 1);
        assert!(!f.player.state().linear_ad_mode);
        assert!(f.player.state().controls_visible);
        assert!(f.player.state().seek_enabled);

        let events = collect_events(&mut f.plugin_events);
        assert!(events.iter().any(|e| matches!(e, PluginEvent::AdStart(_))));
        assert!(events.iter().any(|e| matches!(e, PluginEvent::AdEnd(_))));
        assert!(events.iter().any(|e| matches!(e, PluginEvent::OverlayHide)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_intent_ends_the_ad() {
        let mut f = fixture();
        let ads = vec![tracked_video_ad(f.beacon.clone(), 10.0)];
        let (tx, mut ctrl) = mpsc::channel(8);

        let sequencer = f.sequencer.clone();
        let task = tokio::spawn(async move { sequencer.play_break(ads, &mut ctrl).await });
        settle().await;

        f.player.push(PlayerEvent::AdPlay);
        settle().await;
        tx.send(AdBreakControl::Skip).await.unwrap();
        task.await.unwrap();

        assert_eq!(f.beacon.count("skip"), 1);
        assert_eq!(f.beacon.count("complete"), 0);
        assert!(collect_events(&mut f.plugin_events)
            .iter()
            .any(|e| matches!(e, PluginEvent::AdSkip(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_media_error_reports_405_and_recovers() {
        let mut f = fixture();
        let ads = vec![tracked_video_ad(f.beacon.clone(), 10.0)];
        let (_tx, mut ctrl) = mpsc::channel(8);

        let sequencer = f.sequencer.clone();
        let task = tokio::spawn(async move { sequencer.play_break(ads, &mut ctrl).await });
        settle().await;

        f.player.push(PlayerEvent::AdError);
        task.await.unwrap();

        assert_eq!(f.beacon.count("error"), 1);
        let sent = f.beacon.sent.lock().unwrap();
        let (_, url) = sent.iter().find(|(e, _)| e == "error").unwrap();
        assert!(url.contains("c=405"));
        drop(sent);

        assert_eq!(f.player.state().errors_cleared, 1);
        assert!(!f.player.state().linear_ad_mode);
        let _ = collect_events(&mut f.plugin_events);
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_opens_resolved_url() {
        let mut f = fixture();
        let ads = vec![tracked_video_ad(f.beacon.clone(), 10.0)];
        let (tx, mut ctrl) = mpsc::channel(8);

        let sequencer = f.sequencer.clone();
        let task = tokio::spawn(async move { sequencer.play_break(ads, &mut ctrl).await });
        settle().await;

        f.player.push(PlayerEvent::AdPlay);
        settle().await;
        tx.send(AdBreakControl::Click).await.unwrap();
        settle().await;

        assert_eq!(
            f.opener.opened.lock().unwrap().as_slice(),
            &["https://landing.example/".to_string()]
        );
        assert_eq!(f.player.state().pause_calls, 1);

        f.player.push(PlayerEvent::AdEnded);
        task.await.unwrap();
        let _ = collect_events(&mut f.plugin_events);
    }

    fn tracked_streaming_ad(beacon: Arc<RecordingBeacon>, duration: f64) -> TrackedAd {
        let ad = Ad {
            id: "ad-stream".into(),
            impression_urls: vec!["http://t/imp".into()],
            error_url: Some("http://t/err?c=[ERRORCODE]".into()),
            ..Default::default()
        };
        let linear = LinearCreative {
            duration,
            media_files: vec![MediaFile {
                url: "https://cdn.example/ad.m3u8".into(),
                mime_type: "application/x-mpegURL".into(),
                delivery: Delivery::Streaming,
                ..Default::default()
            }],
            tracking_events: ["skip", "complete"]
                .iter()
                .map(|e| TrackingEvent {
                    event: e.to_string(),
                    url: format!("http://t/{}", e),
                })
                .collect(),
            ..Default::default()
        };
        TrackedAd::new(
            Arc::new(Tracker::new_linear(beacon, ad, "c1".into(), linear)),
            None,
        )
    }

    fn tracked_vpaid_ad(beacon: Arc<RecordingBeacon>) -> TrackedAd {
        let ad = Ad {
            id: "ad-vpaid".into(),
            error_url: Some("http://t/err?c=[ERRORCODE]".into()),
            ..Default::default()
        };
        let linear = LinearCreative {
            duration: 10.0,
            media_files: vec![MediaFile {
                url: "https://cdn.example/unit.js".into(),
                mime_type: "application/javascript".into(),
                api_framework: Some("VPAID".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        TrackedAd::new(
            Arc::new(Tracker::new_linear(beacon, ad, "c-vpaid".into(), linear)),
            None,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_only_ad_skips_at_reported_duration() {
        let mut f = fixture();
        let ad = tracked_streaming_ad(f.beacon.clone(), 5.0);
        let (_tx, mut ctrl) = mpsc::channel(8);

        let sequencer = f.sequencer.clone();
        let task = tokio::spawn(async move { sequencer.play_break(vec![ad], &mut ctrl).await });
        settle().await;

        f.player.push(PlayerEvent::AdPlay);
        settle().await;

        // paused clock: jumping past the reported duration fires the forced end
        tokio::time::advance(Duration::from_secs(6)).await;
        task.await.unwrap();

        assert_eq!(f.beacon.count("impression"), 1);
        // the ad never reached its end marker, so this is a skip, not a complete
        assert_eq!(f.beacon.count("skip"), 1);
        assert_eq!(f.beacon.count("complete"), 0);
        assert!(collect_events(&mut f.plugin_events)
            .iter()
            .any(|e| matches!(e, PluginEvent::AdSkip(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlay_hidden_before_interactive_ad_takes_over() {
        let mut f = fixture();
        let ads = vec![
            tracked_video_ad(f.beacon.clone(), 10.0),
            tracked_vpaid_ad(f.beacon.clone()),
        ];
        let (_tx, mut ctrl) = mpsc::channel(8);

        let sequencer = f.sequencer.clone();
        let task = tokio::spawn(async move { sequencer.play_break(ads, &mut ctrl).await });
        settle().await;

        f.player.push(PlayerEvent::AdPlay);
        f.player.set_time(3.0, 10.0);
        f.player.push(PlayerEvent::AdTimeUpdate);
        f.player.push(PlayerEvent::AdEnded);
        task.await.unwrap();

        let events = collect_events(&mut f.plugin_events);
        assert!(events.iter().any(|e| matches!(e, PluginEvent::OverlayShow(_))));
        let end_at = events
            .iter()
            .position(|e| matches!(e, PluginEvent::AdEnd(_)))
            .unwrap();
        // the video ad's overlay comes down before the unit mounts
        assert_eq!(events[end_at + 1], PluginEvent::OverlayHide);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unplayable_ad_advances_without_error_report() {
        let mut f = fixture();
        let ads = vec![
            // streaming-only with no usable duration: unplayable
            tracked_streaming_ad(f.beacon.clone(), 0.0),
            tracked_video_ad(f.beacon.clone(), 10.0),
        ];
        let (_tx, mut ctrl) = mpsc::channel(8);

        let sequencer = f.sequencer.clone();
        let task = tokio::spawn(async move { sequencer.play_break(ads, &mut ctrl).await });
        settle().await;

        // the second ad is already up
        assert_eq!(f.player.state().sources[0].url, "https://cdn.example/ad.mp4");

        f.player.push(PlayerEvent::AdPlay);
        f.player.push(PlayerEvent::AdEnded);
        task.await.unwrap();

        assert_eq!(f.beacon.count("error"), 0);
        assert_eq!(f.beacon.count("complete"), 1);
        let _ = collect_events(&mut f.plugin_events);
    }
}
