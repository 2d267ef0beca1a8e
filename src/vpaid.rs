//! Interactive (VPAID) ad handling.
//!
//! A VPAID creative is executable: it is loaded into a sandbox supplied by
//! the host (`VpaidEnvironment`), driven through the standard handshake and
//! lifecycle calls, and observed through an event stream. Every wait in the
//! handshake phase is bounded by a 10 second timeout, and cancellation is
//! checkpointed between steps so a torn-down break never leaves a live unit
//! behind.

use crate::ad::tracked::TrackedAd;
use crate::config::{VideoInstance, VpaidOptions};
use crate::error::{AdCueError, Result};
use crate::metrics;
use crate::player::{AdBreakControl, AdContext, LinkOpener, MediaPlayer, PlayerEvent, PluginEvent};
use crate::tracker::ERROR_VPAID_GENERAL;
use crate::vast::model::MediaFile;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, broadcast, mpsc};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Handshake version offered to ad units
pub const VPAID_VERSION: &str = "2.0";

/// Bound on every handshake-phase wait
const VPAID_TIMEOUT: Duration = Duration::from_secs(10);

/// Events dispatched by a sandboxed ad unit
#[derive(Debug, Clone, PartialEq)]
pub enum VpaidEvent {
    AdLoaded,
    AdStarted,
    AdStopped,
    AdSkipped,
    AdImpression,
    AdVideoStart,
    AdVideoFirstQuartile,
    AdVideoMidpoint,
    AdVideoThirdQuartile,
    AdVideoComplete,
    AdClickThru {
        url: Option<String>,
        /// True when the unit opens the landing page itself
        player_handles: bool,
    },
    AdPaused,
    AdPlaying,
    AdVolumeChange,
    AdUserAcceptInvitation,
    AdUserMinimize,
    AdUserClose,
    AdError(String),
}

impl VpaidEvent {
    pub fn name(&self) -> &'static str {
        match self {
            VpaidEvent::AdLoaded => "AdLoaded",
            VpaidEvent::AdStarted => "AdStarted",
            VpaidEvent::AdStopped => "AdStopped",
            VpaidEvent::AdSkipped => "AdSkipped",
            VpaidEvent::AdImpression => "AdImpression",
            VpaidEvent::AdVideoStart => "AdVideoStart",
            VpaidEvent::AdVideoFirstQuartile => "AdVideoFirstQuartile",
            VpaidEvent::AdVideoMidpoint => "AdVideoMidpoint",
            VpaidEvent::AdVideoThirdQuartile => "AdVideoThirdQuartile",
            VpaidEvent::AdVideoComplete => "AdVideoComplete",
            VpaidEvent::AdClickThru { .. } => "AdClickThru",
            VpaidEvent::AdPaused => "AdPaused",
            VpaidEvent::AdPlaying => "AdPlaying",
            VpaidEvent::AdVolumeChange => "AdVolumeChange",
            VpaidEvent::AdUserAcceptInvitation => "AdUserAcceptInvitation",
            VpaidEvent::AdUserMinimize => "AdUserMinimize",
            VpaidEvent::AdUserClose => "AdUserClose",
            VpaidEvent::AdError(_) => "AdError",
        }
    }
}

/// Creative payload handed to `initAd`
#[derive(Debug, Clone, Default)]
pub struct CreativeData {
    pub ad_parameters: Option<String>,
    pub duration: f64,
    pub click_through: Option<String>,
}

/// Sandbox slot geometry and mounting settings
#[derive(Debug, Clone)]
pub struct SlotConfig {
    pub container_class: String,
    pub video_instance: VideoInstance,
    pub width: u32,
    pub height: u32,
}

/// A loaded VPAID ad unit.
///
/// Getter calls cross the sandbox boundary asynchronously; lifecycle calls
/// are dispatched synchronously and acknowledged through the event stream.
pub trait VpaidAdUnit: Send {
    fn handshake_version(
        &mut self,
        version: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    fn init_ad(
        &mut self,
        width: u32,
        height: u32,
        view_mode: &str,
        desired_bitrate: u32,
        creative: &CreativeData,
    ) -> Result<()>;

    fn start_ad(&mut self) -> Result<()>;
    fn stop_ad(&mut self) -> Result<()>;
    fn resize_ad(&mut self, width: u32, height: u32, view_mode: &str) -> Result<()>;
    fn set_ad_volume(&mut self, volume: f64) -> Result<()>;

    fn get_ad_volume(&mut self) -> impl Future<Output = Result<f64>> + Send;
    fn get_ad_linear(&mut self) -> impl Future<Output = Result<bool>> + Send;
}

/// Host-provided sandbox that loads and tears down ad units
pub trait VpaidEnvironment: Send + Sync + 'static {
    type Unit: VpaidAdUnit;

    fn load_ad_unit(
        &self,
        media: &MediaFile,
        slot: &SlotConfig,
    ) -> impl Future<Output = Result<(Self::Unit, mpsc::UnboundedReceiver<VpaidEvent>)>> + Send;

    /// Tear the unit's sandbox down. Taking the unit by value makes repeat
    /// teardown unrepresentable.
    fn unload(&self, unit: Self::Unit);
}

/// Cancellation handle for an in-flight VPAID session
#[derive(Clone)]
pub struct VpaidCancel {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl VpaidCancel {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }
}

/// Drives one VPAID creative from handshake to teardown
pub struct VpaidHandler<P: MediaPlayer, E: VpaidEnvironment> {
    player: Arc<P>,
    env: Arc<E>,
    options: VpaidOptions,
    opener: Arc<dyn LinkOpener>,
    events: broadcast::Sender<PluginEvent>,
    cancelled: Arc<AtomicBool>,
    cancel_notify: Arc<Notify>,
}

impl<P: MediaPlayer, E: VpaidEnvironment> VpaidHandler<P, E> {
    pub fn new(
        player: Arc<P>,
        env: Arc<E>,
        options: VpaidOptions,
        opener: Arc<dyn LinkOpener>,
        events: broadcast::Sender<PluginEvent>,
    ) -> Self {
        Self {
            player,
            env,
            options,
            opener,
            events,
            cancelled: Arc::new(AtomicBool::new(false)),
            cancel_notify: Arc::new(Notify::new()),
        }
    }

    pub fn canceller(&self) -> VpaidCancel {
        VpaidCancel {
            cancelled: self.cancelled.clone(),
            notify: self.cancel_notify.clone(),
        }
    }

    /// Run one interactive ad to completion (or error/cancellation).
    ///
    /// The sandbox is always unloaded and the player controls restored
    /// before this returns.
    pub async fn handle(
        &self,
        ad: &TrackedAd,
        controls: &mut mpsc::Receiver<AdBreakControl>,
    ) -> Result<()> {
        self.cancelled.store(false, Ordering::SeqCst);

        let media = ad.vpaid_media_file().ok_or_else(|| {
            AdCueError::SandboxProtocol("ad has no JavaScript VPAID media file".to_string())
        })?;
        let tracker = ad.linear_tracker().clone();

        let slot = SlotConfig {
            container_class: self.options.container_class.clone(),
            video_instance: self.options.video_instance,
            width: self.player.width(),
            height: self.player.height(),
        };

        info!("Loading VPAID ad unit from {}", media.url);
        let loaded = timeout(VPAID_TIMEOUT, self.env.load_ad_unit(media, &slot)).await;
        let (mut unit, mut unit_events) = match loaded {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                tracker.error(ERROR_VPAID_GENERAL);
                metrics::record_vpaid_session("load_error");
                return Err(e);
            }
            Err(_) => {
                tracker.error(ERROR_VPAID_GENERAL);
                metrics::record_vpaid_session("load_timeout");
                return Err(AdCueError::Timeout("VPAID ad unit load".to_string()));
            }
        };

        let result = self
            .run_unit(&mut unit, &mut unit_events, ad, &media.clone(), controls)
            .await;

        self.player.show_controls();
        self.env.unload(unit);

        metrics::record_vpaid_session(match &result {
            Ok(()) => "completed",
            Err(AdCueError::Cancelled(_)) => "cancelled",
            Err(AdCueError::Timeout(_)) => "timeout",
            Err(_) => "error",
        });
        result
    }

    async fn run_unit(
        &self,
        unit: &mut E::Unit,
        unit_events: &mut mpsc::UnboundedReceiver<VpaidEvent>,
        ad: &TrackedAd,
        media: &MediaFile,
        controls: &mut mpsc::Receiver<AdBreakControl>,
    ) -> Result<()> {
        let tracker = ad.linear_tracker().clone();

        let version = self
            .bounded(unit.handshake_version(VPAID_VERSION), "handshakeVersion")
            .await??;
        debug!("VPAID handshake complete, unit speaks {}", version);
        self.checkpoint(unit)?;

        let linear = ad.linear();
        let creative = CreativeData {
            ad_parameters: linear.and_then(|l| l.ad_parameters.clone()),
            duration: linear.map(|l| l.duration).unwrap_or_default(),
            click_through: linear.and_then(|l| l.click_through.clone()),
        };
        unit.init_ad(
            self.player.width(),
            self.player.height(),
            view_mode(self.player.is_fullscreen()),
            media.bitrate.unwrap_or(0),
            &creative,
        )?;

        self.wait_for(unit_events, &tracker, |e| matches!(e, VpaidEvent::AdLoaded), "AdLoaded")
            .await?;
        self.checkpoint(unit)?;

        let is_linear = self.bounded(unit.get_ad_linear(), "getAdLinear").await??;
        if !is_linear {
            // Non-linear ads are not supported. Force the unit down.
            let _ = unit.stop_ad();
            tracker.error(ERROR_VPAID_GENERAL);
            return Err(AdCueError::SandboxProtocol(
                "ad unit is not linear".to_string(),
            ));
        }
        self.checkpoint(unit)?;

        self.player.hide_controls();
        unit.start_ad()?;
        self.wait_for(unit_events, &tracker, |e| matches!(e, VpaidEvent::AdStarted), "AdStarted")
            .await?;

        let context = AdContext::from_tracker(&tracker);
        self.emit(PluginEvent::AdStart(context.clone()));
        self.emit(PluginEvent::Vpaid("AdStarted".to_string()));
        metrics::record_ad_played("vpaid");

        // Volume as the unit reports it, for mute-boundary detection
        let mut last_volume = match self.bounded(unit.get_ad_volume(), "getAdVolume").await {
            Ok(Ok(v)) => v,
            _ => self.player.volume(),
        };
        let mut saved_volume = if last_volume > 0.0 { last_volume } else { 1.0 };

        let mut player_events = self.player.events();

        loop {
            tokio::select! {
                biased;

                _ = self.cancel_notify.notified() => {
                    warn!("VPAID session cancelled, stopping ad unit");
                    let _ = unit.stop_ad();
                    self.drain_until_stopped(unit_events).await;
                    return Err(AdCueError::Cancelled("VPAID session".to_string()));
                }

                event = unit_events.recv() => {
                    let Some(event) = event else {
                        return Err(AdCueError::SandboxProtocol(
                            "ad unit event stream closed".to_string(),
                        ));
                    };
                    self.emit(PluginEvent::Vpaid(event.name().to_string()));
                    match event {
                        VpaidEvent::AdStopped => {
                            self.emit(PluginEvent::AdEnd(context.clone()));
                            return Ok(());
                        }
                        VpaidEvent::AdError(message) => {
                            tracker.error(ERROR_VPAID_GENERAL);
                            return Err(AdCueError::SandboxProtocol(message));
                        }
                        VpaidEvent::AdSkipped => {
                            tracker.skip();
                            self.emit(PluginEvent::AdSkip(context.clone()));
                            return Ok(());
                        }
                        VpaidEvent::AdStarted => {
                            // Some units re-dispatch AdStarted; the first one won.
                            debug!("Ignoring duplicate AdStarted");
                        }
                        VpaidEvent::AdImpression => tracker.track_impression(),
                        VpaidEvent::AdVideoStart => tracker.track("start"),
                        VpaidEvent::AdVideoFirstQuartile => tracker.track("firstQuartile"),
                        VpaidEvent::AdVideoMidpoint => tracker.track("midpoint"),
                        VpaidEvent::AdVideoThirdQuartile => tracker.track("thirdQuartile"),
                        VpaidEvent::AdVideoComplete => tracker.complete(),
                        VpaidEvent::AdPaused => tracker.set_paused(true),
                        VpaidEvent::AdPlaying => tracker.set_paused(false),
                        VpaidEvent::AdUserAcceptInvitation => tracker.track("acceptInvitation"),
                        VpaidEvent::AdUserMinimize => tracker.track("minimize"),
                        VpaidEvent::AdUserClose => tracker.track("close"),
                        VpaidEvent::AdClickThru { url, player_handles } => {
                            let resolved = tracker.click(url.as_deref());
                            if !player_handles
                                && let Some(destination) = resolved {
                                    self.opener.open(&destination);
                                }
                        }
                        VpaidEvent::AdVolumeChange => {
                            let volume = match self.bounded(unit.get_ad_volume(), "getAdVolume").await {
                                Ok(Ok(v)) => v,
                                _ => continue,
                            };
                            if volume == 0.0 && last_volume > 0.0 {
                                tracker.set_muted(true);
                                self.player.set_muted(true);
                            } else if volume > 0.0 && last_volume == 0.0 {
                                tracker.set_muted(false);
                                self.player.set_muted(false);
                            }
                            if volume > 0.0 {
                                saved_volume = volume;
                                self.player.set_volume(volume);
                            }
                            last_volume = volume;
                        }
                        VpaidEvent::AdLoaded => {
                            debug!("Ignoring late AdLoaded");
                        }
                    }
                }

                control = controls.recv() => {
                    match control {
                        // Units own their skip affordance and report it as
                        // AdSkipped; the host skip control stays inert here.
                        Some(AdBreakControl::Skip) => {
                            debug!("Ignoring skip intent while an interactive ad runs");
                        }
                        Some(AdBreakControl::ToggleMute) => {
                            let target = if last_volume > 0.0 { 0.0 } else { saved_volume };
                            if let Err(e) = unit.set_ad_volume(target) {
                                warn!("setAdVolume failed: {}", e);
                            }
                        }
                        // Clicks on the ad surface reach the unit directly
                        // and come back as AdClickThru.
                        Some(AdBreakControl::Click) => {}
                        None => {
                            return Err(AdCueError::Cancelled(
                                "ad break control channel closed".to_string(),
                            ));
                        }
                    }
                }

                event = player_events.recv() => {
                    match event {
                        Ok(PlayerEvent::Resize) => {
                            let _ = unit.resize_ad(
                                self.player.width(),
                                self.player.height(),
                                view_mode(self.player.is_fullscreen()),
                            );
                        }
                        Ok(PlayerEvent::FullscreenChange) => {
                            let fullscreen = self.player.is_fullscreen();
                            tracker.set_fullscreen(fullscreen);
                            let _ = unit.resize_ad(
                                self.player.width(),
                                self.player.height(),
                                view_mode(fullscreen),
                            );
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!("Player event stream lagged by {}", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(AdCueError::Cancelled(
                                "player event stream closed".to_string(),
                            ));
                        }
                    }
                }
            }
        }
    }

    /// Wait for a matching unit event, reporting a VPAID error on timeout.
    /// Tracking-relevant events arriving before the match still reach the
    /// tracker; anything else is logged and dropped.
    async fn wait_for(
        &self,
        unit_events: &mut mpsc::UnboundedReceiver<VpaidEvent>,
        tracker: &crate::tracker::Tracker,
        matches: impl Fn(&VpaidEvent) -> bool,
        what: &str,
    ) -> Result<()> {
        let deadline = tokio::time::Instant::now() + VPAID_TIMEOUT;
        loop {
            let event = tokio::time::timeout_at(deadline, unit_events.recv()).await;
            match event {
                Ok(Some(event)) if matches(&event) => return Ok(()),
                Ok(Some(VpaidEvent::AdError(message))) => {
                    tracker.error(ERROR_VPAID_GENERAL);
                    return Err(AdCueError::SandboxProtocol(message));
                }
                Ok(Some(other)) => match other {
                    VpaidEvent::AdImpression => tracker.track_impression(),
                    VpaidEvent::AdVideoStart => tracker.track("start"),
                    VpaidEvent::AdVideoFirstQuartile => tracker.track("firstQuartile"),
                    VpaidEvent::AdVideoMidpoint => tracker.track("midpoint"),
                    VpaidEvent::AdVideoThirdQuartile => tracker.track("thirdQuartile"),
                    VpaidEvent::AdVideoComplete => tracker.complete(),
                    other => {
                        debug!("Ignoring {} while waiting for {}", other.name(), what);
                    }
                },
                Ok(None) => {
                    return Err(AdCueError::SandboxProtocol(
                        "ad unit event stream closed".to_string(),
                    ));
                }
                Err(_) => {
                    tracker.error(ERROR_VPAID_GENERAL);
                    return Err(AdCueError::Timeout(format!("waiting for {}", what)));
                }
            }
        }
    }

    /// Give a stopping unit a bounded chance to acknowledge with AdStopped
    async fn drain_until_stopped(&self, unit_events: &mut mpsc::UnboundedReceiver<VpaidEvent>) {
        let deadline = tokio::time::Instant::now() + VPAID_TIMEOUT;
        loop {
            match tokio::time::timeout_at(deadline, unit_events.recv()).await {
                Ok(Some(VpaidEvent::AdStopped)) | Ok(None) => return,
                Ok(Some(other)) => debug!("Ignoring {} while stopping", other.name()),
                Err(_) => {
                    warn!("Ad unit never acknowledged stopAd");
                    return;
                }
            }
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = T>,
        what: &str,
    ) -> Result<T> {
        timeout(VPAID_TIMEOUT, call)
            .await
            .map_err(|_| AdCueError::Timeout(format!("VPAID {} call", what)))
    }

    fn checkpoint(&self, unit: &mut E::Unit) -> Result<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            let _ = unit.stop_ad();
            return Err(AdCueError::Cancelled("VPAID session".to_string()));
        }
        Ok(())
    }

    fn emit(&self, event: PluginEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

fn view_mode(fullscreen: bool) -> &'static str {
    if fullscreen { "fullscreen" } else { "normal" }
}

/// Environment for hosts without interactive ad support. Loading always
/// fails, so VPAID-only ads are skipped with a tracked error.
pub struct NoSandbox;

/// Never constructed; `NoSandbox::load_ad_unit` always fails
pub struct NoSandboxUnit;

impl VpaidAdUnit for NoSandboxUnit {
    fn handshake_version(&mut self, _version: &str) -> impl Future<Output = Result<String>> + Send {
        async { Err(AdCueError::SandboxProtocol("no sandbox".to_string())) }
    }

    fn init_ad(
        &mut self,
        _width: u32,
        _height: u32,
        _view_mode: &str,
        _desired_bitrate: u32,
        _creative: &CreativeData,
    ) -> Result<()> {
        Err(AdCueError::SandboxProtocol("no sandbox".to_string()))
    }

    fn start_ad(&mut self) -> Result<()> {
        Err(AdCueError::SandboxProtocol("no sandbox".to_string()))
    }

    fn stop_ad(&mut self) -> Result<()> {
        Err(AdCueError::SandboxProtocol("no sandbox".to_string()))
    }

    fn resize_ad(&mut self, _width: u32, _height: u32, _view_mode: &str) -> Result<()> {
        Err(AdCueError::SandboxProtocol("no sandbox".to_string()))
    }

    fn set_ad_volume(&mut self, _volume: f64) -> Result<()> {
        Err(AdCueError::SandboxProtocol("no sandbox".to_string()))
    }

    fn get_ad_volume(&mut self) -> impl Future<Output = Result<f64>> + Send {
        async { Err(AdCueError::SandboxProtocol("no sandbox".to_string())) }
    }

    fn get_ad_linear(&mut self) -> impl Future<Output = Result<bool>> + Send {
        async { Err(AdCueError::SandboxProtocol("no sandbox".to_string())) }
    }
}

impl VpaidEnvironment for NoSandbox {
    type Unit = NoSandboxUnit;

    fn load_ad_unit(
        &self,
        media: &MediaFile,
        _slot: &SlotConfig,
    ) -> impl Future<Output = Result<(Self::Unit, mpsc::UnboundedReceiver<VpaidEvent>)>> + Send {
        let url = media.url.clone();
        async move {
            Err(AdCueError::SandboxProtocol(format!(
                "interactive ads are not supported by this host (requested {})",
                url
            )))
        }
    }

    fn unload(&self, _unit: Self::Unit) {}
}
