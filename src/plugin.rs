//! The ad insertion controller: owns the schedule, loads breaks ahead of
//! their cue points and hands them to the sequencer when the player is
//! ready for them.

use crate::ad::loader::AdLoader;
use crate::ad::tracked::TrackedAd;
use crate::config::{AdSource, PluginOptions};
use crate::error::Result;
use crate::player::{AdBreakControl, CompanionSlot, LinkOpener, MediaPlayer, PlayerEvent, PluginEvent};
use crate::schedule::{MidrollWatcher, ResolvedSchedule};
use crate::sequencer::AdBreakSequencer;
use crate::tracker::{Beacon, ERROR_VAST_LOAD_TIMEOUT, HttpBeacon};
use crate::vast::fetch::{FetchOptions, HttpVastFetcher, VastFetcher};
use crate::vpaid::{NoSandbox, VpaidEnvironment, VpaidHandler};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Window after startup in which the preroll response may still claim the
/// adsready signal; past it the host is told to start content regardless.
const ADS_READY_FALLBACK: Duration = Duration::from_secs(3);

/// VAST/VPAID ad insertion controller for one content playback session
pub struct VastPlugin<P: MediaPlayer, F: VastFetcher + 'static, E: VpaidEnvironment> {
    player: Arc<P>,
    loader: Arc<AdLoader<F>>,
    sequencer: AdBreakSequencer<P, E>,
    schedule: ResolvedSchedule,
    events: broadcast::Sender<PluginEvent>,
    controls_tx: mpsc::Sender<AdBreakControl>,
    controls: mpsc::Receiver<AdBreakControl>,
}

impl<P: MediaPlayer> VastPlugin<P, HttpVastFetcher, NoSandbox> {
    /// Controller with the stock HTTP fetch/beacon transports and no
    /// interactive ad support
    pub fn with_http(
        player: Arc<P>,
        opener: Arc<dyn LinkOpener>,
        companion_slot: Option<Arc<dyn CompanionSlot>>,
        options: PluginOptions,
    ) -> Result<Self> {
        let client = reqwest::Client::new();
        Self::new(
            player,
            Arc::new(HttpVastFetcher::new(client.clone())),
            Arc::new(HttpBeacon::new(client)),
            Arc::new(NoSandbox),
            opener,
            companion_slot,
            options,
        )
    }
}

impl<P: MediaPlayer, F: VastFetcher + 'static, E: VpaidEnvironment> VastPlugin<P, F, E> {
    pub fn new(
        player: Arc<P>,
        fetcher: Arc<F>,
        beacon: Arc<dyn Beacon>,
        env: Arc<E>,
        opener: Arc<dyn LinkOpener>,
        companion_slot: Option<Arc<dyn CompanionSlot>>,
        options: PluginOptions,
    ) -> Result<Self> {
        let schedule = ResolvedSchedule::from_options(&options)?;
        let (events, _) = broadcast::channel(64);
        let (controls_tx, controls) = mpsc::channel(16);

        let fetch_options = FetchOptions {
            with_credentials: options.with_credentials,
            wrapper_limit: options.wrapper_limit,
        };
        let loader = Arc::new(AdLoader::new(
            fetcher,
            beacon,
            fetch_options,
            options.companion.clone(),
        ));

        let vpaid = VpaidHandler::new(
            player.clone(),
            env,
            options.vpaid.clone(),
            opener.clone(),
            events.clone(),
        );
        let sequencer = AdBreakSequencer::new(
            player.clone(),
            vpaid,
            opener,
            companion_slot,
            options,
            events.clone(),
        );

        Ok(Self {
            player,
            loader,
            sequencer,
            schedule,
            events,
            controls_tx,
            controls,
        })
    }

    /// Notifications published to the host integration
    pub fn subscribe(&self) -> broadcast::Receiver<PluginEvent> {
        self.events.subscribe()
    }

    /// Sender the host UI routes skip/click/mute intents through
    pub fn controls(&self) -> mpsc::Sender<AdBreakControl> {
        self.controls_tx.clone()
    }

    /// Drive ad insertion until the player event stream closes.
    ///
    /// The preroll request is dispatched immediately; midrolls are loaded
    /// when their cue point fires and the postroll when content ends.
    pub async fn run(mut self) -> Result<()> {
        let mut player_events = self.player.events();
        let mut watcher = MidrollWatcher::new(&self.schedule);

        let mut preroll_task = self
            .schedule
            .preroll()
            .map(|item| spawn_load(self.loader.clone(), item.source.clone()));
        let mut midroll_task: Option<JoinHandle<Vec<TrackedAd>>> = None;

        let mut preroll_ads: Option<Vec<TrackedAd>> = None;
        let mut preroll_requested = false;
        let mut timed_out = false;
        let mut ads_ready_sent = false;
        let mut ads_ready_fallback = if preroll_task.is_some() {
            Some(Instant::now() + ADS_READY_FALLBACK)
        } else {
            None
        };

        if preroll_task.is_none() {
            self.emit(PluginEvent::AdsReady);
            ads_ready_sent = true;
        }

        loop {
            tokio::select! {
                ads = finished(&mut preroll_task) => {
                    let Some(ads) = ads else { continue };
                    if timed_out {
                        // The player gave up waiting; report and drop them
                        warn!("Preroll ads arrived after the player's deadline");
                        for ad in &ads {
                            ad.linear_tracker().error(ERROR_VAST_LOAD_TIMEOUT);
                        }
                        self.emit(PluginEvent::AdsCanceled);
                        continue;
                    }
                    ads_ready_fallback = None;
                    if !ads_ready_sent {
                        self.emit(PluginEvent::AdsReady);
                        ads_ready_sent = true;
                    }
                    if preroll_requested {
                        self.play_preroll(ads).await;
                    } else {
                        preroll_ads = Some(ads);
                    }
                }

                _ = sleep_until_opt(ads_ready_fallback) => {
                    ads_ready_fallback = None;
                    if !ads_ready_sent {
                        debug!("Preroll still loading, releasing content start");
                        self.emit(PluginEvent::AdsReady);
                        ads_ready_sent = true;
                    }
                }

                ads = finished(&mut midroll_task) => {
                    if let Some(ads) = ads {
                        if ads.is_empty() {
                            info!("Midroll break resolved to no ads");
                        } else {
                            self.sequencer.play_break(ads, &mut self.controls).await;
                        }
                    }
                    watcher.unlock();
                }

                event = player_events.recv() => {
                    match event {
                        Ok(PlayerEvent::ReadyForPreroll) => {
                            if let Some(ads) = preroll_ads.take() {
                                self.play_preroll(ads).await;
                            } else if preroll_task.is_some() {
                                preroll_requested = true;
                            } else {
                                self.emit(PluginEvent::NoPreroll);
                            }
                        }
                        Ok(PlayerEvent::AdTimeout) => {
                            if preroll_task.is_some() {
                                timed_out = true;
                            }
                        }
                        Ok(PlayerEvent::TimeUpdate) => {
                            if midroll_task.is_none()
                                && let Some(source) = watcher.check(
                                    self.player.current_time(),
                                    self.player.duration(),
                                )
                            {
                                midroll_task =
                                    Some(spawn_load(self.loader.clone(), source));
                            }
                        }
                        Ok(PlayerEvent::ReadyForPostroll) => {
                            self.play_postroll().await;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!("Player event stream lagged by {}", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("Player event stream closed, ad insertion done");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn play_preroll(&mut self, ads: Vec<TrackedAd>) {
        if ads.is_empty() {
            self.emit(PluginEvent::NoPreroll);
        } else {
            self.sequencer.play_break(ads, &mut self.controls).await;
        }
        // Hosts configured for autoplay expect content to resume unprompted
        if self.player.autoplay() {
            self.player.play();
        }
    }

    async fn play_postroll(&mut self) {
        let Some(item) = self.schedule.postroll() else {
            self.emit(PluginEvent::NoPostroll);
            return;
        };
        let ads = match self.loader.load_ads(&item.source).await {
            Ok(ads) => ads,
            Err(e) => {
                warn!("Postroll load failed: {}", e);
                Vec::new()
            }
        };
        if ads.is_empty() {
            self.emit(PluginEvent::NoPostroll);
        } else {
            self.sequencer.play_break(ads, &mut self.controls).await;
        }
    }

    fn emit(&self, event: PluginEvent) {
        let _ = self.events.send(event);
    }
}

fn spawn_load<F: VastFetcher + 'static>(
    loader: Arc<AdLoader<F>>,
    source: AdSource,
) -> JoinHandle<Vec<TrackedAd>> {
    tokio::spawn(async move {
        match loader.load_ads(&source).await {
            Ok(ads) => ads,
            Err(e) => {
                warn!("Ad break load failed: {}", e);
                Vec::new()
            }
        }
    })
}

/// Resolves when the task finishes; pends forever while there is no task.
/// The handle stays in place if another branch wins the race.
async fn finished<T>(task: &mut Option<JoinHandle<T>>) -> Option<T> {
    match task.as_mut() {
        Some(handle) => {
            let result = handle.await.ok();
            *task = None;
            result
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
