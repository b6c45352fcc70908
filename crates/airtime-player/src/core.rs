//! Radio core: single task that owns the synchronizer and funnels every
//! input (control requests, media session notifications, the resync and
//! display timers) through one `select!` loop. Nothing else touches the
//! media session, so no locking is needed around it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use airtime_sched::durations::DurationCache;
use airtime_sched::model::Schedule;
use airtime_sched::state::{RadioState, StateHandle};

use crate::display;
use crate::media::{MediaEvent, MediaSession};
use crate::sync::Synchronizer;

const RESYNC_INTERVAL: Duration = Duration::from_secs(2);
const DISPLAY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub enum RadioEvent {
    Play,
    Pause,
    Toggle,
    Media(MediaEvent),
    Shutdown,
}

/// Cloneable front door to the core loop.
#[derive(Clone)]
pub struct RadioHandle {
    tx: mpsc::Sender<RadioEvent>,
    state: StateHandle,
}

impl RadioHandle {
    pub async fn play(&self) {
        let _ = self.tx.send(RadioEvent::Play).await;
    }

    pub async fn pause(&self) {
        let _ = self.tx.send(RadioEvent::Pause).await;
    }

    pub async fn toggle(&self) {
        let _ = self.tx.send(RadioEvent::Toggle).await;
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(RadioEvent::Shutdown).await;
    }

    pub async fn state(&self) -> RadioState {
        self.state.snapshot().await
    }

    pub fn sender(&self) -> mpsc::Sender<RadioEvent> {
        self.tx.clone()
    }
}

pub struct RadioCore<S: MediaSession> {
    rx: mpsc::Receiver<RadioEvent>,
    sync: Synchronizer<S>,
    schedule: Arc<Schedule>,
    durations: Arc<DurationCache>,
    state: StateHandle,
}

impl<S: MediaSession> RadioCore<S> {
    pub fn new(
        session: S,
        schedule: Arc<Schedule>,
        durations: Arc<DurationCache>,
        state: StateHandle,
    ) -> (Self, RadioHandle) {
        let (tx, rx) = mpsc::channel(64);
        let core = Self {
            rx,
            sync: Synchronizer::new(session, schedule.clone(), durations.clone()),
            schedule,
            durations,
            state: state.clone(),
        };
        (core, RadioHandle { tx, state })
    }

    pub async fn run(mut self) {
        let mut resync_timer = tokio::time::interval(RESYNC_INTERVAL);
        let mut display_timer = tokio::time::interval(DISPLAY_INTERVAL);
        resync_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        display_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = self.rx.recv() => {
                    let now = Local::now().naive_local();
                    match event {
                        None | Some(RadioEvent::Shutdown) => {
                            info!("shutting down");
                            self.sync.stop().await;
                            break;
                        }
                        Some(RadioEvent::Play) => self.sync.start(now).await,
                        Some(RadioEvent::Pause) => self.sync.stop().await,
                        Some(RadioEvent::Toggle) => {
                            if self.sync.is_active() {
                                self.sync.stop().await;
                            } else {
                                self.sync.start(now).await;
                            }
                        }
                        Some(RadioEvent::Media(media)) => {
                            self.sync.on_media_event(media, now).await;
                        }
                    }
                }
                _ = resync_timer.tick(), if self.sync.is_active() => {
                    self.sync.resync(Local::now().naive_local()).await;
                }
                _ = display_timer.tick() => {
                    let now = Local::now().naive_local();
                    let tick = display::render_frame(
                        &self.schedule,
                        &self.durations,
                        now,
                        self.sync.is_playing(),
                    );
                    if tick.should_stop {
                        debug!("display tick found the broadcast over; stopping");
                        self.sync.stop().await;
                    }
                    self.state.apply_frame(tick.frame).await;
                }
            }
            self.state.set_playing(self.sync.is_playing()).await;
        }
        self.state.set_playing(false).await;
    }
}

/// Bridge the media session's notification channel into the core loop.
pub async fn forward_media_events(
    mut rx: mpsc::Receiver<MediaEvent>,
    tx: mpsc::Sender<RadioEvent>,
) {
    while let Some(event) = rx.recv().await {
        if tx.send(RadioEvent::Media(event)).await.is_err() {
            break;
        }
    }
}
