//! Playback synchronizer: keeps the media session converged on the
//! position the schedule says is live right now.
//!
//! All suspension is cooperative. A load that has been superseded is never
//! aborted; its completion is recognised by token and ignored. The token is
//! bumped on every new load and on stop, so exactly one in-flight request
//! can ever win.

use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use airtime_sched::durations::DurationCache;
use airtime_sched::model::Schedule;
use airtime_sched::schedule::{self, Resolution};

use crate::media::{MediaEvent, MediaSession};

/// Don't seek into the last sliver of a track; landing exactly on the end
/// fires an immediate end-of-file instead of playing.
const SEEK_END_GUARD_SECS: f64 = 0.1;

/// Drift below this is left alone; constant micro-seeks are audible.
const DRIFT_TOLERANCE_SECS: f64 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncState {
    Stopped,
    /// A load is in flight; `token` identifies it, `target` is where to
    /// seek once metadata arrives.
    Loading {
        src: String,
        target: f64,
        token: u64,
    },
    Playing {
        src: String,
    },
}

pub struct Synchronizer<S: MediaSession> {
    session: S,
    schedule: Arc<Schedule>,
    durations: Arc<DurationCache>,
    token: u64,
    state: SyncState,
}

/// The canonical target, owned so the schedule borrow ends before the
/// session is driven.
struct DueTrack {
    src: String,
    title: String,
    target: f64,
}

impl<S: MediaSession> Synchronizer<S> {
    pub fn new(session: S, schedule: Arc<Schedule>, durations: Arc<DurationCache>) -> Self {
        Self {
            session,
            schedule,
            durations,
            token: 0,
            state: SyncState::Stopped,
        }
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// Playing or loading; the resync tick runs in either.
    pub fn is_active(&self) -> bool {
        !matches!(self.state, SyncState::Stopped)
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.state, SyncState::Playing { .. })
    }

    /// Begin broadcasting: resolve what is live at `now` and drive the
    /// session there. Off air or ended means there is nothing to do.
    pub async fn start(&mut self, now: NaiveDateTime) {
        let Some(due) = self.due_track(now) else {
            debug!("start requested while off air");
            return;
        };

        if self.session.loaded_src().as_deref() == Some(due.src.as_str())
            && self.session.metadata_ready()
        {
            // Same track already loaded with metadata: no round trip
            // through Loading, but the bump still invalidates any stale
            // in-flight callback.
            self.token += 1;
            self.seek_and_play(due).await;
        } else {
            self.begin_load(due).await;
        }
    }

    /// Invalidate in-flight loads, silence the session, go idle.
    pub async fn stop(&mut self) {
        self.token += 1;
        if let Err(e) = self.session.pause().await {
            warn!(error = %e, "pause failed while stopping");
        }
        self.state = SyncState::Stopped;
    }

    /// Periodic convergence check. Re-resolves the canonical position and
    /// corrects the session: track switch, drift seek, or stop.
    pub async fn resync(&mut self, now: NaiveDateTime) {
        if !self.is_active() {
            return;
        }

        let Some(due) = self.due_track(now) else {
            info!("broadcast window closed; stopping");
            self.stop().await;
            return;
        };

        let current = match &self.state {
            SyncState::Loading { src, .. } | SyncState::Playing { src } => src.clone(),
            SyncState::Stopped => unreachable!("checked is_active above"),
        };

        if due.src != current {
            self.begin_load(due).await;
            return;
        }

        if let SyncState::Playing { .. } = self.state {
            match self.session.position().await {
                Ok(Some(pos)) if (pos - due.target).abs() > DRIFT_TOLERANCE_SECS => {
                    debug!(
                        drift = pos - due.target,
                        target = due.target,
                        "drift beyond tolerance; seeking"
                    );
                    if let Err(e) = self.session.seek(due.target).await {
                        warn!(error = %e, "drift-correction seek failed");
                    }
                }
                Ok(_) => {}
                Err(e) => debug!(error = %e, "position query failed; skipping drift check"),
            }
        }
        // Loading the same track: leave the in-flight load alone. A hung
        // load is only ever overtaken by a later track switch.
    }

    /// Handle an asynchronous notification from the media session.
    pub async fn on_media_event(&mut self, event: MediaEvent, now: NaiveDateTime) {
        match event {
            MediaEvent::MetadataReady { token } => self.on_metadata_ready(token).await,
            MediaEvent::PlaybackEnded => {
                if self.is_active() {
                    debug!("track finished; resyncing to schedule");
                    self.resync(now).await;
                }
            }
            MediaEvent::PlaybackError => {
                if self.is_active() {
                    warn!("media session reported a playback error; resyncing");
                    self.resync(now).await;
                }
            }
        }
    }

    async fn on_metadata_ready(&mut self, token: u64) {
        if token != self.token {
            // A newer request superseded this load.
            debug!(stale = token, current = self.token, "discarding stale metadata callback");
            return;
        }
        let due = match &self.state {
            SyncState::Loading { src, target, .. } => DueTrack {
                src: src.clone(),
                title: String::new(),
                target: *target,
            },
            _ => return,
        };
        self.seek_and_play(due).await;
    }

    /// Resolve the live position at `now` into an owned seek target.
    /// `None` covers both off-air and playlist-ended.
    fn due_track(&self, now: NaiveDateTime) -> Option<DueTrack> {
        match schedule::resolve(&self.schedule, &self.durations, now) {
            Resolution::Live(pos) => {
                let duration = self.durations.effective(pos.track);
                let target = pos
                    .offset_secs
                    .clamp(0.0, (duration - SEEK_END_GUARD_SECS).max(0.0));
                Some(DueTrack {
                    src: pos.track.src.clone(),
                    title: pos.track.title.clone(),
                    target,
                })
            }
            Resolution::Ended(playlist) => {
                debug!(playlist = %playlist.id, "playlist has run out of tracks");
                None
            }
            Resolution::OffAir => None,
        }
    }

    async fn begin_load(&mut self, due: DueTrack) {
        self.token += 1;
        let token = self.token;
        debug!(src = %due.src, target = due.target, token, "loading due track");
        match self.session.load(&due.src, token).await {
            Ok(()) => {
                self.state = SyncState::Loading {
                    src: due.src,
                    target: due.target,
                    token,
                };
            }
            Err(e) => {
                warn!(error = %e, src = %due.src, "media session refused to load; stopping");
                self.state = SyncState::Stopped;
            }
        }
    }

    async fn seek_and_play(&mut self, due: DueTrack) {
        if let Err(e) = self.session.seek(due.target).await {
            warn!(error = %e, "seek failed");
        }
        match self.session.play().await {
            Ok(()) => {
                if !due.title.is_empty() {
                    info!(title = %due.title, offset = due.target, "now playing");
                }
                self.state = SyncState::Playing { src: due.src };
            }
            Err(e) => {
                // Platform refused to start (autoplay policy etc). Not
                // retried here; the next start() or resync tick will.
                warn!(error = %e, "playback rejected; stopping");
                self.token += 1;
                self.state = SyncState::Stopped;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::fake::FakeSession;
    use airtime_sched::model::{Playlist, Track};
    use chrono::NaiveDate;

    fn track(i: usize, playlist: &str, duration: f64) -> Track {
        Track {
            id: i.to_string(),
            title: format!("{} #{}", playlist, i),
            src: format!("/{}/{}.m4a", playlist, i),
            duration,
        }
    }

    fn schedule_10h(durations: &[f64]) -> Arc<Schedule> {
        Arc::new(Schedule {
            playlists: vec![Playlist {
                id: "p".into(),
                name: "P".into(),
                start_hour: 10,
                start_minute: 0,
                tracks: durations
                    .iter()
                    .enumerate()
                    .map(|(i, d)| track(i, "p", *d))
                    .collect(),
            }],
        })
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn synchronizer(durations: &[f64]) -> (Synchronizer<FakeSession>, FakeSession) {
        let session = FakeSession::default();
        let sync = Synchronizer::new(
            session.clone(),
            schedule_10h(durations),
            Arc::new(DurationCache::new()),
        );
        (sync, session)
    }

    #[tokio::test]
    async fn start_loads_due_track_then_plays_at_offset() {
        let (mut sync, session) = synchronizer(&[300.0, 200.0]);

        // 400s elapsed: second track, 100s deep.
        sync.start(at(10, 6, 40)).await;
        assert_eq!(
            *sync.state(),
            SyncState::Loading {
                src: "/p/1.m4a".into(),
                target: 100.0,
                token: 1
            }
        );
        assert!(!session.inner().playing);

        session.finish_load();
        sync.on_media_event(MediaEvent::MetadataReady { token: 1 }, at(10, 6, 41))
            .await;
        let inner = session.inner();
        assert_eq!(inner.seeks, vec![100.0]);
        assert!(inner.playing);
        drop(inner);
        assert!(sync.is_playing());
    }

    #[tokio::test]
    async fn start_is_a_noop_off_air_and_after_the_playlist() {
        let (mut sync, session) = synchronizer(&[300.0]);

        sync.start(at(9, 0, 0)).await;
        assert_eq!(*sync.state(), SyncState::Stopped);
        sync.start(at(11, 0, 0)).await;
        assert_eq!(*sync.state(), SyncState::Stopped);
        assert!(session.inner().loads.is_empty());
    }

    #[tokio::test]
    async fn stale_metadata_callback_is_suppressed() {
        let (mut sync, session) = synchronizer(&[300.0, 200.0]);

        // Token 1: first track due.
        sync.start(at(10, 1, 0)).await;
        assert_eq!(session.inner().loads, vec![("/p/0.m4a".into(), 1)]);

        // Before metadata arrives the schedule has moved on; the resync
        // issues token 2 for the second track.
        sync.resync(at(10, 5, 30)).await;
        assert_eq!(session.inner().loads.len(), 2);
        assert_eq!(session.inner().loads[1], ("/p/1.m4a".into(), 2));

        // Token 1 finally completes: must be a no-op.
        sync.on_media_event(MediaEvent::MetadataReady { token: 1 }, at(10, 5, 31))
            .await;
        assert!(session.inner().seeks.is_empty());
        assert!(!session.inner().playing);
        assert!(matches!(sync.state(), SyncState::Loading { token: 2, .. }));

        // Token 2 wins and only its seek (30s into track 1) is observed.
        session.finish_load();
        sync.on_media_event(MediaEvent::MetadataReady { token: 2 }, at(10, 5, 32))
            .await;
        assert_eq!(session.inner().seeks, vec![30.0]);
        assert!(session.inner().playing);
    }

    #[tokio::test]
    async fn drift_correction_is_thresholded_and_idempotent() {
        let (mut sync, session) = synchronizer(&[300.0, 200.0]);

        sync.start(at(10, 0, 30)).await;
        session.finish_load();
        sync.on_media_event(MediaEvent::MetadataReady { token: 1 }, at(10, 0, 30))
            .await;
        assert_eq!(session.inner().seeks, vec![30.0]);

        // Half a second of drift: left alone.
        session.inner().position = 34.5;
        sync.resync(at(10, 0, 34)).await;
        assert_eq!(session.inner().seeks.len(), 1);

        // Five seconds behind: one corrective seek.
        session.inner().position = 55.0;
        sync.resync(at(10, 1, 0)).await;
        assert_eq!(session.inner().seeks, vec![30.0, 60.0]);

        // Same instant again: position now matches, no further seek.
        sync.resync(at(10, 1, 0)).await;
        sync.resync(at(10, 1, 0)).await;
        assert_eq!(session.inner().seeks.len(), 2);
    }

    #[tokio::test]
    async fn resync_switches_track_when_schedule_moves_on() {
        let (mut sync, session) = synchronizer(&[300.0, 200.0]);

        sync.start(at(10, 4, 0)).await;
        session.finish_load();
        sync.on_media_event(MediaEvent::MetadataReady { token: 1 }, at(10, 4, 0))
            .await;
        assert!(sync.is_playing());

        sync.resync(at(10, 5, 10)).await;
        assert_eq!(
            *sync.state(),
            SyncState::Loading {
                src: "/p/1.m4a".into(),
                target: 10.0,
                token: 2
            }
        );
    }

    #[tokio::test]
    async fn resync_stops_once_the_broadcast_is_over() {
        let (mut sync, session) = synchronizer(&[300.0]);

        sync.start(at(10, 2, 0)).await;
        session.finish_load();
        sync.on_media_event(MediaEvent::MetadataReady { token: 1 }, at(10, 2, 0))
            .await;
        assert!(sync.is_playing());

        sync.resync(at(10, 6, 0)).await;
        assert_eq!(*sync.state(), SyncState::Stopped);
        let inner = session.inner();
        assert!(!inner.playing);
        assert_eq!(inner.pauses, 1);
    }

    #[tokio::test]
    async fn natural_track_end_resyncs_to_the_next_track() {
        let (mut sync, session) = synchronizer(&[300.0, 200.0]);

        sync.start(at(10, 4, 0)).await;
        session.finish_load();
        sync.on_media_event(MediaEvent::MetadataReady { token: 1 }, at(10, 4, 0))
            .await;

        // The first track runs out right at the boundary.
        sync.on_media_event(MediaEvent::PlaybackEnded, at(10, 5, 0)).await;
        assert!(matches!(
            sync.state(),
            SyncState::Loading { token: 2, .. }
        ));
        assert_eq!(session.inner().loads[1].0, "/p/1.m4a");
    }

    #[tokio::test]
    async fn rejected_play_degrades_to_stopped() {
        let (mut sync, session) = synchronizer(&[300.0]);
        session.inner().reject_play = true;

        sync.start(at(10, 1, 0)).await;
        session.finish_load();
        sync.on_media_event(MediaEvent::MetadataReady { token: 1 }, at(10, 1, 0))
            .await;

        assert_eq!(*sync.state(), SyncState::Stopped);
        assert!(!session.inner().playing);

        // Next explicit start tries again and succeeds.
        session.inner().reject_play = false;
        sync.start(at(10, 1, 30)).await;
        // Same src already loaded with metadata: plays directly.
        assert!(sync.is_playing());
        assert_eq!(session.inner().seeks.last().copied(), Some(90.0));
    }

    #[tokio::test]
    async fn seek_target_is_clamped_away_from_the_track_end() {
        let (mut sync, session) = synchronizer(&[300.0, 200.0]);
        // 299.95s elapsed is still inside track 0 but within the end guard:
        // the target backs off to duration - 0.1.
        let now = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_milli_opt(10, 4, 59, 950)
            .unwrap();
        sync.start(now).await;
        match sync.state() {
            SyncState::Loading { target, .. } => assert!((target - 299.9).abs() < 1e-6),
            other => panic!("expected loading, got {:?}", other),
        }
        assert_eq!(session.inner().loads.len(), 1);
    }
}
