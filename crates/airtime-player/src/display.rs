//! Presentation poll: recomputes what a listener-facing surface needs once
//! a second, independently of the playback resync tick. Shares nothing with
//! the synchronizer beyond the read-only schedule and duration cache.

use chrono::NaiveDateTime;

use airtime_sched::durations::DurationCache;
use airtime_sched::model::Schedule;
use airtime_sched::schedule::{self, Resolution};
use airtime_sched::state::{DisplayFrame, PlaylistInfo};

/// Output of one display tick. `should_stop` asks the core to halt the
/// synchronizer: the broadcast ran out while it was still playing, and its
/// own resync tick may not have noticed yet.
#[derive(Debug, Default)]
pub struct DisplayTick {
    pub frame: DisplayFrame,
    pub should_stop: bool,
}

pub fn render_frame(
    sched: &Schedule,
    durations: &DurationCache,
    now: NaiveDateTime,
    is_playing: bool,
) -> DisplayTick {
    let (playlist, track_title) = match schedule::resolve(sched, durations, now) {
        Resolution::OffAir => {
            // Off air. If the synchronizer still says playing the broadcast
            // just ran out from under it; stop it without waiting for its
            // own resync tick.
            return DisplayTick {
                frame: DisplayFrame::default(),
                should_stop: is_playing,
            };
        }
        Resolution::Ended(playlist) => (playlist, String::new()),
        Resolution::Live(pos) => (pos.playlist, pos.track.title.clone()),
    };

    let total = schedule::playlist_duration(playlist, durations);
    let elapsed = schedule::elapsed_secs(playlist, now);
    let remaining = schedule::remaining_secs(playlist, durations, now);

    DisplayTick {
        frame: DisplayFrame {
            current_playlist: Some(PlaylistInfo {
                id: playlist.id.clone(),
                name: playlist.name.clone(),
            }),
            current_track_title: track_title,
            elapsed_secs: elapsed,
            remaining_secs: remaining,
            total_secs: total,
            has_content: playlist.has_tracks(),
        },
        should_stop: remaining <= 0.0 && is_playing,
    }
}
