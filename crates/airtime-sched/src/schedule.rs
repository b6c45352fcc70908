//! Pure wall-clock schedule resolution.
//!
//! Everything here is a deterministic function of `(schedule, duration
//! cache, now)`. The player and the display poll these independently; there
//! is nothing to synchronize because repeated calls with the same instant
//! return the same answer.

use chrono::NaiveDateTime;

use crate::durations::DurationCache;
use crate::model::{Playlist, Schedule, Track};

/// Where the broadcast stands at a given instant.
#[derive(Debug)]
pub enum Resolution<'a> {
    /// No playlist's window contains `now`. A valid state, not an error.
    OffAir,
    /// A playlist's window nominally contains `now` but its tracks have run
    /// out (can happen transiently between ticks as measured durations come
    /// in). The caller must stop playback.
    Ended(&'a Playlist),
    Live(LivePosition<'a>),
}

/// The canonically live track and position inside it.
#[derive(Debug)]
pub struct LivePosition<'a> {
    pub playlist: &'a Playlist,
    pub track: &'a Track,
    pub track_index: usize,
    /// Seconds into `track`.
    pub offset_secs: f64,
    /// Seconds since the playlist started (clamped to >= 0).
    pub elapsed_secs: f64,
}

/// The next playlist that has not started yet today.
#[derive(Debug)]
pub struct Upcoming<'a> {
    pub playlist: &'a Playlist,
    pub seconds_until_start: f64,
}

/// Resolve which playlist/track/offset is live at `now`.
///
/// Playlists are scanned from the latest start time backward, so when two
/// windows overlap the later-starting playlist wins: a freshly started
/// broadcast silently preempts an earlier one still nominally in window.
/// The reverse scan is deliberate; do not replace it with a first-match
/// forward scan.
pub fn resolve<'a>(
    schedule: &'a Schedule,
    durations: &DurationCache,
    now: NaiveDateTime,
) -> Resolution<'a> {
    let mut sorted: Vec<&Playlist> = schedule.playlists.iter().collect();
    sorted.sort_by_key(|p| p.start_minute_of_day());

    for playlist in sorted.into_iter().rev() {
        let start = playlist.start_on(now.date());
        let total = playlist_duration(playlist, durations);
        let end = start + chrono::Duration::milliseconds((total * 1000.0) as i64);
        if now >= start && now < end {
            return position_in(playlist, durations, now);
        }
    }

    Resolution::OffAir
}

fn position_in<'a>(
    playlist: &'a Playlist,
    durations: &DurationCache,
    now: NaiveDateTime,
) -> Resolution<'a> {
    let elapsed = elapsed_secs(playlist, now);

    let mut accumulated = 0.0;
    for (index, track) in playlist.tracks.iter().enumerate() {
        let duration = durations.effective(track);
        if accumulated + duration > elapsed {
            return Resolution::Live(LivePosition {
                playlist,
                track,
                track_index: index,
                offset_secs: elapsed - accumulated,
                elapsed_secs: elapsed,
            });
        }
        accumulated += duration;
    }

    Resolution::Ended(playlist)
}

/// Total effective duration of a playlist in seconds.
pub fn playlist_duration(playlist: &Playlist, durations: &DurationCache) -> f64 {
    playlist.tracks.iter().map(|t| durations.effective(t)).sum()
}

/// Seconds since the playlist's start today. Clamped to >= 0 so clock skew
/// before the nominal start never produces a negative offset.
pub fn elapsed_secs(playlist: &Playlist, now: NaiveDateTime) -> f64 {
    let start = playlist.start_on(now.date());
    let elapsed_ms = (now - start).num_milliseconds();
    (elapsed_ms as f64 / 1000.0).max(0.0)
}

/// Seconds of broadcast left in the playlist at `now`.
pub fn remaining_secs(playlist: &Playlist, durations: &DurationCache, now: NaiveDateTime) -> f64 {
    (playlist_duration(playlist, durations) - elapsed_secs(playlist, now)).max(0.0)
}

/// The soonest playlist with tracks whose start is still in the future
/// today. A start that has already passed is not "next" until tomorrow,
/// and multi-day lookahead is out of scope.
pub fn next_upcoming<'a>(schedule: &'a Schedule, now: NaiveDateTime) -> Option<Upcoming<'a>> {
    schedule
        .playlists
        .iter()
        .filter(|p| p.has_tracks())
        .filter_map(|p| {
            let until_ms = (p.start_on(now.date()) - now).num_milliseconds();
            (until_ms > 0).then(|| Upcoming {
                playlist: p,
                seconds_until_start: until_ms as f64 / 1000.0,
            })
        })
        .min_by(|a, b| {
            a.seconds_until_start
                .total_cmp(&b.seconds_until_start)
        })
}

/// Format whole seconds as `H:MM:SS`, or `M:SS` under an hour.
pub fn format_clock(secs: f64) -> String {
    let secs = secs.max(0.0) as u64;
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}
