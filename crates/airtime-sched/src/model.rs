use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A single scheduled piece of audio.
///
/// `duration` is the *declared* length in seconds, used until the duration
/// prober has measured the real one (see [`crate::durations::DurationCache`]).
/// Track identity is `src`: two entries with the same `src` are the same
/// audio as far as "already loaded" checks go.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub src: String,
    pub duration: f64,
}

/// A playlist bound to a daily wall-clock start time (local, no timezone
/// conversion). Track order is load-bearing: position determines each
/// track's cumulative offset inside the broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub start_hour: u32,
    pub start_minute: u32,
    #[serde(default, rename = "track")]
    pub tracks: Vec<Track>,
}

impl Playlist {
    /// Minutes after local midnight at which this playlist starts.
    pub fn start_minute_of_day(&self) -> u32 {
        self.start_hour * 60 + self.start_minute
    }

    /// The playlist's start instant on the given date.
    pub fn start_on(&self, date: NaiveDate) -> NaiveDateTime {
        date.and_hms_opt(self.start_hour, self.start_minute, 0)
            .expect("start time validated at load")
    }

    pub fn has_tracks(&self) -> bool {
        !self.tracks.is_empty()
    }
}

/// The full day's schedule. Definition order is irrelevant; resolution
/// sorts by minute-of-day. Loaded once at startup and immutable after.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default, rename = "playlist")]
    pub playlists: Vec<Playlist>,
}

impl Schedule {
    pub fn all_tracks(&self) -> impl Iterator<Item = &Track> {
        self.playlists.iter().flat_map(|p| p.tracks.iter())
    }
}

pub fn parse_schedule_from_toml_str(content: &str) -> anyhow::Result<Schedule> {
    let schedule: Schedule = toml::from_str(content)?;
    validate(&schedule)?;
    Ok(schedule)
}

pub fn load_schedule_from_toml(path: &std::path::Path) -> anyhow::Result<Schedule> {
    let content = std::fs::read_to_string(path)?;
    parse_schedule_from_toml_str(&content)
}

fn validate(schedule: &Schedule) -> anyhow::Result<()> {
    for playlist in &schedule.playlists {
        if playlist.start_hour > 23 || playlist.start_minute > 59 {
            anyhow::bail!(
                "playlist '{}': start time {:02}:{:02} out of range",
                playlist.id,
                playlist.start_hour,
                playlist.start_minute
            );
        }
        for track in &playlist.tracks {
            if !(track.duration.is_finite() && track.duration > 0.0) {
                anyhow::bail!(
                    "playlist '{}', track '{}': declared duration {} must be a positive finite number of seconds",
                    playlist.id,
                    track.id,
                    track.duration
                );
            }
        }
    }
    Ok(())
}
