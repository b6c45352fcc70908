//! Walks a whole broadcast day through the loader, the duration cache and
//! the resolver, the way the player consumes them.

use airtime_sched::durations::DurationCache;
use airtime_sched::model::parse_schedule_from_toml_str;
use airtime_sched::schedule::{self, Resolution};
use chrono::{NaiveDate, NaiveDateTime};

const DAY_SCHEDULE: &str = r#"
    [[playlist]]
    id = "morning"
    name = "Morning Waves"
    start_hour = 9
    start_minute = 0

    [[playlist.track]]
    id = "m1"
    title = "Sunrise"
    src = "/audio/sunrise.m4a"
    duration = 600.0

    [[playlist.track]]
    id = "m2"
    title = "Coffee Break"
    src = "/audio/coffee.m4a"
    duration = 900.0

    [[playlist]]
    id = "afternoon"
    name = "Afternoon Vibes"
    start_hour = 14
    start_minute = 0

    [[playlist.track]]
    id = "a1"
    title = "Slow Hours"
    src = "/audio/slow.m4a"
    duration = 1200.0

    [[playlist]]
    id = "overlap"
    name = "Flash Broadcast"
    start_hour = 14
    start_minute = 10

    [[playlist.track]]
    id = "o1"
    title = "Breaking In"
    src = "/audio/breaking.m4a"
    duration = 300.0
"#;

fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 1)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}

#[test]
fn broadcast_day_resolves_consistently() {
    let sched = parse_schedule_from_toml_str(DAY_SCHEDULE).unwrap();
    let cache = DurationCache::new();

    // Before the first start: off air, morning is next.
    assert!(matches!(
        schedule::resolve(&sched, &cache, at(8, 0, 0)),
        Resolution::OffAir
    ));
    let up = schedule::next_upcoming(&sched, at(8, 0, 0)).unwrap();
    assert_eq!(up.playlist.id, "morning");
    assert_eq!(up.seconds_until_start, 3600.0);

    // Mid-morning: 700s in lands 100s into the second track.
    match schedule::resolve(&sched, &cache, at(9, 11, 40)) {
        Resolution::Live(pos) => {
            assert_eq!(pos.playlist.id, "morning");
            assert_eq!(pos.track_index, 1);
            assert_eq!(pos.track.title, "Coffee Break");
            assert_eq!(pos.offset_secs, 100.0);
        }
        other => panic!("expected live morning position, got {:?}", other),
    }

    // Gap between morning and afternoon.
    assert!(matches!(
        schedule::resolve(&sched, &cache, at(12, 0, 0)),
        Resolution::OffAir
    ));

    // 14:12 sits inside both the afternoon window and the flash broadcast
    // that started at 14:10; the later start wins.
    match schedule::resolve(&sched, &cache, at(14, 12, 0)) {
        Resolution::Live(pos) => {
            assert_eq!(pos.playlist.id, "overlap");
            assert_eq!(pos.offset_secs, 120.0);
        }
        other => panic!("expected flash broadcast, got {:?}", other),
    }

    // The flash broadcast ends at 14:15; the afternoon playlist (still in
    // window until 14:20) takes back over.
    match schedule::resolve(&sched, &cache, at(14, 16, 0)) {
        Resolution::Live(pos) => {
            assert_eq!(pos.playlist.id, "afternoon");
            assert_eq!(pos.offset_secs, 960.0);
        }
        other => panic!("expected afternoon to resume, got {:?}", other),
    }
}

#[test]
fn measured_durations_reshape_the_day() {
    let sched = parse_schedule_from_toml_str(DAY_SCHEDULE).unwrap();
    let cache = DurationCache::new();

    // The morning opener measures shorter than declared: boundaries move.
    cache.record("/audio/sunrise.m4a", 550.0);

    match schedule::resolve(&sched, &cache, at(9, 9, 30)) {
        Resolution::Live(pos) => {
            assert_eq!(pos.track.title, "Coffee Break");
            assert_eq!(pos.offset_secs, 20.0);
        }
        other => panic!("expected shifted boundary, got {:?}", other),
    }

    // Morning now ends 50s earlier too.
    let morning = &sched.playlists[0];
    assert_eq!(schedule::playlist_duration(morning, &cache), 1450.0);
    assert!(matches!(
        schedule::resolve(&sched, &cache, at(9, 24, 30)),
        Resolution::OffAir
    ));
}
