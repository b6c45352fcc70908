mod core;
mod display;
mod media;
mod probe;
mod sync;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use airtime_sched::config::Config;
use airtime_sched::durations::DurationCache;
use airtime_sched::model;
use airtime_sched::state::StateHandle;

use crate::core::RadioCore;
use crate::media::MpvSession;
use crate::probe::LoftyProber;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,airtime_player=debug".into()),
        )
        .init();

    let config = Config::load().context("failed to load configuration")?;

    let schedule = model::load_schedule_from_toml(&config.schedule.schedule_toml)
        .with_context(|| {
            format!(
                "failed to load schedule from {}",
                config.schedule.schedule_toml.display()
            )
        })?;
    info!(
        playlists = schedule.playlists.len(),
        "schedule loaded from {}",
        config.schedule.schedule_toml.display()
    );
    if schedule.playlists.is_empty() {
        warn!("schedule is empty; the radio will stay off air");
    }

    let schedule = Arc::new(schedule);
    let durations = Arc::new(DurationCache::new());
    let state = StateHandle::new();

    // Measure real durations before the first resolution; anything that
    // fails or outlives the timeout keeps its declared default.
    probe::resolve_all(
        schedule.all_tracks().cloned().collect(),
        LoftyProber,
        durations.clone(),
        Duration::from_secs(config.probe.timeout_secs),
    )
    .await;
    state.set_ready().await;

    let (media_tx, media_rx) = mpsc::channel(64);
    let session = MpvSession::spawn_and_connect(config.player.default_volume, media_tx)
        .await
        .context("failed to start the mpv media session")?;

    let (radio, handle) = RadioCore::new(session, schedule, durations, state);

    tokio::spawn(crate::core::forward_media_events(media_rx, handle.sender()));

    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown_handle.shutdown().await;
        }
    });

    if config.player.autoplay {
        handle.play().await;
    }

    radio.run().await;
    info!("goodbye");
    Ok(())
}
