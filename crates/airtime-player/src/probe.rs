//! Duration probing: measure each track's real length up front so the
//! schedule math stops trusting declared defaults.
//!
//! Probing is best-effort. Every failure mode (unreadable file, remote
//! source, a probe that never completes) degrades to the declared default
//! for that track's lifetime. A global timeout bounds the wait; probes
//! still in flight when it fires keep running and their results stay valid
//! in the cache, but nothing waits for them anymore.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use thiserror::Error;
use tracing::{debug, info, warn};

use airtime_sched::durations::DurationCache;
use airtime_sched::model::Track;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("unsupported source '{0}': only local files can be probed")]
    Unsupported(String),
    #[error("failed to read media metadata: {0}")]
    Read(String),
    #[error("measured duration {0} is not a positive finite value")]
    Invalid(f64),
}

/// Measures one source's real duration. Cloned into a task per track.
pub trait DurationProber: Clone + Send + Sync + 'static {
    fn probe(&self, src: String) -> impl Future<Output = Result<f64, ProbeError>> + Send;
}

/// Reads duration metadata from local files with lofty.
#[derive(Clone)]
pub struct LoftyProber;

impl DurationProber for LoftyProber {
    fn probe(&self, src: String) -> impl Future<Output = Result<f64, ProbeError>> + Send {
        async move {
            if src.contains("://") {
                return Err(ProbeError::Unsupported(src));
            }
            let secs = tokio::task::spawn_blocking(move || {
                lofty::read_from_path(&src)
                    .map(|tagged| {
                        use lofty::file::AudioFile;
                        tagged.properties().duration().as_secs_f64()
                    })
                    .map_err(|e| ProbeError::Read(e.to_string()))
            })
            .await
            .map_err(|e| ProbeError::Read(e.to_string()))??;

            if secs.is_finite() && secs > 0.0 {
                Ok(secs)
            } else {
                Err(ProbeError::Invalid(secs))
            }
        }
    }
}

/// Probe every track and record successes in the cache. Returns when all
/// probes have settled or `timeout` elapses, whichever comes first.
pub async fn resolve_all<P: DurationProber>(
    tracks: Vec<Track>,
    prober: P,
    cache: Arc<DurationCache>,
    timeout: Duration,
) {
    if tracks.is_empty() {
        debug!("no tracks to probe");
        return;
    }

    let total = tracks.len();
    let mut handles = Vec::with_capacity(total);
    for track in tracks {
        let prober = prober.clone();
        let cache = cache.clone();
        // Spawned (not just joined) so a late completion after the timeout
        // still lands in the cache.
        handles.push(tokio::spawn(async move {
            match prober.probe(track.src.clone()).await {
                Ok(secs) => {
                    if cache.record(&track.src, secs) {
                        debug!(src = %track.src, secs, "measured track duration");
                    }
                }
                Err(e) => {
                    debug!(src = %track.src, error = %e, "duration probe failed; keeping declared default");
                }
            }
        }));
    }

    match tokio::time::timeout(timeout, join_all(handles)).await {
        Ok(_) => info!(measured = cache.len(), total, "duration probing settled"),
        Err(_) => warn!(
            measured = cache.len(),
            total, "duration probing timed out; unmeasured tracks keep declared defaults"
        ),
    }
}
