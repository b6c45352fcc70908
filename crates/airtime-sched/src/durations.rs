use std::collections::HashMap;
use std::sync::RwLock;

use crate::model::Track;

/// Measured track durations, keyed by `src`.
///
/// The schedule catalog itself is immutable; everything that needs a track's
/// real length consults this cache and falls back to the declared default.
/// A measurement is only accepted if it is a positive finite number, so
/// [`DurationCache::effective`] always returns something usable. The last
/// successful measurement wins; a default is never reapplied after one.
#[derive(Debug, Default)]
pub struct DurationCache {
    measured: RwLock<HashMap<String, f64>>,
}

impl DurationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a measured duration for `src`. Returns false (and stores
    /// nothing) when the measurement is not a positive finite value.
    pub fn record(&self, src: &str, secs: f64) -> bool {
        if !(secs.is_finite() && secs > 0.0) {
            return false;
        }
        self.measured
            .write()
            .expect("duration cache poisoned")
            .insert(src.to_string(), secs);
        true
    }

    pub fn measured(&self, src: &str) -> Option<f64> {
        self.measured
            .read()
            .expect("duration cache poisoned")
            .get(src)
            .copied()
    }

    /// The track's effective duration: measured if available, else the
    /// declared default.
    pub fn effective(&self, track: &Track) -> f64 {
        self.measured(&track.src).unwrap_or(track.duration)
    }

    pub fn len(&self) -> usize {
        self.measured.read().expect("duration cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
