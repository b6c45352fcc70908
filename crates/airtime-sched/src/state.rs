use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Presentation snapshot of the broadcast. `rev` is a monotonically
/// increasing counter bumped on every change so a consumer polling the
/// state can cheaply detect updates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RadioState {
    #[serde(default)]
    pub rev: u64,
    pub is_playing: bool,
    /// True once duration probing has settled (success or timeout).
    pub is_ready: bool,
    pub current_playlist: Option<PlaylistInfo>,
    pub current_track_title: String,
    pub elapsed_secs: f64,
    pub remaining_secs: f64,
    pub total_secs: f64,
    /// Whether the active playlist has any tracks at all.
    pub has_content: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaylistInfo {
    pub id: String,
    pub name: String,
}

/// What the display updater recomputed this tick.
#[derive(Debug, Clone, Default)]
pub struct DisplayFrame {
    pub current_playlist: Option<PlaylistInfo>,
    pub current_track_title: String,
    pub elapsed_secs: f64,
    pub remaining_secs: f64,
    pub total_secs: f64,
    pub has_content: bool,
}

/// Shared, cheaply cloneable handle to the presentation state.
#[derive(Clone, Default)]
pub struct StateHandle {
    state: Arc<RwLock<RadioState>>,
}

impl StateHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> RadioState {
        self.state.read().await.clone()
    }

    pub async fn apply_frame(&self, frame: DisplayFrame) {
        let mut state = self.state.write().await;
        state.current_playlist = frame.current_playlist;
        state.current_track_title = frame.current_track_title;
        state.elapsed_secs = frame.elapsed_secs;
        state.remaining_secs = frame.remaining_secs;
        state.total_secs = frame.total_secs;
        state.has_content = frame.has_content;
        state.rev += 1;
    }

    pub async fn set_playing(&self, playing: bool) {
        let mut state = self.state.write().await;
        if state.is_playing != playing {
            state.is_playing = playing;
            state.rev += 1;
        }
    }

    pub async fn set_ready(&self) {
        let mut state = self.state.write().await;
        state.is_ready = true;
        state.rev += 1;
    }
}
