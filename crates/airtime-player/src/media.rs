//! The media-rendering contract and its mpv backend.
//!
//! The synchronizer only ever talks to a [`MediaSession`]: point it at a
//! source, seek, flip pause, read the position, and listen for the
//! asynchronous notifications on an mpsc channel. The production backend
//! drives an mpv subprocess over its JSON IPC socket:
//!
//! ```text
//!   MpvSession::spawn_and_connect()
//!         │
//!         ├── writer task  ← MpvRequest via mpsc, serialised → socket
//!         └── reader task  ← JSON lines from socket
//!                              ├── response (request_id) → matched oneshot
//!                              └── event → MediaEvent on the session channel
//! ```

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

/// Asynchronous notifications out of a media session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// Metadata for the most recent load is available; `token` is the value
    /// passed to that `load` call, so a superseded load can be recognised
    /// and discarded.
    MetadataReady { token: u64 },
    /// The loaded source played to its natural end.
    PlaybackEnded,
    /// The loaded source failed during load or playback.
    PlaybackError,
}

/// The consumed playback contract. Loads start paused; `play` unpauses.
pub trait MediaSession {
    /// Begin loading `src`. The session echoes `token` back on the
    /// resulting [`MediaEvent::MetadataReady`].
    async fn load(&mut self, src: &str, token: u64) -> anyhow::Result<()>;
    async fn play(&mut self) -> anyhow::Result<()>;
    async fn pause(&mut self) -> anyhow::Result<()>;
    async fn seek(&mut self, secs: f64) -> anyhow::Result<()>;
    /// Current playback position in seconds, if the session knows it.
    async fn position(&mut self) -> anyhow::Result<Option<f64>>;
    /// Source of the most recent `load`, if any.
    fn loaded_src(&self) -> Option<String>;
    /// Whether metadata for the loaded source has arrived.
    fn metadata_ready(&self) -> bool;
}

// ── mpv backend ───────────────────────────────────────────────────────────────

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

#[derive(Clone)]
struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    async fn set_property(&self, name: &str, value: Value) -> anyhow::Result<()> {
        self.send(json!(["set_property", name, value])).await?;
        Ok(())
    }
}

/// Media session backed by an mpv subprocess over JSON IPC (Unix socket).
pub struct MpvSession {
    handle: MpvHandle,
    // kill_on_drop: the subprocess dies with the session.
    _process: tokio::process::Child,
    loaded_src: Option<String>,
    load_token: Arc<AtomicU64>,
    ready: Arc<AtomicBool>,
}

impl MpvSession {
    /// Spawn mpv, wait for its IPC socket and start the IO tasks. Media
    /// notifications are delivered on `events`.
    pub async fn spawn_and_connect(
        volume: f32,
        events: mpsc::Sender<MediaEvent>,
    ) -> anyhow::Result<Self> {
        let socket_path = std::path::PathBuf::from(airtime_sched::platform::mpv_socket_name());
        let _ = tokio::fs::remove_file(&socket_path).await;

        info!("mpv: spawning new process");
        let mpv_binary = airtime_sched::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let vol_arg = format!(
            "--volume={}",
            (volume * 100.0).clamp(0.0, 100.0).round() as i64
        );

        let process = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--pause")
            .arg(airtime_sched::platform::mpv_socket_arg())
            .arg("--quiet")
            .arg(vol_arg)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        // Wait for the socket to appear.
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");

        let (read_half, write_half) = stream.into_split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

        let load_token = Arc::new(AtomicU64::new(0));
        let ready = Arc::new(AtomicBool::new(false));

        tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
        tokio::spawn(reader_task(
            BufReader::new(read_half),
            pending,
            events,
            load_token.clone(),
            ready.clone(),
        ));

        Ok(Self {
            handle: MpvHandle { tx: cmd_tx },
            _process: process,
            loaded_src: None,
            load_token,
            ready,
        })
    }
}

impl MediaSession for MpvSession {
    async fn load(&mut self, src: &str, token: u64) -> anyhow::Result<()> {
        self.ready.store(false, Ordering::SeqCst);
        self.load_token.store(token, Ordering::SeqCst);
        // Loads always start paused; the synchronizer unpauses once it has
        // seeked to the canonical offset.
        self.handle.set_property("pause", json!(true)).await?;
        self.handle.send(json!(["loadfile", src])).await?;
        self.loaded_src = Some(src.to_string());
        Ok(())
    }

    async fn play(&mut self) -> anyhow::Result<()> {
        self.handle.set_property("pause", json!(false)).await
    }

    async fn pause(&mut self) -> anyhow::Result<()> {
        self.handle.set_property("pause", json!(true)).await
    }

    async fn seek(&mut self, secs: f64) -> anyhow::Result<()> {
        self.handle.set_property("time-pos", json!(secs)).await
    }

    async fn position(&mut self) -> anyhow::Result<Option<f64>> {
        let resp = self.handle.send(json!(["get_property", "time-pos"])).await?;
        Ok(resp["data"].as_f64())
    }

    fn loaded_src(&self) -> Option<String> {
        self.loaded_src.clone()
    }

    fn metadata_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: PendingMap,
    events: mpsc::Sender<MediaEvent>,
    load_token: Arc<AtomicU64>,
    ready: Arc<AtomicBool>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC connection closed")));
                }
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"].as_str().unwrap_or("unknown error");
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else if let Some(media_event) = translate_event(&val, &load_token, &ready) {
                    let _ = events.send(media_event).await;
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC read error: {}", e)));
                }
                break;
            }
        }
    }
}

/// Map an unsolicited mpv event to the session contract.
///
/// `file-loaded` fires once a load has metadata and is seekable; `end-file`
/// carries a reason. Reasons other than eof/error (a replaced or stopped
/// load) are deliberately not surfaced: a superseding load is not a track
/// boundary.
fn translate_event(
    val: &Value,
    load_token: &AtomicU64,
    ready: &AtomicBool,
) -> Option<MediaEvent> {
    match val.get("event")?.as_str()? {
        "file-loaded" => {
            ready.store(true, Ordering::SeqCst);
            Some(MediaEvent::MetadataReady {
                token: load_token.load(Ordering::SeqCst),
            })
        }
        "end-file" => match val.get("reason").and_then(|r| r.as_str()) {
            Some("eof") => Some(MediaEvent::PlaybackEnded),
            Some("error") => Some(MediaEvent::PlaybackError),
            _ => None,
        },
        _ => None,
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<PendingRequest>,
    pending: PendingMap,
) where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register the reply channel before writing so the reader can match it.
        {
            let mut map = pending.lock().await;
            map.insert(req.req_id, req.reply);
        }
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            let mut map = pending.lock().await;
            if let Some(tx) = map.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── test double ───────────────────────────────────────────────────────────────
