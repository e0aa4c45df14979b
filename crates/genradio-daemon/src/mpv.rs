/// mpv IPC driver with separated reader/writer tasks.
///
/// Architecture:
///
/// ```text
///   MpvDriver::spawn_and_connect()
///         │
///         ├── writer_task   ← receives MpvRequest via mpsc, serialises → socket
///         └── reader_task   ← reads JSON lines from socket
///                                ├── response (has request_id) → matched oneshot::Sender
///                                └── event / property-change   → event_tx channel
/// ```
///
/// Platform notes:
/// - Unix:   Unix domain sockets
/// - Windows: Named pipes  \\.\pipe\<name>
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

/// Fixed observe_property IDs.  We match on these in property-change events.
pub const OBS_CORE_IDLE: u64 = 1;
pub const OBS_PAUSE: u64 = 2;
pub const OBS_PAUSED_FOR_CACHE: u64 = 3;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event / property-change that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// Returns `Some((obs_id, data))` if this is a property-change event.
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    /// Returns the event name, e.g. "end-file", "start-file", "file-loaded".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    /// Playlist entry the `start-file` / `end-file` event refers to.
    pub fn playlist_entry_id(&self) -> Option<i64> {
        self.raw.get("playlist_entry_id")?.as_i64()
    }

    /// `end-file` reason: eof, stop, quit, error, redirect.
    pub fn end_reason(&self) -> Option<&str> {
        self.raw.get("reason")?.as_str()
    }

    pub fn file_error(&self) -> Option<&str> {
        self.raw.get("file_error")?.as_str()
    }
}

/// Cloneable handle to the mpv writer task.  Use `send()` to fire a command
/// and await the response.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
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

    /// `loadfile` the URL, replacing whatever is playing.  Returns mpv's
    /// playlist entry id when the mpv version reports it.
    pub async fn load_stream(&self, url: &str) -> anyhow::Result<Option<i64>> {
        let resp = self.send(json!(["loadfile", url, "replace"])).await?;
        Ok(resp
            .get("data")
            .and_then(|d| d.get("playlist_entry_id"))
            .and_then(|v| v.as_i64()))
    }

    pub async fn set_volume(&self, vol: f32) -> anyhow::Result<()> {
        self.send(json!(["set_property", "volume", volume_percent(vol)]))
            .await?;
        Ok(())
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        let _ = self.send(json!(["stop"])).await;
        Ok(())
    }

    /// Register observe_property for everything the engine translates.
    /// Must be called after every fresh connection.
    pub async fn observe_all_properties(&self) {
        let props = [
            (OBS_CORE_IDLE, "core-idle"),
            (OBS_PAUSE, "pause"),
            (OBS_PAUSED_FOR_CACHE, "paused-for-cache"),
        ];
        for (id, name) in &props {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }

    /// Health-check: returns Ok(()) if mpv is responsive.
    pub async fn ping(&self) -> anyhow::Result<()> {
        self.send(json!(["get_property", "volume"])).await?;
        Ok(())
    }
}

/// mpv's volume property is a percentage.
pub fn volume_percent(vol: f32) -> f64 {
    (f64::from(vol) * 100.0).clamp(0.0, 100.0)
}

/// Owns the mpv child process and manages (re)connection.
pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
    pub last_volume: f32,
}

impl MpvDriver {
    pub fn new() -> Self {
        Self {
            socket_name: genradio_proto::platform::mpv_socket_name(),
            process: None,
            last_volume: 0.8,
        }
    }

    /// False when connected to an mpv someone else spawned.
    pub fn owns_process(&self) -> bool {
        self.process.is_some()
    }

    pub fn process_alive(&mut self) -> bool {
        if let Some(ref mut child) = self.process {
            match child.try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    warn!("mpv process exited: {}", status);
                    false
                }
                Err(e) => {
                    warn!("mpv process_alive check failed: {}", e);
                    false
                }
            }
        } else {
            false
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    fn spawn_process(&mut self) -> anyhow::Result<()> {
        let mpv_binary = genradio_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let vol_arg = format!("--volume={}", volume_percent(self.last_volume).round() as i64);
        let ipc_arg = genradio_proto::platform::mpv_socket_arg();

        info!("mpv: spawning {}", mpv_binary.display());
        let child = tokio::process::Command::new(&mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg(&ipc_arg)
            .arg("--quiet")
            .arg(&vol_arg)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);
        Ok(())
    }

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;

        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        self.spawn_process()?;

        // Wait for socket to appear
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        Ok(start_io_tasks(stream, event_tx))
    }

    /// Try to connect to an already-running mpv socket without spawning.
    #[cfg(unix)]
    pub async fn try_reconnect(&mut self, event_tx: mpsc::Sender<MpvEvent>) -> Option<MpvHandle> {
        let socket_path = std::path::PathBuf::from(&self.socket_name);
        if !socket_path.exists() {
            return None;
        }
        match UnixStream::connect(&socket_path).await {
            Ok(stream) => {
                info!("mpv: reconnected to existing IPC socket");
                Some(start_io_tasks(stream, event_tx))
            }
            Err(e) => {
                debug!("mpv: stale socket, not reconnecting: {}", e);
                None
            }
        }
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;
        self.spawn_process()?;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                return Ok(start_io_tasks(client, event_tx));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }

    #[cfg(windows)]
    pub async fn try_reconnect(&mut self, event_tx: mpsc::Sender<MpvEvent>) -> Option<MpvHandle> {
        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        match ClientOptions::new().open(&pipe_path) {
            Ok(client) => {
                info!("mpv: reconnected to named pipe");
                Some(start_io_tasks(client, event_tx))
            }
            Err(e) => {
                debug!("mpv: no named pipe to reconnect to: {}", e);
                None
            }
        }
    }
}

impl Default for MpvDriver {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn start_io_tasks<S>(stream: S, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let reader = BufReader::new(read_half);

    // req_id → reply channel.  Writer inserts, reader resolves.
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(reader, pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

async fn fail_pending(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
}

async fn reader_task<R>(mut reader: BufReader<R>, pending: PendingMap, event_tx: mpsc::Sender<MpvEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_pending(&pending, "mpv IPC connection closed").await;
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
                        let _ = tx.send(response_result(val));
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else {
                    debug!("mpv reader: event {}", trimmed);
                    if event_tx.send(MpvEvent { raw: val }).await.is_err() {
                        break;
                    }
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_pending(&pending, "mpv IPC read error").await;
                break;
            }
        }
    }
}

fn response_result(val: Value) -> anyhow::Result<Value> {
    if val["error"].as_str() == Some("success") {
        Ok(val)
    } else {
        let err = val["error"].as_str().unwrap_or("unknown error");
        Err(anyhow::anyhow!("mpv error: {}", err))
    }
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register reply channel before writing so reader can match it
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[test]
    fn test_event_accessors() {
        let evt = MpvEvent {
            raw: json!({"event": "end-file", "reason": "error", "playlist_entry_id": 3, "file_error": "loading failed"}),
        };
        assert_eq!(evt.event_name(), Some("end-file"));
        assert_eq!(evt.end_reason(), Some("error"));
        assert_eq!(evt.playlist_entry_id(), Some(3));
        assert_eq!(evt.file_error(), Some("loading failed"));
        assert!(evt.as_property_change().is_none());

        let prop = MpvEvent {
            raw: json!({"event": "property-change", "id": OBS_CORE_IDLE, "name": "core-idle", "data": false}),
        };
        let (id, data) = prop.as_property_change().unwrap();
        assert_eq!(id, OBS_CORE_IDLE);
        assert_eq!(data.as_bool(), Some(false));
    }

    #[test]
    fn test_volume_percent() {
        assert_eq!(volume_percent(0.4), f64::from(0.4f32) * 100.0);
        assert_eq!(volume_percent(1.5), 100.0);
        assert_eq!(volume_percent(-0.1), 0.0);
    }

    #[tokio::test]
    async fn test_responses_and_events_are_routed() {
        let (client, server) = duplex(4096);
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let handle = start_io_tasks(client, event_tx);

        // fake mpv: answer one request, then push an event
        tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(server);
            let mut lines = BufReader::new(read_half).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let req: Value = serde_json::from_str(&line).unwrap();
            assert_eq!(req["command"][0], "loadfile");
            let reply = json!({
                "request_id": req["request_id"],
                "error": "success",
                "data": {"playlist_entry_id": 7}
            });
            write_half
                .write_all(format!("{}\n{}\n", reply, json!({"event": "start-file", "playlist_entry_id": 7})).as_bytes())
                .await
                .unwrap();
        });

        let entry = handle.load_stream("https://example.org/live").await.unwrap();
        assert_eq!(entry, Some(7));
        let evt = event_rx.recv().await.unwrap();
        assert_eq!(evt.event_name(), Some("start-file"));
    }

    #[tokio::test]
    async fn test_error_response_becomes_err() {
        let (client, server) = duplex(4096);
        let (event_tx, _event_rx) = mpsc::channel(8);
        let handle = start_io_tasks(client, event_tx);

        tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(server);
            let mut lines = BufReader::new(read_half).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let req: Value = serde_json::from_str(&line).unwrap();
            let reply = json!({"request_id": req["request_id"], "error": "property not found"});
            write_half
                .write_all(format!("{}\n", reply).as_bytes())
                .await
                .unwrap();
        });

        let err = handle.ping().await.unwrap_err();
        assert!(err.to_string().contains("property not found"));
    }
}
