//! `StreamEngine` backed by an `mpv --idle` child process.
//!
//! `MpvEngine` itself is a thin, synchronous front: it validates requests and
//! queues them to a worker task.  The worker owns the `MpvDriver` and the IPC
//! handle, executes requests strictly in order, and translates raw mpv
//! events into `EngineEvent`s tagged with the `LoadId` of the source mpv is
//! talking about.
//!
//! Tagging: every `loadfile` reply carries mpv's `playlist_entry_id`, which we
//! map to the `LoadId` that requested it.  `start-file`/`end-file` name their
//! entry explicitly; property changes belong to the entry most recently
//! started.
use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::{EngineEvent, EngineSignal, LoadId, PlaybackError, StreamEngine};
use crate::mpv::{MpvDriver, MpvEvent, MpvHandle, OBS_CORE_IDLE, OBS_PAUSE, OBS_PAUSED_FOR_CACHE};

const HEARTBEAT: Duration = Duration::from_secs(10);

#[derive(Debug)]
enum EngineRequest {
    Source { load: LoadId, url: String },
    Volume(f32),
    Start,
    Pause,
    Shutdown,
}

pub struct MpvEngine {
    requests: mpsc::UnboundedSender<EngineRequest>,
    source: Option<(LoadId, String)>,
}

impl MpvEngine {
    /// Start the worker.  Engine events for the lifetime of the process are
    /// delivered on `events`.
    pub fn spawn(
        initial_volume: f32,
        events: mpsc::Sender<EngineEvent>,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (worker, raw_rx) = EngineWorker::new(initial_volume, events);
        let task = tokio::spawn(worker.run(req_rx, raw_rx));
        (
            Self {
                requests: req_tx,
                source: None,
            },
            task,
        )
    }

    fn request(&self, req: EngineRequest) {
        if let Err(e) = self.requests.send(req) {
            warn!("mpv engine: worker gone, dropping {:?}", e.0);
        }
    }
}

impl StreamEngine for MpvEngine {
    fn set_source(&mut self, load: LoadId, url: &str) {
        self.source = Some((load, url.to_string()));
        self.request(EngineRequest::Source {
            load,
            url: url.to_string(),
        });
    }

    fn set_volume(&mut self, volume: f32) {
        self.request(EngineRequest::Volume(volume));
    }

    fn start(&mut self) -> Result<(), PlaybackError> {
        let (_, url) = self
            .source
            .as_ref()
            .ok_or_else(|| PlaybackError::StreamRejected("no stream selected".into()))?;
        if !is_playable_url(url) {
            return Err(PlaybackError::StreamRejected(format!(
                "unsupported stream URL '{}'",
                url
            )));
        }
        self.requests
            .send(EngineRequest::Start)
            .map_err(|_| PlaybackError::StreamRejected("audio engine is not running".into()))
    }

    fn pause(&mut self) {
        self.request(EngineRequest::Pause);
    }

    /// Stop playback and kill mpv.
    fn shutdown(&mut self) {
        let _ = self.requests.send(EngineRequest::Shutdown);
    }
}

pub fn is_playable_url(url: &str) -> bool {
    let lower = url.trim().to_ascii_lowercase();
    (lower.starts_with("http://") || lower.starts_with("https://")) && lower.len() > "https://".len()
}

// ── worker ────────────────────────────────────────────────────────────────────

struct EngineWorker {
    driver: MpvDriver,
    handle: Option<MpvHandle>,
    raw_tx: mpsc::Sender<MpvEvent>,
    events: mpsc::Sender<EngineEvent>,
    volume: f32,
    /// Latest source requested by the controller.
    source: Option<(LoadId, String)>,
    /// Source most recently handed to mpv via `loadfile`.
    loaded: Option<LoadId>,
    /// The loaded source ended or failed; the next start must reload it.
    stream_ended: bool,
    entries: HashMap<i64, LoadId>,
    /// Source mpv is currently playing (from `start-file`).
    active: Option<LoadId>,
    active_played: bool,
    obs_core_idle: Option<bool>,
    obs_pause: bool,
}

impl EngineWorker {
    fn new(volume: f32, events: mpsc::Sender<EngineEvent>) -> (Self, mpsc::Receiver<MpvEvent>) {
        // One raw-event channel for the worker's lifetime; every (re)connection
        // gets a clone of the sender.
        let (raw_tx, raw_rx) = mpsc::channel::<MpvEvent>(64);
        let mut driver = MpvDriver::new();
        driver.last_volume = volume;
        (
            Self {
                driver,
                handle: None,
                raw_tx,
                events,
                volume,
                source: None,
                loaded: None,
                stream_ended: false,
                entries: HashMap::new(),
                active: None,
                active_played: false,
                obs_core_idle: None,
                obs_pause: false,
            },
            raw_rx,
        )
    }

    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<EngineRequest>,
        mut raw_rx: mpsc::Receiver<MpvEvent>,
    ) {
        info!("mpv engine: worker started");
        let mut heartbeat = tokio::time::interval(HEARTBEAT);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                req = requests.recv() => match req {
                    Some(EngineRequest::Shutdown) | None => break,
                    Some(req) => self.handle_request(req).await,
                },
                Some(evt) = raw_rx.recv() => self.handle_mpv_event(evt).await,
                _ = heartbeat.tick() => self.check_liveness().await,
            }
        }

        info!("mpv engine: shutting down");
        if let Some(handle) = self.handle.take() {
            let _ = handle.stop().await;
        }
        self.driver.kill().await;
    }

    async fn emit(&self, load: LoadId, signal: EngineSignal) {
        debug!("mpv engine: {} {:?}", load, signal);
        let _ = self.events.send(EngineEvent::new(load, signal)).await;
    }

    async fn emit_active(&self, signal: EngineSignal) {
        if let Some(load) = self.active {
            self.emit(load, signal).await;
        }
    }

    // ── requests ──────────────────────────────────────────────────────────────

    async fn handle_request(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::Source { load, url } => {
                debug!("mpv engine: source {} = {}", load, url);
                self.source = Some((load, url));
                if self.loaded.is_some() && self.loaded != Some(load) {
                    self.unload().await;
                }
            }
            EngineRequest::Volume(volume) => {
                self.volume = volume;
                self.driver.last_volume = volume;
                if let Some(handle) = &self.handle {
                    if let Err(e) = handle.set_volume(volume).await {
                        warn!("mpv engine: set volume failed: {}", e);
                    }
                }
            }
            EngineRequest::Pause => {
                if let Some(handle) = &self.handle {
                    if let Err(e) = handle.set_pause(true).await {
                        warn!("mpv engine: pause failed: {}", e);
                    }
                }
            }
            EngineRequest::Start => self.start().await,
            EngineRequest::Shutdown => {}
        }
    }

    async fn start(&mut self) {
        let (load, url) = match self.source.clone() {
            Some(s) => s,
            None => return,
        };

        let handle = match self.ensure_handle().await {
            Ok(h) => h,
            Err(e) => {
                warn!("mpv engine: cannot start mpv: {}", e);
                self.emit(
                    load,
                    EngineSignal::Errored(PlaybackError::StreamRejected(format!(
                        "audio engine unavailable ({})",
                        e
                    ))),
                )
                .await;
                return;
            }
        };

        if self.loaded == Some(load) && !self.stream_ended {
            if let Err(e) = handle.set_pause(false).await {
                warn!("mpv engine: resume failed: {}", e);
                self.emit(
                    load,
                    EngineSignal::Errored(PlaybackError::StreamRejected(e.to_string())),
                )
                .await;
            }
            return;
        }

        info!("mpv engine: loading {} {}", load, url);
        self.loaded = Some(load);
        self.stream_ended = false;
        if let Err(e) = handle.set_pause(false).await {
            debug!("mpv engine: clearing pause failed: {}", e);
        }
        match handle.load_stream(&url).await {
            Ok(Some(entry)) => {
                self.entries.insert(entry, load);
            }
            Ok(None) => {}
            Err(e) => {
                warn!("mpv engine: loadfile failed for {}: {}", load, e);
                self.stream_ended = true;
                self.emit(
                    load,
                    EngineSignal::Errored(PlaybackError::StreamRejected(e.to_string())),
                )
                .await;
                return;
            }
        }
        if let Err(e) = handle.set_volume(self.volume).await {
            warn!("mpv engine: set volume failed: {}", e);
        }
    }

    /// Drop the previous source so it cannot keep playing under a newer one
    /// that may never start.
    async fn unload(&mut self) {
        if let Some(handle) = &self.handle {
            if let Err(e) = handle.stop().await {
                warn!("mpv engine: stop failed: {}", e);
            }
        }
        self.loaded = None;
        self.active = None;
        self.active_played = false;
        self.stream_ended = true;
    }

    async fn ensure_handle(&mut self) -> anyhow::Result<MpvHandle> {
        if self.handle.is_some() && !self.engine_alive().await {
            warn!("mpv engine: mpv died, dropping handle");
            self.drop_handle();
        }

        if let Some(handle) = &self.handle {
            return Ok(handle.clone());
        }

        let handle = match self.driver.try_reconnect(self.raw_tx.clone()).await {
            Some(h) => h,
            None => self.driver.spawn_and_connect(self.raw_tx.clone()).await?,
        };
        handle.observe_all_properties().await;
        if let Err(e) = handle.set_volume(self.volume).await {
            warn!("mpv engine: initial volume failed: {}", e);
        }
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    async fn engine_alive(&mut self) -> bool {
        if self.driver.owns_process() {
            return self.driver.process_alive();
        }
        // reconnected to an mpv we did not spawn
        match &self.handle {
            Some(handle) => handle.ping().await.is_ok(),
            None => false,
        }
    }

    fn drop_handle(&mut self) {
        self.handle = None;
        self.obs_core_idle = None;
        self.obs_pause = false;
    }

    async fn check_liveness(&mut self) {
        if self.handle.is_none() || self.engine_alive().await {
            return;
        }
        warn!("mpv engine: heartbeat found mpv dead");
        self.drop_handle();
        if let Some(load) = self.loaded {
            if !self.stream_ended {
                self.stream_ended = true;
                self.emit(
                    load,
                    EngineSignal::Errored(PlaybackError::StreamInterrupted(
                        "audio engine stopped".into(),
                    )),
                )
                .await;
            }
        }
        self.active = None;
    }

    // ── mpv events ────────────────────────────────────────────────────────────

    async fn handle_mpv_event(&mut self, evt: MpvEvent) {
        if let Some((obs_id, data)) = evt.as_property_change() {
            match obs_id {
                OBS_CORE_IDLE => {
                    let idle = data.as_bool();
                    if idle == self.obs_core_idle {
                        return;
                    }
                    self.obs_core_idle = idle;
                    match idle {
                        Some(false) if !self.obs_pause => {
                            self.active_played = true;
                            self.emit_active(EngineSignal::Playing).await;
                        }
                        Some(true) if !self.obs_pause && !self.stream_ended => {
                            self.emit_active(EngineSignal::Buffering).await;
                        }
                        _ => {}
                    }
                }
                OBS_PAUSE => {
                    let paused = data.as_bool().unwrap_or(false);
                    if paused == self.obs_pause {
                        return;
                    }
                    self.obs_pause = paused;
                    if paused {
                        self.emit_active(EngineSignal::Paused).await;
                    } else if self.obs_core_idle == Some(false) {
                        self.emit_active(EngineSignal::Playing).await;
                    }
                }
                OBS_PAUSED_FOR_CACHE => {
                    if data.as_bool() == Some(true) && !self.obs_pause {
                        self.emit_active(EngineSignal::Buffering).await;
                    }
                }
                _ => {}
            }
            return;
        }

        match evt.event_name() {
            Some("start-file") => {
                let load = evt
                    .playlist_entry_id()
                    .and_then(|id| self.entries.get(&id).copied())
                    .or(self.loaded);
                debug!("mpv engine: start-file -> {:?}", load);
                self.active = load;
                self.active_played = false;
                self.obs_core_idle = Some(true);
                self.emit_active(EngineSignal::Buffering).await;
            }
            Some("end-file") => {
                let load = evt
                    .playlist_entry_id()
                    .and_then(|id| self.entries.remove(&id))
                    .or(self.active);
                let reason = evt.end_reason().unwrap_or("unknown");
                info!("mpv engine: end-file {:?} reason={}", load, reason);

                let played = load.is_some() && load == self.active && self.active_played;
                let error = match reason {
                    "error" => {
                        let detail = evt.file_error().unwrap_or("playback failed").to_string();
                        Some(if played {
                            PlaybackError::StreamInterrupted(detail)
                        } else {
                            PlaybackError::StreamRejected(detail)
                        })
                    }
                    "eof" => Some(PlaybackError::StreamInterrupted(
                        "the station stopped sending audio".into(),
                    )),
                    "quit" => Some(PlaybackError::StreamInterrupted(
                        "audio engine exited".into(),
                    )),
                    // stop / redirect: replaced by a newer loadfile
                    _ => None,
                };

                if load.is_some() && load == self.active {
                    self.active = None;
                }
                if let (Some(load), Some(error)) = (load, error) {
                    if Some(load) == self.loaded {
                        self.stream_ended = true;
                    }
                    self.emit(load, EngineSignal::Errored(error)).await;
                }
            }
            _ => {}
        }
    }
}
