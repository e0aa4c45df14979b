//! Stream engine seam.
//!
//! The controller only ever *requests* transitions through `StreamEngine`;
//! whether audio is really flowing is reported back asynchronously as
//! `EngineEvent`s.  Every source handed to the engine carries a `LoadId` and
//! every event is stamped with the `LoadId` of the source that produced it, so
//! confirmations for a superseded station can be recognised and dropped.

use std::fmt;

/// Origin tag for one `set_source` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoadId(u64);

impl LoadId {
    pub const fn first() -> Self {
        LoadId(1)
    }

    pub fn next(self) -> Self {
        LoadId(self.0 + 1)
    }
}

impl fmt::Display for LoadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "load#{}", self.0)
    }
}

/// User-visible playback failures.  The `Display` text ends up in
/// `PlaybackSession::error_message`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    /// The engine refused the source (bad URL, unsupported codec, unreachable).
    #[error("Cannot play this stream: {0}")]
    StreamRejected(String),
    /// The stream stopped after it had started.
    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineSignal {
    Buffering,
    Playing,
    Paused,
    Errored(PlaybackError),
}

/// Lifecycle event emitted by an engine for one of its sources.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineEvent {
    pub load: LoadId,
    pub signal: EngineSignal,
}

impl EngineEvent {
    pub fn new(load: LoadId, signal: EngineSignal) -> Self {
        Self { load, signal }
    }
}

/// Narrow capability surface the controller needs from a media player.
///
/// All methods return immediately.  Outcomes arrive later as `EngineEvent`s,
/// except for `start` which may reject synchronously.
pub trait StreamEngine: Send {
    /// Point the engine at a new source.  Events for this source are tagged
    /// with `load`.
    fn set_source(&mut self, load: LoadId, url: &str);

    /// `volume` is already clamped to `0.0..=1.0`.
    fn set_volume(&mut self, volume: f32);

    /// Request playback of the current source.
    fn start(&mut self) -> Result<(), PlaybackError>;

    fn pause(&mut self);

    /// Release the underlying player.  No further requests follow.
    fn shutdown(&mut self) {}
}

impl<E: StreamEngine + ?Sized> StreamEngine for Box<E> {
    fn set_source(&mut self, load: LoadId, url: &str) {
        (**self).set_source(load, url)
    }

    fn set_volume(&mut self, volume: f32) {
        (**self).set_volume(volume)
    }

    fn start(&mut self) -> Result<(), PlaybackError> {
        (**self).start()
    }

    fn pause(&mut self) {
        (**self).pause()
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }
}
