use serde::{Deserialize, Serialize};

use crate::station::Station;

/// Playback phase of the single session.
///
/// Transitions (see `PlaybackController` in the daemon):
///   Idle -> Loading -> Playing <-> Paused
///   Playing -> Loading (re-buffering)
///   Loading | Playing | Paused -> Errored -> Loading
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Phase {
    /// Nothing selected yet.
    #[default]
    Idle,
    /// Source handed to the engine, waiting for audio.
    Loading,
    /// Engine confirmed audio is flowing.
    Playing,
    Paused,
    /// Engine rejected or lost the stream; see `error_message`.
    Errored,
}

/// Snapshot of the one playback session owned by the controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaybackSession {
    pub station: Option<Station>,
    pub phase: Phase,
    /// Always within 0.0..=1.0.
    pub volume: f32,
    /// Present exactly when `phase == Errored`.
    #[serde(default)]
    pub error_message: Option<String>,
    /// Set while `Loading` after the engine stalled mid-playback.
    #[serde(default)]
    pub rebuffering: bool,
}

impl Default for PlaybackSession {
    fn default() -> Self {
        Self::new(0.8)
    }
}

impl PlaybackSession {
    pub fn new(volume: f32) -> Self {
        Self {
            station: None,
            phase: Phase::Idle,
            volume: clamp_volume(volume).unwrap_or(0.0),
            error_message: None,
            rebuffering: false,
        }
    }

    pub fn station_id(&self) -> Option<&str> {
        self.station.as_ref().map(|s| s.id.as_str())
    }

    /// Checks the structural invariants of a session snapshot.
    pub fn invariants_hold(&self) -> bool {
        let station_matches_phase = (self.phase == Phase::Idle) == self.station.is_none();
        let error_matches_phase = (self.phase == Phase::Errored) == self.error_message.is_some();
        let rebuffer_only_loading = !self.rebuffering || self.phase == Phase::Loading;
        let volume_in_range = (0.0..=1.0).contains(&self.volume);
        station_matches_phase && error_matches_phase && rebuffer_only_loading && volume_in_range
    }
}

/// Clamp a requested volume into `0.0..=1.0`.  Returns `None` for NaN.
pub fn clamp_volume(value: f32) -> Option<f32> {
    if value.is_nan() {
        None
    } else {
        Some(value.clamp(0.0, 1.0))
    }
}
