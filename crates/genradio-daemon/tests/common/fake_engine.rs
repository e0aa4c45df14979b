#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use genradio_daemon::engine::{LoadId, PlaybackError, StreamEngine};
use genradio_proto::station::Station;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Source(LoadId, String),
    Volume(f32),
    Start,
    Pause,
    Shutdown,
}

/// Engine double that records every request.  `reject` makes `start()` fail
/// the way an unreachable player would.
#[derive(Clone, Default)]
pub struct RecordingEngine {
    calls: Arc<Mutex<Vec<Call>>>,
    reject: Arc<Mutex<Option<PlaybackError>>>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn sources(&self) -> Vec<LoadId> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Source(load, _) => Some(load),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn reject_with(&self, error: Option<PlaybackError>) {
        *self.reject.lock().unwrap() = error;
    }
}

impl StreamEngine for RecordingEngine {
    fn set_source(&mut self, load: LoadId, url: &str) {
        self.calls.lock().unwrap().push(Call::Source(load, url.to_string()));
    }

    fn set_volume(&mut self, volume: f32) {
        self.calls.lock().unwrap().push(Call::Volume(volume));
    }

    fn start(&mut self) -> Result<(), PlaybackError> {
        self.calls.lock().unwrap().push(Call::Start);
        match self.reject.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn pause(&mut self) {
        self.calls.lock().unwrap().push(Call::Pause);
    }

    fn shutdown(&mut self) {
        self.calls.lock().unwrap().push(Call::Shutdown);
    }
}

pub fn station(id: &str) -> Station {
    Station {
        id: id.to_string(),
        name: format!("Radio {}", id.to_uppercase()),
        stream_url: format!("https://{}.example/live", id),
        tags: "jazz,lounge".to_string(),
        ..Station::default()
    }
}
