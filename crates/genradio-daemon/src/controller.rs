//! PlaybackController: the one authority over the playback session.
//!
//! User commands (`select`, `toggle`, `set_volume`) only *request* work from
//! the `StreamEngine`; `EngineEvent`s confirm it.  Both paths end in
//! `commit()`, which swaps in a complete new `PlaybackSession` and notifies
//! subscribers, so an observer never sees a half-updated snapshot.
//!
//! ```text
//!   Idle ──select──▶ Loading ──playing──▶ Playing ──paused──▶ Paused
//!                     ▲  │                  │  ▲                │
//!                     │  └────error────┐    │  └────playing─────┤
//!                     │                ▼    ▼ buffering         │
//!                     └──toggle/select── Errored ◀──error───────┘
//! ```
use genradio_proto::session::{clamp_volume, Phase, PlaybackSession};
use genradio_proto::station::Station;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::engine::{EngineEvent, EngineSignal, LoadId, PlaybackError, StreamEngine};

pub struct PlaybackController<E: StreamEngine> {
    engine: E,
    session: PlaybackSession,
    /// Tag of the source currently handed to the engine.
    current_load: Option<LoadId>,
    next_load: LoadId,
    observers: watch::Sender<PlaybackSession>,
}

impl<E: StreamEngine> PlaybackController<E> {
    pub fn new(engine: E, volume: f32) -> Self {
        let session = PlaybackSession::new(volume);
        let (observers, _) = watch::channel(session.clone());
        Self {
            engine,
            session,
            current_load: None,
            next_load: LoadId::first(),
            observers,
        }
    }

    pub fn session(&self) -> &PlaybackSession {
        &self.session
    }

    /// Receiver that is notified after every session change.
    pub fn subscribe(&self) -> watch::Receiver<PlaybackSession> {
        self.observers.subscribe()
    }

    pub fn current_load(&self) -> Option<LoadId> {
        self.current_load
    }

    pub fn shutdown(&mut self) {
        info!("controller: releasing engine");
        self.engine.shutdown();
    }

    /// Point the session at `station`.  Re-selecting the current station
    /// toggles instead of reloading the stream.
    pub fn select(&mut self, station: Station) {
        if let Some(current) = &self.session.station {
            if current.same_station(&station) {
                debug!("controller: '{}' already selected, toggling", station.name);
                self.toggle();
                return;
            }
        }

        let load = self.next_load;
        self.next_load = load.next();
        self.current_load = Some(load);

        let url = station.playback_url().to_string();
        info!("controller: selecting '{}' ({}) -> {}", station.name, load, url);

        self.engine.set_source(load, &url);
        self.engine.set_volume(self.session.volume);

        let mut next = PlaybackSession {
            station: Some(station),
            phase: Phase::Loading,
            volume: self.session.volume,
            error_message: None,
            rebuffering: false,
        };
        if let Err(e) = self.engine.start() {
            warn!("controller: engine rejected {}: {}", load, e);
            mark_errored(&mut next, &e);
        }
        self.commit(next);
    }

    pub fn toggle(&mut self) {
        match self.session.phase {
            Phase::Idle => {
                debug!("controller: toggle ignored, no station selected");
            }
            Phase::Playing => {
                // Stays Playing until the engine confirms with `Paused`.
                self.engine.pause();
            }
            Phase::Paused | Phase::Errored | Phase::Loading => {
                let mut next = self.session.clone();
                if next.phase != Phase::Loading {
                    next.rebuffering = false;
                }
                next.phase = Phase::Loading;
                next.error_message = None;
                if let Err(e) = self.engine.start() {
                    warn!("controller: engine rejected resume: {}", e);
                    mark_errored(&mut next, &e);
                }
                self.commit(next);
            }
        }
    }

    pub fn set_volume(&mut self, value: f32) {
        let volume = match clamp_volume(value) {
            Some(v) => v,
            None => {
                warn!("controller: ignoring non-numeric volume {}", value);
                return;
            }
        };

        let mut next = self.session.clone();
        next.volume = volume;
        if next.station.is_some() {
            self.engine.set_volume(volume);
        }
        self.commit(next);
    }

    /// Fold one engine event into the session.  Events for a superseded
    /// source are dropped.
    pub fn handle_engine_event(&mut self, event: EngineEvent) {
        if self.current_load != Some(event.load) {
            debug!(
                "controller: dropping stale {:?} from {} (current {:?})",
                event.signal, event.load, self.current_load
            );
            return;
        }

        let mut next = self.session.clone();
        match (self.session.phase, event.signal) {
            (Phase::Loading | Phase::Paused, EngineSignal::Playing) => {
                next.phase = Phase::Playing;
                next.error_message = None;
                next.rebuffering = false;
            }
            (Phase::Playing, EngineSignal::Buffering) => {
                next.phase = Phase::Loading;
                next.rebuffering = true;
            }
            (Phase::Loading | Phase::Playing, EngineSignal::Paused) => {
                next.phase = Phase::Paused;
                next.rebuffering = false;
            }
            (Phase::Loading | Phase::Playing | Phase::Paused, EngineSignal::Errored(e)) => {
                warn!("controller: engine error on {}: {}", event.load, e);
                mark_errored(&mut next, &e);
            }
            (phase, signal) => {
                debug!("controller: {:?} in {:?} is a no-op", signal, phase);
                return;
            }
        }
        self.commit(next);
    }

    fn commit(&mut self, next: PlaybackSession) {
        debug_assert!(next.invariants_hold(), "inconsistent session: {:?}", next);
        if next.phase != self.session.phase {
            info!(
                "controller: phase {:?} → {:?}",
                self.session.phase, next.phase
            );
        }
        self.session = next;

        let snapshot = &self.session;
        self.observers.send_if_modified(|published| {
            if published != snapshot {
                *published = snapshot.clone();
                true
            } else {
                false
            }
        });
    }
}

fn mark_errored(session: &mut PlaybackSession, error: &PlaybackError) {
    session.phase = Phase::Errored;
    session.error_message = Some(error.to_string());
    session.rebuffering = false;
}
