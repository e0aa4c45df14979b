use crate::protocol::{DaemonState, Listing};
use crate::session::PlaybackSession;
use crate::station::Station;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared, read-mostly copy of everything clients can observe.
///
/// Only the player core writes here; socket and HTTP handlers read.
pub struct StateManager {
    state: Arc<RwLock<DaemonState>>,
}

impl StateManager {
    pub fn new(session: PlaybackSession) -> Self {
        let state = DaemonState {
            rev: 1,
            session,
            listing: Listing::default(),
        };

        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub async fn get_state(&self) -> DaemonState {
        self.state.read().await.clone()
    }

    pub async fn session(&self) -> PlaybackSession {
        self.state.read().await.session.clone()
    }

    pub async fn listing(&self) -> Listing {
        self.state.read().await.listing.clone()
    }

    /// Store a new session snapshot.  Returns false when nothing changed.
    pub async fn set_session(&self, session: PlaybackSession) -> bool {
        let mut state = self.state.write().await;
        if state.session == session {
            return false;
        }
        state.session = session;
        state.rev += 1;
        true
    }

    pub async fn begin_listing(&self, label: &str) {
        let mut state = self.state.write().await;
        state.listing.label = label.to_string();
        state.listing.loading = true;
        state.rev += 1;
    }

    pub async fn set_listing(&self, label: &str, stations: Vec<Station>) {
        let mut state = self.state.write().await;
        state.listing = Listing {
            label: label.to_string(),
            stations,
            loading: false,
        };
        state.rev += 1;
    }

    pub async fn station_at(&self, idx: usize) -> Option<Station> {
        self.state.read().await.listing.stations.get(idx).cloned()
    }
}
