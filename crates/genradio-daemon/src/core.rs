/// PlayerCore: single-owner event loop for all mutable state.
///
/// Every input (client commands, engine events, directory results) arrives as
/// a `CoreEvent` on one mpsc channel and is handled in arrival order.  The
/// core owns the `PlaybackController` exclusively; no other task touches it.
///
/// After each event the core copies the controller's latest session into the
/// `StateManager` and broadcasts `BroadcastMessage::StateUpdated` when
/// anything changed.
///
/// Directory queries run in spawned tasks and post their result back as
/// `CoreEvent::Listing`, tagged with a sequence number so a slow query that
/// was superseded by a newer one cannot overwrite the listing.
use std::sync::Arc;

use genradio_proto::protocol::Command;
use genradio_proto::session::{Phase, PlaybackSession};
use genradio_proto::state::StateManager;
use genradio_proto::station::Station;
use rand::Rng;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::PlaybackController;
use crate::directory::DirectoryClient;
use crate::engine::{EngineEvent, StreamEngine};
use crate::BroadcastMessage;

// ── CoreEvent ─────────────────────────────────────────────────────────────────

/// All inputs into the PlayerCore loop.
#[derive(Debug)]
pub enum CoreEvent {
    /// A command from a socket client or the HTTP API.
    Command(Command),
    /// Lifecycle event from the stream engine.
    Engine(EngineEvent),
    /// Result of a directory query.
    Listing {
        seq: u64,
        label: String,
        stations: Vec<Station>,
    },
    Shutdown,
}

#[derive(Debug, Clone)]
enum ListingQuery {
    Top(usize),
    Search { text: String, tag: String },
    Genre(String),
}

// ── PlayerCore ────────────────────────────────────────────────────────────────

pub struct PlayerCore<E: StreamEngine> {
    controller: PlaybackController<E>,
    session_rx: watch::Receiver<PlaybackSession>,
    state_manager: Arc<StateManager>,
    directory: DirectoryClient,
    top_limit: usize,
    /// Used by directory tasks to post results back into the loop.
    event_tx: mpsc::Sender<CoreEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    shutdown: CancellationToken,
    /// Sequence number of the latest directory query issued.
    listing_seq: u64,
}

impl<E: StreamEngine> PlayerCore<E> {
    pub fn new(
        controller: PlaybackController<E>,
        directory: DirectoryClient,
        top_limit: usize,
        event_tx: mpsc::Sender<CoreEvent>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        shutdown: CancellationToken,
    ) -> Self {
        let session_rx = controller.subscribe();
        let state_manager = Arc::new(StateManager::new(controller.session().clone()));
        Self {
            controller,
            session_rx,
            state_manager,
            directory,
            top_limit,
            event_tx,
            broadcast_tx,
            shutdown,
            listing_seq: 0,
        }
    }

    /// Shared read side for the socket and HTTP servers.
    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    pub fn controller(&self) -> &PlaybackController<E> {
        &self.controller
    }

    /// Run until `Shutdown`, cancellation, or every sender is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<CoreEvent>) -> anyhow::Result<()> {
        info!("PlayerCore: starting event loop");

        loop {
            let evt = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("PlayerCore: cancelled");
                    break;
                }
                evt = event_rx.recv() => evt,
            };

            match evt {
                None => {
                    info!("PlayerCore: event channel closed, shutting down");
                    break;
                }
                Some(CoreEvent::Shutdown) => {
                    info!("PlayerCore: shutdown requested");
                    break;
                }
                Some(evt) => self.handle_event(evt).await,
            }
        }

        self.controller.shutdown();
        self.shutdown.cancel();
        Ok(())
    }

    /// Handle one event and publish whatever it changed.
    pub async fn handle_event(&mut self, evt: CoreEvent) {
        match evt {
            CoreEvent::Command(cmd) => {
                debug!("PlayerCore: command {:?}", cmd);
                if let Err(e) = self.handle_command(cmd).await {
                    warn!("PlayerCore: command failed: {}", e);
                }
            }
            CoreEvent::Engine(event) => self.controller.handle_engine_event(event),
            CoreEvent::Listing {
                seq,
                label,
                stations,
            } => self.apply_listing(seq, label, stations).await,
            CoreEvent::Shutdown => {}
        }
        self.publish().await;
    }

    /// Copy a changed session into shared state and notify clients.
    async fn publish(&mut self) {
        if !matches!(self.session_rx.has_changed(), Ok(true)) {
            return;
        }
        let session = self.session_rx.borrow_and_update().clone();
        let previous = self.state_manager.session().await;

        if !self.state_manager.set_session(session.clone()).await {
            return;
        }
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);

        if session.phase == Phase::Errored
            && (previous.phase != Phase::Errored || previous.error_message != session.error_message)
        {
            if let Some(message) = session.error_message {
                let _ = self.broadcast_tx.send(BroadcastMessage::Error(message));
            }
        }
    }

    // ── command handlers ──────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) -> anyhow::Result<()> {
        match cmd {
            Command::Select { station_idx } => {
                let station = self
                    .state_manager
                    .station_at(station_idx)
                    .await
                    .ok_or_else(|| anyhow::anyhow!("no station at index {}", station_idx))?;
                self.controller.select(station);
            }
            Command::SelectStation { station } => self.controller.select(station),
            Command::Toggle => self.controller.toggle(),
            Command::Volume { value } => self.controller.set_volume(value),
            Command::Next => self.step(1).await?,
            Command::Prev => self.step(-1).await?,
            Command::Random => self.random().await?,
            Command::LoadTop { limit } => {
                let limit = limit.unwrap_or(self.top_limit);
                self.start_query("Top", ListingQuery::Top(limit)).await;
            }
            Command::Search { text, tag } => {
                if text.trim().is_empty() && tag.trim().is_empty() {
                    debug!("PlayerCore: ignoring blank search");
                    return Ok(());
                }
                self.start_query("Search", ListingQuery::Search { text, tag })
                    .await;
            }
            Command::Genre { tag } => {
                let label = tag.clone();
                self.start_query(&label, ListingQuery::Genre(tag)).await;
            }
            Command::GetState => {
                let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            }
        }
        Ok(())
    }

    /// Select the station `delta` places away from the current one, wrapping.
    /// Starts at the first station when the current one is not listed.
    async fn step(&mut self, delta: isize) -> anyhow::Result<()> {
        let listing = self.state_manager.listing().await;
        if listing.stations.is_empty() {
            anyhow::bail!("listing is empty");
        }
        let len = listing.stations.len() as isize;
        let idx = match self
            .controller
            .session()
            .station_id()
            .and_then(|id| listing.position_of(id))
        {
            Some(current) => (current as isize + delta).rem_euclid(len) as usize,
            None => 0,
        };
        let station = listing.stations[idx].clone();
        info!("PlayerCore: stepping to #{} '{}'", idx, station.name);
        self.controller.select(station);
        Ok(())
    }

    async fn random(&mut self) -> anyhow::Result<()> {
        let listing = self.state_manager.listing().await;
        let len = listing.stations.len();
        if len == 0 {
            anyhow::bail!("listing is empty");
        }
        let current = self
            .controller
            .session()
            .station_id()
            .and_then(|id| listing.position_of(id));

        let mut rng = rand::thread_rng();
        let mut idx = rng.gen_range(0..len);
        // re-selecting the current station would toggle it instead
        if len > 1 {
            while Some(idx) == current {
                idx = rng.gen_range(0..len);
            }
        }
        let station = listing.stations[idx].clone();
        info!("PlayerCore: random pick #{} '{}'", idx, station.name);
        self.controller.select(station);
        Ok(())
    }

    // ── directory ─────────────────────────────────────────────────────────────

    async fn start_query(&mut self, label: &str, query: ListingQuery) {
        self.listing_seq += 1;
        let seq = self.listing_seq;
        info!("PlayerCore: listing query #{} {:?}", seq, query);

        self.state_manager.begin_listing(label).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);

        let directory = self.directory.clone();
        let tx = self.event_tx.clone();
        let label = label.to_string();
        tokio::spawn(async move {
            let stations = match query {
                ListingQuery::Top(limit) => directory.fetch_top(limit).await,
                ListingQuery::Search { text, tag } => directory.search(&text, &tag).await,
                ListingQuery::Genre(tag) => directory.by_tag(&tag).await,
            };
            let _ = tx
                .send(CoreEvent::Listing {
                    seq,
                    label,
                    stations,
                })
                .await;
        });
    }

    async fn apply_listing(&mut self, seq: u64, label: String, stations: Vec<Station>) {
        if seq < self.listing_seq {
            debug!(
                "PlayerCore: dropping superseded listing #{} (latest #{})",
                seq, self.listing_seq
            );
            return;
        }
        info!("PlayerCore: listing '{}' has {} stations", label, stations.len());
        self.state_manager.set_listing(&label, stations).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }
}
