use serde::{Deserialize, Serialize};

use crate::session::PlaybackSession;
use crate::station::Station;

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this on connect and can refuse to talk to an
/// incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages sent from a client to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Select a station of the current listing by index.
    Select { station_idx: usize },
    /// Select a station the client already holds (e.g. from its own search).
    SelectStation { station: Station },
    Toggle,
    Volume { value: f32 },
    Next,
    Prev,
    Random,
    /// Replace the listing with the top-voted stations.
    LoadTop {
        #[serde(default)]
        limit: Option<usize>,
    },
    Search {
        text: String,
        #[serde(default)]
        tag: String,
    },
    Genre { tag: String },
    GetState,
}

/// Messages sent from the daemon to clients (broadcasts)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: daemon version + full state snapshot.
    Hello {
        protocol_version: u32,
        daemon_rev: u64,
        state: DaemonState,
    },
    State {
        data: DaemonState,
    },
    Log {
        message: String,
    },
    /// The session entered `Errored`; clients show it as a dismissible banner.
    Error {
        message: String,
    },
}

/// Station sequence returned by the most recent directory query.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Listing {
    /// "Top", "Search" or the genre tag.
    pub label: String,
    pub stations: Vec<Station>,
    /// True while a directory query for this label is in flight.
    #[serde(default)]
    pub loading: bool,
}

impl Listing {
    pub fn position_of(&self, station_id: &str) -> Option<usize> {
        self.stations.iter().position(|s| s.id == station_id)
    }
}

/// Full state of the daemon.  `rev` is a monotonically increasing counter
/// incremented every time the state changes.  Clients can use it to detect
/// missed updates and request a resync.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DaemonState {
    /// Incremented on every state change.
    #[serde(default)]
    pub rev: u64,
    pub session: PlaybackSession,
    #[serde(default)]
    pub listing: Listing,
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}
