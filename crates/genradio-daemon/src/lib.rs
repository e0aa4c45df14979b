pub mod controller;
pub mod core;
pub mod directory;
pub mod engine;
pub mod http;
pub mod mpv;
pub mod mpv_engine;
pub mod socket;

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    StateUpdated,
    /// A WARN/ERROR log line, already formatted.
    Log(String),
    /// The session just entered `Errored` with this message.
    Error(String),
}
