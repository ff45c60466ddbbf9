mod connection;
mod reconnect;

pub use connection::{ConnectionState, DisconnectReason};
pub use reconnect::{ReconnectConfig, ReconnectController};
