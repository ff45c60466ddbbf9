//! # framecast-core
//!
//! Real-time frame transport and fan-out for the framecast producer and
//! consumer.
//!
//! This crate contains:
//! - **Frame**: `Frame`, the timestamped opaque payload
//! - **Codec**: `FrameCodec` / `AckCodec` for length-prefixed framing via `tokio_util`
//! - **Queue**: `FrameQueue` (drop-incoming) and `NextFrameSlot` (producer pending-frame cell)
//! - **Session**: producer `Session` with skip-if-busy sends, consumer `ReceiveSession`
//! - **Network**: `BroadcastGroup` / `BroadcastServer` fan-out, `Connector` / `TcpConnector`
//! - **State**: `ConnectionState` machine and the `ReconnectController`
//! - **Stream**: `LatencyEstimator`, `ThroughputMeter`, the `Streamer` pacing loop,
//!   and the `FrameSource` / `StreamObserver` collaborator traits
//! - **Error**: `StreamError`, typed and `thiserror`-based

pub mod codec;
pub mod error;
pub mod frame;
pub mod network;
pub mod queue;
pub mod session;
pub mod state;
pub mod stream;

#[cfg(test)]
mod test_utils;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::{AckCodec, FrameCodec, WireMessage, encode_frame};
pub use error::StreamError;
pub use frame::{DEFAULT_MAX_FRAME_BYTES, DEFAULT_QUEUE_CAPACITY, Frame};
pub use network::{
    BroadcastGroup, BroadcastReport, BroadcastServer, ConnectionInfo, Connector, DEFAULT_PORT,
    GroupStats, ServerConfig, TcpConnector,
};
pub use queue::{EnqueueOutcome, FrameQueue, NextFrameSlot};
pub use session::{
    BoxedReader, BoxedWriter, ReceiveSession, SendOutcome, Session, SessionConfig, SessionId,
    SessionStats,
};
pub use state::{ConnectionState, DisconnectReason, ReconnectConfig, ReconnectController};
pub use stream::{
    FrameSource, LatencyEstimator, NoopObserver, StreamObserver, StreamSummary, Streamer,
    StreamerConfig, TestPattern, ThroughputMeter,
};
