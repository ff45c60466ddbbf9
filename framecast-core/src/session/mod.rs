//! Connection sessions: one live stream connection and its send/receive
//! state.
//!
//! - [`Session`] is the producer side. It is owned by a
//!   [`BroadcastGroup`](crate::network::BroadcastGroup) and sends frames
//!   with skip-if-busy backpressure.
//! - [`ReceiveSession`] is the consumer side. It is owned by a
//!   [`ReconnectController`](crate::state::ReconnectController) and
//!   decodes frames.
//!
//! Every I/O failure is terminal for the session that hit it.

mod receiver;
mod sender;

pub use receiver::ReceiveSession;
pub use sender::Session;

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::frame::DEFAULT_MAX_FRAME_BYTES;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Called exactly once when a session closes, with the session's id.
pub type CloseHook = Box<dyn Fn(SessionId) + Send + Sync>;

/// Unacknowledged send instants kept per session. Older entries are
/// discarded when a peer never acknowledges.
pub(crate) const MAX_UNACKED_SENDS: usize = 64;

/// Acknowledgments a consumer session may have queued for writing. A
/// peer that leaves this many unread has stalled.
pub(crate) const MAX_PENDING_ACKS: usize = 64;

/// How long closing a consumer session waits for queued writes before
/// abandoning the write half.
pub(crate) const CLOSE_GRACE: Duration = Duration::from_millis(250);

// ── SessionId ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── SessionConfig ────────────────────────────────────────────────

/// Per-session wire settings. Both ends of a connection must agree.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Largest accepted payload.
    pub max_frame_bytes: usize,
    /// Exchange delay values and acknowledgments around every frame.
    pub latency_feedback: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            latency_feedback: true,
        }
    }
}

// ── SendOutcome ──────────────────────────────────────────────────

/// What happened to one send request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The frame was handed to the transport.
    Accepted,
    /// A previous send was still in flight; this frame was dropped for
    /// this session only.
    Skipped,
    /// The session is closed.
    Closed,
    /// The frame is empty or larger than the session's length limit. It
    /// was not sent; the session stays open.
    Rejected,
}

// ── SessionStats ─────────────────────────────────────────────────

/// Snapshot of a producer session's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionStats {
    /// Sends that acquired the in-flight guard.
    pub accepted: u64,
    /// Sends dropped because another was in flight.
    pub skipped: u64,
    /// Sends whose bytes were fully written.
    pub delivered: u64,
    /// Payload bytes written.
    pub bytes_written: u64,
    /// Current delay estimate in seconds.
    pub latency: f64,
}
