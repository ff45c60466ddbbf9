//! Domain-specific error types for the framecast transport.
//!
//! All fallible operations return `Result<T, StreamError>`.
//! Skipped sends and queue overflow are not errors; they surface as
//! outcomes and counters on the session and queue types.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the framecast transport.
#[derive(Debug, Error)]
pub enum StreamError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// A length header outside `1..=max`. The stream is not
    /// resynchronised; the session carrying it must be closed.
    #[error("protocol violation: frame length {length} outside 1..={max}")]
    ProtocolViolation { length: u64, max: usize },

    // ── Connection Errors ────────────────────────────────────────
    /// The peer closed the stream (a zero-byte read), or the session
    /// was already closed locally.
    #[error("connection closed")]
    ConnectionClosed,

    /// The TCP/IO layer reported an error.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The peer stopped draining the connection.
    #[error("peer stopped reading; {pending} writes pending")]
    Stalled { pending: usize },

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── State Errors ─────────────────────────────────────────────
    /// A connection-state transition was requested from a state that
    /// does not allow it.
    #[error("cannot {action} while {from}")]
    InvalidTransition { from: &'static str, action: &'static str },

    /// A configuration value is out of its accepted range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    // ── Collaborator Errors ──────────────────────────────────────
    /// The frame source (capture + encode) failed.
    #[error("frame source error: {0}")]
    Source(String),
}

impl StreamError {
    /// Whether this error terminates the session it occurred on.
    ///
    /// Every I/O-level failure is terminal; there is no per-session
    /// retry.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            Self::ProtocolViolation { .. }
                | Self::ConnectionClosed
                | Self::Transport(_)
                | Self::Stalled { .. }
                | Self::Timeout(_)
        )
    }
}
