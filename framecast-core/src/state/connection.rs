//! Consumer-side connection state machine.
//!
//! `ConnectionState` models the lifecycle of the receiving connection,
//! with validated transitions that return `Result` instead of panicking.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::StreamError;

// ── ConnectionState ──────────────────────────────────────────────

/// ```text
///  Disconnected ──► Connecting ──► Connected ◄──────────────┐
///       ▲               │             │                     │
///       │               ▼             ▼                     │
///       ├───────────────┘           Lost ──► Reconnecting ──┤
///       │                             │           │         │
///       └─────────── window elapsed ──┴───────────┘         │
///                                     └─────────────────────┘
/// ```
///
/// Any state may be forced to `Disconnected` by an explicit disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session. Initial and terminal state.
    #[default]
    Disconnected,

    /// First dial in progress.
    Connecting,

    /// Frames are arriving.
    Connected {
        /// When the connection entered (or re-entered) `Connected`.
        since: Instant,
    },

    /// No frames within the silence limit, or the session died.
    Lost {
        /// When the loss was detected; the reconnect window runs from here.
        since: Instant,
    },

    /// Dialing a replacement session while lost.
    Reconnecting {
        /// When the loss was detected.
        since: Instant,
        /// Dial attempts so far, starting at 1.
        attempt: u32,
    },
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reconnecting { attempt, .. } => write!(f, "Reconnecting (attempt {attempt})"),
            other => f.write_str(other.name()),
        }
    }
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected { .. } => "Connected",
            Self::Lost { .. } => "Lost",
            Self::Reconnecting { .. } => "Reconnecting",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// `Lost` or `Reconnecting`.
    pub fn is_lost(&self) -> bool {
        matches!(self, Self::Lost { .. } | Self::Reconnecting { .. })
    }

    /// When the current loss began, if lost.
    pub fn lost_since(&self) -> Option<Instant> {
        match self {
            Self::Lost { since } | Self::Reconnecting { since, .. } => Some(*since),
            _ => None,
        }
    }

    /// How long the connection has been in the `Connected` state.
    pub fn connected_duration(&self) -> Option<Duration> {
        match self {
            Self::Connected { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Disconnected`.
    pub fn begin_connect(&mut self) -> Result<(), StreamError> {
        match self {
            Self::Disconnected => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(self.invalid("connect")),
        }
    }

    /// A session is established, or frames resumed after a loss.
    ///
    /// Valid from: `Connecting`, `Lost`, `Reconnecting`.
    pub fn connected(&mut self) -> Result<(), StreamError> {
        match self {
            Self::Connecting | Self::Lost { .. } | Self::Reconnecting { .. } => {
                *self = Self::Connected {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(self.invalid("mark connected")),
        }
    }

    /// Valid from: `Connecting`.
    pub fn connect_failed(&mut self) -> Result<(), StreamError> {
        match self {
            Self::Connecting => {
                *self = Self::Disconnected;
                Ok(())
            }
            _ => Err(self.invalid("fail a connect")),
        }
    }

    /// Valid from: `Connected`.
    pub fn lose(&mut self) -> Result<(), StreamError> {
        match self {
            Self::Connected { .. } => {
                *self = Self::Lost {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(self.invalid("lose the connection")),
        }
    }

    /// Start the next dial attempt. The loss instant is kept.
    ///
    /// Valid from: `Lost`, `Reconnecting`.
    pub fn begin_reconnect(&mut self) -> Result<u32, StreamError> {
        match *self {
            Self::Lost { since } => {
                *self = Self::Reconnecting { since, attempt: 1 };
                Ok(1)
            }
            Self::Reconnecting { since, attempt } => {
                let attempt = attempt.saturating_add(1);
                *self = Self::Reconnecting { since, attempt };
                Ok(attempt)
            }
            _ => Err(self.invalid("reconnect")),
        }
    }

    /// The reconnect window elapsed.
    ///
    /// Valid from: `Lost`, `Reconnecting`.
    pub fn expire(&mut self) -> Result<(), StreamError> {
        match self {
            Self::Lost { .. } | Self::Reconnecting { .. } => {
                *self = Self::Disconnected;
                Ok(())
            }
            _ => Err(self.invalid("expire")),
        }
    }

    /// Force-reset to `Disconnected` regardless of current state.
    pub fn force_disconnect(&mut self) {
        *self = Self::Disconnected;
    }

    fn invalid(&self, action: &'static str) -> StreamError {
        StreamError::InvalidTransition {
            from: self.name(),
            action,
        }
    }
}

// ── DisconnectReason ─────────────────────────────────────────────

/// Why the controller ended up in `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// An explicit `disconnect()`.
    UserRequested,
    /// The initial dial failed or timed out.
    ConnectFailed,
    /// The reconnect window elapsed without recovery.
    ConnectionLost,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::UserRequested => "disconnected by user",
            Self::ConnectFailed => "connection failed",
            Self::ConnectionLost => "connection lost",
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
