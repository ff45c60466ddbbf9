//! Connection to the producer.
//!
//! Builds the TCP connector from configuration and reports the
//! controller's notifications through `tracing` and a `watch` channel.

use tokio::sync::watch;
use tracing::{info, warn};

use framecast_core::{
    ConnectionState, DisconnectReason, Frame, StreamError, StreamObserver, TcpConnector,
};

use crate::config::ReceiverConfig;

/// The connector dialing the configured producer.
pub fn connector(config: &ReceiverConfig) -> TcpConnector {
    TcpConnector::new(config.endpoint(), config.connect_timeout())
}

// ── StatusObserver ───────────────────────────────────────────────

/// Logs state changes and publishes the terminal disconnect reason.
///
/// Frame arrivals are not logged; the sink reports throughput instead.
#[derive(Debug)]
pub struct StatusObserver {
    ended: watch::Sender<Option<DisconnectReason>>,
}

impl StatusObserver {
    pub fn new() -> Self {
        let (ended, _) = watch::channel(None);
        Self { ended }
    }

    /// Yields `Some(reason)` each time the controller reaches
    /// `Disconnected`.
    pub fn subscribe(&self) -> watch::Receiver<Option<DisconnectReason>> {
        self.ended.subscribe()
    }

    pub fn last_reason(&self) -> Option<DisconnectReason> {
        *self.ended.borrow()
    }
}

impl Default for StatusObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamObserver for StatusObserver {
    fn on_frame_ready(&self, _frame: &Frame) {}

    fn on_state_changed(&self, state: &ConnectionState) {
        match state {
            ConnectionState::Lost { .. } => warn!("signal lost; waiting for frames"),
            ConnectionState::Reconnecting { attempt, .. } => {
                info!(attempt, "reconnecting")
            }
            ConnectionState::Connected { .. } => info!("receiving"),
            _ => {}
        }
    }

    fn on_error(&self, error: &StreamError) {
        warn!(error = %error, "session error");
    }

    fn on_disconnected(&self, reason: DisconnectReason) {
        match reason {
            DisconnectReason::ConnectionLost => warn!("connection lost"),
            other => info!(reason = %other, "disconnected"),
        }
        self.ended.send_replace(Some(reason));
    }
}
