//! Consumer service core logic.
//!
//! Connects through a [`ReconnectController`], displays queued frames at
//! the configured rate, and ends when stopped or when the controller
//! gives up after a loss.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

use framecast_core::{Connector, DisconnectReason, ReconnectController, StreamError};

use crate::config::ReceiverConfig;
use crate::connection::{StatusObserver, connector};
use crate::display::{DisplayStats, FrameSink};

/// How a receive run ended.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiveSummary {
    pub reason: DisconnectReason,
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub display: DisplayStats,
}

// ── ReceiverService ──────────────────────────────────────────────

pub struct ReceiverService {
    config: ReceiverConfig,
    shutdown: CancellationToken,
}

impl ReceiverService {
    pub fn new(config: ReceiverConfig) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// A handle that stops the service from another task.
    pub fn stop_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Connect to the configured producer and run until stopped or until
    /// the connection is given up.
    ///
    /// The first connect is not retried: an unreachable producer is an
    /// error. Losses after that are handled by the controller.
    pub async fn run(&self) -> Result<ReceiveSummary, StreamError> {
        self.run_with(connector(&self.config)).await
    }

    pub async fn run_with<C: Connector>(&self, connector: C) -> Result<ReceiveSummary, StreamError> {
        let observer = Arc::new(StatusObserver::new());
        let mut ended = observer.subscribe();
        let mut controller =
            ReconnectController::new(connector, self.config.to_reconnect_config(), observer.clone());
        controller.connect().await?;

        let frames = controller.frames();
        let mut sink = FrameSink::from_config(&self.config.output);
        if let Some(path) = sink.output() {
            info!(path = %path.display(), "writing frames");
        }

        let mut display = tokio::time::interval(self.config.frame_interval());
        display.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let log_stats = self.config.stats_interval().is_some();
        let mut status = tokio::time::interval(
            self.config
                .stats_interval()
                .unwrap_or(Duration::from_secs(3600)),
        );
        status.tick().await;

        let reason = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    controller.disconnect().await;
                    break DisconnectReason::UserRequested;
                }
                changed = ended.changed() => {
                    if changed.is_err() {
                        break DisconnectReason::ConnectionLost;
                    }
                    if let Some(reason) = *ended.borrow_and_update() {
                        break reason;
                    }
                }
                _ = display.tick() => {
                    sink.display_next(&frames).await;
                }
                _ = status.tick(), if log_stats => {
                    let stats = sink.stats();
                    info!(
                        state = %controller.state(),
                        received = controller.frames_received(),
                        dropped = frames.dropped(),
                        fps = stats.fps,
                        delay = controller.last_delay().unwrap_or_default(),
                        "status"
                    );
                }
            }
        };

        let summary = ReceiveSummary {
            reason,
            frames_received: controller.frames_received(),
            frames_dropped: frames.dropped(),
            display: sink.stats(),
        };
        info!(reason = %summary.reason, received = summary.frames_received, "receiver stopped");
        Ok(summary)
    }
}

// ── Tests ────────────────────────────────────────────────────────
