//! Producer service core logic.
//!
//! Binds the broadcast server, runs the pacing loop over the configured
//! frame source, and logs aggregate stats until cancelled.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use framecast_core::{BroadcastServer, StreamError, StreamSummary, Streamer};

use crate::config::SenderConfig;
use crate::source::AnySource;

// ── SenderService ────────────────────────────────────────────────

/// The top-level producer service.
pub struct SenderService {
    config: SenderConfig,
    shutdown: CancellationToken,
}

impl SenderService {
    pub fn new(config: SenderConfig) -> Self {
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

    /// Run until stopped.
    ///
    /// 1. Opens the frame source and loads the placeholder, if any.
    /// 2. Binds the broadcast server (with port fallback).
    /// 3. Runs the pacing loop and a periodic stats reporter.
    /// 4. On stop, ends the loop, then shuts the server down.
    pub async fn run(&self) -> Result<StreamSummary, StreamError> {
        self.run_with_bound(None).await
    }

    /// Like [`run`](Self::run), reporting the bound address once listening.
    pub async fn run_with_bound(
        &self,
        bound: Option<oneshot::Sender<SocketAddr>>,
    ) -> Result<StreamSummary, StreamError> {
        let source_config = self.config.source.clone();
        let source = tokio::task::spawn_blocking(move || AnySource::from_config(&source_config))
            .await
            .map_err(|e| StreamError::Source(format!("source setup failed: {e}")))??;
        let mut streamer_config = self.config.to_streamer_config();
        streamer_config.placeholder = self.load_placeholder().await?;

        let server = BroadcastServer::bind(self.config.to_server_config()).await?;
        info!(addr = %server.local_addr(), "producer listening");
        if let Some(bound) = bound {
            let _ = bound.send(server.local_addr());
        }

        let group = server.group().clone();
        let cancel = self.shutdown.child_token();
        let mut streamer = Streamer::new(source, streamer_config);
        let streaming = tokio::spawn(async move { streamer.run(&group, cancel).await });

        if let Some(period) = self.config.stats_interval() {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let stats = server.stats();
                        info!(
                            receivers = stats.receivers,
                            frames = stats.frames_broadcast,
                            rejected = stats.frames_rejected,
                            bytes_per_sec = stats.bytes_per_second,
                            latency = stats.mean_latency,
                            "stats"
                        );
                    }
                }
            }
        } else {
            self.shutdown.cancelled().await;
        }

        let summary = match streaming.await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "pacing loop ended abnormally");
                Ok(StreamSummary::default())
            }
        };
        server.shutdown().await;
        info!("producer stopped");
        summary
    }

    async fn load_placeholder(&self) -> Result<Option<Bytes>, StreamError> {
        let path = &self.config.stream.placeholder;
        if path.as_os_str().is_empty() {
            return Ok(None);
        }
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            StreamError::Source(format!("cannot read placeholder {}: {e}", path.display()))
        })?;
        Ok((!bytes.is_empty()).then(|| Bytes::from(bytes)))
    }
}

// ── Tests ────────────────────────────────────────────────────────
