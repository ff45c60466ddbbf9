//! Consumer-side reconnection controller.
//!
//! Owns at most one [`ReceiveSession`] at a time. A background driver
//! task receives frames, acknowledges them, and on every poll tick checks
//! for silence and drives reconnection:
//!
//! 1. `Connected` with no frame for `max_silence` becomes `Lost`.
//! 2. A receive error closes the session and becomes `Lost` at once.
//! 3. While lost without a session, each tick makes one dial attempt
//!    (`Reconnecting { attempt }`).
//! 4. Once `reconnect_window` has passed since the loss, the session is
//!    closed and the state becomes `Disconnected`. Nothing retries after
//!    that until the next explicit [`connect`](ReconnectController::connect).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::{ConnectionState, DisconnectReason};
use crate::error::StreamError;
use crate::frame::{DEFAULT_QUEUE_CAPACITY, Frame};
use crate::network::Connector;
use crate::queue::{EnqueueOutcome, FrameQueue};
use crate::session::{ReceiveSession, SessionConfig};
use crate::stream::observer::StreamObserver;

// ── ReconnectConfig ──────────────────────────────────────────────

/// Timing policy and wire settings for a [`ReconnectController`].
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// No frame for this long while connected means the signal is lost.
    pub max_silence: Duration,
    /// How long after a loss reconnection is attempted before giving up.
    pub reconnect_window: Duration,
    /// Period of the silence check and of reconnection attempts.
    pub poll_interval: Duration,
    /// Upper bound on a single dial.
    pub connect_timeout: Duration,
    /// Capacity of the received-frame queue.
    pub queue_capacity: usize,
    /// Per-frame pacing interval declared to the producer in every
    /// acknowledgment.
    pub pacing_interval: Duration,
    pub session: SessionConfig,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_silence: Duration::from_secs(3),
            reconnect_window: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            pacing_interval: Duration::from_secs_f64(1.0 / 30.0),
            session: SessionConfig::default(),
        }
    }
}

impl ReconnectConfig {
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.poll_interval.is_zero() {
            return Err(StreamError::InvalidConfig("poll interval must be positive"));
        }
        if self.max_silence.is_zero() {
            return Err(StreamError::InvalidConfig("silence timeout must be positive"));
        }
        if self.connect_timeout.is_zero() {
            return Err(StreamError::InvalidConfig("connect timeout must be positive"));
        }
        Ok(())
    }
}

// ── Shared state ─────────────────────────────────────────────────

/// State shared between the controller handle and its driver task.
struct Shared {
    config: ReconnectConfig,
    state: watch::Sender<ConnectionState>,
    observer: Arc<dyn StreamObserver>,
    frames: Arc<FrameQueue>,
    last_delay: Mutex<Option<f32>>,
    frames_received: AtomicU64,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Apply a validated transition, then publish it.
    fn transition<T>(
        &self,
        step: impl FnOnce(&mut ConnectionState) -> Result<T, StreamError>,
    ) -> Result<T, StreamError> {
        let mut next = self.state();
        let value = step(&mut next)?;
        self.state.send_replace(next);
        let state = self.state();
        info!(state = %state, "connection state changed");
        self.observer.on_state_changed(&state);
        Ok(value)
    }

    fn report(&self, error: &StreamError) {
        self.observer.on_error(error);
    }

    fn accept_frame(&self, frame: Frame, delay: Option<f32>) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        if delay.is_some() {
            *self.last_delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
        }
        self.observer.on_frame_ready(&frame);
        if self.frames.enqueue(frame) == EnqueueOutcome::Dropped {
            debug!(dropped = self.frames.dropped(), "frame queue full; frame dropped");
        }
    }
}

struct Driver {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

// ── ReconnectController ──────────────────────────────────────────

/// Reconnecting consumer connection.
///
/// State changes are published on a `watch` channel (see
/// [`subscribe`](Self::subscribe)) and to the [`StreamObserver`].
/// Received frames land in a drop-incoming [`FrameQueue`].
pub struct ReconnectController<C: Connector> {
    connector: Arc<C>,
    shared: Arc<Shared>,
    driver: Option<Driver>,
}

impl<C: Connector> ReconnectController<C> {
    pub fn new(connector: C, config: ReconnectConfig, observer: Arc<dyn StreamObserver>) -> Self {
        let frames = Arc::new(FrameQueue::new(config.queue_capacity));
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector: Arc::new(connector),
            shared: Arc::new(Shared {
                config,
                state,
                observer,
                frames,
                last_delay: Mutex::new(None),
                frames_received: AtomicU64::new(0),
            }),
            driver: None,
        }
    }

    /// Dial the producer and start receiving.
    ///
    /// Valid only from `Disconnected`. On failure the state returns to
    /// `Disconnected` and the caller may retry.
    pub async fn connect(&mut self) -> Result<(), StreamError> {
        self.shared.config.validate()?;
        if !self.shared.state().is_disconnected() {
            return Err(StreamError::InvalidTransition {
                from: self.shared.state().name(),
                action: "connect",
            });
        }
        // A driver that expired on its own has already finished.
        self.stop_driver().await;

        self.shared.transition(|s| s.begin_connect())?;
        info!(peer = %self.connector.describe(), "connecting");

        let config = &self.shared.config;
        let session = match dial(self.connector.as_ref(), config, config.connect_timeout).await {
            Ok(session) => session,
            Err(e) => {
                warn!(peer = %self.connector.describe(), error = %e, "connect failed");
                self.shared.report(&e);
                self.shared.transition(|s| s.connect_failed())?;
                self.shared
                    .observer
                    .on_disconnected(DisconnectReason::ConnectFailed);
                return Err(e);
            }
        };
        self.shared.transition(|s| s.connected())?;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(drive(
            Arc::clone(&self.shared),
            Arc::clone(&self.connector),
            session,
            cancel.clone(),
        ));
        self.driver = Some(Driver { cancel, task });
        Ok(())
    }

    /// Close the session and stop reconnecting. Suppresses the
    /// connection-lost notification. Idempotent.
    pub async fn disconnect(&mut self) {
        self.stop_driver().await;
        if self.shared.state().is_disconnected() {
            return;
        }
        // Infallible: force_disconnect is valid from every state.
        let _ = self.shared.transition(|s| {
            s.force_disconnect();
            Ok(())
        });
        self.shared
            .observer
            .on_disconnected(DisconnectReason::UserRequested);
        info!(peer = %self.connector.describe(), "disconnected by user");
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Received frames, oldest first.
    pub fn frames(&self) -> Arc<FrameQueue> {
        Arc::clone(&self.shared.frames)
    }

    /// The producer's most recent delay estimate for this consumer.
    pub fn last_delay(&self) -> Option<f32> {
        *self.shared.last_delay.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn frames_received(&self) -> u64 {
        self.shared.frames_received.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.shared.config
    }

    async fn stop_driver(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.cancel.cancel();
            if let Err(e) = driver.task.await {
                warn!(error = %e, "connection driver ended abnormally");
            }
        }
    }
}

impl<C: Connector> Drop for ReconnectController<C> {
    fn drop(&mut self) {
        if let Some(driver) = &self.driver {
            driver.cancel.cancel();
        }
    }
}

impl<C: Connector> std::fmt::Debug for ReconnectController<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectController")
            .field("peer", &self.connector.describe())
            .field("state", &self.shared.state())
            .finish()
    }
}

// ── Driver ───────────────────────────────────────────────────────

async fn dial<C: Connector>(
    connector: &C,
    config: &ReconnectConfig,
    budget: Duration,
) -> Result<ReceiveSession, StreamError> {
    let (reader, writer) = tokio::time::timeout(budget, connector.connect())
        .await
        .map_err(|_| StreamError::Timeout(budget))??;
    Ok(ReceiveSession::new(
        connector.describe(),
        reader,
        writer,
        &config.session,
    ))
}

/// Next frame from the session, or never when there is none.
async fn next_frame(session: &mut Option<ReceiveSession>) -> Result<Frame, StreamError> {
    match session {
        Some(session) => session.receive().await,
        None => std::future::pending().await,
    }
}

async fn close_session(session: &mut Option<ReceiveSession>) {
    if let Some(mut session) = session.take() {
        session.close().await;
    }
}

async fn drive<C: Connector>(
    shared: Arc<Shared>,
    connector: Arc<C>,
    session: ReceiveSession,
    cancel: CancellationToken,
) {
    let config = &shared.config;
    let mut session = Some(session);
    let mut last_frame = Instant::now();
    let mut ticker =
        tokio::time::interval_at(Instant::now() + config.poll_interval, config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            received = next_frame(&mut session) => match received {
                Ok(frame) => {
                    last_frame = Instant::now();
                    if shared.state().is_lost() {
                        let _ = shared.transition(|s| s.connected());
                    }
                    let delay = session.as_ref().and_then(|s| s.last_delay());
                    shared.accept_frame(frame, delay);

                    let acked = match session.as_mut() {
                        Some(s) => s.acknowledge(config.pacing_interval),
                        None => Ok(()),
                    };
                    if let Err(e) = acked {
                        session_failed(&shared, &mut session, e).await;
                    }
                }
                Err(e) => session_failed(&shared, &mut session, e).await,
            },

            _ = ticker.tick() => {
                let now = Instant::now();
                match shared.state() {
                    ConnectionState::Connected { .. } => {
                        let silence = now.saturating_duration_since(last_frame);
                        if silence >= config.max_silence {
                            warn!(silence = ?silence, "no frames received; signal lost");
                            let _ = shared.transition(|s| s.lose());
                        }
                    }
                    state if state.is_lost() => {
                        let since = state.lost_since().unwrap_or(now);
                        let elapsed = now.saturating_duration_since(since);
                        if elapsed >= config.reconnect_window {
                            warn!(elapsed = ?elapsed, "reconnect window elapsed; giving up");
                            close_session(&mut session).await;
                            let _ = shared.transition(|s| s.expire());
                            shared.observer.on_disconnected(DisconnectReason::ConnectionLost);
                            return;
                        }
                        if session.is_none() {
                            let attempt = shared.transition(|s| s.begin_reconnect()).unwrap_or(0);
                            let budget = config.connect_timeout.min(config.reconnect_window - elapsed);
                            debug!(attempt, peer = %connector.describe(), "reconnecting");
                            let dialed = tokio::select! {
                                _ = cancel.cancelled() => break,
                                dialed = dial(connector.as_ref(), config, budget) => dialed,
                            };
                            match dialed {
                                Ok(fresh) => {
                                    session = Some(fresh);
                                    last_frame = Instant::now();
                                    info!(attempt, "reconnected");
                                    let _ = shared.transition(|s| s.connected());
                                }
                                Err(e) => {
                                    debug!(attempt, error = %e, "reconnect attempt failed");
                                    shared.report(&e);
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    close_session(&mut session).await;
    debug!("connection driver stopped");
}

/// The session died: close it and mark the connection lost.
async fn session_failed(
    shared: &Shared,
    session: &mut Option<ReceiveSession>,
    error: StreamError,
) {
    warn!(error = %error, "session failed");
    shared.report(&error);
    close_session(session).await;
    if shared.state().is_connected() {
        let _ = shared.transition(|s| s.lose());
    }
}

// ── Tests ────────────────────────────────────────────────────────
