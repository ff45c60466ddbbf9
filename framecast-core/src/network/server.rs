//! Producer-side fan-out.
//!
//! [`BroadcastGroup`] is the live-session set and the fan-out logic; it
//! has no socket of its own. [`BroadcastServer`] owns a listener and an
//! accept loop feeding a group.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StreamError;
use crate::frame::Frame;
use crate::session::{CloseHook, SendOutcome, Session, SessionConfig, SessionId};
use crate::stream::throughput::ThroughputMeter;

/// Default producer port.
pub const DEFAULT_PORT: u16 = 56666;

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

// ── Reports ──────────────────────────────────────────────────────

/// Per-broadcast tally of session outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub accepted: usize,
    pub skipped: usize,
    pub closed: usize,
    /// The frame was empty or over the length limit and went to no one.
    pub rejected: bool,
}

/// Aggregate producer-side figures. Individual sessions are not exposed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GroupStats {
    /// Live receivers.
    pub receivers: usize,
    /// Frames fanned out by [`BroadcastGroup::broadcast`].
    pub frames_broadcast: u64,
    /// Frames refused for their length.
    pub frames_rejected: u64,
    /// Payload bytes handed to sessions over the last second.
    pub bytes_per_second: u64,
    /// Mean delay estimate across live sessions, in seconds.
    pub mean_latency: f64,
}

// ── BroadcastGroup ───────────────────────────────────────────────

/// The set of live producer sessions.
///
/// The map lock is held only for add, remove and snapshot; never across
/// I/O. Cloning yields another handle to the same set.
#[derive(Clone)]
pub struct BroadcastGroup {
    inner: Arc<GroupInner>,
}

struct GroupInner {
    config: SessionConfig,
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
    next_id: AtomicU64,
    frames_broadcast: AtomicU64,
    frames_rejected: AtomicU64,
    throughput: Mutex<ThroughputMeter>,
}

impl GroupInner {
    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        let (removed, remaining) = {
            let mut sessions = self.sessions();
            (sessions.remove(&id), sessions.len())
        };
        if removed.is_some() {
            info!(session = %id, receivers = remaining, "receiver removed");
        }
        removed
    }
}

impl BroadcastGroup {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(GroupInner {
                config,
                sessions: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                frames_broadcast: AtomicU64::new(0),
                frames_rejected: AtomicU64::new(0),
                throughput: Mutex::new(ThroughputMeter::new()),
            }),
        }
    }

    pub fn session_config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Create a session over the given stream halves and add it to the
    /// set. The session removes itself when it closes.
    pub fn attach<R, W>(&self, peer: impl Into<String>, reader: R, writer: W) -> Arc<Session>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let id = SessionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let session = Session::spawn(
            id,
            peer,
            reader,
            writer,
            self.inner.config.clone(),
            Some(self.close_hook()),
        );
        self.add(Arc::clone(&session));
        session
    }

    /// Create a session for an accepted TCP connection.
    pub fn attach_tcp(&self, stream: TcpStream) -> Result<Arc<Session>, StreamError> {
        let id = SessionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let session = Session::from_tcp(
            id,
            stream,
            self.inner.config.clone(),
            Some(self.close_hook()),
        )?;
        self.add(Arc::clone(&session));
        Ok(session)
    }

    /// Add an existing session. A session that closed before it could be
    /// added is dropped again immediately.
    pub fn add(&self, session: Arc<Session>) {
        let id = session.id();
        let peer = session.peer().to_owned();
        let receivers = {
            let mut sessions = self.inner.sessions();
            sessions.insert(id, Arc::clone(&session));
            sessions.len()
        };
        // The close hook may have fired before the insert.
        if session.is_closed() {
            self.inner.remove(id);
            return;
        }
        info!(session = %id, peer = %peer, receivers, "receiver connected");
    }

    /// Idempotent.
    pub fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        self.inner.remove(id)
    }

    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.inner.sessions().values().cloned().collect()
    }

    /// Fan `frame` out to every live session.
    ///
    /// Each send runs on its own task, so a stalled receiver only skips
    /// its own frames. Sessions found closed are removed. A frame that
    /// cannot be framed (empty, or over `max_frame_bytes`) is counted and
    /// dropped before any session sees it.
    pub fn broadcast(&self, frame: &Frame) -> BroadcastReport {
        if frame.is_empty() || frame.len() > self.inner.config.max_frame_bytes {
            self.inner.frames_rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                len = frame.len(),
                max = self.inner.config.max_frame_bytes,
                "frame outside wire limits; dropped"
            );
            return BroadcastReport {
                rejected: true,
                ..BroadcastReport::default()
            };
        }

        let mut report = BroadcastReport::default();
        for session in self.snapshot() {
            match session.try_send(frame) {
                SendOutcome::Accepted => report.accepted += 1,
                SendOutcome::Skipped => report.skipped += 1,
                SendOutcome::Rejected => report.rejected = true,
                SendOutcome::Closed => {
                    report.closed += 1;
                    self.inner.remove(session.id());
                }
            }
        }

        self.inner.frames_broadcast.fetch_add(1, Ordering::Relaxed);
        if report.accepted > 0 {
            let bytes = (frame.len() * report.accepted) as u64;
            self.inner
                .throughput
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .add(bytes);
        }
        report
    }

    /// Close every live session and clear the set.
    pub fn close_all(&self) {
        let drained: Vec<_> = self.inner.sessions().drain().map(|(_, s)| s).collect();
        for session in &drained {
            session.close();
        }
        if !drained.is_empty() {
            debug!(count = drained.len(), "closed all sessions");
        }
    }

    pub fn len(&self) -> usize {
        self.inner.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> GroupStats {
        let sessions = self.snapshot();
        let mean_latency = if sessions.is_empty() {
            0.0
        } else {
            sessions.iter().map(|s| s.latency_estimate()).sum::<f64>() / sessions.len() as f64
        };
        let bytes_per_second = self
            .inner
            .throughput
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .rate();
        GroupStats {
            receivers: sessions.len(),
            frames_broadcast: self.inner.frames_broadcast.load(Ordering::Relaxed),
            frames_rejected: self.inner.frames_rejected.load(Ordering::Relaxed),
            bytes_per_second,
            mean_latency,
        }
    }

    fn close_hook(&self) -> CloseHook {
        let group: Weak<GroupInner> = Arc::downgrade(&self.inner);
        Box::new(move |id| {
            if let Some(group) = group.upgrade() {
                group.remove(id);
            }
        })
    }
}

impl Default for BroadcastGroup {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl std::fmt::Debug for BroadcastGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastGroup")
            .field("receivers", &self.len())
            .finish()
    }
}

// ── BroadcastServer ──────────────────────────────────────────────

/// Listener settings for [`BroadcastServer::bind`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub port: u16,
    /// Consecutive ports to try, starting at `port`, when binding fails.
    pub port_attempts: u16,
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            port_attempts: 10,
            session: SessionConfig::default(),
        }
    }
}

/// TCP listener plus accept loop feeding a [`BroadcastGroup`].
pub struct BroadcastServer {
    group: BroadcastGroup,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl BroadcastServer {
    /// Bind the listener and start accepting. Must be called within a
    /// Tokio runtime.
    pub async fn bind(config: ServerConfig) -> Result<Self, StreamError> {
        let listener = bind_with_fallback(&config.listen_addr, config.port, config.port_attempts)
            .await?;
        let local_addr = listener.local_addr()?;
        let group = BroadcastGroup::new(config.session);
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(accept_loop(listener, group.clone(), shutdown.clone()));
        info!(addr = %local_addr, "broadcast server listening");

        Ok(Self {
            group,
            local_addr,
            shutdown,
            accept_task: Mutex::new(Some(task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn group(&self) -> &BroadcastGroup {
        &self.group
    }

    pub fn broadcast(&self, frame: &Frame) -> BroadcastReport {
        self.group.broadcast(frame)
    }

    pub fn receiver_count(&self) -> usize {
        self.group.len()
    }

    pub fn stats(&self) -> GroupStats {
        self.group.stats()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop accepting, close the listener, then close every live session.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let task = self
            .accept_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "accept loop ended abnormally");
            }
        }
        self.group.close_all();
        info!(addr = %self.local_addr, "broadcast server stopped");
    }
}

impl Drop for BroadcastServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for BroadcastServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastServer")
            .field("local_addr", &self.local_addr)
            .field("receivers", &self.group.len())
            .finish()
    }
}

async fn bind_with_fallback(
    addr: &str,
    port: u16,
    attempts: u16,
) -> Result<TcpListener, StreamError> {
    let mut last_error = None;
    for offset in 0..attempts.max(1) {
        let Some(candidate) = port.checked_add(offset) else {
            break;
        };
        match TcpListener::bind((addr, candidate)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                warn!(addr, port = candidate, error = %e, "bind failed");
                last_error = Some(e);
            }
        }
        // An ephemeral request has nothing to fall back to.
        if port == 0 {
            break;
        }
    }
    Err(match last_error {
        Some(e) => StreamError::Transport(e),
        None => StreamError::InvalidConfig("no port available to bind"),
    })
}

async fn accept_loop(listener: TcpListener, group: BroadcastGroup, shutdown: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                if let Err(e) = group.attach_tcp(stream) {
                    warn!(peer = %peer, error = %e, "failed to set up session");
                }
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
    debug!("accept loop stopped");
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use futures::StreamExt;
    use tokio::io::DuplexStream;
    use tokio_util::codec::FramedRead;

    use crate::codec::{FrameCodec, WireMessage};
    use crate::test_utils::StalledWriter;

    fn group() -> BroadcastGroup {
        BroadcastGroup::new(SessionConfig {
            latency_feedback: false,
            ..SessionConfig::default()
        })
    }

    /// Attach a session over a duplex pipe; returns the client end.
    fn attach_piped(group: &BroadcastGroup, name: &str) -> (Arc<Session>, DuplexStream) {
        let (server, client) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(server);
        (group.attach(name, reader, writer), client)
    }

    fn frame(n: u8) -> Frame {
        Frame::new(f64::from(n), vec![n; 16])
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_receiver_does_not_hold_back_the_others() {
        let group = group();
        let (first, first_client) = attach_piped(&group, "first");

        // Session #2 never finishes a write; its read side stays open.
        let (stalled_read, _stalled_client) = tokio::io::duplex(64);
        let (stalled_read, _) = tokio::io::split(stalled_read);
        let second = group.attach("stalled", stalled_read, StalledWriter);

        let (third, third_client) = attach_piped(&group, "third");
        assert_eq!(group.len(), 3);

        for n in 0..10 {
            let report = group.broadcast(&frame(n));
            if n == 0 {
                assert_eq!(report.accepted, 3);
            } else {
                assert_eq!(report.accepted, 2);
                assert_eq!(report.skipped, 1);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(first.stats().accepted, 10);
        assert_eq!(third.stats().accepted, 10);
        assert_eq!(second.stats().accepted, 1);
        assert_eq!(second.stats().skipped, 9);

        for client in [first_client, third_client] {
            let mut frames = FramedRead::new(client, FrameCodec::new(1024));
            for n in 0..10u8 {
                let message = frames.next().await.unwrap().unwrap();
                assert_eq!(message, WireMessage::Frame(Bytes::from(vec![n; 16])));
            }
        }
        assert_eq!(group.stats().frames_broadcast, 10);
    }

    #[tokio::test]
    async fn oversized_frame_leaves_receivers_connected() {
        let group = BroadcastGroup::new(SessionConfig {
            max_frame_bytes: 16,
            latency_feedback: false,
        });
        let clients: Vec<_> = (0..3)
            .map(|i| attach_piped(&group, &format!("r{i}")).1)
            .collect();

        let report = group.broadcast(&Frame::new(0.0, vec![0u8; 17]));
        assert!(report.rejected);
        assert_eq!(report.accepted, 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(group.len(), 3);

        let report = group.broadcast(&frame(1));
        assert_eq!(report.accepted, 3);
        assert!(!report.rejected);
        let stats = group.stats();
        assert_eq!(stats.frames_rejected, 1);
        assert_eq!(stats.frames_broadcast, 1);

        for client in clients {
            let mut frames = FramedRead::new(client, FrameCodec::new(16));
            let message = frames.next().await.unwrap().unwrap();
            assert_eq!(message, WireMessage::Frame(Bytes::from(vec![1u8; 16])));
        }
    }

    #[tokio::test]
    async fn closed_session_leaves_the_group() {
        let group = group();
        let (session, _client) = attach_piped(&group, "a");
        let (_other, _other_client) = attach_piped(&group, "b");
        assert_eq!(group.len(), 2);

        session.close();
        assert_eq!(group.len(), 1);
        // Removal is idempotent.
        assert!(group.remove(session.id()).is_none());
    }

    #[tokio::test]
    async fn departed_peer_is_pruned() {
        let group = group();
        let (session, client) = attach_piped(&group, "leaver");
        drop(client);
        session.closed().await;
        assert!(group.is_empty());
        assert_eq!(group.broadcast(&frame(1)), BroadcastReport::default());
    }

    #[tokio::test]
    async fn close_all_clears_the_set() {
        let group = group();
        let (a, _ca) = attach_piped(&group, "a");
        let (b, _cb) = attach_piped(&group, "b");
        group.close_all();
        assert!(group.is_empty());
        assert!(a.is_closed());
        assert!(b.is_closed());
    }

    #[tokio::test]
    async fn stats_count_throughput() {
        let group = group();
        let (_a, _ca) = attach_piped(&group, "a");
        let (_b, _cb) = attach_piped(&group, "b");
        group.broadcast(&frame(1));
        let stats = group.stats();
        assert_eq!(stats.receivers, 2);
        assert_eq!(stats.frames_broadcast, 1);
        assert_eq!(stats.bytes_per_second, 32);
        assert_eq!(stats.mean_latency, 0.0);
    }

    #[tokio::test]
    async fn bind_falls_back_to_next_port() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let server = BroadcastServer::bind(ServerConfig {
            listen_addr: "127.0.0.1".into(),
            port,
            port_attempts: 20,
            session: SessionConfig::default(),
        })
        .await
        .unwrap();
        assert_ne!(server.local_addr().port(), port);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn single_attempt_on_taken_port_fails() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let result = BroadcastServer::bind(ServerConfig {
            listen_addr: "127.0.0.1".into(),
            port,
            port_attempts: 1,
            session: SessionConfig::default(),
        })
        .await;
        assert!(matches!(result, Err(StreamError::Transport(_))));
    }
}
