use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{
    BoxedReader, BoxedWriter, CloseHook, MAX_UNACKED_SENDS, SendOutcome, SessionConfig,
    SessionId, SessionStats,
};
use crate::codec::{AckCodec, FrameCodec, WireMessage};
use crate::error::StreamError;
use crate::frame::Frame;
use crate::stream::latency::LatencyEstimator;

type FrameSink = FramedWrite<BoxedWriter, FrameCodec>;

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    skipped: AtomicU64,
    delivered: AtomicU64,
    bytes: AtomicU64,
}

#[derive(Debug, Default)]
struct Feedback {
    estimator: LatencyEstimator,
    unacked: VecDeque<Instant>,
    consumer_interval: f64,
}

/// Producer-side session.
///
/// The writer sits behind an async mutex whose owned guard is the
/// in-flight flag: a send that cannot take it immediately is skipped,
/// never queued. A background task reads acknowledgments and notices
/// when the peer goes away.
pub struct Session {
    id: SessionId,
    peer: String,
    config: SessionConfig,
    /// `None` once the transport handle has been released.
    writer: Arc<Mutex<Option<FrameSink>>>,
    closed: CancellationToken,
    close_fired: AtomicBool,
    on_close: Option<CloseHook>,
    counters: Counters,
    feedback: StdMutex<Feedback>,
    last_activity: StdMutex<Instant>,
}

impl Session {
    /// Wrap an accepted TCP connection.
    pub fn from_tcp(
        id: SessionId,
        stream: TcpStream,
        config: SessionConfig,
        on_close: Option<CloseHook>,
    ) -> Result<Arc<Self>, StreamError> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self::spawn(id, peer.to_string(), reader, writer, config, on_close))
    }

    /// Build a session over any byte stream halves and start its
    /// acknowledgment reader. Must be called within a Tokio runtime.
    pub fn spawn<R, W>(
        id: SessionId,
        peer: impl Into<String>,
        reader: R,
        writer: W,
        config: SessionConfig,
        on_close: Option<CloseHook>,
    ) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let codec = FrameCodec::new(config.max_frame_bytes);
        let sink = FramedWrite::new(Box::new(writer) as BoxedWriter, codec);

        let session = Arc::new(Self {
            id,
            peer: peer.into(),
            config,
            writer: Arc::new(Mutex::new(Some(sink))),
            closed: CancellationToken::new(),
            close_fired: AtomicBool::new(false),
            on_close,
            counters: Counters::default(),
            feedback: StdMutex::new(Feedback::default()),
            last_activity: StdMutex::new(Instant::now()),
        });

        let acks = FramedRead::new(Box::new(reader) as BoxedReader, AckCodec);
        tokio::spawn(Self::read_acks(
            Arc::downgrade(&session),
            session.closed.clone(),
            acks,
        ));

        debug!(session = %id, peer = %session.peer, "session opened");
        session
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the session is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current delay estimate in seconds, net of the consumer's declared
    /// pacing interval.
    pub fn latency_estimate(&self) -> f64 {
        let feedback = self.feedback();
        feedback
            .estimator
            .current_estimate(feedback.consumer_interval)
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            bytes_written: self.counters.bytes.load(Ordering::Relaxed),
            latency: self.latency_estimate(),
        }
    }

    // ── Sending ──────────────────────────────────────────────────

    /// Start sending `frame` on its own task and return immediately.
    ///
    /// The skip decision is made here, synchronously: if a previous send
    /// is still in flight the frame is dropped for this session.
    pub fn try_send(self: &Arc<Self>, frame: &Frame) -> SendOutcome {
        let guard = match self.begin_send(frame) {
            Ok(guard) => guard,
            Err(outcome) => return outcome,
        };
        let session = Arc::clone(self);
        let frame = frame.clone();
        tokio::spawn(async move {
            // Failures close the session; nothing to report here.
            let _ = session.write_frame(guard, &frame).await;
        });
        SendOutcome::Accepted
    }

    /// Send `frame` and wait for the write to complete.
    pub async fn send(&self, frame: &Frame) -> Result<SendOutcome, StreamError> {
        let guard = match self.begin_send(frame) {
            Ok(guard) => guard,
            Err(SendOutcome::Closed) => return Err(StreamError::ConnectionClosed),
            Err(outcome) => return Ok(outcome),
        };
        self.write_frame(guard, frame).await?;
        Ok(SendOutcome::Accepted)
    }

    fn begin_send(&self, frame: &Frame) -> Result<OwnedMutexGuard<Option<FrameSink>>, SendOutcome> {
        if self.is_closed() {
            return Err(SendOutcome::Closed);
        }
        if !self.fits(frame) {
            debug!(session = %self.id, len = frame.len(), "frame outside wire limits; not sent");
            return Err(SendOutcome::Rejected);
        }
        match Arc::clone(&self.writer).try_lock_owned() {
            Ok(guard) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(guard)
            }
            Err(_) => {
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                trace!(session = %self.id, "send in flight; frame skipped");
                Err(SendOutcome::Skipped)
            }
        }
    }

    async fn write_frame(
        &self,
        mut guard: OwnedMutexGuard<Option<FrameSink>>,
        frame: &Frame,
    ) -> Result<(), StreamError> {
        let result = match guard.as_mut() {
            Some(sink) => tokio::select! {
                _ = self.closed.cancelled() => Err(StreamError::ConnectionClosed),
                result = self.write_messages(sink, frame) => result,
            },
            None => Err(StreamError::ConnectionClosed),
        };
        drop(guard);

        match &result {
            Ok(()) => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .bytes
                    .fetch_add(frame.len() as u64, Ordering::Relaxed);
                self.touch();
            }
            Err(e) => {
                debug!(session = %self.id, peer = %self.peer, error = %e, "send failed");
                self.close();
            }
        }
        result
    }

    /// Length header and payload, then the delay value when feedback is on.
    async fn write_messages(&self, sink: &mut FrameSink, frame: &Frame) -> Result<(), StreamError> {
        self.mark_sent();
        sink.feed(WireMessage::Frame(frame.payload().clone())).await?;
        if self.config.latency_feedback {
            let delay = self.latency_estimate() as f32;
            sink.feed(WireMessage::Delay(delay)).await?;
        }
        sink.flush().await
    }

    /// Whether `frame` can be encoded under this session's length limit.
    pub fn fits(&self, frame: &Frame) -> bool {
        !frame.is_empty() && frame.len() <= self.config.max_frame_bytes
    }

    // ── Feedback ─────────────────────────────────────────────────

    fn mark_sent(&self) {
        let mut feedback = self.feedback();
        if feedback.unacked.len() == MAX_UNACKED_SENDS {
            feedback.unacked.pop_front();
        }
        feedback.unacked.push_back(Instant::now());
    }

    /// Pair an acknowledgment with the oldest unacknowledged send.
    fn record_ack(&self, consumer_interval: f32) {
        let now = Instant::now();
        {
            let mut feedback = self.feedback();
            if let Some(sent) = feedback.unacked.pop_front() {
                feedback
                    .estimator
                    .observe_duration(now.saturating_duration_since(sent));
            }
            if consumer_interval.is_finite() && consumer_interval >= 0.0 {
                feedback.consumer_interval = f64::from(consumer_interval);
            }
        }
        self.touch();
    }

    async fn read_acks(
        session: Weak<Self>,
        closed: CancellationToken,
        mut acks: FramedRead<BoxedReader, AckCodec>,
    ) {
        loop {
            let next = tokio::select! {
                _ = closed.cancelled() => return,
                next = acks.next() => next,
            };
            let Some(session) = session.upgrade() else {
                return;
            };
            match next {
                Some(Ok(interval)) => session.record_ack(interval),
                Some(Err(e)) => {
                    debug!(session = %session.id, error = %e, "acknowledgment stream failed");
                    session.close();
                    return;
                }
                None => {
                    debug!(session = %session.id, peer = %session.peer, "peer closed the connection");
                    session.close();
                    return;
                }
            }
        }
    }

    // ── Closing ──────────────────────────────────────────────────

    /// Close the session. Idempotent; the close hook fires exactly once.
    ///
    /// Cancellation unblocks an in-flight write and the acknowledgment
    /// reader; the write half is released as soon as no send holds it.
    pub fn close(&self) {
        if self.close_fired.swap(true, Ordering::AcqRel) {
            return;
        }
        self.closed.cancel();
        self.release_writer();
        debug!(session = %self.id, peer = %self.peer, "session closed");
        if let Some(hook) = &self.on_close {
            hook(self.id);
        }
    }

    fn release_writer(&self) {
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
            return;
        }
        // A send still holds the writer; it unwinds on cancellation.
        let writer = Arc::clone(&self.writer);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                writer.lock().await.take();
            });
        }
    }

    fn touch(&self) {
        *self.last_activity.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    fn feedback(&self) -> std::sync::MutexGuard<'_, Feedback> {
        self.feedback.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::io::{AsyncWriteExt, DuplexStream};

    use crate::test_utils::StalledWriter;

    fn no_feedback() -> SessionConfig {
        SessionConfig {
            latency_feedback: false,
            ..SessionConfig::default()
        }
    }

    fn frame(payload: &'static [u8]) -> Frame {
        Frame::new(0.0, Bytes::from_static(payload))
    }

    /// Session over a duplex pipe; returns the peer's end.
    fn piped(config: SessionConfig, hook: Option<CloseHook>) -> (Arc<Session>, DuplexStream) {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(local);
        (
            Session::spawn(SessionId(1), "pipe", reader, writer, config, hook),
            remote,
        )
    }

    #[tokio::test]
    async fn send_writes_header_then_payload() {
        let (session, remote) = piped(no_feedback(), None);
        assert_eq!(
            session.send(&frame(b"jpeg")).await.unwrap(),
            SendOutcome::Accepted
        );

        let mut frames = FramedRead::new(remote, FrameCodec::new(1024));
        let received = frames.next().await.unwrap().unwrap();
        assert_eq!(received, WireMessage::Frame(Bytes::from_static(b"jpeg")));
        assert_eq!(session.stats().delivered, 1);
        assert_eq!(session.stats().bytes_written, 4);
    }

    #[tokio::test]
    async fn busy_session_skips_instead_of_queueing() {
        let (reader, _keep) = tokio::io::duplex(64);
        let (reader, _) = tokio::io::split(reader);
        let session = Session::spawn(
            SessionId(2),
            "stalled",
            reader,
            StalledWriter,
            no_feedback(),
            None,
        );

        assert_eq!(session.try_send(&frame(b"a")), SendOutcome::Accepted);
        tokio::task::yield_now().await;
        assert_eq!(session.try_send(&frame(b"b")), SendOutcome::Skipped);
        assert_eq!(session.try_send(&frame(b"c")), SendOutcome::Skipped);

        let stats = session.stats();
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.delivered, 0);

        // Closing unblocks the stalled write.
        session.close();
        assert!(session.is_closed());
        assert_eq!(session.try_send(&frame(b"d")), SendOutcome::Closed);
    }

    #[tokio::test]
    async fn close_hook_fires_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let hook: CloseHook = Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let (session, _remote) = piped(no_feedback(), Some(hook));

        session.close();
        session.close();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(matches!(
            session.send(&frame(b"late")).await,
            Err(StreamError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn peer_disconnect_closes_session() {
        let (session, remote) = piped(no_feedback(), None);
        drop(remote);
        tokio::time::timeout(Duration::from_secs(1), session.closed())
            .await
            .expect("session should notice the peer leaving");
    }

    #[tokio::test]
    async fn write_failure_closes_session() {
        let (local, remote) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(local);
        // The reader half outlives the remote so only the write can fail.
        let session = Session::spawn(SessionId(3), "pipe", reader, writer, no_feedback(), None);
        drop(remote);
        let _ = session.send(&frame(b"x")).await;
        assert!(session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn acknowledgments_feed_the_estimator() {
        let (session, remote) = piped(SessionConfig::default(), None);
        let (remote_reader, mut remote_writer) = tokio::io::split(remote);
        let mut frames =
            FramedRead::new(remote_reader, FrameCodec::new(1024).with_latency_feedback(true));

        for _ in 0..3 {
            session.send(&frame(b"f")).await.unwrap();
            assert!(matches!(
                frames.next().await.unwrap().unwrap(),
                WireMessage::Frame(_)
            ));
            assert!(matches!(
                frames.next().await.unwrap().unwrap(),
                WireMessage::Delay(_)
            ));
            tokio::time::sleep(Duration::from_millis(500)).await;
            // Consumer declares a 100 ms pacing interval.
            remote_writer.write_all(&0.1f32.to_le_bytes()).await.unwrap();
            remote_writer.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // 0.5 s round trips minus 0.1 s declared interval.
        let estimate = session.latency_estimate();
        assert!((estimate - 0.4).abs() < 0.01, "estimate = {estimate}");
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_without_closing() {
        let config = SessionConfig {
            max_frame_bytes: 4,
            latency_feedback: false,
        };
        let (session, remote) = piped(config, None);

        assert_eq!(session.try_send(&frame(b"too long")), SendOutcome::Rejected);
        assert_eq!(
            session.send(&frame(b"")).await.unwrap(),
            SendOutcome::Rejected
        );
        assert!(!session.is_closed());
        assert_eq!(session.stats().accepted, 0);

        // The next frame that fits still goes out.
        assert_eq!(
            session.send(&frame(b"ok")).await.unwrap(),
            SendOutcome::Accepted
        );
        let mut frames = FramedRead::new(remote, FrameCodec::new(4));
        let received = frames.next().await.unwrap().unwrap();
        assert_eq!(received, WireMessage::Frame(Bytes::from_static(b"ok")));
    }
}
