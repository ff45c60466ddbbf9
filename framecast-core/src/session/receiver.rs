use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{BoxedReader, BoxedWriter, CLOSE_GRACE, MAX_PENDING_ACKS, SessionConfig};
use crate::codec::{AckCodec, FrameCodec, WireMessage};
use crate::error::StreamError;
use crate::frame::Frame;

type AckSink = FramedWrite<BoxedWriter, AckCodec>;

/// Consumer-side session: decodes frames and, with latency feedback on,
/// acknowledges each one.
///
/// The write half belongs to a background task fed through a bounded
/// channel, so neither [`receive`](Self::receive) nor
/// [`acknowledge`](Self::acknowledge) ever waits on the peer draining
/// its socket.
pub struct ReceiveSession {
    peer: String,
    frames: FramedRead<BoxedReader, FrameCodec>,
    /// `None` once closed.
    acks: Option<mpsc::Sender<f32>>,
    writer_task: Option<JoinHandle<()>>,
    /// Fired by the writer task when a write fails.
    write_failed: CancellationToken,
    /// Makes the writer task give up on a blocked write.
    abandon: CancellationToken,
    latency_feedback: bool,
    opened_at: Instant,
    last_activity: Instant,
    last_delay: Option<f32>,
    received: u64,
}

impl ReceiveSession {
    /// Must be called within a Tokio runtime.
    pub fn new<R, W>(peer: impl Into<String>, reader: R, writer: W, config: &SessionConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let peer = peer.into();
        let codec =
            FrameCodec::new(config.max_frame_bytes).with_latency_feedback(config.latency_feedback);
        let (acks, pending) = mpsc::channel(MAX_PENDING_ACKS);
        let write_failed = CancellationToken::new();
        let abandon = CancellationToken::new();
        let writer_task = tokio::spawn(write_acks(
            FramedWrite::new(Box::new(writer) as BoxedWriter, AckCodec),
            pending,
            write_failed.clone(),
            abandon.clone(),
            peer.clone(),
        ));

        let now = Instant::now();
        Self {
            peer,
            frames: FramedRead::new(Box::new(reader) as BoxedReader, codec),
            acks: Some(acks),
            writer_task: Some(writer_task),
            write_failed,
            abandon,
            latency_feedback: config.latency_feedback,
            opened_at: now,
            last_activity: now,
            last_delay: None,
            received: 0,
        }
    }

    /// Wait for the next complete frame.
    ///
    /// Delay values between frames are absorbed and exposed through
    /// [`last_delay`](Self::last_delay). Cancel-safe: a partially read
    /// frame stays buffered for the next call. Timestamps count seconds
    /// since the session opened. A failed acknowledgment write also ends
    /// the wait, with `ConnectionClosed`.
    pub async fn receive(&mut self) -> Result<Frame, StreamError> {
        if self.is_closed() {
            return Err(StreamError::ConnectionClosed);
        }
        loop {
            let next = tokio::select! {
                biased;
                _ = self.write_failed.cancelled() => return Err(StreamError::ConnectionClosed),
                next = self.frames.next() => next,
            };
            match next {
                Some(Ok(WireMessage::Frame(payload))) => {
                    let now = Instant::now();
                    self.last_activity = now;
                    self.received += 1;
                    trace!(peer = %self.peer, len = payload.len(), "frame received");
                    let timestamp = now.duration_since(self.opened_at).as_secs_f64();
                    return Ok(Frame::new(timestamp, payload));
                }
                Some(Ok(WireMessage::Delay(delay))) => {
                    self.last_activity = Instant::now();
                    self.last_delay = Some(delay);
                }
                Some(Err(e)) => return Err(e),
                None => return Err(StreamError::ConnectionClosed),
            }
        }
    }

    /// Queue an acknowledgment of the frame just received, declaring the
    /// local pacing interval. Never waits. A no-op without latency
    /// feedback.
    ///
    /// Fails with `Stalled` once the peer has left a full queue of
    /// acknowledgments unread.
    pub fn acknowledge(&mut self, pacing_interval: Duration) -> Result<(), StreamError> {
        if !self.latency_feedback {
            return Ok(());
        }
        let Some(acks) = &self.acks else {
            return Err(StreamError::ConnectionClosed);
        };
        match acks.try_send(pacing_interval.as_secs_f32()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(StreamError::Stalled {
                pending: MAX_PENDING_ACKS,
            }),
            Err(TrySendError::Closed(_)) => Err(StreamError::ConnectionClosed),
        }
    }

    /// Flush queued acknowledgments and shut down the write half.
    /// Idempotent.
    ///
    /// Waits at most a short grace period; a write half that does not
    /// finish by then is abandoned.
    pub async fn close(&mut self) {
        // Dropping the sender lets the writer task drain and shut down.
        if self.acks.take().is_none() {
            return;
        }
        let Some(mut task) = self.writer_task.take() else {
            return;
        };
        if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
            debug!(peer = %self.peer, "write half stalled; abandoning it");
            self.abandon.cancel();
            let _ = task.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.acks.is_none()
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// The producer's most recent delay estimate for this connection.
    pub fn last_delay(&self) -> Option<f32> {
        self.last_delay
    }

    pub fn frames_received(&self) -> u64 {
        self.received
    }
}

impl Drop for ReceiveSession {
    fn drop(&mut self) {
        self.abandon.cancel();
    }
}

impl std::fmt::Debug for ReceiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiveSession")
            .field("peer", &self.peer)
            .field("received", &self.received)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Write queued acknowledgments until the sender is dropped, then shut
/// the write half down. Stops at once when abandoned.
async fn write_acks(
    mut sink: AckSink,
    mut pending: mpsc::Receiver<f32>,
    write_failed: CancellationToken,
    abandon: CancellationToken,
    peer: String,
) {
    let written = tokio::select! {
        _ = abandon.cancelled() => return,
        written = async {
            while let Some(interval) = pending.recv().await {
                sink.send(interval).await?;
            }
            sink.close().await
        } => written,
    };
    if let Err(e) = written {
        debug!(peer = %peer, error = %e, "acknowledgment write failed");
        write_failed.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_frame;
    use crate::test_utils::StalledWriter;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn config(feedback: bool) -> SessionConfig {
        SessionConfig {
            max_frame_bytes: 1024,
            latency_feedback: feedback,
        }
    }

    fn session_over_mock(mock: tokio_test::io::Mock, feedback: bool) -> ReceiveSession {
        let (reader, writer) = tokio::io::split(mock);
        ReceiveSession::new("mock", reader, writer, &config(feedback))
    }

    #[tokio::test]
    async fn receives_frames_in_order() {
        let mock = tokio_test::io::Builder::new()
            .read(&encode_frame(b"first", 1024).unwrap())
            .read(&encode_frame(b"second", 1024).unwrap())
            .build();
        let mut session = session_over_mock(mock, false);

        assert_eq!(session.receive().await.unwrap().payload().as_ref(), b"first");
        assert_eq!(session.receive().await.unwrap().payload().as_ref(), b"second");
        assert_eq!(session.frames_received(), 2);
        assert!(matches!(
            session.receive().await,
            Err(StreamError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn delay_values_are_absorbed() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(local);
        let mut session = ReceiveSession::new("pipe", reader, writer, &config(true));

        let mut wire = encode_frame(b"frame", 1024).unwrap().to_vec();
        wire.extend_from_slice(&0.75f32.to_le_bytes());
        remote.write_all(&wire).await.unwrap();

        let frame = session.receive().await.unwrap();
        assert_eq!(frame.payload().as_ref(), b"frame");
        session.acknowledge(Duration::from_millis(50)).unwrap();

        let mut ack = [0u8; 4];
        remote.read_exact(&mut ack).await.unwrap();
        assert_eq!(f32::from_le_bytes(ack), 0.05);

        // The trailing delay is consumed on the next read.
        drop(remote);
        assert!(matches!(
            session.receive().await,
            Err(StreamError::ConnectionClosed)
        ));
        assert_eq!(session.last_delay(), Some(0.75));
    }

    #[tokio::test]
    async fn protocol_violation_surfaces() {
        let mock = tokio_test::io::Builder::new()
            .read(&0u32.to_le_bytes())
            .build();
        let mut session = session_over_mock(mock, false);
        assert!(matches!(
            session.receive().await,
            Err(StreamError::ProtocolViolation { length: 0, .. })
        ));
    }

    #[tokio::test]
    async fn acknowledge_without_feedback_writes_nothing() {
        let (local, mut remote) = tokio::io::duplex(64);
        let (reader, writer) = tokio::io::split(local);
        let mut session = ReceiveSession::new("pipe", reader, writer, &config(false));
        session.acknowledge(Duration::from_millis(33)).unwrap();
        session.close().await;
        session.close().await;
        assert!(session.is_closed());

        let mut rest = Vec::new();
        remote.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_peer_never_blocks_acknowledge_or_close() {
        let (local, _remote) = tokio::io::duplex(64);
        let (reader, _) = tokio::io::split(local);
        let mut session = ReceiveSession::new("stalled", reader, StalledWriter, &config(true));

        // The writer task holds one ack in a blocked write; the queue
        // takes the rest until it is full.
        let mut outcome = Ok(());
        for _ in 0..=MAX_PENDING_ACKS + 1 {
            outcome = session.acknowledge(Duration::from_millis(33));
            if outcome.is_err() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(matches!(outcome, Err(StreamError::Stalled { .. })));

        let started = Instant::now();
        session.close().await;
        assert!(session.is_closed());
        assert!(started.elapsed() <= CLOSE_GRACE + Duration::from_millis(10));
        assert!(matches!(
            session.acknowledge(Duration::from_millis(33)),
            Err(StreamError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn failed_ack_write_ends_receive() {
        // The read side stays open so only the write can end the session.
        let (local, _remote) = tokio::io::duplex(64);
        let (reader, _) = tokio::io::split(local);
        let writer = tokio_test::io::Builder::new()
            .write_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "reset"))
            .build();
        let mut session = ReceiveSession::new("pipe", reader, writer, &config(true));

        session.acknowledge(Duration::from_millis(33)).unwrap();
        let received = tokio::time::timeout(Duration::from_secs(1), session.receive()).await;
        assert!(matches!(received, Ok(Err(StreamError::ConnectionClosed))));
    }
}
