//! Wire framing for the frame stream.
//!
//! ```text
//! producer → consumer:  [len: u32 LE][payload: len bytes]([delay: f32 LE])
//! consumer → producer:  [interval: f32 LE]
//! ```
//!
//! The trailing delay value and the acknowledgments only exist when
//! latency feedback is enabled, and both ends must agree on it. The
//! length is validated before any byte is consumed; an out-of-range
//! length is a protocol violation and the stream is not resynchronised.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::StreamError;
use crate::frame::DEFAULT_MAX_FRAME_BYTES;

/// Size of the frame length header.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Size of a delay value or acknowledgment.
pub const CONTROL_VALUE_SIZE: usize = 4;

/// One message on the producer → consumer stream.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    /// An encoded frame payload.
    Frame(Bytes),
    /// The sending session's current delay estimate, in seconds.
    Delay(f32),
}

// ── FrameCodec ───────────────────────────────────────────────────

/// Codec for the producer → consumer direction.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_bytes: usize,
    latency_feedback: bool,
    /// Decoder only: a delay value follows the frame just decoded.
    expect_delay: bool,
}

impl FrameCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes: max_frame_bytes.min(u32::MAX as usize),
            latency_feedback: false,
            expect_delay: false,
        }
    }

    /// Expect (decoder) a delay value after every frame.
    pub fn with_latency_feedback(mut self, enabled: bool) -> Self {
        self.latency_feedback = enabled;
        self
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    fn check_length(&self, length: u64) -> Result<usize, StreamError> {
        if length == 0 || length > self.max_frame_bytes as u64 {
            return Err(StreamError::ProtocolViolation {
                length,
                max: self.max_frame_bytes,
            });
        }
        Ok(length as usize)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl Decoder for FrameCodec {
    type Item = WireMessage;
    type Error = StreamError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.expect_delay {
            if src.len() < CONTROL_VALUE_SIZE {
                return Ok(None);
            }
            self.expect_delay = false;
            return Ok(Some(WireMessage::Delay(src.get_f32_le())));
        }

        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let mut header = [0u8; LENGTH_PREFIX_SIZE];
        header.copy_from_slice(&src[..LENGTH_PREFIX_SIZE]);
        let length = self.check_length(u64::from(u32::from_le_bytes(header)))?;

        let total = LENGTH_PREFIX_SIZE + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        let payload = src.split_to(length).freeze();
        self.expect_delay = self.latency_feedback;
        Ok(Some(WireMessage::Frame(payload)))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(message) => Ok(Some(message)),
            None if buf.is_empty() => Ok(None),
            // The peer went away in the middle of a message.
            None => Err(StreamError::ConnectionClosed),
        }
    }
}

impl Encoder<WireMessage> for FrameCodec {
    type Error = StreamError;

    fn encode(&mut self, item: WireMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            WireMessage::Frame(payload) => {
                let length = self.check_length(payload.len() as u64)?;
                dst.reserve(LENGTH_PREFIX_SIZE + length);
                dst.put_u32_le(length as u32);
                dst.extend_from_slice(&payload);
            }
            WireMessage::Delay(seconds) => {
                dst.reserve(CONTROL_VALUE_SIZE);
                dst.put_f32_le(seconds);
            }
        }
        Ok(())
    }
}

// ── AckCodec ─────────────────────────────────────────────────────

/// Codec for the consumer → producer acknowledgments: one `f32` per
/// received frame, carrying the consumer's declared pacing interval.
#[derive(Debug, Clone, Copy, Default)]
pub struct AckCodec;

impl Decoder for AckCodec {
    type Item = f32;
    type Error = StreamError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < CONTROL_VALUE_SIZE {
            return Ok(None);
        }
        Ok(Some(src.get_f32_le()))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(value) => Ok(Some(value)),
            None if buf.is_empty() => Ok(None),
            None => Err(StreamError::ConnectionClosed),
        }
    }
}

impl Encoder<f32> for AckCodec {
    type Error = StreamError;

    fn encode(&mut self, item: f32, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(CONTROL_VALUE_SIZE);
        dst.put_f32_le(item);
        Ok(())
    }
}

/// Encode a single frame (header + payload) into a fresh buffer.
pub fn encode_frame(payload: &[u8], max_frame_bytes: usize) -> Result<BytesMut, StreamError> {
    let mut dst = BytesMut::new();
    FrameCodec::new(max_frame_bytes)
        .encode(WireMessage::Frame(Bytes::copy_from_slice(payload)), &mut dst)?;
    Ok(dst)
}
