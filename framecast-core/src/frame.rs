use bytes::Bytes;

/// Default ceiling for a single frame payload: 10 MiB.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

/// Default capacity for frame queues on both ends of the pipe.
pub const DEFAULT_QUEUE_CAPACITY: usize = 5;

/// One timestamped unit of encoded payload.
///
/// The payload is opaque (typically a JPEG or PNG image) and shared by
/// reference count, so fanning a frame out to many sessions never copies
/// the bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    timestamp: f64,
    payload: Bytes,
}

impl Frame {
    pub fn new(timestamp: f64, payload: impl Into<Bytes>) -> Self {
        Self {
            timestamp,
            payload: payload.into(),
        }
    }

    /// Seconds since the stream (producer) or session (consumer) began.
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}
