//! Producer pacing loop.
//!
//! Once per tick the [`Streamer`] captures a frame from its
//! [`FrameSource`], offers it to a [`NextFrameSlot`], takes the oldest
//! pending frame and fans it out through a [`BroadcastGroup`].

use std::time::Duration;

use bytes::Bytes;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StreamError;
use crate::frame::{DEFAULT_QUEUE_CAPACITY, Frame};
use crate::network::BroadcastGroup;
use crate::queue::{EnqueueOutcome, NextFrameSlot};
use crate::stream::source::FrameSource;

/// Configuration for [`Streamer`].
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    /// Target frames per second.
    pub fps: u32,
    /// Frames held between capture and broadcast.
    pub queue_capacity: usize,
    /// Broadcast `placeholder` for this long after start while real
    /// frames buffer up.
    pub start_delay: Duration,
    /// Payload sent during the start delay. Nothing is sent when `None`.
    pub placeholder: Option<Bytes>,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            start_delay: Duration::ZERO,
            placeholder: None,
        }
    }
}

impl StreamerConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps.max(1)))
    }
}

/// Counters returned when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub frames_captured: u64,
    pub frames_broadcast: u64,
    /// Frames discarded because the slot was full.
    pub frames_dropped: u64,
    pub placeholders_sent: u64,
    pub capture_errors: u64,
    /// Frames the group refused for their length.
    pub frames_rejected: u64,
}

pub struct Streamer<S: FrameSource> {
    source: S,
    config: StreamerConfig,
    slot: NextFrameSlot,
}

impl<S: FrameSource> Streamer<S> {
    pub fn new(source: S, config: StreamerConfig) -> Self {
        let slot = NextFrameSlot::new(config.queue_capacity);
        Self {
            source,
            config,
            slot,
        }
    }

    pub fn config(&self) -> &StreamerConfig {
        &self.config
    }

    /// Run until `cancel` fires.
    ///
    /// A failed capture is logged and the tick skipped; the loop keeps
    /// going. Frame timestamps count seconds since the loop started.
    pub async fn run(
        &mut self,
        group: &BroadcastGroup,
        cancel: CancellationToken,
    ) -> Result<StreamSummary, StreamError> {
        if self.config.fps == 0 {
            return Err(StreamError::InvalidConfig("fps must be at least 1"));
        }
        let max_frame_bytes = group.session_config().max_frame_bytes;
        if let Some(placeholder) = &self.config.placeholder {
            if placeholder.len() > max_frame_bytes {
                return Err(StreamError::InvalidConfig(
                    "placeholder exceeds the frame length limit",
                ));
            }
        }

        let interval = self.config.frame_interval();
        let started = Instant::now();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut summary = StreamSummary::default();

        info!(
            fps = self.config.fps,
            start_delay = ?self.config.start_delay,
            "streaming started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let elapsed = started.elapsed();
            let timestamp = elapsed.as_secs_f64();

            match self.source.capture() {
                Ok(Some(payload)) if !payload.is_empty() => {
                    summary.frames_captured += 1;
                    if self.slot.offer(Frame::new(timestamp, payload)) == EnqueueOutcome::Dropped {
                        summary.frames_dropped += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    summary.capture_errors += 1;
                    warn!(error = %e, "frame capture failed");
                }
            }

            if elapsed < self.config.start_delay {
                if let Some(placeholder) = &self.config.placeholder {
                    group.broadcast(&Frame::new(timestamp, placeholder.clone()));
                    summary.placeholders_sent += 1;
                }
                continue;
            }

            if let Some(frame) = self.slot.take() {
                let report = group.broadcast(&frame);
                if report.rejected {
                    summary.frames_rejected += 1;
                    continue;
                }
                summary.frames_broadcast += 1;
                debug!(
                    timestamp = frame.timestamp(),
                    accepted = report.accepted,
                    skipped = report.skipped,
                    "frame broadcast"
                );
            }
        }

        self.slot.clear();
        info!(
            captured = summary.frames_captured,
            broadcast = summary.frames_broadcast,
            dropped = summary.frames_dropped,
            rejected = summary.frames_rejected,
            "streaming stopped"
        );
        Ok(summary)
    }
}
