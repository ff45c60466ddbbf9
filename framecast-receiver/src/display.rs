//! Frame sink: takes received frames off the queue at the display rate.
//!
//! The payloads are opaque encoded images; the sink does not decode
//! them. It optionally persists the latest one to disk so another
//! process can pick it up, and publishes display statistics.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use framecast_core::{Frame, FrameQueue};

use crate::config::OutputConfig;

/// Intervals kept for the displayed-fps average.
const FPS_WINDOW: usize = 60;

// ── DisplayStats ─────────────────────────────────────────────────

/// Display statistics exposed to the rest of the process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayStats {
    /// Smoothed displayed frames per second.
    pub fps: f64,
    /// Frames displayed since start.
    pub frames_displayed: u64,
    /// Payload bytes displayed since start.
    pub bytes_displayed: u64,
    /// Producer timestamp of the last displayed frame.
    pub last_timestamp: Option<f64>,
    /// Failed writes to the output file.
    pub write_errors: u64,
}

// ── FrameSink ────────────────────────────────────────────────────

pub struct FrameSink {
    output: Option<PathBuf>,
    intervals: VecDeque<Duration>,
    last_shown: Option<Instant>,
    stats_tx: watch::Sender<DisplayStats>,
}

impl FrameSink {
    /// A sink that writes every displayed payload to `output`, if set.
    pub fn new(output: Option<PathBuf>) -> Self {
        let (stats_tx, _) = watch::channel(DisplayStats::default());
        Self {
            output,
            intervals: VecDeque::with_capacity(FPS_WINDOW),
            last_shown: None,
            stats_tx,
        }
    }

    pub fn from_config(config: &OutputConfig) -> Self {
        Self::new(config.enabled.then(|| config.path.clone()))
    }

    pub fn output(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    pub fn stats(&self) -> DisplayStats {
        self.stats_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DisplayStats> {
        self.stats_tx.subscribe()
    }

    /// Display the oldest queued frame, if any. Returns whether one was
    /// shown.
    pub async fn display_next(&mut self, queue: &FrameQueue) -> bool {
        match queue.dequeue() {
            Some(frame) => {
                self.show(&frame).await;
                true
            }
            None => false,
        }
    }

    /// Record `frame` as displayed and persist it if configured.
    ///
    /// A failed write is counted and logged; it never stops the sink.
    pub async fn show(&mut self, frame: &Frame) {
        let written = match &self.output {
            Some(path) => match write_replacing(path, frame.payload()).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cannot write frame");
                    false
                }
            },
            None => true,
        };
        self.record(frame, Instant::now(), written);
    }

    fn record(&mut self, frame: &Frame, now: Instant, written: bool) {
        if let Some(previous) = self.last_shown.replace(now) {
            if self.intervals.len() == FPS_WINDOW {
                self.intervals.pop_front();
            }
            self.intervals.push_back(now.duration_since(previous));
        }
        let fps = mean_rate(&self.intervals);

        self.stats_tx.send_modify(|stats| {
            stats.fps = fps;
            stats.frames_displayed += 1;
            stats.bytes_displayed += frame.len() as u64;
            stats.last_timestamp = Some(frame.timestamp());
            if !written {
                stats.write_errors += 1;
            }
        });
    }
}

fn mean_rate(intervals: &VecDeque<Duration>) -> f64 {
    if intervals.is_empty() {
        return 0.0;
    }
    let avg_secs =
        intervals.iter().map(Duration::as_secs_f64).sum::<f64>() / intervals.len() as f64;
    if avg_secs > 0.0 { 1.0 / avg_secs } else { 0.0 }
}

/// Write to a sibling file, then rename over `path`, so readers never
/// see a partial frame.
async fn write_replacing(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut partial = OsString::from(path.as_os_str());
    partial.push(".partial");
    let partial = PathBuf::from(partial);
    tokio::fs::write(&partial, bytes).await?;
    tokio::fs::rename(&partial, path).await
}

// ── Tests ────────────────────────────────────────────────────────
