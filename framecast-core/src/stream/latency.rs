//! Rolling round-trip delay estimator.
//!
//! Keeps the last [`LATENCY_WINDOW`] round-trip samples and reports
//! their mean net of the consumer's declared pacing interval, so what
//! remains is queueing and network delay.

use std::collections::VecDeque;
use std::time::Duration;

/// Number of samples kept in the window.
pub const LATENCY_WINDOW: usize = 10;

/// Upper bound of a reported estimate, in seconds.
pub const MAX_REPORTED_DELAY: f64 = 10.0;

/// Ring buffer of round-trip samples, oldest evicted first.
#[derive(Debug, Clone)]
pub struct LatencyEstimator {
    samples: VecDeque<f64>,
}

impl LatencyEstimator {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(LATENCY_WINDOW),
        }
    }

    /// Record one round trip, in seconds.
    pub fn observe(&mut self, round_trip_secs: f64) {
        if !round_trip_secs.is_finite() {
            return;
        }
        if self.samples.len() == LATENCY_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(round_trip_secs);
    }

    pub fn observe_duration(&mut self, round_trip: Duration) {
        self.observe(round_trip.as_secs_f64());
    }

    /// Mean of the window, or `0` when empty.
    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    /// Window mean (rounded to 4 decimals) minus `local_send_interval`,
    /// clamped to `[0, MAX_REPORTED_DELAY]`.
    pub fn current_estimate(&self, local_send_interval: f64) -> f64 {
        let mean = (self.mean() * 10_000.0).round() / 10_000.0;
        let net = mean - local_send_interval;
        if net.is_nan() {
            return 0.0;
        }
        net.clamp(0.0, MAX_REPORTED_DELAY)
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl Default for LatencyEstimator {
    fn default() -> Self {
        Self::new()
    }
}
