//! Bytes-per-second figure for the producer's aggregate stats.
//!
//! The window is split into a fixed ring of time slots. Each slot sums
//! the bytes handed out during its span; slots are zeroed as time moves
//! past them, so memory stays constant however many frames go out.

use std::time::Duration;

use tokio::time::Instant;

/// Slots per window.
const SLOTS: usize = 10;

#[derive(Debug)]
pub struct ThroughputMeter {
    origin: Instant,
    slot_span: Duration,
    slots: [u64; SLOTS],
    /// Absolute number of the most recent slot seen.
    current: u64,
}

impl ThroughputMeter {
    /// One-second window.
    pub fn new() -> Self {
        Self::over(Duration::from_secs(1))
    }

    pub fn over(window: Duration) -> Self {
        Self {
            origin: Instant::now(),
            slot_span: (window / SLOTS as u32).max(Duration::from_millis(1)),
            slots: [0; SLOTS],
            current: 0,
        }
    }

    pub fn window(&self) -> Duration {
        self.slot_span * SLOTS as u32
    }

    pub fn add(&mut self, bytes: u64) {
        self.add_at(Instant::now(), bytes);
    }

    pub fn add_at(&mut self, at: Instant, bytes: u64) {
        let slot = self.advance(at);
        let cell = &mut self.slots[slot_index(slot)];
        *cell = cell.saturating_add(bytes);
    }

    /// Bytes per second over the window ending now.
    pub fn rate(&mut self) -> u64 {
        self.rate_at(Instant::now())
    }

    pub fn rate_at(&mut self, at: Instant) -> u64 {
        self.advance(at);
        let total: u64 = self.slots.iter().sum();
        (total as f64 / self.window().as_secs_f64()) as u64
    }

    pub fn reset(&mut self) {
        self.slots = [0; SLOTS];
    }

    /// Move the ring forward to `at`, zeroing the slots it passes over.
    /// Returns the slot `at` falls in; instants older than the window
    /// land in its oldest slot.
    fn advance(&mut self, at: Instant) -> u64 {
        let elapsed = at.saturating_duration_since(self.origin);
        let slot = (elapsed.as_nanos() / self.slot_span.as_nanos()) as u64;
        if slot > self.current {
            let passed = (slot - self.current).min(SLOTS as u64);
            for step in 1..=passed {
                self.slots[slot_index(self.current + step)] = 0;
            }
            self.current = slot;
        }
        slot.max(self.current.saturating_sub(SLOTS as u64 - 1))
    }
}

fn slot_index(slot: u64) -> usize {
    (slot % SLOTS as u64) as usize
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_meter_reads_zero() {
        let mut meter = ThroughputMeter::new();
        assert_eq!(meter.rate(), 0);
    }

    #[test]
    fn sums_everything_inside_the_window() {
        let mut meter = ThroughputMeter::over(Duration::from_secs(1));
        let t0 = Instant::now();
        meter.add_at(t0, 500);
        meter.add_at(t0 + Duration::from_millis(300), 500);
        assert_eq!(meter.rate_at(t0 + Duration::from_millis(500)), 1000);
    }

    #[test]
    fn old_slots_fall_out_one_by_one() {
        let mut meter = ThroughputMeter::over(Duration::from_secs(1));
        let t0 = Instant::now();
        meter.add_at(t0, 1000);
        meter.add_at(t0 + Duration::from_millis(900), 200);
        assert_eq!(meter.rate_at(t0 + Duration::from_millis(950)), 1200);
        assert_eq!(meter.rate_at(t0 + Duration::from_millis(1200)), 200);
        assert_eq!(meter.rate_at(t0 + Duration::from_secs(5)), 0);
    }

    #[test]
    fn window_scales_the_rate() {
        let mut meter = ThroughputMeter::over(Duration::from_secs(2));
        assert_eq!(meter.window(), Duration::from_secs(2));
        let t0 = Instant::now();
        meter.add_at(t0, 4000);
        assert_eq!(meter.rate_at(t0), 2000);
        meter.reset();
        assert_eq!(meter.rate_at(t0), 0);
    }
}
