//! Bounded frame queues.
//!
//! Neither type ever blocks on enqueue: a full queue resolves
//! immediately by discarding the incoming frame and counting it.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::frame::{DEFAULT_QUEUE_CAPACITY, Frame};

/// Result of offering a frame to a bounded queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The frame was retained.
    Accepted,
    /// The queue was full; the incoming frame was discarded.
    Dropped,
}

// ── FrameQueue ───────────────────────────────────────────────────

/// Fixed-capacity FIFO shared between a producer loop and a consumer
/// loop. Overflow policy: drop the incoming frame, keep what is
/// already buffered.
#[derive(Debug)]
pub struct FrameQueue {
    frames: Mutex<VecDeque<Frame>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl FrameQueue {
    /// Create a queue holding at most `capacity` frames (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn enqueue(&self, frame: Frame) -> EnqueueOutcome {
        let mut frames = self.lock();
        if frames.len() >= self.capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return EnqueueOutcome::Dropped;
        }
        frames.push_back(frame);
        EnqueueOutcome::Accepted
    }

    pub fn dequeue(&self) -> Option<Frame> {
        self.lock().pop_front()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Frame>> {
        // A poisoned queue still holds valid frames.
        self.frames.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

// ── NextFrameSlot ────────────────────────────────────────────────

/// Producer-side "pending next frame" cell.
///
/// The producer prepares a frame every tick and sends one every tick.
/// When the previous pending frame has not been taken yet, the new one
/// waits behind it instead of replacing it, so temporal order is kept.
/// The backlog shares the queue's capacity ceiling.
#[derive(Debug)]
pub struct NextFrameSlot {
    pending: Option<Frame>,
    backlog: FrameQueue,
    capacity: usize,
}

impl NextFrameSlot {
    /// `capacity` bounds the total number of frames held (slot + backlog).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            pending: None,
            backlog: FrameQueue::new(capacity),
            capacity,
        }
    }

    pub fn offer(&mut self, frame: Frame) -> EnqueueOutcome {
        if self.pending.is_none() && self.backlog.is_empty() {
            self.pending = Some(frame);
            return EnqueueOutcome::Accepted;
        }
        if self.len() >= self.capacity() {
            self.backlog.dropped.fetch_add(1, Ordering::Relaxed);
            return EnqueueOutcome::Dropped;
        }
        self.backlog.enqueue(frame)
    }

    /// Take the oldest held frame; the next one moves into the slot.
    pub fn take(&mut self) -> Option<Frame> {
        let frame = self.pending.take().or_else(|| self.backlog.dequeue());
        if frame.is_some() {
            self.pending = self.backlog.dequeue();
        }
        frame
    }

    pub fn clear(&mut self) {
        self.pending = None;
        self.backlog.clear();
    }

    pub fn len(&self) -> usize {
        usize::from(self.pending.is_some()) + self.backlog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped(&self) -> u64 {
        self.backlog.dropped()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn frame(n: u8) -> Frame {
        Frame::new(f64::from(n), vec![n])
    }

    #[test]
    fn fifo_order() {
        let queue = FrameQueue::new(5);
        for n in 0..3 {
            assert_eq!(queue.enqueue(frame(n)), EnqueueOutcome::Accepted);
        }
        assert_eq!(queue.dequeue().unwrap().payload()[0], 0);
        assert_eq!(queue.dequeue().unwrap().payload()[0], 1);
        assert_eq!(queue.dequeue().unwrap().payload()[0], 2);
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn full_queue_drops_incoming() {
        let queue = FrameQueue::new(5);
        for n in 0..5 {
            queue.enqueue(frame(n));
        }
        assert_eq!(queue.enqueue(frame(99)), EnqueueOutcome::Dropped);
        assert_eq!(queue.len(), 5);
        assert_eq!(queue.dropped(), 1);
        // The buffered frames survive; the newest one was discarded.
        let kept: Vec<u8> = std::iter::from_fn(|| queue.dequeue())
            .map(|f| f.payload()[0])
            .collect();
        assert_eq!(kept, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn clear_empties_but_keeps_drop_count() {
        let queue = FrameQueue::new(1);
        queue.enqueue(frame(1));
        queue.enqueue(frame(2));
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let queue = FrameQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        assert_eq!(queue.enqueue(frame(1)), EnqueueOutcome::Accepted);
    }

    #[test]
    fn slot_queues_behind_unconsumed_frame() {
        let mut slot = NextFrameSlot::new(5);
        slot.offer(frame(1));
        slot.offer(frame(2));
        assert_eq!(slot.len(), 2);
        assert_eq!(slot.take().unwrap().payload()[0], 1);
        assert_eq!(slot.take().unwrap().payload()[0], 2);
        assert!(slot.take().is_none());
    }

    #[test]
    fn slot_respects_capacity_ceiling() {
        let mut slot = NextFrameSlot::new(5);
        for n in 0..8 {
            slot.offer(frame(n));
        }
        assert_eq!(slot.len(), 5);
        assert_eq!(slot.dropped(), 3);
        let order: Vec<u8> = std::iter::from_fn(|| slot.take())
            .map(|f| f.payload()[0])
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn steady_state_offer_take_keeps_one_frame() {
        let mut slot = NextFrameSlot::new(5);
        for n in 0..20 {
            slot.offer(frame(n));
            assert_eq!(slot.take().unwrap().payload()[0], n);
            assert!(slot.is_empty());
        }
    }

    #[derive(Debug, Clone)]
    enum Op {
        Enqueue,
        Dequeue,
    }

    proptest! {
        #[test]
        fn count_never_exceeds_capacity(
            ops in proptest::collection::vec(
                prop_oneof![Just(Op::Enqueue), Just(Op::Dequeue)],
                0..200,
            )
        ) {
            let queue = FrameQueue::new(5);
            let mut slot = NextFrameSlot::new(5);
            for (i, op) in ops.iter().enumerate() {
                match op {
                    Op::Enqueue => {
                        queue.enqueue(frame(i as u8));
                        slot.offer(frame(i as u8));
                    }
                    Op::Dequeue => {
                        queue.dequeue();
                        slot.take();
                    }
                }
                prop_assert!(queue.len() <= 5);
                prop_assert!(slot.len() <= 5);
            }
        }
    }
}
