//! Single-slot timestamp mailbox
//!
//! The pipe reader periodically publishes "position N was handed to the
//! output at time T" so the writer side can estimate playback latency.
//! The mailbox is a seqlock: one writer, any number of readers, no locks,
//! and a torn read is detected and retried instead of being returned.

use std::hint;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering, fence};
use std::time::{Duration, Instant};

/// A position/time pair published by the consumer side of a pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeTimestamp {
    /// Total frames consumed from the pipe when the timestamp was taken.
    pub position: u64,
    /// Monotonic time at which that position was current.
    pub time: Instant,
}

/// Seqlock-protected mailbox holding the most recent [`PipeTimestamp`].
///
/// The sequence word is even when the payload is stable and odd while a
/// publish is in flight. Zero means nothing has ever been published.
pub struct TimestampMailbox {
    sequence: AtomicU32,
    position: AtomicU64,
    time_ns: AtomicU64,
    /// Reference point for encoding `Instant` as nanoseconds.
    epoch: Instant,
}

impl TimestampMailbox {
    pub fn new() -> Self {
        Self {
            sequence: AtomicU32::new(0),
            position: AtomicU64::new(0),
            time_ns: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    /// Publishes a new timestamp. Single-writer: only the pipe's consumer
    /// thread may call this.
    pub fn publish(&self, position: u64, time: Instant) {
        let seq = self.sequence.load(Ordering::Relaxed);

        // Odd sequence opens the torn window before any payload store.
        self.sequence.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        self.position.store(position, Ordering::Relaxed);
        let ns = time.duration_since(self.epoch).as_nanos() as u64;
        self.time_ns.store(ns, Ordering::Relaxed);

        // Back to even; skip 0 on wraparound since 0 means "never published".
        let mut next = seq.wrapping_add(2);
        if next == 0 {
            next = 2;
        }
        self.sequence.store(next, Ordering::Release);
    }

    /// Returns the latest published timestamp, or `None` if nothing has
    /// been published yet. Retries while a publish is in flight.
    pub fn load(&self) -> Option<PipeTimestamp> {
        loop {
            let before = self.sequence.load(Ordering::Acquire);
            if before == 0 {
                return None;
            }
            if before & 1 == 1 {
                hint::spin_loop();
                continue;
            }

            let position = self.position.load(Ordering::Relaxed);
            let time_ns = self.time_ns.load(Ordering::Relaxed);

            fence(Ordering::Acquire);
            let after = self.sequence.load(Ordering::Relaxed);
            if before == after {
                return Some(PipeTimestamp {
                    position,
                    time: self.epoch + Duration::from_nanos(time_ns),
                });
            }
        }
    }
}

impl Default for TimestampMailbox {
    fn default() -> Self {
        Self::new()
    }
}
