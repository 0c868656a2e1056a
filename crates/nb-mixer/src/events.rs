//! Real-time event ring
//!
//! The fast thread never formats, locks, or logs on the hot path.
//! Instead it pushes compact events into an SPSC ring; the control side
//! drains them whenever convenient and turns them into log records.

use rtrb::{Consumer, Producer, RingBuffer};

use crate::thread_state::Command;

/// Compact, copyable notification out of the fast thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FastEvent {
    /// The thread observed a new command.
    StateChange { command: Command },
    /// Woke from a cold-idle park.
    ColdWake,
    /// Warmup finished after `cycles` cycles spanning `ns`.
    WarmupComplete { cycles: u32, ns: u64 },
    /// A track produced nothing this cycle.
    Underrun { slot: u8 },
    /// A track produced fewer frames than the period.
    ProviderShortRead {
        slot: u8,
        requested: usize,
        got: usize,
    },
    /// The sink accepted fewer frames than offered.
    SinkShortWrite { requested: usize, written: usize },
}

/// Creates a connected writer/reader pair over a ring of `capacity`.
pub fn event_ring(capacity: usize) -> (EventWriter, EventReader) {
    let (producer, consumer) = RingBuffer::new(capacity);
    (EventWriter { producer }, EventReader { consumer })
}

/// Fast-thread end.
pub struct EventWriter {
    producer: Producer<FastEvent>,
}

impl EventWriter {
    /// Non-blocking push; `false` means the ring was full and the event
    /// was dropped (callers count drops in the dump state).
    pub fn push(&mut self, event: FastEvent) -> bool {
        self.producer.push(event).is_ok()
    }
}

/// Control-thread end.
pub struct EventReader {
    consumer: Consumer<FastEvent>,
}

impl EventReader {
    pub fn pop(&mut self) -> Option<FastEvent> {
        self.consumer.pop().ok()
    }

    /// Drains everything currently queued, returning the count.
    pub fn drain<F: FnMut(FastEvent)>(&mut self, mut handler: F) -> usize {
        let mut drained = 0;
        while let Ok(event) = self.consumer.pop() {
            handler(event);
            drained += 1;
        }
        drained
    }

    /// Drains into `log` records at per-event levels.
    pub fn drain_to_log(&mut self) -> usize {
        self.drain(|event| match event {
            FastEvent::StateChange { command } => {
                log::debug!("fast mixer command -> {:?}", command)
            }
            FastEvent::ColdWake => log::debug!("fast mixer woke from cold idle"),
            FastEvent::WarmupComplete { cycles, ns } => {
                log::info!("fast mixer warm after {} cycles ({} ns)", cycles, ns)
            }
            FastEvent::Underrun { slot } => log::warn!("track {} underran", slot),
            FastEvent::ProviderShortRead {
                slot,
                requested,
                got,
            } => {
                log::debug!("track {} short read: {}/{} frames", slot, got, requested)
            }
            FastEvent::SinkShortWrite { requested, written } => {
                log::warn!("sink short write: {}/{} frames", written, requested)
            }
        })
    }
}
