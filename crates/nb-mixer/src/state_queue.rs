//! Wholesale state publication
//!
//! The control thread edits a private shadow copy of the state and
//! publishes it whole; the fast thread polls and always sees the latest
//! complete snapshot. Three slots rotate through write/ready/read roles
//! held in one packed atomic, so neither side ever waits, and a burst of
//! publishes simply replaces the snapshot the fast thread has not picked
//! up yet. Slot overwrites (and the `Arc` drops they imply) happen on the
//! control thread only.

use std::cell::{Cell, UnsafeCell};
use std::marker::PhantomData;
use std::sync::Arc;

use portable_atomic::{AtomicU32, Ordering};

const WRITE_SHIFT: u32 = 0;
const READY_SHIFT: u32 = 2;
const READ_SHIFT: u32 = 4;
const INDEX_MASK: u32 = 0b11;
/// Set by `publish`, cleared by `poll`: "the ready slot is newer than
/// whatever the observer is holding".
const FRESH_BIT: u32 = 1 << 6;

struct QueueShared<T> {
    slots: [UnsafeCell<T>; 3],
    /// Bits 0-1 write slot, 2-3 ready slot, 4-5 read slot, bit 6 fresh.
    packed: AtomicU32,
}

// SAFETY: the mutator only dereferences the write slot and the observer
// only the read slot; the AcqRel CAS swaps below are the only way a slot
// changes role, so no slot is ever touched by both threads at once.
unsafe impl<T: Send> Send for QueueShared<T> {}
unsafe impl<T: Send> Sync for QueueShared<T> {}

/// Creates a connected mutator/observer pair seeded with `initial` in
/// every slot and in the mutator's shadow.
pub fn state_queue<T: Clone>(initial: T) -> (StateMutator<T>, StateObserver<T>) {
    let shared = Arc::new(QueueShared {
        slots: [
            UnsafeCell::new(initial.clone()),
            UnsafeCell::new(initial.clone()),
            UnsafeCell::new(initial.clone()),
        ],
        packed: AtomicU32::new(0 << WRITE_SHIFT | 1 << READY_SHIFT | 2 << READ_SHIFT),
    });
    (
        StateMutator {
            shared: Arc::clone(&shared),
            shadow: initial,
            _not_sync: PhantomData,
        },
        StateObserver {
            shared,
            _not_sync: PhantomData,
        },
    )
}

/// Control-thread end: owns the shadow copy and the write slot.
pub struct StateMutator<T: Clone> {
    shared: Arc<QueueShared<T>>,
    /// Private working copy; `publish` clones it out wholesale.
    shadow: T,
    _not_sync: PhantomData<Cell<()>>,
}

impl<T: Clone> StateMutator<T> {
    /// Read access to the shadow (what the next publish will contain).
    pub fn state(&self) -> &T {
        &self.shadow
    }

    /// Edit access to the shadow. Nothing is visible to the observer
    /// until `publish`.
    pub fn state_mut(&mut self) -> &mut T {
        &mut self.shadow
    }

    /// Clones the shadow into the write slot, then swaps that slot into
    /// the ready role with the fresh bit set.
    pub fn publish(&mut self) {
        let packed = self.shared.packed.load(Ordering::Acquire);
        let write = ((packed >> WRITE_SHIFT) & INDEX_MASK) as usize;
        // SAFETY: the write slot belongs to this mutator until the swap
        // below; the observer never changes the write bits.
        unsafe {
            *self.shared.slots[write].get() = self.shadow.clone();
        }

        loop {
            let packed = self.shared.packed.load(Ordering::Acquire);
            let write = (packed >> WRITE_SHIFT) & INDEX_MASK;
            let ready = (packed >> READY_SHIFT) & INDEX_MASK;
            let read = (packed >> READ_SHIFT) & INDEX_MASK;

            // Swap write and ready, mark fresh.
            let next =
                ready << WRITE_SHIFT | write << READY_SHIFT | read << READ_SHIFT | FRESH_BIT;

            if self
                .shared
                .packed
                .compare_exchange_weak(packed, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }
    }
}

/// Fast-thread end: borrows the read slot, never clones or blocks.
pub struct StateObserver<T> {
    shared: Arc<QueueShared<T>>,
    _not_sync: PhantomData<Cell<()>>,
}

impl<T> StateObserver<T> {
    /// Returns the latest complete snapshot: one CAS when something new
    /// was published since the last poll, plain loads otherwise.
    pub fn poll(&mut self) -> &T {
        if self.shared.packed.load(Ordering::Acquire) & FRESH_BIT != 0 {
            loop {
                let packed = self.shared.packed.load(Ordering::Acquire);
                let write = (packed >> WRITE_SHIFT) & INDEX_MASK;
                let ready = (packed >> READY_SHIFT) & INDEX_MASK;
                let read = (packed >> READ_SHIFT) & INDEX_MASK;

                // Swap ready and read, clear fresh.
                let next = write << WRITE_SHIFT | read << READY_SHIFT | ready << READ_SHIFT;

                if self
                    .shared
                    .packed
                    .compare_exchange_weak(packed, next, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    break;
                }
            }
        }

        let packed = self.shared.packed.load(Ordering::Acquire);
        let read = ((packed >> READ_SHIFT) & INDEX_MASK) as usize;
        // SAFETY: the read slot belongs to this observer until it swaps
        // it away in a later poll; the mutator never touches it.
        unsafe { &*self.shared.slots[read].get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_before_any_publish_sees_the_seed() {
        let (_mutator, mut observer) = state_queue(41u32);
        assert_eq!(*observer.poll(), 41);
        assert_eq!(*observer.poll(), 41);
    }

    #[test]
    fn test_publish_is_invisible_until_called() {
        let (mut mutator, mut observer) = state_queue(0u32);

        *mutator.state_mut() = 7;
        assert_eq!(*observer.poll(), 0, "shadow edits must not leak");

        mutator.publish();
        assert_eq!(*observer.poll(), 7);
    }

    #[test]
    fn test_burst_of_publishes_yields_latest() {
        let (mut mutator, mut observer) = state_queue(0u32);

        for value in 1..=100u32 {
            *mutator.state_mut() = value;
            mutator.publish();
        }
        // Intermediate snapshots were overwritten; only the newest counts.
        assert_eq!(*observer.poll(), 100);
    }

    #[test]
    fn test_repolling_without_new_publish_is_stable() {
        let (mut mutator, mut observer) = state_queue(String::from("a"));

        mutator.state_mut().push('b');
        mutator.publish();
        assert_eq!(observer.poll(), "ab");
        assert_eq!(observer.poll(), "ab");

        mutator.state_mut().push('c');
        mutator.publish();
        assert_eq!(observer.poll(), "abc");
    }

    #[test]
    fn test_shadow_survives_publishes() {
        let (mut mutator, _observer) = state_queue(vec![1u8, 2]);

        mutator.state_mut().push(3);
        mutator.publish();
        assert_eq!(mutator.state(), &[1, 2, 3]);

        mutator.state_mut().push(4);
        assert_eq!(mutator.state(), &[1, 2, 3, 4]);
    }
}
