//! Shared frame ring backing a pipe
//!
//! One contiguous byte region sized `max_frames * frame_size`, with
//! monotonically increasing frame cursors. The writer owns `rear`, the
//! reader owns `front`; each side stores its own cursor with release
//! semantics after touching the bytes, and loads the other side's cursor
//! with acquire semantics before trusting them.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use nb_core::FrameFormat;

use crate::mailbox::TimestampMailbox;

/// State shared between the writer and reader endpoints of one pipe.
///
/// Cursors count frames, not bytes, and wrap modulo `usize`; the byte
/// index is `(cursor & mask) * frame_size`, which is why capacity is
/// rounded up to a power of two.
#[repr(align(64))]
pub(crate) struct PipeShared {
    /// Interleaved frame storage, `max_frames * frame_size` bytes.
    storage: Box<[UnsafeCell<u8>]>,
    /// Capacity in frames (power of 2, at least 2).
    max_frames: usize,
    /// `max_frames - 1`, for cheap cursor-to-index reduction.
    mask: usize,
    format: FrameFormat,
    frame_size: usize,
    /// Total frames ever written (writer-owned).
    rear: AtomicUsize,
    /// Total frames ever read (reader-owned).
    front: AtomicUsize,
    /// Fill level the writer's pacing steers toward.
    setpoint: AtomicUsize,
    shutdown: AtomicBool,
    /// Latest consumer-side timestamp, polled by the writer.
    pub(crate) timestamp: TimestampMailbox,
}

// SAFETY: the writer thread only writes bytes in [rear, rear + space) and
// the reader thread only reads bytes in [front, rear), so the two sides
// never touch the same frame concurrently. The release store of each
// cursor happens after the byte copies it covers, and the opposite side
// acquires that cursor before reading those bytes.
unsafe impl Send for PipeShared {}
unsafe impl Sync for PipeShared {}

impl PipeShared {
    /// Allocates a ring for at least `min_frames` frames of `format`.
    pub(crate) fn new(min_frames: usize, format: FrameFormat) -> Self {
        let max_frames = min_frames.max(2).next_power_of_two();
        let frame_size = format.frame_size();
        let storage: Box<[UnsafeCell<u8>]> = (0..max_frames * frame_size)
            .map(|_| UnsafeCell::new(0))
            .collect();

        Self {
            storage,
            max_frames,
            mask: max_frames - 1,
            format,
            frame_size,
            rear: AtomicUsize::new(0),
            front: AtomicUsize::new(0),
            setpoint: AtomicUsize::new((max_frames * 11) / 16),
            shutdown: AtomicBool::new(false),
            timestamp: TimestampMailbox::new(),
        }
    }

    #[inline]
    pub(crate) fn max_frames(&self) -> usize {
        self.max_frames
    }

    #[inline]
    pub(crate) fn frame_size(&self) -> usize {
        self.frame_size
    }

    #[inline]
    pub(crate) fn format(&self) -> FrameFormat {
        self.format
    }

    /// Frames the writer may push right now.
    #[inline]
    pub(crate) fn writer_space(&self) -> usize {
        let rear = self.rear.load(Ordering::Relaxed);
        let front = self.front.load(Ordering::Acquire);
        self.max_frames - rear.wrapping_sub(front)
    }

    /// Frames the reader may pop right now.
    #[inline]
    pub(crate) fn reader_level(&self) -> usize {
        let rear = self.rear.load(Ordering::Acquire);
        let front = self.front.load(Ordering::Relaxed);
        rear.wrapping_sub(front)
    }

    /// Copies `src` (whole frames, at most `writer_space()`) into the ring
    /// and publishes the new rear cursor. Writer side only.
    pub(crate) fn push_frames(&self, src: &[u8]) {
        let frames = src.len() / self.frame_size;
        debug_assert_eq!(src.len(), frames * self.frame_size);
        debug_assert!(frames <= self.writer_space());
        if frames == 0 {
            return;
        }

        let rear = self.rear.load(Ordering::Relaxed);
        let index = (rear & self.mask) * self.frame_size;
        let first = ((self.max_frames - (rear & self.mask)) * self.frame_size).min(src.len());

        // SAFETY: we are the only writer, the target frames are unoccupied
        // until the rear cursor below publishes them, and both segments
        // stay inside the storage allocation.
        unsafe {
            let base = self.storage.as_ptr() as *mut u8;
            ptr::copy_nonoverlapping(src.as_ptr(), base.add(index), first);
            if first < src.len() {
                ptr::copy_nonoverlapping(src.as_ptr().add(first), base, src.len() - first);
            }
        }

        self.rear.store(rear.wrapping_add(frames), Ordering::Release);
    }

    /// Copies whole frames (at most `reader_level()`) out of the ring into
    /// `dst` and publishes the new front cursor. Reader side only.
    pub(crate) fn pop_frames(&self, dst: &mut [u8]) {
        let frames = dst.len() / self.frame_size;
        debug_assert_eq!(dst.len(), frames * self.frame_size);
        debug_assert!(frames <= self.reader_level());
        if frames == 0 {
            return;
        }

        let front = self.front.load(Ordering::Relaxed);
        let index = (front & self.mask) * self.frame_size;
        let first = ((self.max_frames - (front & self.mask)) * self.frame_size).min(dst.len());

        // SAFETY: we are the only reader, the source frames were published
        // by an acquire-paired rear store, and both segments stay inside
        // the storage allocation.
        unsafe {
            let base = self.storage.as_ptr() as *const u8;
            ptr::copy_nonoverlapping(base.add(index), dst.as_mut_ptr(), first);
            if first < dst.len() {
                ptr::copy_nonoverlapping(base, dst.as_mut_ptr().add(first), dst.len() - first);
            }
        }

        self.front.store(front.wrapping_add(frames), Ordering::Release);
    }

    #[inline]
    pub(crate) fn setpoint(&self) -> usize {
        self.setpoint.load(Ordering::Relaxed)
    }

    /// Clamps to [1, max_frames] so pacing always has a usable target.
    pub(crate) fn set_setpoint(&self, frames: usize) {
        let clamped = frames.clamp(1, self.max_frames);
        self.setpoint.store(clamped, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn set_shutdown(&self, shut: bool) {
        self.shutdown.store(shut, Ordering::Release);
    }
}
