//! Stock providers and sinks
//!
//! Small in-tree implementations of the capability traits: a shared
//! volume handle the control thread can turn while the mixer reads it, a
//! closure-backed provider, and two sinks (discard-and-count, capture)
//! that stand in for a hardware output in tests and benches.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use portable_atomic::AtomicF32;

use nb_core::{FrameFormat, NbError, NbResult, SampleFormat};

use crate::traits::{AudioBufferProvider, Sink, VolumeProvider};

/// Lock-free stereo gain pair.
///
/// The control thread calls [`set`](Self::set) at any time; the fast
/// thread samples [`volume`](VolumeProvider::volume) once per cycle. The
/// two channels are independent atomics, so a reader racing a `set` may
/// pair the new left with the old right for one cycle, which is
/// inaudible and acceptable.
pub struct SharedVolume {
    left: AtomicF32,
    right: AtomicF32,
}

impl SharedVolume {
    pub fn new(left: f32, right: f32) -> Self {
        Self {
            left: AtomicF32::new(left),
            right: AtomicF32::new(right),
        }
    }

    /// Unity gain on both channels.
    pub fn unity() -> Self {
        Self::new(1.0, 1.0)
    }

    pub fn set(&self, left: f32, right: f32) {
        self.left.store(left, Ordering::Relaxed);
        self.right.store(right, Ordering::Relaxed);
    }

    pub fn get(&self) -> (f32, f32) {
        (
            self.left.load(Ordering::Relaxed),
            self.right.load(Ordering::Relaxed),
        )
    }
}

impl VolumeProvider for SharedVolume {
    fn volume(&self) -> (f32, f32) {
        self.get()
    }
}

/// Adapts a closure into an [`AudioBufferProvider`].
///
/// The closure fills the slice and returns how many frames it produced;
/// stateful generators keep their cursor in atomics since the trait call
/// takes `&self`.
pub struct FnProvider<F>
where
    F: Fn(&mut [f32]) -> usize + Send + Sync,
{
    fill_fn: F,
}

impl<F> FnProvider<F>
where
    F: Fn(&mut [f32]) -> usize + Send + Sync,
{
    pub fn new(fill_fn: F) -> Self {
        Self { fill_fn }
    }
}

impl<F> AudioBufferProvider for FnProvider<F>
where
    F: Fn(&mut [f32]) -> usize + Send + Sync,
{
    fn next_frames(&self, out: &mut [f32]) -> usize {
        (self.fill_fn)(out)
    }
}

/// Sink that discards frames and counts them.
pub struct NullSink {
    format: FrameFormat,
    frame_count: usize,
    frames_written: AtomicU64,
}

impl NullSink {
    pub fn new(format: FrameFormat, frame_count: usize) -> Self {
        Self {
            format,
            frame_count,
            frames_written: AtomicU64::new(0),
        }
    }

    /// Total frames accepted over the sink's lifetime.
    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }
}

impl Sink for NullSink {
    fn format(&self) -> FrameFormat {
        self.format
    }

    fn frame_count(&self) -> usize {
        self.frame_count
    }

    fn write(&self, data: &[u8]) -> NbResult<usize> {
        let frame_size = self.format.frame_size();
        if data.len() % frame_size != 0 {
            return Err(NbError::InvalidFormat(
                "buffer length must be a whole number of frames",
            ));
        }
        let frames = data.len() / frame_size;
        self.frames_written.fetch_add(frames as u64, Ordering::Relaxed);
        Ok(frames)
    }
}

/// Fixed-capacity sink that records every f32 sample it accepts.
///
/// Once the capture region is full, writes turn short (and eventually
/// zero-length), which is exactly the behavior needed to exercise a
/// mixer's short-write accounting. The write cursor is owned by the
/// single writing thread; any thread may snapshot what was captured.
pub struct CaptureSink {
    format: FrameFormat,
    frame_count: usize,
    storage: Box<[UnsafeCell<f32>]>,
    capacity_frames: usize,
    written_frames: AtomicUsize,
}

// SAFETY: Sink::write is single-writer by contract, so samples below the
// cursor are never written twice; `captured` only reads samples at
// indexes below an acquire-loaded cursor, which the release store in
// `write` ordered after the copies.
unsafe impl Send for CaptureSink {}
unsafe impl Sync for CaptureSink {}

impl CaptureSink {
    /// Capture region of `capacity_frames` frames; the format must carry
    /// f32 samples.
    pub fn new(format: FrameFormat, frame_count: usize, capacity_frames: usize) -> NbResult<Self> {
        if format.sample_format != SampleFormat::F32 {
            return Err(NbError::InvalidFormat("capture sink requires f32 frames"));
        }
        let samples = capacity_frames * format.channels as usize;
        let storage: Box<[UnsafeCell<f32>]> = (0..samples).map(|_| UnsafeCell::new(0.0)).collect();
        Ok(Self {
            format,
            frame_count,
            storage,
            capacity_frames,
            written_frames: AtomicUsize::new(0),
        })
    }

    /// Frames accepted so far.
    pub fn captured_frames(&self) -> usize {
        self.written_frames.load(Ordering::Acquire)
    }

    pub fn is_full(&self) -> bool {
        self.captured_frames() == self.capacity_frames
    }

    /// Copy of every captured sample, interleaved.
    pub fn captured(&self) -> Vec<f32> {
        let frames = self.written_frames.load(Ordering::Acquire);
        let samples = frames * self.format.channels as usize;
        let mut out = Vec::with_capacity(samples);
        for cell in &self.storage[..samples] {
            // SAFETY: indexes below the acquired cursor are final.
            out.push(unsafe { *cell.get() });
        }
        out
    }

    /// Rewinds the capture cursor. Only valid while no writer is active
    /// (e.g. between mixer runs in a test).
    pub fn clear(&self) {
        self.written_frames.store(0, Ordering::Release);
    }
}

impl Sink for CaptureSink {
    fn format(&self) -> FrameFormat {
        self.format
    }

    fn frame_count(&self) -> usize {
        self.frame_count
    }

    fn write(&self, data: &[u8]) -> NbResult<usize> {
        let frame_size = self.format.frame_size();
        if data.len() % frame_size != 0 {
            return Err(NbError::InvalidFormat(
                "buffer length must be a whole number of frames",
            ));
        }
        let samples: &[f32] = bytemuck::try_cast_slice(data)
            .map_err(|_| NbError::InvalidFormat("capture sink requires f32-aligned frames"))?;

        let written = self.written_frames.load(Ordering::Relaxed);
        let free = self.capacity_frames - written;
        let accept = (data.len() / frame_size).min(free);
        if accept == 0 {
            return Ok(0);
        }

        let channels = self.format.channels as usize;
        // SAFETY: single writer; the target samples sit at or above the
        // cursor so no reader trusts them until the release store below.
        unsafe {
            let base = self.storage.as_ptr() as *mut f32;
            ptr::copy_nonoverlapping(
                samples.as_ptr(),
                base.add(written * channels),
                accept * channels,
            );
        }
        self.written_frames
            .store(written + accept, Ordering::Release);
        Ok(accept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_volume_set_and_sample() {
        let volume = SharedVolume::unity();
        assert_eq!(volume.volume(), (1.0, 1.0));

        volume.set(0.5, 0.25);
        assert_eq!(volume.get(), (0.5, 0.25));
        assert_eq!(volume.volume(), (0.5, 0.25));
    }

    #[test]
    fn test_fn_provider_forwards_to_closure() {
        let provider = FnProvider::new(|out: &mut [f32]| {
            out.fill(0.75);
            out.len()
        });

        let mut buf = [0f32; 8];
        assert_eq!(provider.next_frames(&mut buf), 8);
        assert!(buf.iter().all(|&s| s == 0.75));
    }

    #[test]
    fn test_null_sink_counts_frames() {
        let sink = NullSink::new(FrameFormat::stereo_f32_48k(), 128);
        assert_eq!(sink.frame_count(), 128);
        assert_eq!(sink.sample_rate(), 48_000);

        assert_eq!(sink.write(&[0u8; 16 * 8]), Ok(16));
        assert_eq!(sink.write(&[0u8; 4 * 8]), Ok(4));
        assert_eq!(sink.frames_written(), 20);

        assert!(matches!(
            sink.write(&[0u8; 12]),
            Err(NbError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_capture_sink_records_then_shortens() {
        let sink = CaptureSink::new(FrameFormat::stereo_f32_48k(), 4, 6).unwrap();

        let first: Vec<f32> = (0..8).map(|i| i as f32).collect(); // 4 frames
        assert_eq!(sink.write(bytemuck::cast_slice(&first)), Ok(4));
        assert_eq!(sink.captured_frames(), 4);
        assert!(!sink.is_full());

        // Only 2 of 4 frames fit; the rest are dropped.
        let second = vec![9.0f32; 8];
        assert_eq!(sink.write(bytemuck::cast_slice(&second)), Ok(2));
        assert!(sink.is_full());
        assert_eq!(sink.write(bytemuck::cast_slice(&second)), Ok(0));

        let captured = sink.captured();
        assert_eq!(&captured[..8], &first[..]);
        assert_eq!(&captured[8..], &[9.0; 4]);

        sink.clear();
        assert_eq!(sink.captured_frames(), 0);
    }

    #[test]
    fn test_capture_sink_rejects_integer_formats() {
        let i16_format = FrameFormat::new(48_000, 2, SampleFormat::I16).unwrap();
        assert!(CaptureSink::new(i16_format, 4, 16).is_err());
    }
}
