//! Reader endpoint of a mono pipe
//!
//! `MonoPipeReader` is the wait-free consumer half: `read()` takes what is
//! there and returns, never sleeping, so it can sit directly on the audio
//! fast path. [`PipeSource`] adapts a reader to the mixer's pull
//! interface and publishes consumption timestamps as a side effect.

use std::cell::{Cell, UnsafeCell};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use nb_core::{FrameFormat, NbError, NbResult, SampleFormat};

use crate::ring::PipeShared;
use crate::traits::AudioBufferProvider;

/// Consumer half of the pipe. Owned by one thread at a time (`Send` but
/// not `Sync`), which is also what keeps the timestamp mailbox
/// single-writer.
pub struct MonoPipeReader {
    shared: Arc<PipeShared>,
    frames_read: u64,
    _not_sync: PhantomData<Cell<()>>,
}

impl MonoPipeReader {
    pub(crate) fn new(shared: Arc<PipeShared>) -> Self {
        Self {
            shared,
            frames_read: 0,
            _not_sync: PhantomData,
        }
    }

    /// Frames immediately available to read.
    #[inline]
    pub fn available_to_read(&self) -> usize {
        self.shared.reader_level()
    }

    /// Reads up to `into.len() / frame_size` whole frames, returning how
    /// many were copied. Short reads are normal when the writer is behind.
    pub fn read(&mut self, into: &mut [u8]) -> NbResult<usize> {
        let frame_size = self.shared.frame_size();
        if into.len() % frame_size != 0 {
            return Err(NbError::InvalidFormat(
                "buffer length must be a whole number of frames",
            ));
        }
        let want = into.len() / frame_size;
        let got = want.min(self.shared.reader_level());
        if got > 0 {
            self.shared.pop_frames(&mut into[..got * frame_size]);
            self.frames_read += got as u64;
        }
        Ok(got)
    }

    /// Total frames consumed over the life of this reader.
    #[inline]
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Publishes a consumer-side timestamp for the writer to poll.
    pub fn publish_timestamp(&self, position: u64, time: Instant) {
        self.shared.timestamp.publish(position, time);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    #[inline]
    pub fn format(&self) -> FrameFormat {
        self.shared.format()
    }

    #[inline]
    pub fn frame_size(&self) -> usize {
        self.shared.frame_size()
    }

    #[inline]
    pub fn max_frames(&self) -> usize {
        self.shared.max_frames()
    }
}

/// Adapter exposing an f32 pipe reader as an [`AudioBufferProvider`].
///
/// After every successful pull it publishes (total frames read, now) to
/// the pipe's timestamp mailbox, which is what makes the writer-side
/// `timestamp()` query live.
pub struct PipeSource {
    reader: UnsafeCell<MonoPipeReader>,
    channels: usize,
}

// SAFETY: AudioBufferProvider::next_frames is single-caller (the fast
// mixer thread), so the UnsafeCell is only ever mutated from one thread
// at a time; everything else on the shared ring is atomic.
unsafe impl Send for PipeSource {}
unsafe impl Sync for PipeSource {}

impl PipeSource {
    /// Wraps `reader`; the pipe must carry f32 samples.
    pub fn new(reader: MonoPipeReader) -> NbResult<Self> {
        let format = reader.format();
        if format.sample_format != SampleFormat::F32 {
            return Err(NbError::InvalidFormat("pipe source requires f32 frames"));
        }
        Ok(Self {
            channels: format.channels as usize,
            reader: UnsafeCell::new(reader),
        })
    }

    /// Channels per frame delivered by `next_frames`.
    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }
}

impl AudioBufferProvider for PipeSource {
    fn next_frames(&self, out: &mut [f32]) -> usize {
        // SAFETY: single-caller contract of next_frames, see above.
        let reader = unsafe { &mut *self.reader.get() };

        let samples = (out.len() / self.channels) * self.channels;
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut out[..samples]);
        match reader.read(bytes) {
            Ok(got) => {
                if got > 0 {
                    let position = reader.frames_read();
                    reader.publish_timestamp(position, Instant::now());
                }
                got
            }
            Err(_) => 0,
        }
    }
}
