//! Capability traits at the fast-path seams
//!
//! The mixer pulls from [`AudioBufferProvider`]s and pushes into a
//! [`Sink`]; both are object-safe so control code can swap
//! implementations behind `Arc<dyn _>` without the fast thread knowing.

use nb_core::{FrameFormat, NbResult};

/// Destination for interleaved PCM frames.
///
/// Shared by reference between the control plane and the fast thread, so
/// `write` takes `&self`; implementations use atomics or other interior
/// state that a single writing thread may safely advance.
pub trait Sink: Send + Sync {
    /// Format of the frames this sink accepts.
    fn format(&self) -> FrameFormat;

    /// Preferred frames per write (one mix period).
    fn frame_count(&self) -> usize;

    /// Writes whole frames, returning how many were accepted. Called from
    /// the fast thread; a hardware sink may block for up to one period
    /// here, but never on a lock a control thread can hold.
    fn write(&self, data: &[u8]) -> NbResult<usize>;

    /// Sample rate of the sink's format.
    fn sample_rate(&self) -> u32 {
        self.format().sample_rate
    }
}

/// Pull-model source of interleaved f32 frames feeding one mixer track.
///
/// `next_frames` is only ever called from one thread at a time (the fast
/// mixer); implementations may rely on that for interior mutability.
pub trait AudioBufferProvider: Send + Sync {
    /// Fills `out` with as many whole frames as are available and returns
    /// the frame count. Short or zero returns mean the upstream producer
    /// is behind, not an error.
    fn next_frames(&self, out: &mut [f32]) -> usize;
}

/// Per-track gain source, sampled once per mix cycle.
pub trait VolumeProvider: Send + Sync {
    /// Returns `(left, right)` linear gains.
    fn volume(&self) -> (f32, f32);
}
