//! Mixer configuration snapshot
//!
//! `FastMixerState` is everything the fast mixer thread needs to do its
//! job: the track table, the output sink, the mix period, and the
//! embedded thread command. The control thread edits a copy and
//! publishes it wholesale through the state queue; generation counters
//! let the fast thread detect change in O(1) instead of re-scanning.

use std::sync::Arc;

use nb_core::{FrameFormat, NbError, NbResult, SampleFormat};
use nb_pipe::{AudioBufferProvider, Sink, VolumeProvider};

use crate::dump::FastMixerDumpState;
use crate::thread_state::{ColdGate, Command, FastThreadState};

/// Fixed size of the fast track table. Indexes are caller-supplied and
/// validated; the table never grows, keeping per-cycle cost constant.
pub const MAX_FAST_TRACKS: usize = 8;

impl Command {
    /// Mix the active tracks into the accumulator this cycle.
    pub const MIX: Command = Command(0x8);
    /// Write the accumulator (or silence) to the output sink.
    pub const WRITE: Command = Command(0x10);
    /// Mix then write, the steady operating state.
    pub const MIX_WRITE: Command = Command(0x18);
}

/// One slot of the track table.
#[derive(Clone, Default)]
pub struct FastTrack {
    /// Pull source; `Some` iff the slot is active.
    pub buffer_provider: Option<Arc<dyn AudioBufferProvider>>,
    /// Per-track gains; unity when absent.
    pub volume_provider: Option<Arc<dyn VolumeProvider>>,
    pub format: FrameFormat,
    /// Bumped on every change to this slot.
    pub generation: u32,
}

impl FastTrack {
    #[inline]
    pub fn is_active(&self) -> bool {
        self.buffer_provider.is_some()
    }
}

/// Complete mixer configuration, published wholesale.
///
/// Mutation goes through methods so the counters stay honest: any track
/// edit bumps that slot's generation and `tracks_generation`; a sink (or
/// mix period) change bumps `output_sink_generation`. The fast thread
/// compares counters against its cached copies and refreshes only what
/// moved.
#[derive(Clone)]
pub struct FastMixerState {
    pub thread: FastThreadState,
    tracks: [FastTrack; MAX_FAST_TRACKS],
    track_mask: u32,
    tracks_generation: u32,
    output_sink: Option<Arc<dyn Sink>>,
    output_sink_generation: u32,
    /// Frames per mix cycle; changes only together with the sink.
    frame_count: usize,
    /// Diagnostic block the fast thread updates at cycle boundaries.
    pub dump: Arc<FastMixerDumpState>,
}

impl FastMixerState {
    pub fn new(cold_gate: Arc<ColdGate>, dump: Arc<FastMixerDumpState>) -> Self {
        Self {
            thread: FastThreadState::new(cold_gate),
            tracks: Default::default(),
            track_mask: 0,
            tracks_generation: 0,
            output_sink: None,
            output_sink_generation: 0,
            frame_count: 0,
            dump,
        }
    }

    /// Installs (or replaces) an active track in `slot`.
    pub fn set_track(
        &mut self,
        slot: usize,
        provider: Arc<dyn AudioBufferProvider>,
        volume: Option<Arc<dyn VolumeProvider>>,
        format: FrameFormat,
    ) -> NbResult<()> {
        if slot >= MAX_FAST_TRACKS {
            return Err(NbError::InvalidSlot {
                slot,
                max: MAX_FAST_TRACKS - 1,
            });
        }
        if format.sample_format != SampleFormat::F32 {
            return Err(NbError::InvalidFormat("fast tracks carry f32 samples"));
        }
        if format.channels > 2 {
            return Err(NbError::InvalidFormat("fast tracks are mono or stereo"));
        }
        let track = &mut self.tracks[slot];
        track.buffer_provider = Some(provider);
        track.volume_provider = volume;
        track.format = format;
        track.generation = track.generation.wrapping_add(1);
        self.track_mask |= 1 << slot;
        self.tracks_generation = self.tracks_generation.wrapping_add(1);
        Ok(())
    }

    /// Deactivates `slot`, returning whether it had been active.
    pub fn clear_track(&mut self, slot: usize) -> NbResult<bool> {
        if slot >= MAX_FAST_TRACKS {
            return Err(NbError::InvalidSlot {
                slot,
                max: MAX_FAST_TRACKS - 1,
            });
        }
        let track = &mut self.tracks[slot];
        let was_active = track.buffer_provider.take().is_some();
        track.volume_provider = None;
        track.generation = track.generation.wrapping_add(1);
        self.track_mask &= !(1 << slot);
        self.tracks_generation = self.tracks_generation.wrapping_add(1);
        Ok(was_active)
    }

    /// Swaps the output sink and the mix period together. The period is
    /// a property of the sink route, so they share a generation.
    ///
    /// The mix bus is stereo f32; sinks with any other format are
    /// rejected, as is a zero-frame period.
    pub fn set_output_sink(
        &mut self,
        sink: Option<Arc<dyn Sink>>,
        frame_count: usize,
    ) -> NbResult<()> {
        if let Some(sink) = &sink {
            let format = sink.format();
            if format.channels != 2 || format.sample_format != SampleFormat::F32 {
                return Err(NbError::InvalidFormat("output sink must be stereo f32"));
            }
            if frame_count == 0 {
                return Err(NbError::InvalidOperation("mix period must be nonzero"));
            }
        }
        self.output_sink = sink;
        self.frame_count = frame_count;
        self.output_sink_generation = self.output_sink_generation.wrapping_add(1);
        Ok(())
    }

    pub fn set_command(&mut self, command: Command) {
        self.thread.command = command;
    }

    #[inline]
    pub fn tracks(&self) -> &[FastTrack; MAX_FAST_TRACKS] {
        &self.tracks
    }

    #[inline]
    pub fn track_mask(&self) -> u32 {
        self.track_mask
    }

    #[inline]
    pub fn tracks_generation(&self) -> u32 {
        self.tracks_generation
    }

    #[inline]
    pub fn output_sink(&self) -> Option<&Arc<dyn Sink>> {
        self.output_sink.as_ref()
    }

    #[inline]
    pub fn output_sink_generation(&self) -> u32 {
        self.output_sink_generation
    }

    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn active_track_count(&self) -> u32 {
        self.track_mask.count_ones()
    }
}
