//! The fast mixer thread and its controller
//!
//! `FastMixerController::spawn` starts one dedicated real-time thread
//! running [`FastMixer::run`]. The two sides share exactly three
//! channels: the state queue (control publishes configuration wholesale,
//! the fast thread polls), the event ring (fast thread reports, control
//! drains), and the detached dump state (counters either side may read).
//! The fast thread itself never locks, allocates, or logs while active;
//! the only blocking it ever does is parking on the cold gate when
//! commanded `COLD_IDLE` and whatever the sink's own `write` costs.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nb_core::{FrameFormat, NbResult};
use nb_pipe::{AudioBufferProvider, Sink, VolumeProvider};

use crate::dump::{DumpSnapshot, FastMixerDumpState};
use crate::events::{EventReader, EventWriter, FastEvent, event_ring};
use crate::mixer_state::FastMixerState;
use crate::state_queue::{StateMutator, StateObserver, state_queue};
use crate::thread_priority::elevate_fast_thread;
use crate::thread_state::{ColdGate, Command};

/// Poll interval while hot idle: short enough that a new command takes
/// effect within roughly one mix period.
const HOT_IDLE_POLL: Duration = Duration::from_millis(1);
/// Poll interval while cold (or still INITIAL), and after the one park
/// per cold epoch has already happened.
const COLD_IDLE_POLL: Duration = Duration::from_millis(10);
/// Event ring depth. Overflow becomes a dropped-event count, never a
/// stall.
const EVENT_RING_CAPACITY: usize = 128;
/// Warmup ends after this many consecutive cycles inside the nominal
/// band...
const WARMUP_CONSECUTIVE_TARGET: u32 = 2;
/// ...or unconditionally after this many cycles.
const WARMUP_MAX_CYCLES: u32 = 10;

/// Measures how long the thread takes to settle into its cycle cadence
/// after activation. A cycle is in-band when it lands within +/-50% of
/// the nominal mix period.
struct WarmupTracker {
    done: bool,
    cycles: u32,
    total_ns: u64,
    consecutive_in_band: u32,
}

impl WarmupTracker {
    fn new() -> Self {
        Self {
            done: false,
            cycles: 0,
            total_ns: 0,
            consecutive_in_band: 0,
        }
    }

    /// Re-arms the tracker; called on every wake from cold idle.
    fn reset(&mut self) {
        *self = Self::new();
    }

    /// Feeds one measured cycle. Returns `Some((cycles, total_ns))`
    /// exactly once, on the cycle that completes warmup.
    fn observe(&mut self, cycle_ns: u64, nominal_ns: u64) -> Option<(u32, u64)> {
        if self.done {
            return None;
        }
        self.cycles += 1;
        self.total_ns += cycle_ns;

        let in_band = nominal_ns > 0
            && cycle_ns >= nominal_ns / 2
            && cycle_ns <= nominal_ns + nominal_ns / 2;
        if in_band {
            self.consecutive_in_band += 1;
        } else {
            self.consecutive_in_band = 0;
        }

        if self.consecutive_in_band >= WARMUP_CONSECUTIVE_TARGET
            || self.cycles >= WARMUP_MAX_CYCLES
        {
            self.done = true;
            Some((self.cycles, self.total_ns))
        } else {
            None
        }
    }
}

/// Everything the run loop owns besides the state-queue observer: the
/// event writer, the dump block, cached configuration, and the scratch
/// buffers. Split out so the loop can borrow a snapshot from the
/// observer and still mutate the rest.
struct MixerWorker {
    events: EventWriter,
    dump: Arc<FastMixerDumpState>,
    previous_command: Command,
    /// Cold epoch this thread last parked on; parking again on the same
    /// epoch would deadlock a wake that already happened.
    last_parked_generation: Option<u32>,
    /// Cached generation counters; a cycle refreshes config only when
    /// the snapshot's counters moved.
    tracks_generation: u32,
    output_sink_generation: u32,
    sink_channels: usize,
    frame_count: usize,
    nominal_period_ns: u64,
    /// Interleaved stereo mix bus, `frame_count * sink_channels` long.
    accumulator: Vec<f32>,
    /// Per-track pull buffer, sized for the widest track (stereo).
    track_scratch: Vec<f32>,
    warmup: WarmupTracker,
}

impl MixerWorker {
    fn new(events: EventWriter, dump: Arc<FastMixerDumpState>) -> Self {
        Self {
            events,
            dump,
            previous_command: Command::INITIAL,
            last_parked_generation: None,
            tracks_generation: 0,
            output_sink_generation: 0,
            sink_channels: 0,
            frame_count: 0,
            nominal_period_ns: 0,
            accumulator: Vec::new(),
            track_scratch: Vec::new(),
            warmup: WarmupTracker::new(),
        }
    }

    /// Non-blocking event send; a full ring bumps the drop counter.
    fn emit(&mut self, event: FastEvent) {
        if !self.events.push(event) {
            self.dump.note_dropped_event();
        }
    }

    /// Mirrors a command change into the dump block and the event ring.
    fn note_command(&mut self, command: Command) {
        if command != self.previous_command {
            self.previous_command = command;
            self.dump.thread.set_command(command);
            self.emit(FastEvent::StateChange { command });
        }
    }

    /// Refreshes cached sink/track config when the snapshot's generation
    /// counters moved. This is the only place the fast thread allocates,
    /// and only on an actual route change.
    fn refresh_config(&mut self, state: &FastMixerState) {
        if state.output_sink_generation() != self.output_sink_generation {
            self.output_sink_generation = state.output_sink_generation();
            self.frame_count = state.frame_count();
            let (channels, rate) = match state.output_sink() {
                Some(sink) => {
                    let format = sink.format();
                    (format.channels as usize, format.sample_rate as u64)
                }
                None => (0, 0),
            };
            self.sink_channels = channels;
            self.nominal_period_ns = if rate > 0 {
                self.frame_count as u64 * 1_000_000_000 / rate
            } else {
                0
            };
            self.accumulator.resize(self.frame_count * channels, 0.0);
            self.track_scratch.resize(self.frame_count * 2, 0.0);
        }
        if state.tracks_generation() != self.tracks_generation {
            self.tracks_generation = state.tracks_generation();
            self.dump.set_active_tracks(state.active_track_count());
        }
    }

    /// One MIX and/or WRITE cycle. Returns false when no sink is
    /// configured yet, in which case the caller idles instead of
    /// spinning.
    fn active_cycle(&mut self, state: &FastMixerState) -> bool {
        self.refresh_config(state);
        if self.frame_count == 0 || state.output_sink().is_none() {
            return false;
        }

        let started = Instant::now();
        let command = state.thread.command;

        let mixed = command.contains(Command::MIX);
        if mixed {
            self.mix(state);
        }
        if command.contains(Command::WRITE) {
            self.write_sink(state, mixed);
        }

        let cycle_ns = started.elapsed().as_nanos() as u64;
        self.dump.thread.record_cycle(cycle_ns);
        if let Some((cycles, ns)) = self.warmup.observe(cycle_ns, self.nominal_period_ns) {
            self.dump.thread.set_warmup(ns, cycles);
            self.emit(FastEvent::WarmupComplete { cycles, ns });
        }
        true
    }

    /// Pulls every active track and accumulates it into the stereo bus.
    fn mix(&mut self, state: &FastMixerState) {
        let want = self.frame_count;
        let samples = want * self.sink_channels;
        self.accumulator[..samples].fill(0.0);

        let mut remaining = state.track_mask();
        while remaining != 0 {
            let slot = remaining.trailing_zeros() as usize;
            remaining &= remaining - 1;

            let track = &state.tracks()[slot];
            let Some(provider) = track.buffer_provider.as_ref() else {
                continue;
            };
            let channels = track.format.channels as usize;

            let got = {
                let scratch = &mut self.track_scratch[..want * channels];
                provider.next_frames(scratch).min(want)
            };
            if got == 0 {
                self.dump.note_underrun();
                self.emit(FastEvent::Underrun { slot: slot as u8 });
                continue;
            }
            if got < want {
                self.dump.note_underrun();
                self.emit(FastEvent::ProviderShortRead {
                    slot: slot as u8,
                    requested: want,
                    got,
                });
            }

            let (gain_l, gain_r) = track
                .volume_provider
                .as_ref()
                .map_or((1.0, 1.0), |volume| volume.volume());

            let accumulator = &mut self.accumulator;
            let scratch = &self.track_scratch;
            if channels == 1 {
                // Mono fans out to both bus channels.
                for frame in 0..got {
                    let sample = scratch[frame];
                    accumulator[frame * 2] += sample * gain_l;
                    accumulator[frame * 2 + 1] += sample * gain_r;
                }
            } else {
                for frame in 0..got {
                    accumulator[frame * 2] += scratch[frame * 2] * gain_l;
                    accumulator[frame * 2 + 1] += scratch[frame * 2 + 1] * gain_r;
                }
            }
        }
    }

    /// Hands the mix bus (or silence, when this cycle did not mix) to
    /// the sink. Short writes and write errors count as overruns.
    fn write_sink(&mut self, state: &FastMixerState, mixed: bool) {
        let Some(sink) = state.output_sink() else {
            return;
        };
        let samples = self.frame_count * self.sink_channels;
        if !mixed {
            self.accumulator[..samples].fill(0.0);
        }

        let bytes: &[u8] = bytemuck::cast_slice(&self.accumulator[..samples]);
        match sink.write(bytes) {
            Ok(written) if written < self.frame_count => {
                self.dump.note_overrun();
                self.dump.add_frames_written(written as u64);
                self.emit(FastEvent::SinkShortWrite {
                    requested: self.frame_count,
                    written,
                });
            }
            Ok(written) => self.dump.add_frames_written(written as u64),
            Err(_) => {
                self.dump.note_overrun();
                self.emit(FastEvent::SinkShortWrite {
                    requested: self.frame_count,
                    written: 0,
                });
            }
        }
    }
}

/// The real-time side of the mixer. Constructed on the control thread,
/// then moved into the fast thread where [`run`](Self::run) loops until
/// an EXIT command arrives.
pub struct FastMixer {
    observer: StateObserver<FastMixerState>,
    worker: MixerWorker,
}

impl FastMixer {
    pub fn new(
        observer: StateObserver<FastMixerState>,
        events: EventWriter,
        dump: Arc<FastMixerDumpState>,
    ) -> Self {
        Self {
            observer,
            worker: MixerWorker::new(events, dump),
        }
    }

    /// Body of the fast mixer thread.
    ///
    /// Every iteration polls the newest snapshot, then dispatches on its
    /// command: EXIT returns, COLD_IDLE parks on the gate once per cold
    /// epoch, the other idle tiers sleep briefly, and the work bits run
    /// one mix/write cycle.
    pub fn run(mut self) {
        log::debug!("fast mixer thread running");
        loop {
            let state = self.observer.poll();
            let command = state.thread.command;
            self.worker.note_command(command);

            if command == Command::EXIT {
                break;
            } else if command == Command::COLD_IDLE {
                let epoch = state.thread.cold_generation;
                if self.worker.last_parked_generation != Some(epoch) {
                    self.worker.last_parked_generation = Some(epoch);
                    state.thread.cold_gate.wait();
                    // Cache state is stale after an arbitrarily long
                    // park; warmup starts over.
                    self.worker.warmup.reset();
                    self.worker.emit(FastEvent::ColdWake);
                } else {
                    thread::sleep(COLD_IDLE_POLL);
                }
            } else if command == Command::INITIAL || command == Command::HOT_IDLE {
                let poll = if command == Command::HOT_IDLE {
                    HOT_IDLE_POLL
                } else {
                    COLD_IDLE_POLL
                };
                thread::sleep(poll);
            } else if command.contains(Command::MIX) || command.contains(Command::WRITE) {
                if !self.worker.active_cycle(state) {
                    thread::sleep(HOT_IDLE_POLL);
                }
            } else {
                // Unknown command bits: stay responsive, do no work.
                thread::sleep(HOT_IDLE_POLL);
            }
        }
        log::debug!("fast mixer thread exiting");
    }
}

/// Control-plane handle to a spawned fast mixer.
///
/// Configuration follows one pattern throughout: edit the shadow state,
/// publish it wholesale, and post the cold gate when the change must
/// reach a possibly-parked thread. Dropping the controller exits and
/// joins the thread.
pub struct FastMixerController {
    mutator: StateMutator<FastMixerState>,
    cold_gate: Arc<ColdGate>,
    dump: Arc<FastMixerDumpState>,
    events: EventReader,
    thread: Option<JoinHandle<()>>,
}

impl FastMixerController {
    /// Spawns the "nb-fast-mixer" thread and returns its controller.
    ///
    /// The thread starts in INITIAL with no sink and no tracks; nothing
    /// runs until a sink is routed and [`mix_write`](Self::mix_write) is
    /// commanded.
    pub fn spawn() -> Self {
        let cold_gate = Arc::new(ColdGate::new());
        let dump = Arc::new(FastMixerDumpState::new());
        let initial = FastMixerState::new(Arc::clone(&cold_gate), Arc::clone(&dump));
        let (mutator, observer) = state_queue(initial);
        let (event_writer, event_reader) = event_ring(EVENT_RING_CAPACITY);

        let thread_dump = Arc::clone(&dump);
        let thread = thread::Builder::new()
            .name("nb-fast-mixer".into())
            .spawn(move || {
                elevate_fast_thread();
                FastMixer::new(observer, event_writer, thread_dump).run();
            })
            .expect("failed to spawn fast mixer thread");

        Self {
            mutator,
            cold_gate,
            dump,
            events: event_reader,
            thread: Some(thread),
        }
    }

    /// Installs or replaces a track, then publishes.
    pub fn set_track(
        &mut self,
        slot: usize,
        provider: Arc<dyn AudioBufferProvider>,
        volume: Option<Arc<dyn VolumeProvider>>,
        format: FrameFormat,
    ) -> NbResult<()> {
        self.mutator
            .state_mut()
            .set_track(slot, provider, volume, format)?;
        self.mutator.publish();
        Ok(())
    }

    /// Deactivates a track, then publishes. Returns whether the slot had
    /// been active.
    pub fn clear_track(&mut self, slot: usize) -> NbResult<bool> {
        let was_active = self.mutator.state_mut().clear_track(slot)?;
        self.mutator.publish();
        Ok(was_active)
    }

    /// Routes the output sink and mix period, then publishes.
    pub fn set_output_sink(
        &mut self,
        sink: Option<Arc<dyn Sink>>,
        frame_count: usize,
    ) -> NbResult<()> {
        self.mutator.state_mut().set_output_sink(sink, frame_count)?;
        self.mutator.publish();
        Ok(())
    }

    /// Publishes an arbitrary command and posts the gate so even a
    /// cold-parked thread observes it.
    pub fn set_command(&mut self, command: Command) {
        self.mutator.state_mut().set_command(command);
        self.mutator.publish();
        self.cold_gate.post();
    }

    /// Steady state: mix the active tracks and write the bus each cycle.
    pub fn mix_write(&mut self) {
        self.set_command(Command::MIX_WRITE);
    }

    /// Stop mixing but keep the thread warm for a fast restart.
    pub fn hot_idle(&mut self) {
        self.set_command(Command::HOT_IDLE);
    }

    /// Park the thread on the cold gate until the next command. The gate
    /// is armed before the publish, so there is no window in which the
    /// thread could observe COLD_IDLE and sail through an open gate.
    pub fn cold_idle(&mut self) {
        self.mutator.state_mut().thread.enter_cold_idle();
        self.mutator.publish();
    }

    /// Commands EXIT and joins the thread. Safe to call more than once.
    pub fn exit_and_join(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        self.mutator.state_mut().set_command(Command::EXIT);
        self.mutator.publish();
        self.cold_gate.post();
        if handle.join().is_err() {
            log::error!("fast mixer thread panicked");
        }
    }

    /// Point-in-time copy of the diagnostic counters.
    pub fn dump(&self) -> DumpSnapshot {
        self.dump.snapshot()
    }

    /// Live view of the diagnostic counters.
    pub fn dump_state(&self) -> &FastMixerDumpState {
        &self.dump
    }

    /// The shadow state: what the next publish will contain.
    pub fn state(&self) -> &FastMixerState {
        self.mutator.state()
    }

    /// Drains queued fast-thread events into a vec.
    pub fn drain_events(&mut self) -> Vec<FastEvent> {
        let mut events = Vec::new();
        self.events.drain(|event| events.push(event));
        events
    }

    /// Drains queued fast-thread events into the log, returning the
    /// count.
    pub fn log_events(&mut self) -> usize {
        self.events.drain_to_log()
    }
}

impl Drop for FastMixerController {
    fn drop(&mut self) {
        self.exit_and_join();
    }
}
