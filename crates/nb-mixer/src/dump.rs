//! Detached diagnostic state
//!
//! Statistics blocks the fast thread updates at cycle boundaries and any
//! other thread may read at any time. Every field is a plain atomic:
//! reads may tear across fields, nothing here ever drives behavior, and
//! the fast thread never blocks or allocates to update them.

use portable_atomic::{AtomicU32, AtomicU64, Ordering};
use serde::Serialize;

use crate::thread_state::Command;

/// Per-thread cycle statistics shared by all fast thread flavors.
pub struct FastThreadDumpState {
    command: AtomicU32,
    warmup_ns: AtomicU64,
    warmup_cycles: AtomicU32,
    cycle_count: AtomicU64,
    cycle_total_ns: AtomicU64,
    cycle_max_ns: AtomicU64,
    /// u64::MAX until the first recorded cycle.
    cycle_min_ns: AtomicU64,
    /// f64 bits of the running mean, same trick as UI meter values.
    mean_cycle_ns_bits: AtomicU64,
}

impl FastThreadDumpState {
    pub fn new() -> Self {
        Self {
            command: AtomicU32::new(Command::INITIAL.bits()),
            warmup_ns: AtomicU64::new(0),
            warmup_cycles: AtomicU32::new(0),
            cycle_count: AtomicU64::new(0),
            cycle_total_ns: AtomicU64::new(0),
            cycle_max_ns: AtomicU64::new(0),
            cycle_min_ns: AtomicU64::new(u64::MAX),
            mean_cycle_ns_bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub fn set_command(&self, command: Command) {
        self.command.store(command.bits(), Ordering::Relaxed);
    }

    pub fn command(&self) -> Command {
        Command::from_bits(self.command.load(Ordering::Relaxed))
    }

    /// Called once per active cycle with the measured cycle time.
    pub fn record_cycle(&self, ns: u64) {
        let count = self.cycle_count.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.cycle_total_ns.fetch_add(ns, Ordering::Relaxed) + ns;
        self.cycle_max_ns.fetch_max(ns, Ordering::Relaxed);
        self.cycle_min_ns.fetch_min(ns, Ordering::Relaxed);
        let mean = total as f64 / count as f64;
        self.mean_cycle_ns_bits.store(mean.to_bits(), Ordering::Relaxed);
    }

    pub fn set_warmup(&self, ns: u64, cycles: u32) {
        self.warmup_ns.store(ns, Ordering::Relaxed);
        self.warmup_cycles.store(cycles, Ordering::Relaxed);
    }

    pub fn warmup_ns(&self) -> u64 {
        self.warmup_ns.load(Ordering::Relaxed)
    }

    pub fn warmup_cycles(&self) -> u32 {
        self.warmup_cycles.load(Ordering::Relaxed)
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count.load(Ordering::Relaxed)
    }

    pub fn mean_cycle_ns(&self) -> f64 {
        f64::from_bits(self.mean_cycle_ns_bits.load(Ordering::Relaxed))
    }
}

impl Default for FastThreadDumpState {
    fn default() -> Self {
        Self::new()
    }
}

/// Mixer-flavor diagnostics: the base thread stats plus mix accounting.
pub struct FastMixerDumpState {
    pub thread: FastThreadDumpState,
    underruns: AtomicU32,
    overruns: AtomicU32,
    frames_written: AtomicU64,
    active_tracks: AtomicU32,
    dropped_events: AtomicU32,
}

impl FastMixerDumpState {
    pub fn new() -> Self {
        Self {
            thread: FastThreadDumpState::new(),
            underruns: AtomicU32::new(0),
            overruns: AtomicU32::new(0),
            frames_written: AtomicU64::new(0),
            active_tracks: AtomicU32::new(0),
            dropped_events: AtomicU32::new(0),
        }
    }

    pub fn note_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_overrun(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_frames_written(&self, frames: u64) {
        self.frames_written.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn set_active_tracks(&self, count: u32) {
        self.active_tracks.store(count, Ordering::Relaxed);
    }

    pub fn note_dropped_event(&self) {
        self.dropped_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn underruns(&self) -> u32 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn overruns(&self) -> u32 {
        self.overruns.load(Ordering::Relaxed)
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    pub fn active_tracks(&self) -> u32 {
        self.active_tracks.load(Ordering::Relaxed)
    }

    pub fn dropped_events(&self) -> u32 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Point-in-time copy for display or export. Fields are loaded
    /// individually, so the snapshot is not an atomic cut across them.
    pub fn snapshot(&self) -> DumpSnapshot {
        let count = self.thread.cycle_count();
        let min = self.thread.cycle_min_ns.load(Ordering::Relaxed);
        DumpSnapshot {
            command: format!("{:?}", self.thread.command()),
            warmup_ns: self.thread.warmup_ns(),
            warmup_cycles: self.thread.warmup_cycles(),
            cycle_count: count,
            cycle_mean_ns: self.thread.mean_cycle_ns(),
            cycle_min_ns: if count == 0 { 0 } else { min },
            cycle_max_ns: self.thread.cycle_max_ns.load(Ordering::Relaxed),
            underruns: self.underruns(),
            overruns: self.overruns(),
            frames_written: self.frames_written(),
            active_tracks: self.active_tracks(),
            dropped_events: self.dropped_events(),
        }
    }
}

impl Default for FastMixerDumpState {
    fn default() -> Self {
        Self::new()
    }
}

/// Plain-data export of [`FastMixerDumpState`].
#[derive(Debug, Clone, Serialize)]
pub struct DumpSnapshot {
    pub command: String,
    pub warmup_ns: u64,
    pub warmup_cycles: u32,
    pub cycle_count: u64,
    pub cycle_mean_ns: f64,
    pub cycle_min_ns: u64,
    pub cycle_max_ns: u64,
    pub underruns: u32,
    pub overruns: u32,
    pub frames_written: u64,
    pub active_tracks: u32,
    pub dropped_events: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_stats_track_min_max_mean() {
        let dump = FastThreadDumpState::new();
        dump.record_cycle(100);
        dump.record_cycle(300);
        dump.record_cycle(200);

        assert_eq!(dump.cycle_count(), 3);
        assert_eq!(dump.cycle_min_ns.load(Ordering::Relaxed), 100);
        assert_eq!(dump.cycle_max_ns.load(Ordering::Relaxed), 300);
        assert_eq!(dump.mean_cycle_ns(), 200.0);
    }

    #[test]
    fn test_snapshot_before_any_cycle_reports_zero_min() {
        let dump = FastMixerDumpState::new();
        let snap = dump.snapshot();
        assert_eq!(snap.cycle_count, 0);
        assert_eq!(snap.cycle_min_ns, 0);
        assert_eq!(snap.cycle_max_ns, 0);
        assert_eq!(snap.command, "INITIAL");
    }

    #[test]
    fn test_mixer_counters_accumulate() {
        let dump = FastMixerDumpState::new();
        dump.note_underrun();
        dump.note_underrun();
        dump.note_overrun();
        dump.add_frames_written(256);
        dump.add_frames_written(256);
        dump.set_active_tracks(3);

        let snap = dump.snapshot();
        assert_eq!(snap.underruns, 2);
        assert_eq!(snap.overruns, 1);
        assert_eq!(snap.frames_written, 512);
        assert_eq!(snap.active_tracks, 3);
    }

    #[test]
    fn test_snapshot_serializes_to_json() {
        let dump = FastMixerDumpState::new();
        dump.thread.set_command(Command::from_bits(0x18));
        dump.thread.record_cycle(5_000);
        dump.note_underrun();

        let json = serde_json::to_string(&dump.snapshot()).unwrap();
        assert!(json.contains("\"command\":\"MIX_WRITE\""));
        assert!(json.contains("\"underruns\":1"));
        assert!(json.contains("\"cycle_count\":1"));
    }
}
