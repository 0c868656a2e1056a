//! Fast thread command machine
//!
//! A fast thread is driven entirely by the `command` field of its latest
//! state snapshot: idle tiers, exit, and work bits OR-ed on top by the
//! concrete thread (the mixer adds MIX/WRITE). Cold idle parks the thread
//! on a gate; every other state polls with short timed sleeps.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Command word driving a fast thread.
///
/// Values 0..=4 are the base machine; higher bits belong to the concrete
/// thread and are OR-able work flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Command(pub(crate) u32);

impl Command {
    /// State at construction, before the first real command arrives.
    pub const INITIAL: Command = Command(0);
    /// Stay warm: sleep briefly between polls, ready to work next cycle.
    pub const HOT_IDLE: Command = Command(1);
    /// Deep idle: park on the cold gate until the controller posts it.
    pub const COLD_IDLE: Command = Command(2);
    /// Union of the two idle bits, for masking.
    pub const IDLE: Command = Command(3);
    /// Terminal: the fast thread returns from its run loop.
    pub const EXIT: Command = Command(4);

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn from_bits(bits: u32) -> Command {
        Command(bits)
    }

    /// True when every bit of `flags` is set in `self`.
    #[inline]
    pub const fn contains(self, flags: Command) -> bool {
        self.0 & flags.0 == flags.0
    }

    /// True for HOT_IDLE and COLD_IDLE (not INITIAL, which precedes the
    /// first published command).
    #[inline]
    pub const fn is_idle(self) -> bool {
        self.0 & Self::IDLE.0 != 0 && self.0 & !Self::IDLE.0 == 0
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Command::INITIAL => "INITIAL",
            Command::HOT_IDLE => "HOT_IDLE",
            Command::COLD_IDLE => "COLD_IDLE",
            Command::IDLE => "IDLE",
            Command::EXIT => "EXIT",
            Command(0x8) => "MIX",
            Command(0x10) => "WRITE",
            Command(0x18) => "MIX_WRITE",
            Command(bits) => return write!(f, "Command({:#x})", bits),
        };
        f.write_str(name)
    }
}

/// Latched gate a fast thread parks on during cold idle.
///
/// `arm` closes it, `post` opens it and wakes the parked thread. The
/// latch means a post that arrives before the thread reaches `wait` is
/// not lost; `wait` simply falls through.
pub struct ColdGate {
    open: Mutex<bool>,
    cv: Condvar,
}

impl ColdGate {
    /// New gate, open: a `wait` before the first `arm` returns at once.
    pub fn new() -> Self {
        Self {
            open: Mutex::new(true),
            cv: Condvar::new(),
        }
    }

    /// Closes the gate; the next `wait` blocks until `post`.
    pub fn arm(&self) {
        *self.open.lock() = false;
    }

    /// Opens the gate and wakes anything parked on it.
    pub fn post(&self) {
        let mut open = self.open.lock();
        *open = true;
        self.cv.notify_all();
    }

    /// Parks the calling thread until the gate is open.
    pub fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.cv.wait(&mut open);
        }
    }

    /// Bounded `wait`; returns whether the gate was open on return.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut open = self.open.lock();
        while !*open {
            if self.cv.wait_until(&mut open, deadline).timed_out() {
                return *open;
            }
        }
        true
    }
}

impl Default for ColdGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Base state shared by every fast thread flavor: the command plus the
/// cold-idle plumbing. Concrete threads embed this in their snapshot.
#[derive(Clone)]
pub struct FastThreadState {
    pub command: Command,
    /// Gate this thread parks on when commanded cold.
    pub cold_gate: Arc<ColdGate>,
    /// Bumped once per cold epoch so the fast thread parks exactly once
    /// per COLD_IDLE command, re-polling instead of re-parking when it
    /// sees the same epoch again after a wake.
    pub cold_generation: u32,
}

impl FastThreadState {
    pub fn new(cold_gate: Arc<ColdGate>) -> Self {
        Self {
            command: Command::INITIAL,
            cold_gate,
            cold_generation: 0,
        }
    }

    /// Switches to COLD_IDLE: closes the gate and opens a new cold epoch.
    pub fn enter_cold_idle(&mut self) {
        self.command = Command::COLD_IDLE;
        self.cold_generation = self.cold_generation.wrapping_add(1);
        self.cold_gate.arm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_command_idle_classification() {
        assert!(Command::HOT_IDLE.is_idle());
        assert!(Command::COLD_IDLE.is_idle());
        assert!(Command::IDLE.is_idle());
        assert!(!Command::INITIAL.is_idle());
        assert!(!Command::EXIT.is_idle());
        assert!(!Command::from_bits(0x18).is_idle());
    }

    #[test]
    fn test_command_contains_work_bits() {
        let mix_write = Command::from_bits(0x18);
        assert!(mix_write.contains(Command::from_bits(0x8)));
        assert!(mix_write.contains(Command::from_bits(0x10)));
        assert!(!Command::from_bits(0x8).contains(mix_write));
    }

    #[test]
    fn test_command_debug_names_known_values() {
        assert_eq!(format!("{:?}", Command::INITIAL), "INITIAL");
        assert_eq!(format!("{:?}", Command::COLD_IDLE), "COLD_IDLE");
        assert_eq!(format!("{:?}", Command::from_bits(0x18)), "MIX_WRITE");
        assert_eq!(format!("{:?}", Command::from_bits(0x40)), "Command(0x40)");
    }

    #[test]
    fn test_gate_post_before_wait_is_not_lost() {
        let gate = ColdGate::new();
        gate.arm();
        gate.post();
        // Latched open: returns immediately instead of hanging.
        gate.wait();
    }

    #[test]
    fn test_gate_wait_timeout_reports_state() {
        let gate = ColdGate::new();
        assert!(gate.wait_timeout(Duration::from_millis(1)));

        gate.arm();
        assert!(!gate.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn test_gate_wakes_a_parked_thread() {
        let gate = Arc::new(ColdGate::new());
        gate.arm();

        let parked = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.wait())
        };

        thread::sleep(Duration::from_millis(10));
        gate.post();
        parked.join().unwrap();
    }

    #[test]
    fn test_enter_cold_idle_bumps_epoch_and_arms_gate() {
        let gate = Arc::new(ColdGate::new());
        let mut state = FastThreadState::new(Arc::clone(&gate));
        assert_eq!(state.command, Command::INITIAL);
        assert_eq!(state.cold_generation, 0);

        state.enter_cold_idle();
        assert_eq!(state.command, Command::COLD_IDLE);
        assert_eq!(state.cold_generation, 1);
        assert!(!gate.wait_timeout(Duration::from_millis(1)));

        state.enter_cold_idle();
        assert_eq!(state.cold_generation, 2);
    }
}
