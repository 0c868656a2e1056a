//! Fast Thread Scheduling
//!
//! Elevates the fast mixer thread to real-time scheduling so mix cycles
//! are not preempted by ordinary load. Elevation is attempted once per
//! process; failure is non-fatal and the mixer simply runs at normal
//! priority with looser latency.
//!
//! # Platform Support
//!
//! - **Linux**: `SCHED_FIFO`, stepping down to `SCHED_RR` and a pthread
//!   fallback (elevated classes need `CAP_SYS_NICE` or root)
//! - **macOS**: pthread QoS (USER_INTERACTIVE) plus a Mach time-constraint
//!   policy sized for a mix period
//! - **Windows**: MMCSS "Pro Audio" class, falling back to
//!   `SetThreadPriority`

use std::sync::atomic::{AtomicBool, Ordering};

/// One elevation per process; repeat spawns skip the syscalls.
static ELEVATED: AtomicBool = AtomicBool::new(false);

/// Outcome of a real-time elevation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityOutcome {
    /// The calling thread now has real-time scheduling.
    Elevated,
    /// A previous attempt in this process already succeeded.
    AlreadyElevated,
    /// The platform refused; the thread keeps normal priority.
    Denied,
    /// No elevation path exists on this platform.
    Unsupported,
}

/// Requests real-time scheduling for the calling thread.
///
/// Call once from the fast thread itself, right after it starts. Safe to
/// call again; a denied attempt may be retried by a later thread.
pub fn elevate_fast_thread() -> PriorityOutcome {
    if ELEVATED.swap(true, Ordering::SeqCst) {
        return PriorityOutcome::AlreadyElevated;
    }

    let outcome = platform_elevate();

    match outcome {
        PriorityOutcome::Elevated => {
            log::info!("fast mixer thread elevated to real-time priority");
        }
        PriorityOutcome::Denied => {
            log::warn!("real-time elevation denied; mixing at normal priority");
            ELEVATED.store(false, Ordering::SeqCst); // allow a later retry
        }
        PriorityOutcome::Unsupported => {
            log::debug!("real-time scheduling not available on this platform");
        }
        PriorityOutcome::AlreadyElevated => {}
    }

    outcome
}

/// Clears the once-per-process latch (for tests).
#[doc(hidden)]
pub fn reset_elevation_latch() {
    ELEVATED.store(false, Ordering::SeqCst);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Linux
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(target_os = "linux")]
fn platform_elevate() -> PriorityOutcome {
    use libc::{
        SCHED_FIFO, SCHED_RR, pthread_self, pthread_setschedparam, sched_param, sched_setscheduler,
    };

    // SCHED_FIFO at 75: above vendor audio daemons, below kernel IRQ
    // threads.
    let mut param = sched_param { sched_priority: 75 };

    if unsafe { sched_setscheduler(0, SCHED_FIFO, &param) } == 0 {
        return PriorityOutcome::Elevated;
    }

    log::debug!("SCHED_FIFO denied (no CAP_SYS_NICE?), trying SCHED_RR");

    param.sched_priority = 60;
    if unsafe { sched_setscheduler(0, SCHED_RR, &param) } == 0 {
        return PriorityOutcome::Elevated;
    }

    log::debug!("SCHED_RR denied, trying pthread_setschedparam");

    // Some rtkit-style configurations grant this when the syscall path is
    // refused.
    param.sched_priority = 45;
    let thread = unsafe { pthread_self() };
    if unsafe { pthread_setschedparam(thread, SCHED_FIFO, &param) } == 0 {
        PriorityOutcome::Elevated
    } else {
        PriorityOutcome::Denied
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// macOS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(target_os = "macos")]
fn platform_elevate() -> PriorityOutcome {
    use std::mem::MaybeUninit;

    const QOS_CLASS_USER_INTERACTIVE: u32 = 0x21;
    const THREAD_TIME_CONSTRAINT_POLICY: u32 = 2;
    const THREAD_TIME_CONSTRAINT_POLICY_COUNT: u32 = 4;

    #[repr(C)]
    struct ThreadTimeConstraintPolicy {
        period: u32,
        computation: u32,
        constraint: u32,
        preemptible: i32,
    }

    #[repr(C)]
    struct MachTimebaseInfo {
        numer: u32,
        denom: u32,
    }

    unsafe extern "C" {
        fn pthread_set_qos_class_self_np(qos_class: u32, relative_priority: i32) -> i32;
        fn mach_thread_self() -> u32;
        fn mach_timebase_info(info: *mut MachTimebaseInfo) -> i32;
        fn thread_policy_set(
            thread: u32,
            flavor: u32,
            policy_info: *const ThreadTimeConstraintPolicy,
            count: u32,
        ) -> i32;
    }

    let qos_result = unsafe { pthread_set_qos_class_self_np(QOS_CLASS_USER_INTERACTIVE, 0) };
    if qos_result != 0 {
        log::debug!("pthread_set_qos_class_self_np failed: {}", qos_result);
        // The time-constraint policy below may still succeed.
    }

    let mut timebase = MaybeUninit::<MachTimebaseInfo>::uninit();
    let timebase = unsafe {
        mach_timebase_info(timebase.as_mut_ptr());
        timebase.assume_init()
    };
    let ns_to_abs =
        |ns: u64| -> u32 { ((ns * timebase.denom as u64) / timebase.numer as u64) as u32 };

    // Sized for a short mix period: up to 1 ms of computation inside a
    // 2 ms window.
    let policy = ThreadTimeConstraintPolicy {
        period: ns_to_abs(2_000_000),
        computation: ns_to_abs(1_000_000),
        constraint: ns_to_abs(2_000_000),
        preemptible: 1,
    };

    let thread = unsafe { mach_thread_self() };
    let result = unsafe {
        thread_policy_set(
            thread,
            THREAD_TIME_CONSTRAINT_POLICY,
            &policy,
            THREAD_TIME_CONSTRAINT_POLICY_COUNT,
        )
    };

    if result == 0 || qos_result == 0 {
        if result != 0 {
            log::debug!("thread_policy_set failed: {} (QoS still applied)", result);
        }
        PriorityOutcome::Elevated
    } else {
        PriorityOutcome::Denied
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Windows
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(target_os = "windows")]
fn platform_elevate() -> PriorityOutcome {
    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::System::Threading::{
        AvSetMmThreadCharacteristicsW, GetCurrentThread, SetThreadPriority,
        THREAD_PRIORITY_TIME_CRITICAL,
    };
    use windows::core::PCWSTR;

    // MMCSS hands pro-audio threads a scheduling class the plain priority
    // API cannot reach.
    let task_name: Vec<u16> = "Pro Audio\0".encode_utf16().collect();
    let mut task_index: u32 = 0;

    let mmcss_handle =
        unsafe { AvSetMmThreadCharacteristicsW(PCWSTR(task_name.as_ptr()), &mut task_index) };

    if !mmcss_handle.is_invalid() {
        log::debug!("MMCSS Pro Audio class joined (task index {})", task_index);
        return PriorityOutcome::Elevated;
    }

    log::debug!("MMCSS registration failed, using SetThreadPriority");

    let current_thread: HANDLE = unsafe { GetCurrentThread() };
    let result = unsafe { SetThreadPriority(current_thread, THREAD_PRIORITY_TIME_CRITICAL) };

    if result.as_bool() {
        PriorityOutcome::Elevated
    } else {
        PriorityOutcome::Denied
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Everything else
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn platform_elevate() -> PriorityOutcome {
    PriorityOutcome::Unsupported
}
