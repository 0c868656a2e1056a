//! Writer endpoint of a mono pipe
//!
//! `MonoPipe` is the producer half of a single-writer, single-reader frame
//! pipe. In blocking mode the writer never parks on a lock or futex;
//! instead each `write()` sleeps just long enough that, averaged over many
//! writes, frames enter the pipe at the stream's real-time rate while the
//! fill level drifts toward a setpoint. The reader side stays wait-free
//! either way.

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use nb_core::{FrameFormat, NbError, NbResult};

use crate::mailbox::PipeTimestamp;
use crate::reader::MonoPipeReader;
use crate::ring::PipeShared;

/// Upper bound on a single pacing sleep.
const MAX_SLEEP_NS: u64 = 999_999_999;

/// Pacing rate applied to the frames still owed when the pipe is full.
const FULL_PIPE_RATE: u64 = 1_350_000_000;

/// Creates a connected pipe pair holding at least `min_frames` frames.
///
/// Capacity is rounded up to a power of two (minimum 2). When
/// `writer_can_block` is false every `write()` returns immediately with
/// however many frames fit.
pub fn monopipe(
    min_frames: usize,
    format: FrameFormat,
    writer_can_block: bool,
) -> (MonoPipe, MonoPipeReader) {
    let shared = Arc::new(PipeShared::new(min_frames, format));
    log::debug!(
        "monopipe: {} frames requested, {} allocated, format {:?}",
        min_frames,
        shared.max_frames(),
        format
    );
    let reader = MonoPipeReader::new(Arc::clone(&shared));
    let pipe = MonoPipe {
        shared,
        writer_can_block,
        negotiated: false,
        last_write_done: None,
        _not_sync: PhantomData,
    };
    (pipe, reader)
}

/// Producer half of the pipe. Owned by one thread at a time (`Send` but
/// not `Sync`); move it, don't share it.
pub struct MonoPipe {
    shared: Arc<PipeShared>,
    writer_can_block: bool,
    /// Set once `negotiate` has accepted an offer; gates the data path.
    negotiated: bool,
    /// Projected completion time of the previous paced write, used to
    /// deduct already-elapsed time from the next sleep.
    last_write_done: Option<Instant>,
    _not_sync: PhantomData<Cell<()>>,
}

impl MonoPipe {
    /// Offers a list of formats; accepts the first one equal to the pipe's
    /// own format and returns its index.
    pub fn negotiate(&mut self, offers: &[FrameFormat]) -> NbResult<usize> {
        let own = self.shared.format();
        match offers.iter().position(|offer| *offer == own) {
            Some(index) => {
                self.negotiated = true;
                log::debug!("monopipe: accepted offer {} of {:?}", index, own);
                Ok(index)
            }
            None => {
                log::warn!(
                    "monopipe: none of {} offered formats match {:?}",
                    offers.len(),
                    own
                );
                Err(NbError::Negotiate)
            }
        }
    }

    /// Frames that can be written without blocking. Requires a prior
    /// successful [`negotiate`](Self::negotiate).
    pub fn available_to_write(&self) -> NbResult<usize> {
        if !self.negotiated {
            return Err(NbError::Negotiate);
        }
        Ok(self.shared.writer_space())
    }

    /// Writes whole frames from `data`, returning how many were accepted.
    ///
    /// Non-blocking pipes accept whatever fits and return. Blocking pipes
    /// keep pushing until everything is written, pacing themselves with
    /// short sleeps; shutdown breaks the loop early with a partial count.
    pub fn write(&mut self, data: &[u8]) -> NbResult<usize> {
        if !self.negotiated {
            return Err(NbError::Negotiate);
        }
        let frame_size = self.shared.frame_size();
        if data.len() % frame_size != 0 {
            return Err(NbError::InvalidFormat(
                "buffer length must be a whole number of frames",
            ));
        }
        let sample_rate = self.shared.format().sample_rate;
        let max_frames = self.shared.max_frames();

        let mut remaining = data.len() / frame_size;
        let mut offset = 0;
        let mut total_written = 0;

        while remaining > 0 {
            let space = self.shared.writer_space();
            let chunk = remaining.min(space);
            if chunk > 0 {
                self.shared
                    .push_frames(&data[offset..offset + chunk * frame_size]);
                total_written += chunk;
            }

            if !self.writer_can_block || self.shared.is_shutdown() {
                break;
            }

            remaining -= chunk;
            offset += chunk * frame_size;

            // Fill level just after the push, assuming the reader has not
            // drained anything since `space` was sampled.
            let filled = (max_frames - space) + chunk;
            let mut ns = sleep_budget_ns(
                chunk,
                remaining,
                filled,
                self.shared.setpoint(),
                sample_rate,
            );

            // Time already spent since the previous paced write completed
            // counts against this sleep.
            let now = Instant::now();
            if let Some(prev) = self.last_write_done {
                let elapsed = now.duration_since(prev).as_nanos() as u64;
                ns = ns.saturating_sub(elapsed);
            }
            if ns > 0 {
                thread::sleep(Duration::from_nanos(ns));
            }
            self.last_write_done = Some(now + Duration::from_nanos(ns));
        }

        Ok(total_written)
    }

    /// Pipe capacity in frames.
    #[inline]
    pub fn max_frames(&self) -> usize {
        self.shared.max_frames()
    }

    #[inline]
    pub fn frame_size(&self) -> usize {
        self.shared.frame_size()
    }

    #[inline]
    pub fn format(&self) -> FrameFormat {
        self.shared.format()
    }

    /// Sets the fill level pacing steers toward, clamped to
    /// `[1, max_frames]`.
    pub fn set_avg_frames(&self, frames: usize) {
        self.shared.set_setpoint(frames);
    }

    /// Current pacing setpoint in frames.
    pub fn avg_frames(&self) -> usize {
        self.shared.setpoint()
    }

    /// Marks the pipe (in)active. A shut-down pipe never sleeps in
    /// `write()`; in-flight blocked writes return their partial count.
    pub fn shutdown(&self, shut: bool) {
        self.shared.set_shutdown(shut);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// Cloneable handle for shutting the pipe down from another thread.
    pub fn shutdown_handle(&self) -> PipeShutdown {
        PipeShutdown {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Latest timestamp published by the reader side, or
    /// `InvalidOperation` if none has been published yet.
    pub fn timestamp(&self) -> NbResult<PipeTimestamp> {
        self.shared
            .timestamp
            .load()
            .ok_or(NbError::InvalidOperation("no timestamp published yet"))
    }
}

/// Control-plane handle to a pipe's shutdown flag.
#[derive(Clone)]
pub struct PipeShutdown {
    shared: Arc<PipeShared>,
}

impl PipeShutdown {
    pub fn shutdown(&self, shut: bool) {
        self.shared.set_shutdown(shut);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }
}

/// Nanoseconds a blocking write should sleep after pushing `written`
/// frames, given the post-push fill level and the reader-visible backlog
/// still owed (`remaining`).
///
/// Six pacing tiers bracket the setpoint; below it the writer runs faster
/// than real time to catch up, above it slower to drain. The per-frame
/// rate divides before multiplying, so the truncation matches the
/// fixed-point arithmetic the tier constants were tuned for.
fn sleep_budget_ns(
    written: usize,
    remaining: usize,
    filled: usize,
    setpoint: usize,
    sample_rate: u32,
) -> u64 {
    let rate = sample_rate as u64;
    let ns = if written > 0 {
        let per_frame = if filled <= setpoint / 2 {
            500_000_000 / rate
        } else if filled <= (setpoint * 3) / 4 {
            750_000_000 / rate
        } else if filled <= (setpoint * 5) / 4 {
            1_000_000_000 / rate
        } else if filled <= (setpoint * 3) / 2 {
            1_150_000_000 / rate
        } else if filled <= (setpoint * 7) / 4 {
            1_350_000_000 / rate
        } else {
            1_750_000_000 / rate
        };
        written as u64 * per_frame
    } else {
        // Nothing fit: the pipe is full, wait for the backlog to drain.
        remaining as u64 * (FULL_PIPE_RATE / rate)
    };
    ns.min(MAX_SLEEP_NS)
}
