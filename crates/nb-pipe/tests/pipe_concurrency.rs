//! Cross-Thread Pipe Tests
//!
//! Exercises the pipe with a real writer and reader thread:
//! - Paced blocking delivery
//! - Shutdown responsiveness
//! - Timestamp mailbox consistency under contention

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use nb_core::{FrameFormat, SampleFormat};
use nb_pipe::monopipe;

const FORMAT_RATE: u32 = 48_000;

fn mono_f32() -> FrameFormat {
    FrameFormat::new(FORMAT_RATE, 1, SampleFormat::F32).unwrap()
}

// ═══════════════════════════════════════════════════════════════════════════════
// PACED BLOCKING DELIVERY
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_blocking_write_delivers_every_frame_in_order() {
    const TOTAL: usize = 4096;

    let (mut pipe, mut reader) = monopipe(64, mono_f32(), true);
    pipe.negotiate(&[mono_f32()]).unwrap();

    let writer = thread::spawn(move || {
        let frames: Vec<f32> = (0..TOTAL).map(|i| i as f32).collect();
        pipe.write(bytemuck::cast_slice(&frames)).unwrap()
    });

    let mut received: Vec<f32> = Vec::with_capacity(TOTAL);
    let mut buf = [0f32; 128];
    while received.len() < TOTAL {
        let got = reader.read(bytemuck::cast_slice_mut(&mut buf)).unwrap();
        received.extend_from_slice(&buf[..got]);
        if got == 0 {
            thread::sleep(Duration::from_micros(200));
        }
    }

    assert_eq!(writer.join().unwrap(), TOTAL);
    for (i, &v) in received.iter().enumerate() {
        assert_eq!(v, i as f32, "frame {} out of order or corrupted", i);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHUTDOWN RESPONSIVENESS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_shutdown_unblocks_a_writer_stuck_on_a_full_pipe() {
    let (mut pipe, _reader) = monopipe(16, mono_f32(), true);
    pipe.negotiate(&[mono_f32()]).unwrap();
    let stop = pipe.shutdown_handle();

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let writer = thread::spawn(move || {
        // Far more than capacity with nobody reading: the write blocks
        // until shutdown abandons it.
        let written = pipe.write(&vec![0u8; 1024 * 4]).unwrap();
        done_tx.send(written).unwrap();
    });

    // Still stuck after a generous delay.
    assert!(done_rx.recv_timeout(Duration::from_millis(50)).is_err());

    stop.shutdown(true);
    let written = done_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("writer did not return after shutdown");
    assert_eq!(written, 16, "exactly the capacity's worth should have fit");
    writer.join().unwrap();
}

#[test]
fn test_writes_on_a_shut_down_pipe_do_not_sleep() {
    let (mut pipe, _reader) = monopipe(16, mono_f32(), true);
    pipe.negotiate(&[mono_f32()]).unwrap();
    pipe.shutdown(true);

    let start = Instant::now();
    let written = pipe.write(&vec![0u8; 1024 * 4]).unwrap();
    assert_eq!(written, 16);

    // A paced write this size would sleep tens of milliseconds at the
    // full-pipe tier; shutdown must return well before that.
    assert!(start.elapsed() < Duration::from_millis(20));
}

// ═══════════════════════════════════════════════════════════════════════════════
// TIMESTAMP MAILBOX CONSISTENCY
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_timestamp_position_and_time_are_never_torn() {
    let (mut pipe, reader) = monopipe(64, mono_f32(), false);
    pipe.negotiate(&[mono_f32()]).unwrap();

    let base = Instant::now();
    let stop = Arc::new(AtomicBool::new(false));

    let publisher = {
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            // Each publish pairs position i with time base + i microseconds,
            // so any torn read shows up as a mismatched pair.
            let mut i: u64 = 1;
            while !stop.load(Ordering::Relaxed) {
                reader.publish_timestamp(i, base + Duration::from_micros(i));
                i += 1;
            }
            i
        })
    };

    let deadline = Instant::now() + Duration::from_millis(200);
    let mut observed = 0u64;
    let mut last_position = 0u64;
    while Instant::now() < deadline {
        if let Ok(ts) = pipe.timestamp() {
            assert_eq!(
                ts.time,
                base + Duration::from_micros(ts.position),
                "position {} paired with a time from another publish",
                ts.position
            );
            assert!(ts.position >= last_position, "published positions went backwards");
            last_position = ts.position;
            observed += 1;
        }
    }

    stop.store(true, Ordering::Relaxed);
    let published = publisher.join().unwrap();
    assert!(observed > 0, "reader never saw a published timestamp");
    assert!(last_position < published);
}
