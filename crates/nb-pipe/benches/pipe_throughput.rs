//! Pipe Throughput Benchmarks
//!
//! Raw push/pop cost through a non-blocking pipe at typical mix-period
//! sizes, plus the timestamp mailbox hot operations.

use std::time::Instant;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use nb_core::FrameFormat;
use nb_pipe::monopipe;

const PERIOD_FRAMES: &[usize] = &[64, 128, 256, 512];

/// One period written and read back per iteration.
fn bench_pipe_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipe_round_trip");
    let format = FrameFormat::stereo_f32_48k();

    for &frames in PERIOD_FRAMES {
        group.throughput(Throughput::Bytes((frames * format.frame_size()) as u64));

        let (mut pipe, mut reader) = monopipe(frames * 4, format, false);
        pipe.negotiate(&[format]).unwrap();

        let input = vec![0.25f32; frames * 2];
        let mut output = vec![0f32; frames * 2];

        group.bench_with_input(BenchmarkId::new("write_read", frames), &frames, |b, _| {
            b.iter(|| {
                pipe.write(bytemuck::cast_slice(&input)).unwrap();
                let got = reader.read(bytemuck::cast_slice_mut(&mut output)).unwrap();
                black_box(got)
            })
        });
    }

    group.finish();
}

fn bench_timestamp_mailbox(c: &mut Criterion) {
    let mut group = c.benchmark_group("timestamp_mailbox");
    let format = FrameFormat::stereo_f32_48k();
    let (mut pipe, reader) = monopipe(256, format, false);
    pipe.negotiate(&[format]).unwrap();

    let epoch = Instant::now();
    group.bench_function("publish", |b| {
        let mut position = 0u64;
        b.iter(|| {
            position += 1;
            reader.publish_timestamp(position, epoch);
        })
    });

    reader.publish_timestamp(1, Instant::now());
    group.bench_function("load", |b| b.iter(|| black_box(pipe.timestamp().unwrap())));

    group.finish();
}

criterion_group!(benches, bench_pipe_round_trip, bench_timestamp_mailbox);
criterion_main!(benches);
