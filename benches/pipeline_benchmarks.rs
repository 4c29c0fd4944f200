//! Benchmarks for the worker pool, decode stepper, and segment counting.
//!
//! Run with: cargo bench
//!
//! Fixture-backed benchmarks need `tests/fixtures/generate_fixtures.sh`.

use std::{path::Path, time::Duration};

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use divien::{
    Chunk, ChunkSink, DivienError, FfmpegLogLevel, FrameArena, FrameSource, MediaHandle,
    PipelineConfig, ProgressState, WorkerPool, count_segment, set_ffmpeg_log_level,
};
use ffmpeg_next::frame::Video as VideoFrame;

const SAMPLE_VIDEO: &str = "tests/fixtures/sample_video.mp4";

struct Synthetic {
    remaining: u64,
}

impl FrameSource for Synthetic {
    type Frame = u64;

    fn fill(&mut self, slots: &mut [u64]) -> Result<usize, DivienError> {
        let produced = slots.len().min(self.remaining as usize);
        for (index, slot) in slots[..produced].iter_mut().enumerate() {
            *slot = index as u64;
        }
        self.remaining -= produced as u64;
        Ok(produced)
    }
}

/// Burns a little CPU per frame, standing in for an encoder.
struct Busy;

impl ChunkSink<u64> for Busy {
    fn encode_chunk(&self, chunk: Chunk<'_, u64>, progress: &ProgressState) -> Result<u64, DivienError> {
        for frame in chunk.frames.iter() {
            std::hint::black_box((0..2_000_u64).fold(*frame, |acc, x| acc.wrapping_mul(31) ^ x));
            progress.record_encoded();
        }
        Ok(chunk.frames.len() as u64)
    }
}

fn benchmark_worker_pool(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("worker pool (synthetic)");
    for workers in [1, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |bencher, &workers| {
            let config = PipelineConfig::new()
                .with_workers(workers)
                .with_chunk_size(60)
                .with_progress_interval(Duration::from_millis(1));
            let pool = WorkerPool::new(&config);
            bencher.iter(|| {
                let mut arena = FrameArena::with_slots(workers, 60, || Ok(0)).unwrap();
                pool.run(Synthetic { remaining: 6_000 }, &mut arena, &Busy).unwrap()
            });
        });
    }
    group.finish();
}

fn benchmark_decode_stepper(criterion: &mut Criterion) {
    set_ffmpeg_log_level(FfmpegLogLevel::Error);
    if !Path::new(SAMPLE_VIDEO).exists() {
        eprintln!("Skipping benchmark: fixture not found");
        return;
    }

    criterion.bench_function("decode whole file in 60-frame chunks", |bencher| {
        let mut slots: Vec<VideoFrame> = (0..60).map(|_| VideoFrame::empty()).collect();
        bencher.iter(|| {
            let mut handle = MediaHandle::open(SAMPLE_VIDEO).unwrap();
            while handle.decode_into(&mut slots).unwrap() > 0 {}
        });
    });

    criterion.bench_function("count segment frames", |bencher| {
        bencher.iter(|| count_segment(SAMPLE_VIDEO).unwrap());
    });
}

criterion_group!(benches, benchmark_worker_pool, benchmark_decode_stepper);
criterion_main!(benches);
