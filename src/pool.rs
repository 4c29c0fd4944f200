//! The worker pool: shared decoder, private arena regions, parallel encoders.
//!
//! Every worker repeats the same cycle:
//!
//! 1. lock the [`PipelineContext`], decode one chunk into its own arena
//!    region, and take the next chunk id while still holding the lock;
//! 2. unlock, so another worker can decode;
//! 3. encode the chunk to its own file with no shared state.
//!
//! Chunk ids therefore follow decode order exactly, while encodes overlap and
//! may finish out of id order. Assembly restores the order from the ids.
//!
//! A worker stops for good when a claim yields no frames (clean end of
//! stream), when the pool is aborted, or on its own decode/encode error. An
//! error in any worker aborts the whole pool: the others finish their
//! in-flight chunk, stop claiming, and the run reports the first error.

use std::sync::{
    Mutex,
    atomic::{AtomicBool, Ordering},
    mpsc::{self, Sender},
};
use std::thread;

use crate::arena::FrameArena;
use crate::config::PipelineConfig;
use crate::error::DivienError;
use crate::progress::{CancellationToken, ProgressInfo, ProgressMonitor, ProgressState};

/// Something that fills frame slots in sequence, such as a
/// [`MediaHandle`](crate::MediaHandle).
pub trait FrameSource: Send {
    /// Frame slot type.
    type Frame: Send;

    /// Fill up to `slots.len()` slots; return how many were filled.
    ///
    /// `Ok(0)` means the source is exhausted.
    fn fill(&mut self, slots: &mut [Self::Frame]) -> Result<usize, DivienError>;
}

impl<T: FrameSource + ?Sized> FrameSource for &mut T {
    type Frame = T::Frame;

    fn fill(&mut self, slots: &mut [Self::Frame]) -> Result<usize, DivienError> {
        (**self).fill(slots)
    }
}

/// A chunk of decoded frames ready to be encoded.
#[derive(Debug)]
pub struct Chunk<'a, F> {
    /// Globally unique, assigned in decode order.
    pub id: u64,
    /// Worker whose arena region holds the frames.
    pub worker: usize,
    /// The decoded frames, between 1 and `chunk_size` of them.
    pub frames: &'a mut [F],
}

/// Something that turns one chunk into one output file, such as a
/// [`ChunkEncoder`](crate::ChunkEncoder).
pub trait ChunkSink<F>: Sync {
    /// Encode `chunk`, calling [`ProgressState::record_encoded`] once per
    /// packet written. Returns the number of packets written.
    fn encode_chunk(&self, chunk: Chunk<'_, F>, progress: &ProgressState)
    -> Result<u64, DivienError>;
}

/// Result of one claim on the shared source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// `frames` slots were filled and chunk `id` was issued.
    Chunk {
        /// Chunk id.
        id: u64,
        /// Number of frames decoded.
        frames: usize,
    },
    /// The source produced nothing; no id was issued.
    EndOfStream,
    /// The pool was aborted or cancelled while waiting for the lock; the
    /// source was not touched and no id was issued.
    Aborted,
}

struct SourceState<S> {
    source: S,
    next_chunk_id: u64,
}

/// State shared by the controller and all workers for one run.
///
/// The source and the chunk-id counter live behind a single lock; progress
/// counters and the abort flag are atomics updated outside it.
pub struct PipelineContext<S> {
    state: Mutex<SourceState<S>>,
    progress: ProgressState,
    aborted: AtomicBool,
    cancellation: CancellationToken,
}

impl<S: FrameSource> PipelineContext<S> {
    /// Create a context for `workers` workers over `source`.
    pub fn new(source: S, workers: usize, cancellation: CancellationToken) -> Self {
        Self {
            state: Mutex::new(SourceState {
                source,
                next_chunk_id: 0,
            }),
            progress: ProgressState::new(workers),
            aborted: AtomicBool::new(false),
            cancellation,
        }
    }

    /// Decode one chunk into `region` under the lock and, if any frame was
    /// produced, issue the next chunk id before unlocking.
    ///
    /// Returns [`ClaimOutcome::Aborted`] without decoding if the pool was
    /// stopped by the time the lock was acquired.
    pub fn claim(&self, region: &mut [S::Frame]) -> Result<ClaimOutcome, DivienError> {
        let mut state = self.state.lock().map_err(|_| {
            DivienError::Decode("media handle lock poisoned by a panicked worker".to_string())
        })?;
        // Another worker may have failed while this one waited.
        if self.should_stop() {
            return Ok(ClaimOutcome::Aborted);
        }

        let frames = state.source.fill(region)?;
        if frames == 0 {
            return Ok(ClaimOutcome::EndOfStream);
        }
        debug_assert!(frames <= region.len());

        let id = state.next_chunk_id;
        state.next_chunk_id += 1;
        Ok(ClaimOutcome::Chunk { id, frames })
    }

    /// Shared progress counters.
    pub fn progress(&self) -> &ProgressState {
        &self.progress
    }

    /// Number of chunk ids issued so far.
    pub fn chunks_issued(&self) -> u64 {
        self.state
            .lock()
            .map_or_else(|poisoned| poisoned.into_inner().next_chunk_id, |state| state.next_chunk_id)
    }

    /// Stop all workers from claiming further chunks.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    fn should_stop(&self) -> bool {
        self.aborted.load(Ordering::Acquire) || self.cancellation.is_cancelled()
    }
}

/// One encoded chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRecord {
    /// Chunk id, which also names its file.
    pub id: u64,
    /// Worker that produced it.
    pub worker: usize,
    /// Decoded frames in the chunk.
    pub frames: usize,
    /// Encoded packets written for it.
    pub packets: u64,
}

/// Why a worker stopped.
#[derive(Debug)]
pub enum WorkerExit {
    /// A claim produced no frames.
    EndOfStream,
    /// The pool was aborted or cancelled before or during the next claim.
    Aborted,
    /// This worker's decode or encode failed.
    Failed(DivienError),
}

/// Everything one worker did.
#[derive(Debug)]
pub struct WorkerReport {
    /// Worker index.
    pub worker: usize,
    /// Chunks it encoded, in the order it encoded them.
    pub chunks: Vec<ChunkRecord>,
    /// Why it stopped.
    pub exit: WorkerExit,
}

/// Summary of a completed pool run.
#[derive(Debug)]
pub struct PoolReport {
    /// All chunks, sorted by id.
    pub chunks: Vec<ChunkRecord>,
    /// Chunk ids issued.
    pub chunks_issued: u64,
    /// Sum of decoded frames over all chunks.
    pub frames_decoded: u64,
    /// Final value of the shared progress counter.
    pub packets_encoded: u64,
    /// Last snapshot produced by the monitor.
    pub last_progress: ProgressInfo,
}

/// Sets the worker's completion flag, then wakes the monitor, even if the
/// worker unwinds.
struct FinishGuard<'a> {
    progress: &'a ProgressState,
    worker: usize,
    wake: Sender<usize>,
}

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.progress.mark_finished(self.worker);
        let _ = self.wake.send(self.worker);
    }
}

fn worker_loop<S, K>(
    context: &PipelineContext<S>,
    worker: usize,
    region: &mut [S::Frame],
    sink: &K,
    wake: Sender<usize>,
) -> WorkerReport
where
    S: FrameSource,
    K: ChunkSink<S::Frame>,
{
    let _finish = FinishGuard {
        progress: &context.progress,
        worker,
        wake,
    };
    let mut chunks = Vec::new();

    let exit = loop {
        if context.should_stop() {
            break WorkerExit::Aborted;
        }

        let (id, frames) = match context.claim(region) {
            Ok(ClaimOutcome::Chunk { id, frames }) => (id, frames),
            Ok(ClaimOutcome::EndOfStream) => break WorkerExit::EndOfStream,
            Ok(ClaimOutcome::Aborted) => break WorkerExit::Aborted,
            Err(error) => {
                context.abort();
                break WorkerExit::Failed(error);
            }
        };
        log::debug!("worker {worker}: decoded chunk {id} ({frames} frames)");

        let chunk = Chunk {
            id,
            worker,
            frames: &mut region[..frames],
        };
        match sink.encode_chunk(chunk, &context.progress) {
            Ok(packets) => {
                log::debug!("worker {worker}: encoded chunk {id} ({packets} packets)");
                chunks.push(ChunkRecord {
                    id,
                    worker,
                    frames,
                    packets,
                });
            }
            Err(error) => {
                log::error!("worker {worker}: chunk {id} failed: {error}");
                context.abort();
                break WorkerExit::Failed(error);
            }
        }
    };

    WorkerReport {
        worker,
        chunks,
        exit,
    }
}

/// Runs a fixed number of workers over one shared source.
pub struct WorkerPool {
    monitor: ProgressMonitor,
    cancellation: CancellationToken,
}

impl WorkerPool {
    /// Build a pool using the progress and cancellation settings of `config`.
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            monitor: ProgressMonitor::new(config.progress_interval, config.progress.clone()),
            cancellation: config.cancellation.clone(),
        }
    }

    /// Run one worker per arena region until the source is exhausted.
    ///
    /// The calling thread runs the progress monitor, then joins every worker
    /// once all completion flags are set.
    ///
    /// # Errors
    ///
    /// - The first worker error, in worker order, if any worker failed.
    /// - [`DivienError::WorkerPanicked`] if a worker panicked.
    /// - [`DivienError::Cancelled`] if the cancellation token stopped the run.
    pub fn run<S, K>(
        &self,
        source: S,
        arena: &mut FrameArena<S::Frame>,
        sink: &K,
    ) -> Result<PoolReport, DivienError>
    where
        S: FrameSource,
        K: ChunkSink<S::Frame>,
    {
        let context = PipelineContext::new(source, arena.workers(), self.cancellation.clone());
        let context = &context;
        let (wake_tx, wake_rx) = mpsc::channel();

        log::info!(
            "Starting {} workers, {} frames per chunk",
            arena.workers(),
            arena.chunk_size()
        );

        let (joined, last_progress) = thread::scope(|scope| {
            let handles: Vec<_> = arena
                .regions_mut()
                .enumerate()
                .map(|(worker, region)| {
                    let wake = wake_tx.clone();
                    scope.spawn(move || worker_loop(context, worker, region, sink, wake))
                })
                .collect();
            drop(wake_tx);

            let last_progress = self.monitor.run(&context.progress, &wake_rx);

            let joined: Vec<_> = handles
                .into_iter()
                .enumerate()
                .map(|(worker, handle)| handle.join().map_err(|_| worker))
                .collect();
            (joined, last_progress)
        });

        let mut chunks = Vec::new();
        let mut failure = None;
        for result in joined {
            match result {
                Ok(report) => {
                    chunks.extend(report.chunks);
                    if let WorkerExit::Failed(error) = report.exit {
                        failure.get_or_insert(error);
                    }
                }
                Err(worker) => {
                    failure.get_or_insert(DivienError::WorkerPanicked(worker));
                }
            }
        }
        if let Some(error) = failure {
            return Err(error);
        }
        if self.cancellation.is_cancelled() {
            return Err(DivienError::Cancelled);
        }

        chunks.sort_by_key(|chunk| chunk.id);
        let chunks_issued = context.chunks_issued();
        debug_assert!(
            chunks
                .iter()
                .enumerate()
                .all(|(index, chunk)| chunk.id == index as u64),
            "chunk ids must be contiguous from zero"
        );

        Ok(PoolReport {
            frames_decoded: chunks.iter().map(|chunk| chunk.frames as u64).sum(),
            packets_encoded: context.progress.packets_encoded(),
            chunks,
            chunks_issued,
            last_progress,
        })
    }
}
