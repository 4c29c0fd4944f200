//! Progress tracking, reporting, and cancellation.
//!
//! Workers never take a lock to report progress. Each successfully drained
//! encoder packet bumps one shared [`AtomicU64`], and each worker sets its own
//! completion flag exactly once when it stops. The [`ProgressMonitor`] runs on
//! the controlling thread, samples those atomics about once per interval, and
//! turns them into [`ProgressInfo`] snapshots for a [`ProgressCallback`].
//!
//! Workers also send a wake message when they finish, which lets the monitor
//! print a final line promptly. The message is only a hint: the monitor stops
//! when every completion flag reads `true`, never because a message arrived.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use divien::{PipelineConfig, ProgressCallback, ProgressInfo};
//!
//! struct PrintProgress;
//!
//! impl ProgressCallback for PrintProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         println!(
//!             "frame= {}  ({:.0} fps curr, {:.1} fps avg)",
//!             info.packets_encoded, info.instantaneous_fps, info.average_fps,
//!         );
//!     }
//! }
//!
//! let config = PipelineConfig::new().with_progress(Arc::new(PrintProgress));
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
    mpsc::{Receiver, RecvTimeoutError},
};
use std::thread;
use std::time::{Duration, Instant};

/// Shared counters written by workers and read by the monitor.
///
/// Initialised to zero/false before the pool starts and never reset during a
/// run.
#[derive(Debug)]
pub struct ProgressState {
    packets_encoded: AtomicU64,
    finished: Box<[AtomicBool]>,
}

impl ProgressState {
    /// Create state for `workers` workers, all unfinished.
    pub fn new(workers: usize) -> Self {
        Self {
            packets_encoded: AtomicU64::new(0),
            finished: (0..workers).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    /// Count one encoded packet.
    pub fn record_encoded(&self) {
        self.packets_encoded.fetch_add(1, Ordering::Relaxed);
    }

    /// Total encoded packets so far. Monotonically non-decreasing.
    pub fn packets_encoded(&self) -> u64 {
        self.packets_encoded.load(Ordering::Relaxed)
    }

    /// Mark `worker` as permanently finished.
    ///
    /// Must happen before the worker sends its wake message.
    pub(crate) fn mark_finished(&self, worker: usize) {
        if let Some(flag) = self.finished.get(worker) {
            let was_set = flag.swap(true, Ordering::Release);
            debug_assert!(!was_set, "worker {worker} finished twice");
        }
    }

    /// Whether `worker` has stopped.
    pub fn is_finished(&self, worker: usize) -> bool {
        self.finished
            .get(worker)
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    /// Number of workers whose completion flag is set.
    pub fn finished_count(&self) -> usize {
        self.finished
            .iter()
            .filter(|flag| flag.load(Ordering::Acquire))
            .count()
    }

    /// Number of workers tracked.
    pub fn worker_count(&self) -> usize {
        self.finished.len()
    }

    /// `true` once every worker has set its completion flag.
    pub fn all_finished(&self) -> bool {
        self.finished.iter().all(|flag| flag.load(Ordering::Acquire))
    }
}

/// A snapshot of pipeline throughput.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressInfo {
    /// Packets encoded so far across all workers.
    pub packets_encoded: u64,
    /// Rate since the previous snapshot, using the measured wait time.
    /// `f64::INFINITY` when no time elapsed.
    pub instantaneous_fps: f64,
    /// Rate since the pipeline started.
    pub average_fps: f64,
    /// Wall-clock time since the pipeline started.
    pub elapsed: Duration,
    /// Workers that have stopped.
    pub workers_finished: usize,
    /// Total workers in the pool.
    pub worker_count: usize,
}

/// Receives periodic progress snapshots from the monitor.
///
/// Callbacks run on the controlling thread and cannot halt the pipeline. Use
/// [`CancellationToken`] to stop it.
pub trait ProgressCallback: Send + Sync {
    /// Called once per monitor tick, and once more after the last worker stops.
    fn on_progress(&self, info: &ProgressInfo);
}

/// Default callback that forwards snapshots to the `log` facade.
pub(crate) struct LogProgress;

impl ProgressCallback for LogProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        log::info!(
            "frame={} ({:.0} fps curr, {:.1} fps avg) workers done {}/{}",
            info.packets_encoded,
            info.instantaneous_fps,
            info.average_fps,
            info.workers_finished,
            info.worker_count,
        );
    }
}

/// Cooperative cancellation token backed by an [`AtomicBool`].
///
/// Workers check it before claiming a new chunk; a chunk that is already
/// being decoded or encoded always runs to completion.
///
/// ```
/// use divien::CancellationToken;
///
/// let token = CancellationToken::new();
/// let clone = token.clone();
/// clone.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, non-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Every clone observes it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Frames per second for `frames` processed over `elapsed`.
///
/// Returns `f64::INFINITY` for a zero duration instead of dividing by zero.
pub fn compute_fps(frames: u64, elapsed: Duration) -> f64 {
    if elapsed.is_zero() {
        f64::INFINITY
    } else {
        frames as f64 / elapsed.as_secs_f64()
    }
}

/// Polls [`ProgressState`] until every worker has finished.
pub(crate) struct ProgressMonitor {
    interval: Duration,
    callback: Arc<dyn ProgressCallback>,
}

impl ProgressMonitor {
    pub(crate) fn new(interval: Duration, callback: Arc<dyn ProgressCallback>) -> Self {
        Self { interval, callback }
    }

    /// Report until all completion flags are set, then return the last
    /// snapshot.
    ///
    /// `wake` carries the id of each worker as it stops. It only shortens the
    /// wait; a missed or early message never changes when this returns.
    pub(crate) fn run(&self, state: &ProgressState, wake: &Receiver<usize>) -> ProgressInfo {
        let start = Instant::now();
        let mut last_tick = start;
        let mut last_packets = 0;
        let mut senders_gone = false;

        loop {
            if senders_gone {
                thread::sleep(self.interval);
            } else {
                match wake.recv_timeout(self.interval) {
                    Ok(worker) => log::debug!("worker {worker} signalled completion"),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => senders_gone = true,
                }
            }

            // Flags first: a set flag makes that worker's counts visible.
            let done = state.all_finished();
            let now = Instant::now();
            let packets = state.packets_encoded();
            let info = ProgressInfo {
                packets_encoded: packets,
                instantaneous_fps: compute_fps(
                    packets.saturating_sub(last_packets),
                    now.duration_since(last_tick),
                ),
                average_fps: compute_fps(packets, now.duration_since(start)),
                elapsed: now.duration_since(start),
                workers_finished: state.finished_count(),
                worker_count: state.worker_count(),
            };
            self.callback.on_progress(&info);

            last_packets = packets;
            last_tick = now;

            if done {
                return info;
            }
        }
    }
}
