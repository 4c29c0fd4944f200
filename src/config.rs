//! Pipeline configuration.
//!
//! [`PipelineConfig`] is a builder carrying everything that used to be a
//! build-time constant: worker count, chunk size, output layout, and the
//! per-chunk encoder settings in [`EncoderOptions`].
//!
//! # Example
//!
//! ```no_run
//! use divien::{EncoderOptions, PipelineConfig};
//!
//! let config = PipelineConfig::new()
//!     .with_workers(4)
//!     .with_chunk_size(60)
//!     .with_output_directory("out")
//!     .with_encoder(EncoderOptions::default().with_option("cq-level", "24"));
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::DivienError;
use crate::progress::{CancellationToken, LogProgress, ProgressCallback};

/// Settings for the encoder built for every chunk.
///
/// Quality is driven through named encoder private options rather than a
/// generic bitrate; the defaults target libaom's constant-quality mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderOptions {
    /// FFmpeg encoder name, looked up with `avcodec_find_encoder_by_name`.
    pub codec: String,
    /// Output frame rate. The time base is `1 / frames_per_second`.
    pub frames_per_second: i32,
    /// Encoder threads per worker.
    pub threads: usize,
    /// Named private options applied when the encoder is opened, in order.
    pub options: Vec<(String, String)>,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            codec: "libaom-av1".to_string(),
            frames_per_second: 25,
            threads: 1,
            options: vec![
                ("cpu-used".to_string(), "6".to_string()),
                ("end-usage".to_string(), "q".to_string()),
                ("enable-qm".to_string(), "1".to_string()),
                ("cq-level".to_string(), "18".to_string()),
            ],
        }
    }
}

impl EncoderOptions {
    /// Set the encoder by FFmpeg name.
    #[must_use]
    pub fn with_codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = codec.into();
        self
    }

    /// Set the output frame rate.
    #[must_use]
    pub fn with_frames_per_second(mut self, fps: i32) -> Self {
        self.frames_per_second = fps;
        self
    }

    /// Set the encoder thread count per worker.
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Set a named private option, replacing any earlier value for `key`.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.options.iter_mut().find(|(existing, _)| *existing == key) {
            Some(entry) => entry.1 = value,
            None => self.options.push((key, value)),
        }
        self
    }

    /// Drop all named options, e.g. before switching to a different encoder.
    #[must_use]
    pub fn clear_options(mut self) -> Self {
        self.options.clear();
        self
    }
}

/// Configuration for a pipeline run.
#[derive(Clone)]
pub struct PipelineConfig {
    pub(crate) workers: usize,
    pub(crate) chunk_size: usize,
    pub(crate) output_directory: PathBuf,
    pub(crate) output_name: String,
    pub(crate) encoder: EncoderOptions,
    pub(crate) progress_interval: Duration,
    pub(crate) progress: Arc<dyn ProgressCallback>,
    pub(crate) cancellation: CancellationToken,
}

impl Debug for PipelineConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("PipelineConfig")
            .field("workers", &self.workers)
            .field("chunk_size", &self.chunk_size)
            .field("output_directory", &self.output_directory)
            .field("output_name", &self.output_name)
            .field("encoder", &self.encoder)
            .field("progress_interval", &self.progress_interval)
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineConfig {
    /// Defaults: one worker per available core, 60-frame chunks, output in
    /// the current directory, progress every second.
    pub fn new() -> Self {
        Self {
            workers: thread::available_parallelism().map_or(1, NonZeroUsize::get),
            chunk_size: 60,
            output_directory: PathBuf::from("."),
            output_name: "output.mp4".to_string(),
            encoder: EncoderOptions::default(),
            progress_interval: Duration::from_secs(1),
            progress: Arc::new(LogProgress),
            cancellation: CancellationToken::new(),
        }
    }

    /// Set the number of worker threads.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the number of frames decoded into each chunk.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Directory receiving chunk files and the assembled output.
    #[must_use]
    pub fn with_output_directory(mut self, directory: impl AsRef<Path>) -> Self {
        self.output_directory = directory.as_ref().to_path_buf();
        self
    }

    /// File name of the assembled output inside the output directory.
    #[must_use]
    pub fn with_output_name(mut self, name: impl Into<String>) -> Self {
        self.output_name = name.into();
        self
    }

    /// Replace the encoder settings.
    #[must_use]
    pub fn with_encoder(mut self, encoder: EncoderOptions) -> Self {
        self.encoder = encoder;
        self
    }

    /// How long the monitor waits between progress reports.
    #[must_use]
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Attach a progress callback.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Attach a cancellation token checked before each chunk claim.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Frames per chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Encoder settings.
    pub fn encoder(&self) -> &EncoderOptions {
        &self.encoder
    }

    /// Total frame slots the arena needs: `workers × chunk_size`.
    pub fn arena_capacity(&self) -> Result<usize, DivienError> {
        self.workers.checked_mul(self.chunk_size).ok_or_else(|| {
            DivienError::InvalidConfiguration(format!(
                "{} workers x {} frames overflows the frame arena",
                self.workers, self.chunk_size
            ))
        })
    }

    /// Path of the file holding chunk `chunk_id`.
    pub fn chunk_path(&self, chunk_id: u64) -> PathBuf {
        self.output_directory.join(chunk_file_name(chunk_id))
    }

    /// Path of the assembled output.
    pub fn output_path(&self) -> PathBuf {
        self.output_directory.join(&self.output_name)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), DivienError> {
        if self.workers == 0 {
            return Err(DivienError::InvalidConfiguration(
                "worker count must be at least 1".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(DivienError::InvalidConfiguration(
                "chunk size must be at least 1 frame".to_string(),
            ));
        }
        if self.encoder.frames_per_second <= 0 {
            return Err(DivienError::InvalidConfiguration(format!(
                "frame rate must be positive, got {}",
                self.encoder.frames_per_second
            )));
        }
        if i32::try_from(self.encoder.threads).is_err() {
            return Err(DivienError::InvalidConfiguration(format!(
                "encoder thread count {} is out of range",
                self.encoder.threads
            )));
        }
        if self.encoder.codec.is_empty() {
            return Err(DivienError::InvalidConfiguration(
                "encoder name is empty".to_string(),
            ));
        }
        if self.output_name.is_empty() {
            return Err(DivienError::InvalidConfiguration(
                "output file name is empty".to_string(),
            ));
        }
        self.arena_capacity().map(|_| ())
    }
}

/// Chunk files are named positionally so assembly order follows the id.
pub fn chunk_file_name(chunk_id: u64) -> String {
    format!("file {chunk_id}.mp4")
}
