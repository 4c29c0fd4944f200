//! The controller: open, decode and encode in parallel, then assemble.
//!
//! # Example
//!
//! ```no_run
//! use divien::{DivienError, Pipeline, PipelineConfig};
//!
//! let summary = Pipeline::new(PipelineConfig::new().with_workers(4))
//!     .run("input.mp4")?;
//! println!("{} frames in {} chunks", summary.frames_decoded, summary.chunks);
//! # Ok::<(), DivienError>(())
//! ```

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::arena::FrameArena;
use crate::assemble;
use crate::config::PipelineConfig;
use crate::encode::ChunkEncoder;
use crate::error::DivienError;
use crate::media::MediaHandle;
use crate::pool::{ChunkRecord, WorkerPool};

/// Outcome of a successful pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineSummary {
    /// Number of chunks produced.
    pub chunks: u64,
    /// Frames decoded from the source.
    pub frames_decoded: u64,
    /// Packets written across all chunk files.
    pub packets_encoded: u64,
    /// Size of the assembled output.
    pub bytes_written: u64,
    /// Path of the assembled output.
    pub output: PathBuf,
    /// Per-chunk records, in id order.
    pub chunk_records: Vec<ChunkRecord>,
    /// Wall-clock time of the whole run.
    pub elapsed: Duration,
}

/// Runs one input through the worker pool and assembles the result.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a pipeline with `config`.
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// The configuration this pipeline runs with.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Transcode `input` into chunk files, then concatenate them in chunk-id
    /// order into the configured output file.
    ///
    /// Nothing is assembled unless every worker reached the end of the
    /// stream cleanly.
    ///
    /// # Errors
    ///
    /// - [`DivienError::InvalidConfiguration`] for an unusable config.
    /// - Any construction error from [`MediaHandle::open`].
    /// - [`DivienError::EncoderUnavailable`] if the encoder is missing.
    /// - The first decode or encode error raised by a worker.
    /// - [`DivienError::Cancelled`] if the run was cancelled.
    pub fn run<P: AsRef<Path>>(&self, input: P) -> Result<PipelineSummary, DivienError> {
        let started = Instant::now();
        self.config.validate()?;
        std::fs::create_dir_all(&self.config.output_directory)?;

        let encoder = ChunkEncoder::new(&self.config)?;
        // Declared before the arena so the frames are released first.
        let mut handle = MediaHandle::open(input)?;
        let mut arena = FrameArena::allocate(self.config.workers(), self.config.chunk_size())?;

        let report = WorkerPool::new(&self.config).run(&mut handle, &mut arena, &encoder)?;
        drop(arena);
        drop(handle);

        log::info!(
            "Encoded {} frames into {} chunks ({} packets)",
            report.frames_decoded,
            report.chunks.len(),
            report.packets_encoded,
        );

        let paths = assemble::chunk_paths(&self.config, report.chunks_issued);
        let output = self.config.output_path();
        let bytes_written = assemble::concat_files(&paths, &output)?;

        Ok(PipelineSummary {
            chunks: report.chunks_issued,
            frames_decoded: report.frames_decoded,
            packets_encoded: report.packets_encoded,
            bytes_written,
            output,
            chunk_records: report.chunks,
            elapsed: started.elapsed(),
        })
    }
}
