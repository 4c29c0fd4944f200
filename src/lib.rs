//! # divien
//!
//! Parallel chunked video transcoding: one shared decoder, a pool of
//! independent encoders, deterministic reassembly.
//!
//! A single [`MediaHandle`] demuxes and decodes the input. Workers take
//! turns decoding a fixed-size chunk of frames into their own region of a
//! pre-allocated [`FrameArena`], then release the decoder and encode the
//! chunk to its own file while the next worker decodes. Chunk ids are issued
//! in decode order, so the final file is rebuilt by concatenating chunk files
//! by id. Powered by FFmpeg via the
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next) crate.
//!
//! ## Quick Start
//!
//! ### Transcode a File
//!
//! ```no_run
//! use divien::{Pipeline, PipelineConfig};
//!
//! let config = PipelineConfig::new()
//!     .with_workers(8)
//!     .with_chunk_size(60)
//!     .with_output_directory("out");
//! let summary = Pipeline::new(config).run("input.mp4").unwrap();
//! println!("wrote {}", summary.output.display());
//! ```
//!
//! ### Segment, Then Check the Segments
//!
//! ```no_run
//! use divien::{RepairMode, SegmentRepair, segment_video};
//!
//! let summary = segment_video("input.mp4", "segments", 10.0).unwrap();
//! let report = SegmentRepair::new("segments", summary.paths.len())
//!     .mode(RepairMode::Merge)
//!     .source("input.mp4")
//!     .timestamps(summary.timestamps)
//!     .run()
//!     .unwrap();
//! println!("{} broken segments", report.broken.len());
//! ```
//!
//! ## Features
//!
//! - **Shared decoder**: one demuxer/decoder pair, serialised behind a lock
//! - **Frame arena**: all frame slots allocated once, lent to workers as
//!   disjoint regions
//! - **Parallel encoders**: one encoder per chunk, configured through named
//!   private options (libaom-av1 constant quality by default)
//! - **Lock-free progress**: atomic counters polled by a monitor thread
//! - **Cancellation**: [`CancellationToken`] checked between chunks
//! - **Segment repair**: count decodable frames per segment, track packet
//!   offsets, merge broken boundaries
//!
//! ### Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `rayon` | Segment counting spread across rayon threads |
//! | `full` | Enables all of the above |
//!
//! ## Requirements
//!
//! FFmpeg development libraries must be installed, with the configured
//! encoder (`libaom-av1` by default) compiled in.

pub mod arena;
pub mod assemble;
pub mod config;
mod decode;
pub mod encode;
pub mod error;
pub mod ffmpeg;
pub mod media;
pub mod pipeline;
pub mod pool;
pub mod progress;
#[cfg(feature = "rayon")]
mod rayon;
pub mod remux;
pub mod repair;
pub mod segment;

pub use arena::FrameArena;
pub use assemble::{chunk_paths, concat_files};
pub use config::{EncoderOptions, PipelineConfig, chunk_file_name};
pub use encode::{ChunkEncoder, normalize_pixel_format};
pub use error::DivienError;
pub use ffmpeg::{FfmpegLogLevel, set_ffmpeg_log_level};
pub use media::MediaHandle;
pub use pipeline::{Pipeline, PipelineSummary};
pub use pool::{
    Chunk, ChunkRecord, ChunkSink, ClaimOutcome, FrameSource, PipelineContext, PoolReport,
    WorkerExit, WorkerPool, WorkerReport,
};
pub use progress::{CancellationToken, ProgressCallback, ProgressInfo, ProgressState, compute_fps};
pub use remux::{concat_segments, concat_segments_restoring};
pub use repair::{
    MergedSegment, RepairMode, SegmentCounts, SegmentRecord, SegmentRepair, SegmentReport,
    count_segment, count_segments, count_video_packets, merge_plan, packet_offsets,
    verify_packet_total,
};
pub use segment::{
    PacketTimestamp, SegmentSummary, TimestampTable, merged_segment_file_name, read_timestamps,
    segment_file_name, segment_paths, segment_video,
};
