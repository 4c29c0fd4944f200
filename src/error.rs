//! Error types for the `divien` crate.
//!
//! This module defines [`DivienError`], the unified error type returned by all
//! fallible operations in the crate. Construction errors carry enough context
//! to render a human-readable message; native FFmpeg failures keep their
//! original error code so they can be rendered through FFmpeg's own
//! error-string facility.

use std::{io::Error as IoError, path::PathBuf};

use ffmpeg_next::Error as FfmpegError;
use thiserror::Error;

/// The unified error type for all `divien` operations.
///
/// Every public method that can fail returns `Result<T, DivienError>`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DivienError {
    /// A native frame or packet could not be allocated.
    #[error("Failed to allocate native frame or packet storage")]
    AllocationFailure,

    /// The input does not contain a video stream.
    #[error("No video stream found in input")]
    NoVideoStream,

    /// No decoder is available for the selected video stream's codec.
    #[error("No decoder available for codec {0}")]
    NoDecoderAvailable(String),

    /// An error code returned by the FFmpeg libraries.
    ///
    /// The message is produced by FFmpeg's error-string facility.
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] FfmpegError),

    /// A requested arena region does not fit inside the arena.
    #[error("Region [{offset}, {offset}+{len}) exceeds arena capacity {capacity}")]
    RegionOutOfBounds {
        /// First slot of the requested region.
        offset: usize,
        /// Number of slots requested.
        len: usize,
        /// Total number of slots in the arena.
        capacity: usize,
    },

    /// The decoder rejected a packet or failed while draining frames.
    #[error("Failed to decode video: {0}")]
    Decode(String),

    /// The encoder rejected a frame or failed while draining packets.
    #[error("Failed to encode chunk: {0}")]
    Encode(String),

    /// The configured encoder is not compiled into the linked FFmpeg.
    #[error("Encoder {0} is not available")]
    EncoderUnavailable(String),

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A segment file violates a frame-count invariant.
    #[error("Segment integrity violation: {0}")]
    SegmentIntegrity(String),

    /// A segment or chunk file that should exist is missing.
    #[error("Missing file {}", path.display())]
    MissingFile {
        /// Path that was expected on disk.
        path: PathBuf,
    },

    /// A worker thread panicked.
    #[error("Worker {0} panicked")]
    WorkerPanicked(usize),

    /// The run was stopped through a [`CancellationToken`](crate::CancellationToken).
    #[error("Operation cancelled")]
    Cancelled,

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] IoError),
}

impl DivienError {
    /// The raw FFmpeg error code, if this error wraps one.
    pub fn native_code(&self) -> Option<i32> {
        match self {
            DivienError::Ffmpeg(error) => Some(i32::from(*error)),
            _ => None,
        }
    }

    /// Returns `true` for errors raised while opening a [`MediaHandle`](crate::MediaHandle).
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            DivienError::AllocationFailure
                | DivienError::NoVideoStream
                | DivienError::NoDecoderAvailable(_)
                | DivienError::Ffmpeg(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_code_round_trips() {
        let error = DivienError::from(FfmpegError::Eof);
        assert_eq!(error.native_code(), Some(i32::from(FfmpegError::Eof)));
        assert!(error.is_construction_error());
    }

    #[test]
    fn non_native_errors_have_no_code() {
        assert_eq!(DivienError::NoVideoStream.native_code(), None);
        assert!(!DivienError::Cancelled.is_construction_error());
    }

    #[test]
    fn region_message_names_bounds() {
        let error = DivienError::RegionOutOfBounds {
            offset: 180,
            len: 60,
            capacity: 200,
        };
        assert!(error.to_string().contains("capacity 200"));
    }
}
