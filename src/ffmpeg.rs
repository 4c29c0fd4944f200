//! FFmpeg initialisation and native log verbosity.
//!
//! FFmpeg prints to stderr through its own logger, independently of the
//! [`log`](https://crates.io/crates/log) facade used by this crate. During a
//! transcode the per-frame codec chatter tends to tear the progress line, so
//! the binary usually lowers it with [`set_ffmpeg_log_level`].

use std::str::FromStr;

use ffmpeg_next::util::log::Level;

use crate::error::DivienError;

/// FFmpeg internal log verbosity, from silent to most verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfmpegLogLevel {
    /// No output at all.
    Quiet,
    /// Unrecoverable errors only.
    Fatal,
    /// Recoverable errors.
    Error,
    /// Warnings (FFmpeg's default).
    Warning,
    /// Informational messages.
    Info,
    /// Debugging output.
    Debug,
}

impl FfmpegLogLevel {
    fn to_ffmpeg_level(self) -> Level {
        match self {
            FfmpegLogLevel::Quiet => Level::Quiet,
            FfmpegLogLevel::Fatal => Level::Fatal,
            FfmpegLogLevel::Error => Level::Error,
            FfmpegLogLevel::Warning => Level::Warning,
            FfmpegLogLevel::Info => Level::Info,
            FfmpegLogLevel::Debug => Level::Debug,
        }
    }
}

impl FromStr for FfmpegLogLevel {
    type Err = DivienError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "quiet" => Ok(FfmpegLogLevel::Quiet),
            "fatal" => Ok(FfmpegLogLevel::Fatal),
            "error" => Ok(FfmpegLogLevel::Error),
            "warning" | "warn" => Ok(FfmpegLogLevel::Warning),
            "info" => Ok(FfmpegLogLevel::Info),
            "debug" => Ok(FfmpegLogLevel::Debug),
            other => Err(DivienError::InvalidConfiguration(format!(
                "unknown FFmpeg log level: {other}"
            ))),
        }
    }
}

/// Set FFmpeg's own console verbosity. Does not affect `log` output.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    ffmpeg_next::util::log::set_level(level.to_ffmpeg_level());
}

/// Initialise the FFmpeg libraries. Safe to call any number of times.
pub(crate) fn init() -> Result<(), DivienError> {
    ffmpeg_next::init().map_err(DivienError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_level_aliases() {
        assert_eq!("WARN".parse::<FfmpegLogLevel>().ok(), Some(FfmpegLogLevel::Warning));
        assert_eq!("quiet".parse::<FfmpegLogLevel>().ok(), Some(FfmpegLogLevel::Quiet));
        assert!("chatty".parse::<FfmpegLogLevel>().is_err());
    }
}
