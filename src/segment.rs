//! Keyframe-aligned segmentation by stream copy.
//!
//! [`segment_video`] copies the first video stream of an input into numbered
//! `OUTPUT{index}.mp4` files. A new segment starts at the first keyframe
//! whose timestamp is at least `segment_seconds` past the start of the
//! current segment. No packet is re-encoded and timestamps are kept.
//!
//! The source timestamps of every video packet are also returned as a
//! [`TimestampTable`], indexed by packet number. Segment repair uses it with
//! the per-segment packet offsets to restamp merged segments.
//!
//! # Example
//!
//! ```no_run
//! use divien::{DivienError, segment_video};
//!
//! let summary = segment_video("input.mp4", "segments", 10.0)?;
//! println!("{} segments from {} packets", summary.paths.len(), summary.source_packets);
//! # Ok::<(), DivienError>(())
//! ```

use std::path::{Path, PathBuf};

use ffmpeg_next::{Rational, codec::Id, format::context::Output, media::Type};

use crate::error::DivienError;

/// File name of segment `index`.
pub fn segment_file_name(index: usize) -> String {
    format!("OUTPUT{index}.mp4")
}

/// File name of the merged segment covering `first..=last`.
pub fn merged_segment_file_name(first: usize, last: usize) -> String {
    format!("OUTPUT{first}-{last}.mp4")
}

/// Paths of segments `0..count` inside `directory`.
pub fn segment_paths<P: AsRef<Path>>(directory: P, count: usize) -> Vec<PathBuf> {
    (0..count)
        .map(|index| directory.as_ref().join(segment_file_name(index)))
        .collect()
}

/// Source timestamps of one video packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketTimestamp {
    /// Presentation timestamp.
    pub pts: Option<i64>,
    /// Decoding timestamp.
    pub dts: Option<i64>,
}

/// Timestamps of every video packet of a source, in demux order.
#[derive(Debug, Clone, PartialEq)]
pub struct TimestampTable {
    /// Time base of the source video stream.
    pub time_base: Rational,
    /// One entry per packet; index `n` is the `n`-th video packet.
    pub packets: Vec<PacketTimestamp>,
}

impl TimestampTable {
    /// Number of packets recorded.
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Whether no packet was recorded.
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// The `count` entries starting at packet `offset`, if all are present.
    pub fn window(&self, offset: u64, count: u64) -> Option<&[PacketTimestamp]> {
        let start = usize::try_from(offset).ok()?;
        let end = start.checked_add(usize::try_from(count).ok()?)?;
        self.packets.get(start..end)
    }

    /// Presentation time of packet `index` in seconds, falling back to its
    /// decoding time.
    pub fn seconds(&self, index: usize) -> Option<f64> {
        let entry = self.packets.get(index)?;
        entry
            .pts
            .or(entry.dts)
            .map(|ts| ts as f64 * f64::from(self.time_base))
    }
}

/// Result of [`segment_video`].
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSummary {
    /// Segment files, in index order.
    pub paths: Vec<PathBuf>,
    /// Video packets written to each segment.
    pub packets_per_segment: Vec<u64>,
    /// Video packets demuxed from the source.
    pub source_packets: u64,
    /// Source timestamps of those packets.
    pub timestamps: TimestampTable,
}

struct OpenSegment {
    output: Output,
    time_base: Rational,
    start_seconds: f64,
    packets: u64,
}

impl OpenSegment {
    fn create(
        path: &Path,
        parameters: ffmpeg_next::codec::Parameters,
        start_seconds: f64,
    ) -> Result<Self, DivienError> {
        let mut output = ffmpeg_next::format::output(&path)?;
        {
            let mut stream = output.add_stream(ffmpeg_next::encoder::find(Id::None))?;
            stream.set_parameters(parameters);
            // SAFETY: the stream belongs to this output and the header is not
            // written yet; a zero tag lets the muxer pick its own.
            unsafe {
                (*stream.parameters().as_mut_ptr()).codec_tag = 0;
            }
        }
        output.write_header()?;
        let time_base = output
            .stream(0)
            .map(|stream| stream.time_base())
            .ok_or_else(|| DivienError::SegmentIntegrity(format!(
                "{} has no output stream after writing its header",
                path.display()
            )))?;

        Ok(Self {
            output,
            time_base,
            start_seconds,
            packets: 0,
        })
    }

    fn finish(mut self) -> Result<u64, DivienError> {
        self.output.write_trailer()?;
        Ok(self.packets)
    }
}

/// Split the first video stream of `input` into keyframe-aligned segments.
///
/// # Errors
///
/// - [`DivienError::InvalidConfiguration`] if `segment_seconds` is not
///   positive.
/// - [`DivienError::NoVideoStream`] if the input has no video stream.
/// - [`DivienError::Ffmpeg`] if demuxing or muxing fails.
pub fn segment_video<P: AsRef<Path>, D: AsRef<Path>>(
    input: P,
    directory: D,
    segment_seconds: f64,
) -> Result<SegmentSummary, DivienError> {
    if segment_seconds.is_nan() || segment_seconds <= 0.0 {
        return Err(DivienError::InvalidConfiguration(format!(
            "segment length must be positive, got {segment_seconds}"
        )));
    }
    crate::ffmpeg::init()?;
    let directory = directory.as_ref();
    std::fs::create_dir_all(directory)?;

    let mut input_context = ffmpeg_next::format::input(&input)?;
    let (video_index, time_base) = input_context
        .streams()
        .find(|stream| stream.parameters().medium() == Type::Video)
        .map(|stream| (stream.index(), stream.time_base()))
        .ok_or(DivienError::NoVideoStream)?;

    let mut paths = Vec::new();
    let mut packets_per_segment = Vec::new();
    let mut source_packets = 0;
    let mut timestamps = TimestampTable {
        time_base,
        packets: Vec::new(),
    };
    let mut current: Option<OpenSegment> = None;

    for (stream, mut packet) in input_context.packets() {
        if stream.index() != video_index {
            continue;
        }
        source_packets += 1;
        timestamps.packets.push(PacketTimestamp {
            pts: packet.pts(),
            dts: packet.dts(),
        });

        let input_time_base = stream.time_base();
        let seconds = packet
            .pts()
            .or(packet.dts())
            .map_or(0.0, |ts| ts as f64 * f64::from(input_time_base));

        let cut = match &current {
            None => true,
            Some(segment) => packet.is_key() && seconds - segment.start_seconds >= segment_seconds,
        };
        if cut {
            if let Some(segment) = current.take() {
                packets_per_segment.push(segment.finish()?);
            }
            let path = directory.join(segment_file_name(paths.len()));
            log::debug!("Starting segment {} at {seconds:.3}s", paths.len());
            current = Some(OpenSegment::create(&path, stream.parameters(), seconds)?);
            paths.push(path);
        }

        if let Some(segment) = current.as_mut() {
            packet.set_stream(0);
            packet.rescale_ts(input_time_base, segment.time_base);
            packet.set_position(-1);
            packet.write_interleaved(&mut segment.output)?;
            segment.packets += 1;
        }
    }

    if let Some(segment) = current.take() {
        packets_per_segment.push(segment.finish()?);
    }

    log::info!(
        "Split {} into {} segments ({source_packets} video packets)",
        input.as_ref().display(),
        paths.len(),
    );
    Ok(SegmentSummary {
        paths,
        packets_per_segment,
        source_packets,
        timestamps,
    })
}

/// Read the timestamps of every packet in the first video stream of `path`.
///
/// # Errors
///
/// - [`DivienError::NoVideoStream`] if the file has no video stream.
/// - [`DivienError::Ffmpeg`] if the file cannot be opened.
pub fn read_timestamps<P: AsRef<Path>>(path: P) -> Result<TimestampTable, DivienError> {
    crate::ffmpeg::init()?;
    let mut input = ffmpeg_next::format::input(path.as_ref())?;
    let (video_index, time_base) = input
        .streams()
        .find(|stream| stream.parameters().medium() == Type::Video)
        .map(|stream| (stream.index(), stream.time_base()))
        .ok_or(DivienError::NoVideoStream)?;

    let packets = input
        .packets()
        .filter(|(stream, _)| stream.index() == video_index)
        .map(|(_, packet)| PacketTimestamp {
            pts: packet.pts(),
            dts: packet.dts(),
        })
        .collect();
    Ok(TimestampTable { time_base, packets })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_index_pattern() {
        assert_eq!(segment_file_name(7), "OUTPUT7.mp4");
        assert_eq!(merged_segment_file_name(3, 5), "OUTPUT3-5.mp4");
        let paths = segment_paths("dir", 2);
        assert_eq!(paths[1], Path::new("dir").join("OUTPUT1.mp4"));
    }

    fn table(stamps: &[i64]) -> TimestampTable {
        TimestampTable {
            time_base: Rational::new(1, 25),
            packets: stamps
                .iter()
                .map(|&ts| PacketTimestamp {
                    pts: Some(ts),
                    dts: Some(ts),
                })
                .collect(),
        }
    }

    #[test]
    fn window_covers_whole_ranges_only() {
        let table = table(&[0, 1, 2, 3, 4]);
        assert_eq!(table.window(1, 3).map(<[_]>::len), Some(3));
        assert_eq!(table.window(2, 3).unwrap()[0].pts, Some(2));
        assert!(table.window(3, 3).is_none());
        assert!(table.window(u64::MAX, 1).is_none());
        assert_eq!(table.window(5, 0).map(<[_]>::len), Some(0));
    }

    #[test]
    fn seconds_fall_back_to_dts() {
        let mut table = table(&[0, 50]);
        assert_eq!(table.seconds(1), Some(2.0));
        table.packets[1].pts = None;
        assert_eq!(table.seconds(1), Some(2.0));
        table.packets[1].dts = None;
        assert_eq!(table.seconds(1), None);
        assert_eq!(table.seconds(9), None);
    }

    #[test]
    fn non_positive_length_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        for bad in [0.0, -1.0, f64::NAN] {
            let result = segment_video("missing.mp4", dir.path(), bad);
            assert!(matches!(result, Err(DivienError::InvalidConfiguration(_))));
        }
    }
}
