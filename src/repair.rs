//! Segment integrity checks and repair.
//!
//! Cutting a stream into segments at container level can leave packets at a
//! segment boundary that the segment's decoder cannot use, typically because
//! they reference pictures left behind in the previous segment. This module
//! reopens every segment, counts decodable frames against packets present,
//! and tracks the running packet offset of each segment:
//!
//! ```text
//! packet_offset[0] = 0
//! packet_offset[i] = packet_offset[i-1] + frame_count[i-1] + nb_discarded[i-1]
//! ```
//!
//! A segment with `nb_discarded > 0` is *broken*. In
//! [`RepairMode::Catalog`] broken segments are only reported. In
//! [`RepairMode::Merge`] every run of adjacent broken segments is joined with
//! the nearest healthy segment before it into `OUTPUT{first}-{last}.mp4`,
//! which is then recounted. A broken first segment has no predecessor and
//! is reported as unrepairable.
//!
//! When the source timestamps are known, either from
//! [`SegmentSummary::timestamps`](crate::SegmentSummary::timestamps) or by
//! reading the unsegmented source, a merge covering `first..=last` takes the
//! entries starting at `packet_offset[first]` and restamps every merged
//! packet with the pts/dts it had in the source.
//!
//! # Example
//!
//! ```no_run
//! use divien::{DivienError, RepairMode, SegmentRepair};
//!
//! let report = SegmentRepair::new("segments", 12)
//!     .mode(RepairMode::Merge)
//!     .source("input.mp4")
//!     .run()?;
//! for merge in &report.merges {
//!     println!("merged {}..={} -> {}", merge.first, merge.last, merge.path.display());
//! }
//! # Ok::<(), DivienError>(())
//! ```

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use ffmpeg_next::{
    codec::context::Context as CodecContext, decoder::Video as VideoDecoder,
    frame::Video as VideoFrame, media::Type,
};

use crate::error::DivienError;
use crate::remux::{concat_segments, concat_segments_restoring};
use crate::segment::{TimestampTable, merged_segment_file_name, read_timestamps, segment_paths};

/// Decodable frames and packets present in one segment file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentCounts {
    /// Frames the decoder produced.
    pub frames: u64,
    /// Video packets in the container.
    pub packets: u64,
}

impl SegmentCounts {
    /// Packets present but not decodable.
    pub fn discarded(&self) -> u64 {
        self.packets.saturating_sub(self.frames)
    }

    /// Frames plus discarded packets.
    pub fn total(&self) -> u64 {
        self.frames + self.discarded()
    }
}

/// Per-segment bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRecord {
    /// Position of the segment in the sequence.
    pub segment_index: usize,
    /// Decodable frames.
    pub frame_count: u64,
    /// Packets present but not decodable.
    pub nb_discarded: u64,
    /// Packets (decodable or not) in all earlier segments.
    pub packet_offset: u64,
    /// Segment file.
    pub path: PathBuf,
}

impl SegmentRecord {
    /// Whether the segment lost packets at its boundary.
    pub fn is_broken(&self) -> bool {
        self.nb_discarded > 0
    }
}

/// What [`SegmentRepair`] does with broken segments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RepairMode {
    /// Report broken segments and their offsets; write nothing.
    #[default]
    Catalog,
    /// Merge each broken run with its healthy predecessor and recount.
    Merge,
}

/// One merged segment written in [`RepairMode::Merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedSegment {
    /// First original segment in the merge (healthy).
    pub first: usize,
    /// Last original segment in the merge.
    pub last: usize,
    /// Merged file.
    pub path: PathBuf,
    /// Sum of decodable frames of the originals.
    pub original_frames: u64,
    /// Counts of the merged file.
    pub merged: SegmentCounts,
    /// Whether packets were restamped with their source timestamps rather
    /// than shifted end to end.
    pub timestamps_restored: bool,
}

/// Result of [`SegmentRepair::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentReport {
    /// One record per segment, in index order.
    pub records: Vec<SegmentRecord>,
    /// Indices of broken segments.
    pub broken: Vec<usize>,
    /// Broken segments with no healthy predecessor.
    pub unrepairable: Vec<usize>,
    /// Merges performed (empty in catalog mode).
    pub merges: Vec<MergedSegment>,
    /// `Σ frame_count + Σ nb_discarded`.
    pub total_packets: u64,
    /// Packets demuxed from the unsegmented source, when one was given.
    pub source_packets: Option<u64>,
}

/// Builder for a segment integrity pass.
#[derive(Debug, Clone)]
pub struct SegmentRepair {
    directory: PathBuf,
    segments: usize,
    mode: RepairMode,
    source: Option<PathBuf>,
    timestamps: Option<TimestampTable>,
}

impl SegmentRepair {
    /// Check `OUTPUT0.mp4 .. OUTPUT{segments-1}.mp4` inside `directory`.
    pub fn new<P: AsRef<Path>>(directory: P, segments: usize) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            segments,
            mode: RepairMode::default(),
            source: None,
            timestamps: None,
        }
    }

    /// Choose between cataloguing and merging.
    #[must_use]
    pub fn mode(mut self, mode: RepairMode) -> Self {
        self.mode = mode;
        self
    }

    /// Verify the grand total against the unsegmented source file. Its
    /// packet timestamps are used for merges unless a table was given.
    #[must_use]
    pub fn source<P: AsRef<Path>>(mut self, source: P) -> Self {
        self.source = Some(source.as_ref().to_path_buf());
        self
    }

    /// Source timestamps recorded while segmenting, used to restamp merges.
    #[must_use]
    pub fn timestamps(mut self, timestamps: TimestampTable) -> Self {
        self.timestamps = Some(timestamps);
        self
    }

    /// Count every segment, then catalog or merge broken ones.
    ///
    /// # Errors
    ///
    /// - [`DivienError::MissingFile`] if a segment file is missing.
    /// - [`DivienError::SegmentIntegrity`] if a segment decodes to zero
    ///   frames, if the grand total does not match the source, if the
    ///   timestamp table does not cover a merge, or if a merge loses frames.
    /// - [`DivienError::Ffmpeg`] on demux or mux failures.
    pub fn run(&self) -> Result<SegmentReport, DivienError> {
        let paths = segment_paths(&self.directory, self.segments);
        if let Some(missing) = paths.iter().find(|path| !path.is_file()) {
            return Err(DivienError::MissingFile {
                path: missing.clone(),
            });
        }

        let counts = count_segments(&paths)?;
        let records = build_records(&paths, &counts);
        let broken: Vec<usize> = records
            .iter()
            .filter(|record| record.is_broken())
            .map(|record| record.segment_index)
            .collect();
        for record in records.iter().filter(|record| record.is_broken()) {
            log::warn!(
                "Segment {} is broken: {} frames, {} discarded packets, offset {}",
                record.segment_index,
                record.frame_count,
                record.nb_discarded,
                record.packet_offset,
            );
        }

        let (runs, unrepairable) = merge_plan(&records);
        for index in &unrepairable {
            log::warn!("Segment {index} is broken and has no healthy predecessor");
        }

        let total_packets = records
            .iter()
            .map(|record| record.frame_count + record.nb_discarded)
            .sum();
        let source_table = match &self.source {
            Some(source) => {
                let table = read_timestamps(source)?;
                verify_packet_total(&records, table.len() as u64)?;
                Some(table)
            }
            None => None,
        };
        let source_packets = source_table.as_ref().map(|table| table.len() as u64);

        let mut merges = Vec::new();
        if self.mode == RepairMode::Merge {
            let timestamps = self.timestamps.as_ref().or(source_table.as_ref());
            for run in runs {
                merges.push(self.merge(&records, run, timestamps)?);
            }
        }

        log::info!(
            "Checked {} segments: {} broken, {} merged",
            records.len(),
            broken.len(),
            merges.len(),
        );
        Ok(SegmentReport {
            records,
            broken,
            unrepairable,
            merges,
            total_packets,
            source_packets,
        })
    }

    fn merge(
        &self,
        records: &[SegmentRecord],
        run: RangeInclusive<usize>,
        timestamps: Option<&TimestampTable>,
    ) -> Result<MergedSegment, DivienError> {
        let (first, last) = (*run.start(), *run.end());
        let merged_records = &records[run];
        let inputs: Vec<PathBuf> = merged_records
            .iter()
            .map(|record| record.path.clone())
            .collect();
        let original_frames = merged_records.iter().map(|record| record.frame_count).sum();
        let packets: u64 = merged_records
            .iter()
            .map(|record| record.frame_count + record.nb_discarded)
            .sum();

        let path = self.directory.join(merged_segment_file_name(first, last));
        let timestamps_restored = match timestamps {
            Some(table) => {
                let offset = records[first].packet_offset;
                let window = table.window(offset, packets).ok_or_else(|| {
                    DivienError::SegmentIntegrity(format!(
                        "no timestamps for packets {offset}..{} of segments {first}..={last} ({} recorded)",
                        offset + packets,
                        table.len()
                    ))
                })?;
                concat_segments_restoring(&inputs, &path, table.time_base, window)?;
                true
            }
            None => {
                concat_segments(&inputs, &path)?;
                false
            }
        };
        let merged = count_segment(&path)?;

        verify_merge(first, last, original_frames, merged)?;
        log::info!(
            "Merged segments {first}..={last} into {}: {original_frames} -> {} frames",
            path.display(),
            merged.frames,
        );

        Ok(MergedSegment {
            first,
            last,
            path,
            original_frames,
            merged,
            timestamps_restored,
        })
    }
}

/// A merge must decode at least as many frames as its inputs did.
fn verify_merge(
    first: usize,
    last: usize,
    original_frames: u64,
    merged: SegmentCounts,
) -> Result<(), DivienError> {
    if merged.frames < original_frames {
        return Err(DivienError::SegmentIntegrity(format!(
            "merging segments {first}..={last} lost frames ({} < {original_frames})",
            merged.frames
        )));
    }
    Ok(())
}

/// Running packet offsets: `offsets[i]` is the number of packets in all
/// segments before `i`.
pub fn packet_offsets(counts: &[SegmentCounts]) -> Vec<u64> {
    counts
        .iter()
        .scan(0, |offset, counts| {
            let current = *offset;
            *offset += counts.total();
            Some(current)
        })
        .collect()
}

fn build_records(paths: &[PathBuf], counts: &[SegmentCounts]) -> Vec<SegmentRecord> {
    paths
        .iter()
        .zip(counts)
        .zip(packet_offsets(counts))
        .enumerate()
        .map(|(segment_index, ((path, counts), packet_offset))| SegmentRecord {
            segment_index,
            frame_count: counts.frames,
            nb_discarded: counts.discarded(),
            packet_offset,
            path: path.clone(),
        })
        .collect()
}

/// Group broken segments into merge ranges.
///
/// Each maximal run `s..=e` of adjacent broken segments becomes the range
/// `s-1..=e`. A run starting at segment 0 cannot be merged; its indices are
/// returned as unrepairable instead.
pub fn merge_plan(records: &[SegmentRecord]) -> (Vec<RangeInclusive<usize>>, Vec<usize>) {
    let mut runs = Vec::new();
    let mut unrepairable = Vec::new();
    let mut index = 0;

    while index < records.len() {
        if !records[index].is_broken() {
            index += 1;
            continue;
        }
        let start = index;
        while index < records.len() && records[index].is_broken() {
            index += 1;
        }
        let end = index - 1;

        if start == 0 {
            unrepairable.extend(start..=end);
        } else {
            runs.push(start - 1..=end);
        }
    }

    (runs, unrepairable)
}

/// Check the offset chain and that `Σ frames + Σ discarded` equals the
/// packet count of the unsegmented source.
///
/// # Errors
///
/// Returns [`DivienError::SegmentIntegrity`] on any mismatch.
pub fn verify_packet_total(
    records: &[SegmentRecord],
    source_packets: u64,
) -> Result<(), DivienError> {
    for pair in records.windows(2) {
        let (previous, current) = (&pair[0], &pair[1]);
        let expected = previous.packet_offset + previous.frame_count + previous.nb_discarded;
        if current.packet_offset != expected {
            return Err(DivienError::SegmentIntegrity(format!(
                "segment {} starts at packet {} but should start at {expected}",
                current.segment_index, current.packet_offset
            )));
        }
    }

    let total: u64 = records
        .iter()
        .map(|record| record.frame_count + record.nb_discarded)
        .sum();
    if total != source_packets {
        return Err(DivienError::SegmentIntegrity(format!(
            "segments hold {total} packets but the source has {source_packets}"
        )));
    }
    Ok(())
}

/// Count every segment, in index order.
pub fn count_segments(paths: &[PathBuf]) -> Result<Vec<SegmentCounts>, DivienError> {
    #[cfg(feature = "rayon")]
    {
        crate::rayon::count_segments_parallel(paths)
    }
    #[cfg(not(feature = "rayon"))]
    {
        paths.iter().map(count_segment).collect()
    }
}

/// Decode the first video stream of `path`, counting packets and frames.
///
/// Packets the decoder rejects are counted but otherwise skipped.
///
/// # Errors
///
/// - [`DivienError::NoVideoStream`] if the file has no video stream.
/// - [`DivienError::SegmentIntegrity`] if not a single frame decodes.
/// - [`DivienError::Ffmpeg`] if the file cannot be opened or the decoder
///   cannot be built.
pub fn count_segment<P: AsRef<Path>>(path: P) -> Result<SegmentCounts, DivienError> {
    let path = path.as_ref();
    crate::ffmpeg::init()?;
    let mut input = ffmpeg_next::format::input(path)?;
    let (video_index, parameters) = input
        .streams()
        .find(|stream| stream.parameters().medium() == Type::Video)
        .map(|stream| (stream.index(), stream.parameters()))
        .ok_or(DivienError::NoVideoStream)?;

    let mut decoder = CodecContext::from_parameters(parameters)?.decoder().video()?;
    let mut frame = VideoFrame::empty();
    let mut counts = SegmentCounts::default();

    for (stream, packet) in input.packets() {
        if stream.index() != video_index {
            continue;
        }
        counts.packets += 1;
        if let Err(error) = decoder.send_packet(&packet) {
            log::debug!("{}: packet {} rejected: {error}", path.display(), counts.packets);
        }
        counts.frames += drain_frames(&mut decoder, &mut frame);
    }
    decoder.send_eof()?;
    counts.frames += drain_frames(&mut decoder, &mut frame);

    if counts.frames == 0 {
        return Err(DivienError::SegmentIntegrity(format!(
            "{} has no decodable frames ({} packets)",
            path.display(),
            counts.packets
        )));
    }
    log::debug!(
        "{}: {} frames, {} packets",
        path.display(),
        counts.frames,
        counts.packets
    );
    Ok(counts)
}

fn drain_frames(decoder: &mut VideoDecoder, frame: &mut VideoFrame) -> u64 {
    let mut frames = 0;
    while decoder.receive_frame(frame).is_ok() {
        frames += 1;
    }
    frames
}

/// Number of packets in the first video stream of `path`, by demuxing only.
///
/// # Errors
///
/// - [`DivienError::NoVideoStream`] if the file has no video stream.
/// - [`DivienError::Ffmpeg`] if the file cannot be opened.
pub fn count_video_packets<P: AsRef<Path>>(path: P) -> Result<u64, DivienError> {
    crate::ffmpeg::init()?;
    let mut input = ffmpeg_next::format::input(path.as_ref())?;
    let video_index = input
        .streams()
        .find(|stream| stream.parameters().medium() == Type::Video)
        .map(|stream| stream.index())
        .ok_or(DivienError::NoVideoStream)?;

    Ok(input
        .packets()
        .filter(|(stream, _)| stream.index() == video_index)
        .count() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(segment_index: usize, frame_count: u64, nb_discarded: u64) -> SegmentRecord {
        SegmentRecord {
            segment_index,
            frame_count,
            nb_discarded,
            packet_offset: 0,
            path: PathBuf::from(format!("OUTPUT{segment_index}.mp4")),
        }
    }

    fn with_offsets(mut records: Vec<SegmentRecord>) -> Vec<SegmentRecord> {
        let mut offset = 0;
        for record in &mut records {
            record.packet_offset = offset;
            offset += record.frame_count + record.nb_discarded;
        }
        records
    }

    #[test]
    fn offsets_accumulate_frames_and_discards() {
        let counts = [
            SegmentCounts { frames: 250, packets: 250 },
            SegmentCounts { frames: 240, packets: 250 },
            SegmentCounts { frames: 100, packets: 100 },
        ];
        assert_eq!(packet_offsets(&counts), vec![0, 250, 500]);
        assert_eq!(counts[1].discarded(), 10);
        assert!(packet_offsets(&[]).is_empty());
    }

    #[test]
    fn single_broken_segment_merges_with_predecessor() {
        let records = vec![record(0, 250, 0), record(1, 240, 10), record(2, 250, 0)];
        let (runs, unrepairable) = merge_plan(&records);
        assert_eq!(runs, vec![0..=1]);
        assert!(unrepairable.is_empty());
    }

    #[test]
    fn adjacent_broken_segments_merge_as_one_run() {
        let records = vec![
            record(0, 250, 0),
            record(1, 250, 0),
            record(2, 200, 3),
            record(3, 190, 4),
            record(4, 250, 0),
            record(5, 100, 1),
        ];
        let (runs, unrepairable) = merge_plan(&records);
        assert_eq!(runs, vec![1..=3, 4..=5]);
        assert!(unrepairable.is_empty());
    }

    #[test]
    fn broken_first_segment_is_unrepairable() {
        let records = vec![record(0, 100, 2), record(1, 90, 1), record(2, 250, 0)];
        let (runs, unrepairable) = merge_plan(&records);
        assert!(runs.is_empty());
        assert_eq!(unrepairable, vec![0, 1]);
    }

    #[test]
    fn merge_may_gain_but_never_lose_frames() {
        let merged = |frames| SegmentCounts { frames, packets: 500 };
        assert!(verify_merge(0, 1, 490, merged(500)).is_ok());
        assert!(verify_merge(0, 1, 490, merged(490)).is_ok());
        assert!(matches!(
            verify_merge(0, 1, 490, merged(489)),
            Err(DivienError::SegmentIntegrity(_))
        ));
    }

    #[test]
    fn total_must_match_source() {
        let records = with_offsets(vec![record(0, 250, 0), record(1, 240, 10)]);
        assert!(verify_packet_total(&records, 500).is_ok());
        assert!(matches!(
            verify_packet_total(&records, 499),
            Err(DivienError::SegmentIntegrity(_))
        ));
    }

    #[test]
    fn broken_offset_chain_is_rejected() {
        let mut records = with_offsets(vec![record(0, 250, 0), record(1, 240, 10)]);
        records[1].packet_offset = 249;
        assert!(matches!(
            verify_packet_total(&records, 500),
            Err(DivienError::SegmentIntegrity(_))
        ));
    }
}
