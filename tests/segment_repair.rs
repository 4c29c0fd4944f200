//! Segmentation, packet-level concatenation, and segment repair tests.
//!
//! Tests require fixture files from `tests/fixtures/generate_fixtures.sh`.
//! The sample video has a closed keyframe every 2 seconds, so 2-second
//! segments are all self-contained. `broken_segments/` holds a 3-second cut
//! of `sample_no_bframes.mp4` that ignores keyframes, so its second segment
//! starts with packets that cannot be decoded.

use std::fs;
use std::path::Path;

use divien::{
    DivienError, RepairMode, SegmentRepair, TimestampTable, concat_segments, count_segment,
    count_video_packets, read_timestamps, segment_paths, segment_video,
};

fn sample_video_path() -> &'static str {
    "tests/fixtures/sample_video.mp4"
}

fn sample_audio_path() -> &'static str {
    "tests/fixtures/sample_audio.m4a"
}

fn sample_no_bframes_path() -> &'static str {
    "tests/fixtures/sample_no_bframes.mp4"
}

/// Copy the broken fixture segments into a scratch directory, so merges do
/// not write next to the fixtures. `None` when they were not generated.
fn broken_segments() -> Option<tempfile::TempDir> {
    let fixtures = segment_paths("tests/fixtures/broken_segments", 2);
    if !Path::new(sample_no_bframes_path()).exists() || !fixtures.iter().all(|path| path.exists()) {
        return None;
    }
    let dir = tempfile::tempdir().unwrap();
    for (fixture, copy) in fixtures.iter().zip(segment_paths(dir.path(), 2)) {
        fs::copy(fixture, copy).unwrap();
    }
    Some(dir)
}

fn assert_same_time(table: &TimestampTable, source: &TimestampTable, index: usize) {
    let (merged, original) = (table.seconds(index).unwrap(), source.seconds(index).unwrap());
    assert!(
        (merged - original).abs() < 1e-3,
        "packet {index}: {merged}s in the merge, {original}s in the source"
    );
}

#[test]
fn segmenting_preserves_every_packet() {
    let path = sample_video_path();
    if !Path::new(path).exists() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();

    let summary = segment_video(path, dir.path(), 2.0).expect("segmenting failed");
    assert_eq!(summary.paths.len(), 5);
    assert_eq!(summary.paths, segment_paths(dir.path(), 5));
    assert_eq!(summary.source_packets, 250);
    assert_eq!(summary.packets_per_segment.iter().sum::<u64>(), 250);
    assert_eq!(count_video_packets(path).unwrap(), 250);
    assert_eq!(summary.timestamps.len(), 250);
    assert_eq!(summary.timestamps, read_timestamps(path).unwrap());
}

#[test]
fn catalog_of_clean_segments_has_no_breaks() {
    let path = sample_video_path();
    if !Path::new(path).exists() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let summary = segment_video(path, dir.path(), 2.0).unwrap();

    let report = SegmentRepair::new(dir.path(), summary.paths.len())
        .source(path)
        .run()
        .expect("repair pass failed");

    assert!(report.broken.is_empty());
    assert!(report.merges.is_empty());
    assert_eq!(report.total_packets, 250);
    assert_eq!(report.source_packets, Some(250));

    let offsets: Vec<u64> = report.records.iter().map(|r| r.packet_offset).collect();
    assert_eq!(offsets, vec![0, 50, 100, 150, 200]);
    for pair in report.records.windows(2) {
        assert_eq!(
            pair[1].packet_offset,
            pair[0].packet_offset + pair[0].frame_count + pair[0].nb_discarded
        );
    }
}

#[test]
fn merge_mode_leaves_clean_segments_alone() {
    let path = sample_video_path();
    if !Path::new(path).exists() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let summary = segment_video(path, dir.path(), 2.0).unwrap();

    let report = SegmentRepair::new(dir.path(), summary.paths.len())
        .mode(RepairMode::Merge)
        .run()
        .unwrap();
    assert!(report.merges.is_empty());
    assert_eq!(report.source_packets, None);
}

#[test]
fn concatenated_segments_keep_all_frames() {
    let path = sample_video_path();
    if !Path::new(path).exists() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let summary = segment_video(path, dir.path(), 2.0).unwrap();

    let first = count_segment(&summary.paths[1]).unwrap();
    let second = count_segment(&summary.paths[2]).unwrap();
    let merged_path = dir.path().join("OUTPUT1-2.mp4");
    let packets = concat_segments(&summary.paths[1..=2], &merged_path).unwrap();
    let merged = count_segment(&merged_path).unwrap();

    assert_eq!(packets, first.packets + second.packets);
    assert!(merged.frames >= first.frames + second.frames);
}

#[test]
fn missing_segment_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let error = SegmentRepair::new(dir.path(), 3).run().unwrap_err();
    match error {
        DivienError::MissingFile { path } => assert_eq!(path, dir.path().join("OUTPUT0.mp4")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn audio_only_input_cannot_be_segmented() {
    let path = sample_audio_path();
    if !Path::new(path).exists() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let error = segment_video(path, dir.path(), 2.0).unwrap_err();
    assert!(matches!(error, DivienError::NoVideoStream));
}

#[test]
fn mismatched_source_fails_the_total_check() {
    let path = sample_video_path();
    if !Path::new(path).exists() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    segment_video(path, dir.path(), 2.0).unwrap();

    // Only four of the five segments: 50 packets short of the source.
    let error = SegmentRepair::new(dir.path(), 4).source(path).run().unwrap_err();
    assert!(matches!(error, DivienError::SegmentIntegrity(_)));
}

// ── Broken boundaries ────────────────────────────────────────────

#[test]
fn catalog_reports_the_broken_boundary() {
    let Some(dir) = broken_segments() else {
        return;
    };

    let report = SegmentRepair::new(dir.path(), 2)
        .source(sample_no_bframes_path())
        .run()
        .expect("catalog pass failed");

    assert_eq!(report.broken, vec![1]);
    assert!(report.unrepairable.is_empty());
    assert!(report.merges.is_empty());
    assert!(!dir.path().join("OUTPUT0-1.mp4").exists());

    let (first, second) = (&report.records[0], &report.records[1]);
    assert_eq!(first.nb_discarded, 0);
    assert_eq!(first.packet_offset, 0);
    assert!(second.nb_discarded > 0);
    assert_eq!(second.packet_offset, first.frame_count + first.nb_discarded);
    assert_eq!(report.total_packets, 250);
    assert_eq!(report.source_packets, Some(250));
}

#[test]
fn merge_joins_the_broken_segment_with_its_predecessor() {
    let Some(dir) = broken_segments() else {
        return;
    };

    let report = SegmentRepair::new(dir.path(), 2)
        .mode(RepairMode::Merge)
        .source(sample_no_bframes_path())
        .run()
        .expect("merge pass failed");

    assert_eq!(report.merges.len(), 1);
    let merge = &report.merges[0];
    assert_eq!((merge.first, merge.last), (0, 1));
    assert_eq!(merge.path, dir.path().join("OUTPUT0-1.mp4"));
    assert!(merge.timestamps_restored);
    assert_eq!(
        merge.original_frames,
        report.records[0].frame_count + report.records[1].frame_count
    );
    assert!(merge.merged.frames >= merge.original_frames);
    assert_eq!(merge.merged.packets, 250);
    assert_eq!(merge.merged.discarded(), 0);
}

#[test]
fn merged_packets_carry_source_timestamps() {
    let Some(dir) = broken_segments() else {
        return;
    };
    let source = read_timestamps(sample_no_bframes_path()).unwrap();

    let report = SegmentRepair::new(dir.path(), 2)
        .mode(RepairMode::Merge)
        .timestamps(source.clone())
        .run()
        .unwrap();
    assert_eq!(report.source_packets, None);

    let merged = read_timestamps(&report.merges[0].path).unwrap();
    assert_eq!(merged.len(), source.len());
    let boundary = report.records[1].packet_offset as usize;
    for index in [0, boundary - 1, boundary, source.len() - 1] {
        assert_same_time(&merged, &source, index);
    }
}

#[test]
fn short_timestamp_table_fails_the_merge() {
    let Some(dir) = broken_segments() else {
        return;
    };
    let mut table = read_timestamps(sample_no_bframes_path()).unwrap();
    table.packets.truncate(100);

    let error = SegmentRepair::new(dir.path(), 2)
        .mode(RepairMode::Merge)
        .timestamps(table)
        .run()
        .unwrap_err();
    assert!(matches!(error, DivienError::SegmentIntegrity(_)));
    assert!(!dir.path().join("OUTPUT0-1.mp4").exists());
}
