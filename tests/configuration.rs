//! PipelineConfig and EncoderOptions tests.

use std::path::Path;
use std::time::Duration;

use divien::{DivienError, EncoderOptions, PipelineConfig, chunk_file_name};

// ── EncoderOptions ───────────────────────────────────────────────

#[test]
fn encoder_defaults_target_constant_quality_av1() {
    let options = EncoderOptions::default();
    assert_eq!(options.codec, "libaom-av1");
    assert_eq!(options.frames_per_second, 25);
    assert_eq!(options.threads, 1);
    let keys: Vec<&str> = options.options.iter().map(|(key, _)| key.as_str()).collect();
    assert_eq!(keys, ["cpu-used", "end-usage", "enable-qm", "cq-level"]);
}

#[test]
fn with_option_replaces_existing_key() {
    let options = EncoderOptions::default()
        .with_option("cq-level", "30")
        .with_option("tiles", "2x2");
    assert_eq!(options.options.len(), 5);
    assert!(options.options.contains(&("cq-level".to_string(), "30".to_string())));
    assert_eq!(options.options.last().unwrap().0, "tiles");
}

#[test]
fn clear_options_empties_the_list() {
    let options = EncoderOptions::default().clear_options().with_codec("mpeg4");
    assert!(options.options.is_empty());
    assert_eq!(options.codec, "mpeg4");
}

// ── PipelineConfig ───────────────────────────────────────────────

#[test]
fn pipeline_defaults() {
    let config = PipelineConfig::new();
    assert!(config.workers() >= 1);
    assert_eq!(config.chunk_size(), 60);
    assert_eq!(config.output_path(), Path::new(".").join("output.mp4"));
    assert!(config.validate().is_ok());

    let debug = format!("{config:?}");
    assert!(debug.contains("PipelineConfig"));
    assert!(debug.contains("cancelled: false"));
}

#[test]
fn chunk_files_are_named_by_id() {
    assert_eq!(chunk_file_name(0), "file 0.mp4");
    assert_eq!(chunk_file_name(42), "file 42.mp4");

    let config = PipelineConfig::new().with_output_directory("out");
    assert_eq!(config.chunk_path(3), Path::new("out").join("file 3.mp4"));
}

#[test]
fn arena_capacity_is_workers_times_chunk_size() {
    let config = PipelineConfig::new().with_workers(4).with_chunk_size(60);
    assert_eq!(config.arena_capacity().unwrap(), 240);

    let overflow = PipelineConfig::new().with_workers(usize::MAX).with_chunk_size(2);
    assert!(matches!(
        overflow.arena_capacity(),
        Err(DivienError::InvalidConfiguration(_))
    ));
    assert!(overflow.validate().is_err());
}

#[test]
fn validate_rejects_unusable_values() {
    let cases = [
        PipelineConfig::new().with_workers(0),
        PipelineConfig::new().with_chunk_size(0),
        PipelineConfig::new().with_encoder(EncoderOptions::default().with_frames_per_second(0)),
        PipelineConfig::new().with_encoder(EncoderOptions::default().with_codec("")),
        PipelineConfig::new().with_encoder(EncoderOptions::default().with_threads(usize::MAX)),
        PipelineConfig::new().with_output_name(""),
    ];
    for config in cases {
        assert!(
            matches!(config.validate(), Err(DivienError::InvalidConfiguration(_))),
            "{config:?} should be rejected"
        );
    }
}

#[test]
fn builder_keeps_progress_interval() {
    let config = PipelineConfig::new().with_progress_interval(Duration::from_millis(250));
    assert!(format!("{config:?}").contains("250ms"));
}
