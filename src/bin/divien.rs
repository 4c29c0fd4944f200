use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use divien::{
    EncoderOptions, FfmpegLogLevel, Pipeline, PipelineConfig, ProgressCallback, ProgressInfo,
    RepairMode, SegmentRepair,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

const CLI_AFTER_HELP: &str = "Examples:\n  divien transcode input.mp4 --workers 8 --out chunks\n  divien segment input.mp4 --out segments --seconds 10\n  divien repair segments --segments 12 --merge --source input.mp4 --json\n  divien completions zsh > _divien";

#[derive(Debug, Parser)]
#[command(
    name = "divien",
    version,
    about = "Parallel chunked video transcoding and segment repair",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show debug logging (overridden by RUST_LOG).
    #[arg(long, global = true)]
    verbose: bool,

    /// Hide the live progress line.
    #[arg(long, short, global = true)]
    quiet: bool,

    /// FFmpeg log level (quiet, fatal, error, warning, info, debug).
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Decode once, encode chunks in parallel, and assemble the result.
    #[command(
        about = "Transcode a video with a pool of chunk encoders",
        after_help = "Examples:\n  divien transcode input.mp4\n  divien transcode input.mp4 --workers 4 --chunk-size 120 --option cq-level=24"
    )]
    Transcode {
        /// Input media path.
        input: PathBuf,
        /// Worker threads (defaults to the number of cores).
        #[arg(long)]
        workers: Option<usize>,
        /// Frames per chunk.
        #[arg(long, default_value_t = 60)]
        chunk_size: usize,
        /// Directory for chunk files and the assembled output.
        #[arg(long, default_value = ".")]
        out: PathBuf,
        /// File name of the assembled output.
        #[arg(long, default_value = "output.mp4")]
        output_name: String,
        /// FFmpeg encoder name.
        #[arg(long, default_value = "libaom-av1")]
        codec: String,
        /// Output frame rate.
        #[arg(long, default_value_t = 25)]
        fps: i32,
        /// Encoder threads per worker.
        #[arg(long, default_value_t = 1)]
        threads: usize,
        /// Encoder private option as KEY=VALUE; repeatable.
        #[arg(long = "option", value_parser = parse_key_value)]
        options: Vec<(String, String)>,
        /// Drop the default libaom options before applying --option.
        #[arg(long)]
        no_default_options: bool,
    },

    /// Split a video into keyframe-aligned OUTPUT{n}.mp4 segments.
    #[command(about = "Split a video into numbered segments")]
    Segment {
        /// Input media path.
        input: PathBuf,
        /// Directory receiving the segments.
        #[arg(long, default_value = ".")]
        out: PathBuf,
        /// Minimum segment length in seconds.
        #[arg(long, default_value_t = 10.0)]
        seconds: f64,
        /// Output the summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Check segment frame counts and optionally merge broken boundaries.
    #[command(
        about = "Check and repair segment boundaries",
        after_help = "Examples:\n  divien repair segments --segments 12\n  divien repair segments --segments 12 --merge --source input.mp4"
    )]
    Repair {
        /// Directory holding OUTPUT0.mp4, OUTPUT1.mp4, ...
        directory: PathBuf,
        /// Number of segments to check.
        #[arg(long)]
        segments: usize,
        /// Merge broken segments with their predecessor.
        #[arg(long)]
        merge: bool,
        /// Unsegmented source: verifies the total packet count and supplies
        /// the timestamps restored into merged segments.
        #[arg(long)]
        source: Option<PathBuf>,
        /// Output the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn parse_key_value(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, val)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), val.trim().to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got `{value}`")),
    }
}

fn progress_line(info: &ProgressInfo) -> String {
    format!(
        "frame= {}  ({:.0} fps curr, {:.1} fps avg)",
        info.packets_encoded, info.instantaneous_fps, info.average_fps
    )
}

fn shows_progress(global: &GlobalOptions) -> bool {
    !global.quiet
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .init();
}

fn apply_global_options(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(global.verbose);

    if let Some(level) = &global.log_level {
        let parsed: FfmpegLogLevel = level.parse()?;
        divien::set_ffmpeg_log_level(parsed);
    }
    Ok(())
}

struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
        bar.enable_steady_tick(Duration::from_millis(120));
        Ok(Self { bar })
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        self.bar.set_message(progress_line(info));
        if info.workers_finished == info.worker_count {
            self.bar.finish();
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    apply_global_options(&cli.global)?;

    match cli.command {
        Commands::Transcode {
            input,
            workers,
            chunk_size,
            out,
            output_name,
            codec,
            fps,
            threads,
            options,
            no_default_options,
        } => {
            let mut encoder = EncoderOptions::default()
                .with_codec(codec)
                .with_frames_per_second(fps)
                .with_threads(threads);
            if no_default_options {
                encoder = encoder.clear_options();
            }
            for (key, value) in options {
                encoder = encoder.with_option(key, value);
            }

            let mut config = PipelineConfig::new()
                .with_chunk_size(chunk_size)
                .with_output_directory(&out)
                .with_output_name(output_name)
                .with_encoder(encoder);
            if let Some(workers) = workers {
                config = config.with_workers(workers);
            }
            if shows_progress(&cli.global) {
                config = config.with_progress(Arc::new(TerminalProgress::new()?));
            }

            let summary = Pipeline::new(config).run(&input)?;
            println!(
                "{} {} frames in {} chunks -> {} ({:.1}s)",
                "done".green().bold(),
                summary.frames_decoded,
                summary.chunks,
                summary.output.display(),
                summary.elapsed.as_secs_f64(),
            );
        }
        Commands::Segment {
            input,
            out,
            seconds,
            json,
        } => {
            let summary = divien::segment_video(&input, &out, seconds)?;
            if json {
                let payload = json!({
                    "segments": summary.paths.len(),
                    "source_packets": summary.source_packets,
                    "packets_per_segment": summary.packets_per_segment,
                    "paths": summary.paths.iter().map(|path| path.display().to_string()).collect::<Vec<_>>(),
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!(
                    "{} {} segments in {} ({} video packets)",
                    "done".green().bold(),
                    summary.paths.len(),
                    out.display(),
                    summary.source_packets,
                );
            }
        }
        Commands::Repair {
            directory,
            segments,
            merge,
            source,
            json,
        } => {
            let mode = if merge {
                RepairMode::Merge
            } else {
                RepairMode::Catalog
            };
            let mut repair = SegmentRepair::new(&directory, segments).mode(mode);
            if let Some(source) = &source {
                repair = repair.source(source);
            }
            let report = repair.run()?;

            if json {
                let payload = json!({
                    "segments": report.records.iter().map(|record| json!({
                        "segment_index": record.segment_index,
                        "frame_count": record.frame_count,
                        "nb_discarded": record.nb_discarded,
                        "packet_offset": record.packet_offset,
                    })).collect::<Vec<_>>(),
                    "broken": report.broken,
                    "unrepairable": report.unrepairable,
                    "merges": report.merges.iter().map(|merge| json!({
                        "first": merge.first,
                        "last": merge.last,
                        "path": merge.path.display().to_string(),
                        "original_frames": merge.original_frames,
                        "merged_frames": merge.merged.frames,
                        "merged_discarded": merge.merged.discarded(),
                        "timestamps_restored": merge.timestamps_restored,
                    })).collect::<Vec<_>>(),
                    "total_packets": report.total_packets,
                    "source_packets": report.source_packets,
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                for record in &report.records {
                    let line = format!(
                        "{:>5}  frames={:<6} discarded={:<4} offset={}",
                        record.segment_index,
                        record.frame_count,
                        record.nb_discarded,
                        record.packet_offset,
                    );
                    if record.is_broken() {
                        println!("{}", line.yellow());
                    } else {
                        println!("{line}");
                    }
                }
                for index in &report.unrepairable {
                    eprintln!(
                        "{} segment {index} is broken and has no predecessor to merge with",
                        "warning:".yellow().bold(),
                    );
                }
                for merge in &report.merges {
                    println!(
                        "{} {}..={} -> {} ({} -> {} frames)",
                        "merged".cyan().bold(),
                        merge.first,
                        merge.last,
                        merge.path.display(),
                        merge.original_frames,
                        merge.merged.frames,
                    );
                }
                println!(
                    "{} {} segments, {} broken, {} packets",
                    "checked".green().bold(),
                    report.records.len(),
                    report.broken.len(),
                    report.total_packets,
                );
            }
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "divien", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}
