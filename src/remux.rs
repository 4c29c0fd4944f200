//! Packet-level concatenation of segment files.
//!
//! Unlike the byte-level [`concat_files`](crate::concat_files), this opens
//! every input, copies the packets of its first video stream into a single
//! new container, and shifts timestamps so that each input continues where
//! the previous one ended. Nothing is re-encoded. This is equivalent to
//! `ffmpeg -f concat -i list.txt -map 0:v -c copy output.mp4`.
//!
//! [`concat_segments_restoring`] copies the same packets but stamps each one
//! with the timestamps its source packet had before segmentation.

use std::path::{Path, PathBuf};

use ffmpeg_next::{Rational, Rescale, codec::Id, format::context::Output, media::Type};

use crate::error::DivienError;
use crate::segment::PacketTimestamp;

#[derive(Clone, Copy)]
enum Timing<'a> {
    /// Shift each input to start where the previous one ended.
    Shifted,
    /// Packet `n` of the output gets `packets[n]`, expressed in `time_base`.
    Restored {
        time_base: Rational,
        packets: &'a [PacketTimestamp],
    },
}

struct Joined {
    output: Output,
    time_base: Rational,
    /// Earliest timestamp the next input may start at, in output time base.
    next_start: i64,
    packets: u64,
}

/// Concatenate the video streams of `inputs`, in order, into `output`.
///
/// The output takes its stream parameters from the first input. Returns the
/// number of packets written.
///
/// # Errors
///
/// - [`DivienError::InvalidConfiguration`] if `inputs` is empty.
/// - [`DivienError::MissingFile`] if an input does not exist.
/// - [`DivienError::NoVideoStream`] if an input has no video stream.
/// - [`DivienError::Ffmpeg`] if demuxing or muxing fails.
pub fn concat_segments<P: AsRef<Path>>(inputs: &[PathBuf], output: P) -> Result<u64, DivienError> {
    join(inputs, output.as_ref(), Timing::Shifted)
}

/// Concatenate `inputs` like [`concat_segments`], stamping the `n`-th packet
/// written with `timestamps[n]` (in `time_base`).
///
/// `timestamps` must hold exactly one entry per packet copied.
///
/// # Errors
///
/// Everything [`concat_segments`] returns, plus
/// [`DivienError::SegmentIntegrity`] if the inputs hold a different number
/// of packets than `timestamps`.
pub fn concat_segments_restoring<P: AsRef<Path>>(
    inputs: &[PathBuf],
    output: P,
    time_base: Rational,
    timestamps: &[PacketTimestamp],
) -> Result<u64, DivienError> {
    join(
        inputs,
        output.as_ref(),
        Timing::Restored {
            time_base,
            packets: timestamps,
        },
    )
}

fn join(inputs: &[PathBuf], output: &Path, timing: Timing<'_>) -> Result<u64, DivienError> {
    if inputs.is_empty() {
        return Err(DivienError::InvalidConfiguration(
            "nothing to concatenate".to_string(),
        ));
    }
    if let Some(missing) = inputs.iter().find(|path| !path.is_file()) {
        return Err(DivienError::MissingFile {
            path: missing.clone(),
        });
    }
    crate::ffmpeg::init()?;

    let mut joined: Option<Joined> = None;

    for input in inputs {
        let mut input_context = ffmpeg_next::format::input(input)?;
        let (video_index, parameters) = input_context
            .streams()
            .find(|stream| stream.parameters().medium() == Type::Video)
            .map(|stream| (stream.index(), stream.parameters()))
            .ok_or(DivienError::NoVideoStream)?;

        let target = match joined.as_mut() {
            Some(target) => target,
            None => {
                let mut output_context = ffmpeg_next::format::output(output)?;
                {
                    let mut stream =
                        output_context.add_stream(ffmpeg_next::encoder::find(Id::None))?;
                    stream.set_parameters(parameters);
                    // SAFETY: header not written yet; let the muxer choose a tag.
                    unsafe {
                        (*stream.parameters().as_mut_ptr()).codec_tag = 0;
                    }
                }
                output_context.write_header()?;
                let time_base = output_context
                    .stream(0)
                    .map(|stream| stream.time_base())
                    .ok_or_else(|| {
                        DivienError::SegmentIntegrity(format!(
                            "{} has no output stream",
                            output.display()
                        ))
                    })?;
                joined.insert(Joined {
                    output: output_context,
                    time_base,
                    next_start: 0,
                    packets: 0,
                })
            }
        };

        let mut shift = None;
        for (stream, mut packet) in input_context.packets() {
            if stream.index() != video_index {
                continue;
            }
            packet.rescale_ts(stream.time_base(), target.time_base);

            match timing {
                Timing::Shifted => {
                    let base = packet.dts().or(packet.pts()).unwrap_or(0);
                    let shift = *shift.get_or_insert(target.next_start - base);
                    packet.set_pts(packet.pts().map(|pts| pts + shift));
                    packet.set_dts(packet.dts().map(|dts| dts + shift));
                }
                Timing::Restored { time_base, packets } => {
                    let index = usize::try_from(target.packets).unwrap_or(usize::MAX);
                    let original = packets.get(index).ok_or_else(|| {
                        DivienError::SegmentIntegrity(format!(
                            "{} holds more than the {} packets with known timestamps",
                            output.display(),
                            packets.len()
                        ))
                    })?;
                    let output_base = target.time_base;
                    let to_output = |ts: i64| ts.rescale(time_base, output_base);
                    packet.set_pts(original.pts.map(to_output));
                    packet.set_dts(original.dts.map(to_output));
                }
            }

            let end = packet.dts().or(packet.pts()).unwrap_or(target.next_start)
                + packet.duration().max(1);
            target.next_start = target.next_start.max(end);

            packet.set_stream(0);
            packet.set_position(-1);
            packet.write_interleaved(&mut target.output)?;
            target.packets += 1;
        }
        log::debug!("Appended {} to {}", input.display(), output.display());
    }

    match joined {
        Some(mut target) => {
            target.output.write_trailer()?;
            if let Timing::Restored { packets, .. } = timing {
                if target.packets != packets.len() as u64 {
                    return Err(DivienError::SegmentIntegrity(format!(
                        "{} holds {} packets but {} timestamps were supplied",
                        output.display(),
                        target.packets,
                        packets.len()
                    )));
                }
            }
            log::info!(
                "Concatenated {} segments into {} ({} packets)",
                inputs.len(),
                output.display(),
                target.packets,
            );
            Ok(target.packets)
        }
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_list_is_rejected() {
        let result = concat_segments(&[], "out.mp4");
        assert!(matches!(result, Err(DivienError::InvalidConfiguration(_))));
    }

    #[test]
    fn restoring_needs_inputs_too() {
        let result = concat_segments_restoring(&[], "out.mp4", Rational::new(1, 25), &[]);
        assert!(matches!(result, Err(DivienError::InvalidConfiguration(_))));
    }

    #[test]
    fn missing_segment_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("OUTPUT0.mp4");
        let result = concat_segments(&[missing.clone()], dir.path().join("out.mp4"));
        match result {
            Err(DivienError::MissingFile { path }) => assert_eq!(path, missing),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
