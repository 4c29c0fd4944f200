//! Chunk encoder: turn one chunk of decoded frames into one output file.
//!
//! A fresh encoder is built for every chunk, sized from the chunk's first
//! frame. Quality is driven through named private options (constant-quality
//! mode by default) instead of a target bitrate. Packets are appended to the
//! chunk file as raw elementary-stream bytes, in the order the encoder emits
//! them.
//!
//! # Example
//!
//! ```no_run
//! use divien::{ChunkEncoder, MediaHandle, PipelineConfig, WorkerPool, FrameArena, DivienError};
//!
//! let config = PipelineConfig::new().with_workers(2);
//! let mut handle = MediaHandle::open("input.mp4")?;
//! let mut arena = FrameArena::allocate(config.workers(), config.chunk_size())?;
//! let encoder = ChunkEncoder::new(&config)?;
//! let report = WorkerPool::new(&config).run(&mut handle, &mut arena, &encoder)?;
//! println!("{} chunks", report.chunks.len());
//! # Ok::<(), DivienError>(())
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use ffmpeg_next::{
    Dictionary, Error as FfmpegError, Packet, Rational,
    codec::{Id as CodecId, context::Context as CodecContext, encoder::video::Encoder},
    error::EAGAIN,
    format::Pixel,
    frame::Video as VideoFrame,
    picture,
    util::color::Range,
};

use crate::config::{EncoderOptions, PipelineConfig};
use crate::error::DivienError;
use crate::pool::{Chunk, ChunkSink};
use crate::progress::ProgressState;

/// Map full-range "JPEG" YUV formats to their standard equivalents.
///
/// Encoders reject the deprecated `YUVJ*` formats; the planes are laid out
/// identically, only the range flag differs. Returns the mapped format and
/// whether a mapping happened.
pub fn normalize_pixel_format(format: Pixel) -> (Pixel, bool) {
    match format {
        Pixel::YUVJ420P => (Pixel::YUV420P, true),
        Pixel::YUVJ422P => (Pixel::YUV422P, true),
        Pixel::YUVJ444P => (Pixel::YUV444P, true),
        Pixel::YUVJ440P => (Pixel::YUV440P, true),
        Pixel::YUVJ411P => (Pixel::YUV411P, true),
        other => (other, false),
    }
}

/// Encodes chunks to `file {id}.mp4` in the configured output directory.
#[derive(Debug, Clone)]
pub struct ChunkEncoder {
    options: EncoderOptions,
    codec_id: CodecId,
    output_directory: PathBuf,
}

impl ChunkEncoder {
    /// Resolve the configured encoder.
    ///
    /// # Errors
    ///
    /// Returns [`DivienError::EncoderUnavailable`] if the linked FFmpeg does
    /// not provide an encoder with that name.
    pub fn new(config: &PipelineConfig) -> Result<Self, DivienError> {
        crate::ffmpeg::init()?;
        let options = config.encoder().clone();
        let codec = ffmpeg_next::encoder::find_by_name(&options.codec)
            .ok_or_else(|| DivienError::EncoderUnavailable(options.codec.clone()))?;
        log::debug!("Using {} encoder ({})", codec.name(), codec.description());

        Ok(Self {
            codec_id: codec.id(),
            options,
            output_directory: config.output_directory.clone(),
        })
    }

    /// Encoder settings used for every chunk.
    pub fn options(&self) -> &EncoderOptions {
        &self.options
    }

    /// Codec produced by the encoder.
    pub fn codec_id(&self) -> CodecId {
        self.codec_id
    }

    fn open_encoder(&self, first: &VideoFrame) -> Result<Encoder, DivienError> {
        let codec = ffmpeg_next::encoder::find_by_name(&self.options.codec)
            .ok_or_else(|| DivienError::EncoderUnavailable(self.options.codec.clone()))?;

        let mut encoder = CodecContext::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|error| DivienError::Encode(format!("cannot create encoder: {error}")))?;

        let fps = self.options.frames_per_second;
        let (format, full_range) = normalize_pixel_format(first.format());
        encoder.set_width(first.width());
        encoder.set_height(first.height());
        encoder.set_format(format);
        if full_range {
            encoder.set_color_range(Range::JPEG);
        }
        encoder.set_time_base(Rational::new(1, fps));
        encoder.set_frame_rate(Some(Rational::new(fps, 1)));
        let threads = i32::try_from(self.options.threads).map_err(|_| {
            DivienError::InvalidConfiguration(format!(
                "{} encoder threads is more than FFmpeg accepts",
                self.options.threads
            ))
        })?;
        // SAFETY: the context is exclusively owned and not yet opened.
        unsafe {
            (*encoder.as_mut_ptr()).thread_count = threads;
        }

        let mut dictionary = Dictionary::new();
        for (key, value) in &self.options.options {
            dictionary.set(key, value);
        }

        encoder
            .open_as_with(codec, dictionary)
            .map_err(|error| DivienError::Encode(format!("cannot open {}: {error}", codec.name())))
    }
}

impl ChunkSink<VideoFrame> for ChunkEncoder {
    fn encode_chunk(
        &self,
        chunk: Chunk<'_, VideoFrame>,
        progress: &ProgressState,
    ) -> Result<u64, DivienError> {
        let Some(first) = chunk.frames.first() else {
            return Ok(0);
        };
        let mut encoder = self.open_encoder(first)?;

        let path = self.output_directory.join(crate::config::chunk_file_name(chunk.id));
        let mut output = BufWriter::new(File::create(&path)?);
        let mut packet = Packet::empty();
        let mut written = 0;

        for (index, frame) in chunk.frames.iter_mut().enumerate() {
            let (format, _) = normalize_pixel_format(frame.format());
            frame.set_format(format);
            frame.set_kind(picture::Type::None);
            frame.set_pts(Some(index as i64));

            encoder
                .send_frame(frame)
                .map_err(|error| DivienError::Encode(format!("send_frame failed: {error}")))?;
            written += drain(&mut encoder, &mut packet, &mut output, progress)?;
        }

        encoder
            .send_eof()
            .map_err(|error| DivienError::Encode(format!("flushing encoder failed: {error}")))?;
        written += drain(&mut encoder, &mut packet, &mut output, progress)?;

        output.flush()?;
        log::debug!(
            "Wrote chunk {} to {} ({} frames, {written} packets)",
            chunk.id,
            path.display(),
            chunk.frames.len(),
        );
        Ok(written)
    }
}

/// Write every packet the encoder is ready to emit.
fn drain<W: Write>(
    encoder: &mut Encoder,
    packet: &mut Packet,
    output: &mut W,
    progress: &ProgressState,
) -> Result<u64, DivienError> {
    let mut written = 0;
    loop {
        match encoder.receive_packet(packet) {
            Ok(()) => {
                if let Some(data) = packet.data() {
                    output.write_all(data)?;
                }
                progress.record_encoded();
                written += 1;
            }
            Err(FfmpegError::Eof) => return Ok(written),
            Err(FfmpegError::Other { errno }) if errno == EAGAIN => return Ok(written),
            Err(error) => {
                return Err(DivienError::Encode(format!("receive_packet failed: {error}")));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jpeg_range_formats_map_to_standard() {
        assert_eq!(normalize_pixel_format(Pixel::YUVJ420P), (Pixel::YUV420P, true));
        assert_eq!(normalize_pixel_format(Pixel::YUVJ444P), (Pixel::YUV444P, true));
        assert_eq!(normalize_pixel_format(Pixel::YUVJ411P), (Pixel::YUV411P, true));
    }

    #[test]
    fn other_formats_pass_through() {
        assert_eq!(normalize_pixel_format(Pixel::YUV420P), (Pixel::YUV420P, false));
        assert_eq!(normalize_pixel_format(Pixel::NV12), (Pixel::NV12, false));
    }
}
