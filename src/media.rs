//! The shared [`MediaHandle`]: demuxer, selected video stream, and decoder.
//!
//! Exactly one handle exists per pipeline run. It is never cloned; workers
//! reach it only through the pipeline context's lock, one at a time.

use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};

use ffmpeg_next::{
    Packet, Rational,
    codec::{Id as CodecId, context::Context as CodecContext, decoder::Decoder},
    decoder::Video as VideoDecoder,
    format::context::Input,
    media::Type,
};

use crate::error::DivienError;

/// Decoder lifecycle: built at open time, opened on first decode.
pub(crate) enum DecoderSlot {
    Pending { decoder: Decoder, codec_id: CodecId },
    Open(VideoDecoder),
    /// Opening failed; the handle can no longer decode.
    Failed,
}

/// Exclusive owner of the native demux/decode resources for one input.
///
/// Fields are declared in release order: the scratch packet goes first, then
/// the decoder, then the demuxer. The frame arena is owned by the pipeline
/// and is always dropped before the handle.
pub struct MediaHandle {
    pub(crate) packet: Packet,
    pub(crate) decoder: DecoderSlot,
    pub(crate) input: Input,
    pub(crate) stream_index: usize,
    pub(crate) time_base: Rational,
    pub(crate) codec_name: &'static str,
    /// Set once the demuxer hit end of input and the decoder was flushed.
    pub(crate) flushed: bool,
    pub(crate) path: PathBuf,
}

impl Debug for MediaHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("MediaHandle")
            .field("path", &self.path)
            .field("stream_index", &self.stream_index)
            .field("codec", &self.codec_name)
            .field("decoder_open", &self.is_decoder_open())
            .field("flushed", &self.flushed)
            .finish_non_exhaustive()
    }
}

impl MediaHandle {
    /// Open `path`, select its first video stream, and prepare a decoder.
    ///
    /// The decoder's thread count is left to FFmpeg (0 = automatic). The
    /// decoder itself is opened lazily by the first
    /// [`decode_into`](MediaHandle::decode_into) call.
    ///
    /// # Errors
    ///
    /// - [`DivienError::AllocationFailure`] if the scratch packet cannot be
    ///   allocated.
    /// - [`DivienError::Ffmpeg`] if probing fails (including a missing file)
    ///   or the decoder context cannot be built.
    /// - [`DivienError::NoVideoStream`] if no stream is video.
    /// - [`DivienError::NoDecoderAvailable`] if FFmpeg has no decoder for the
    ///   stream's codec.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DivienError> {
        let path = path.as_ref();
        log::debug!("Opening media handle: {}", path.display());

        crate::ffmpeg::init()?;

        let packet = Packet::empty();
        // SAFETY: only the pointer value is inspected.
        if unsafe { packet.as_ptr() }.is_null() {
            return Err(DivienError::AllocationFailure);
        }

        let input = ffmpeg_next::format::input(&path)?;

        let stream = input
            .streams()
            .find(|stream| stream.parameters().medium() == Type::Video)
            .ok_or(DivienError::NoVideoStream)?;
        let stream_index = stream.index();
        let time_base = stream.time_base();
        let parameters = stream.parameters();
        let codec_id = parameters.id();

        if ffmpeg_next::decoder::find(codec_id).is_none() {
            return Err(DivienError::NoDecoderAvailable(codec_id.name().to_string()));
        }

        let mut context = CodecContext::from_parameters(parameters)?;
        // SAFETY: the context is exclusively owned and not yet opened.
        unsafe {
            (*context.as_mut_ptr()).thread_count = 0;
        }
        let decoder = context.decoder();

        log::info!(
            "Selected video stream {stream_index} ({}) in {}",
            codec_id.name(),
            path.display(),
        );

        Ok(Self {
            packet,
            decoder: DecoderSlot::Pending { decoder, codec_id },
            input,
            stream_index,
            time_base,
            codec_name: codec_id.name(),
            flushed: false,
            path: path.to_path_buf(),
        })
    }

    /// Index of the selected video stream.
    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    /// Time base of the selected video stream.
    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    /// Name of the source codec.
    pub fn codec_name(&self) -> &'static str {
        self.codec_name
    }

    /// Path the handle was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the decoder has been opened by a decode call.
    pub fn is_decoder_open(&self) -> bool {
        matches!(self.decoder, DecoderSlot::Open(_))
    }

    /// Whether the demuxer is exhausted and the decoder has been flushed.
    pub fn is_flushed(&self) -> bool {
        self.flushed
    }
}

impl DecoderSlot {
    /// Open the decoder if it has not been opened yet.
    ///
    /// Opening happens once per handle; a failed open leaves the slot
    /// permanently [`Failed`](DecoderSlot::Failed).
    pub(crate) fn ensure_open(&mut self) -> Result<&mut VideoDecoder, DivienError> {
        if let DecoderSlot::Pending { .. } = self {
            *self = match std::mem::replace(self, DecoderSlot::Failed) {
                DecoderSlot::Pending { decoder, codec_id } => {
                    let codec = ffmpeg_next::decoder::find(codec_id).ok_or_else(|| {
                        DivienError::NoDecoderAvailable(codec_id.name().to_string())
                    })?;
                    let opened = decoder.open_as(codec)?.video()?;
                    log::debug!("Opened {} decoder", codec.name());
                    DecoderSlot::Open(opened)
                }
                other => other,
            };
        }

        match self {
            DecoderSlot::Open(decoder) => Ok(decoder),
            _ => Err(DivienError::Decode(
                "decoder failed to open earlier".to_string(),
            )),
        }
    }
}
