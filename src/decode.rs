//! The decode stepper: fill a run of frame slots from the shared decoder.
//!
//! [`MediaHandle::decode_into`] alternates between draining frames the
//! decoder already buffered and feeding it the next demuxed packet, until
//! the target slots are full or the input is exhausted. It takes no locks;
//! callers serialise access to the handle.

use ffmpeg_next::{Error as FfmpegError, error::EAGAIN, frame::Video as VideoFrame};

use crate::arena::FrameArena;
use crate::error::DivienError;
use crate::media::MediaHandle;
use crate::pool::FrameSource;

impl MediaHandle {
    /// Decode up to `slots.len()` frames into `slots`, in presentation order
    /// as emitted by the decoder.
    ///
    /// Returns the number of slots filled. Fewer than `slots.len()` means the
    /// stream ended; `0` means nothing was left. Packets from other streams
    /// are skipped. On end of input the decoder is flushed once and its
    /// remaining frames are drained by this and later calls.
    ///
    /// The decoder is opened on the first call.
    ///
    /// # Errors
    ///
    /// - [`DivienError::Decode`] if the decoder rejects a packet or fails
    ///   while draining for any reason other than needing more input or
    ///   reaching end of stream.
    /// - [`DivienError::Ffmpeg`] if the demuxer fails or the decoder cannot
    ///   be opened.
    pub fn decode_into(&mut self, slots: &mut [VideoFrame]) -> Result<usize, DivienError> {
        if slots.is_empty() {
            return Ok(0);
        }

        let MediaHandle {
            packet,
            decoder,
            input,
            stream_index,
            flushed,
            ..
        } = self;
        let decoder = decoder.ensure_open()?;
        let mut produced = 0;

        loop {
            while produced < slots.len() {
                match decoder.receive_frame(&mut slots[produced]) {
                    Ok(()) => produced += 1,
                    Err(FfmpegError::Eof) => return Ok(produced),
                    Err(FfmpegError::Other { errno }) if errno == EAGAIN => break,
                    Err(error) => {
                        return Err(DivienError::Decode(format!(
                            "receive_frame failed: {error}"
                        )));
                    }
                }
            }

            if produced == slots.len() {
                return Ok(produced);
            }
            if *flushed {
                // Flushed decoders report end of stream, never "need input".
                return Ok(produced);
            }

            match packet.read(input) {
                Ok(()) => {
                    let wanted = packet.stream() == *stream_index;
                    let sent = if wanted {
                        decoder.send_packet(&*packet)
                    } else {
                        Ok(())
                    };
                    // SAFETY: the packet is exclusively owned; unref resets it
                    // to blank for the next read.
                    unsafe { ffmpeg_sys_next::av_packet_unref(packet.as_mut_ptr()) };
                    sent.map_err(|error| {
                        DivienError::Decode(format!("send_packet failed: {error}"))
                    })?;
                }
                Err(FfmpegError::Eof) => {
                    log::debug!("End of input reached, flushing decoder");
                    decoder.send_eof().map_err(|error| {
                        DivienError::Decode(format!("flushing decoder failed: {error}"))
                    })?;
                    *flushed = true;
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    /// Decode into `max_frames` arena slots starting at `region_offset`.
    ///
    /// # Errors
    ///
    /// Returns [`DivienError::RegionOutOfBounds`] without touching the
    /// decoder when the region does not fit in the arena, otherwise the same
    /// errors as [`decode_into`](MediaHandle::decode_into).
    pub fn decode_into_arena(
        &mut self,
        arena: &mut FrameArena<VideoFrame>,
        region_offset: usize,
        max_frames: usize,
    ) -> Result<usize, DivienError> {
        let region = arena.region_mut(region_offset, max_frames)?;
        self.decode_into(region)
    }
}

impl FrameSource for MediaHandle {
    type Frame = VideoFrame;

    fn fill(&mut self, slots: &mut [VideoFrame]) -> Result<usize, DivienError> {
        self.decode_into(slots)
    }
}
