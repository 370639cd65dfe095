//! Decoder module for ccmedia
//!
//! Decoders turn one compressed frame into raw samples or pixels, replacing
//! the frame buffer in place. A decoder may ask for more input before it can
//! produce output by returning [`DecodeStatus::Delayed`].

mod marker;
mod null;
mod raw;

pub use marker::{encode_marker_payload, MarkerDecoder, MarkerDecoderInfo};
pub use null::{NullDecoder, NullDecoderInfo};
pub use raw::{PcmDecoder, PcmDecoderInfo, RawVideoDecoder, RawVideoDecoderInfo};

use crate::stream::{MediaFrame, MediaStream, PixelFormat};
use crate::utils::error::Result;

/// Outcome of feeding one compressed frame to a decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// The frame now holds decoded data and has `DECODED` set
    Decoded,
    /// The decoder needs another compressed frame before producing output
    Delayed,
}

/// Decoder trait defining the interface for frame decoding
pub trait Decoder: Send {
    /// Short name for logging
    fn name(&self) -> &str;

    /// Prepare for decoding `stream`
    ///
    /// Must establish the output format reported by [`Decoder::pixel_format`]
    /// before returning success.
    fn open(&mut self, stream: &MediaStream) -> Result<()>;

    /// Output pixel format (`PixelFormat::None` for non-video decoders)
    fn pixel_format(&self) -> PixelFormat;

    /// Decode `frame` in place
    ///
    /// # Arguments
    ///
    /// * `frame` - Demuxed frame; on `Decoded` its buffer holds the raw output
    ///
    /// # Returns
    ///
    /// `Decoded`, `Delayed` when more input is needed, or an error
    fn decode_frame(&mut self, frame: &mut MediaFrame) -> Result<DecodeStatus>;

    /// Bytes the decoder may read past the end of an input buffer
    fn required_padding(&self) -> usize {
        0
    }

    /// Drop buffered state, called after a seek
    fn flush(&mut self) {}
}
