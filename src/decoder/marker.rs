//! Decoder for timed script commands
//!
//! Payload layout: UTF-16LE `type` NUL `text` NUL.

use super::{DecodeStatus, Decoder};
use crate::registry::DecoderInfo;
use crate::stream::{FrameState, MediaFrame, MediaMarker, MediaStream, PixelFormat};
use crate::utils::error::{MediaError, Result};

#[derive(Default)]
pub struct MarkerDecoder;

impl MarkerDecoder {
    /// Split a UTF-16LE payload into its type and text strings
    pub fn parse(payload: &[u8], pts: u64) -> Result<MediaMarker> {
        let units: Vec<u16> = payload
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        let mut fields = units.split(|&unit| unit == 0);
        let (kind, text) = match (fields.next(), fields.next()) {
            (Some(kind), Some(text)) if units.iter().filter(|&&u| u == 0).count() >= 2 => (kind, text),
            _ => {
                return Err(MediaError::CorruptedMedia(
                    "marker payload is missing its terminators".to_string(),
                ))
            }
        };

        Ok(MediaMarker {
            pts,
            kind: String::from_utf16_lossy(kind),
            text: String::from_utf16_lossy(text),
        })
    }
}

impl Decoder for MarkerDecoder {
    fn name(&self) -> &str {
        "marker"
    }

    fn open(&mut self, _stream: &MediaStream) -> Result<()> {
        Ok(())
    }

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::None
    }

    fn decode_frame(&mut self, frame: &mut MediaFrame) -> Result<DecodeStatus> {
        let marker = Self::parse(frame.data(), frame.pts)?;
        log::debug!("Marker at {}: {} = {}", marker.pts, marker.kind, marker.text);

        frame.marker = Some(marker);
        frame.replace_buffer(Vec::new());
        frame.add_state(FrameState::MARKER | FrameState::DECODED);
        Ok(DecodeStatus::Decoded)
    }
}

pub struct MarkerDecoderInfo;

impl DecoderInfo for MarkerDecoderInfo {
    fn name(&self) -> &str {
        "marker"
    }

    fn supports(&self, codec: &str) -> bool {
        codec == "marker"
    }

    fn create(&self, _stream: &MediaStream) -> Box<dyn Decoder> {
        Box::new(MarkerDecoder)
    }
}

/// Encode a marker payload the way [`MarkerDecoder`] expects it
pub fn encode_marker_payload(kind: &str, text: &str) -> Vec<u8> {
    kind.encode_utf16()
        .chain(std::iter::once(0))
        .chain(text.encode_utf16())
        .chain(std::iter::once(0))
        .flat_map(u16::to_le_bytes)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{StreamDetails, StreamInfo};

    #[test]
    fn test_decode_marker() {
        let stream = MediaStream::new(2, StreamInfo::new("marker", StreamDetails::Marker));
        let mut frame = MediaFrame::new(&stream);
        frame.pts = 1234;
        frame.set_data(&encode_marker_payload("caption", "Hello, wörld"));

        let mut decoder = MarkerDecoder;
        assert_eq!(decoder.decode_frame(&mut frame).unwrap(), DecodeStatus::Decoded);
        assert!(frame.has_state(FrameState::MARKER));
        assert!(frame.is_empty());

        let marker = frame.marker.unwrap();
        assert_eq!(marker.pts, 1234);
        assert_eq!(marker.kind, "caption");
        assert_eq!(marker.text, "Hello, wörld");
    }

    #[test]
    fn test_single_terminator_is_corrupted() {
        let mut payload = encode_marker_payload("url", "x");
        payload.truncate(payload.len() - 2);
        let err = MarkerDecoder::parse(&payload, 0).unwrap_err();
        assert!(matches!(err, MediaError::CorruptedMedia(_)));
    }

    #[test]
    fn test_empty_fields_are_valid() {
        let marker = MarkerDecoder::parse(&[0, 0, 0, 0], 9).unwrap();
        assert!(marker.kind.is_empty());
        assert!(marker.text.is_empty());
    }
}
