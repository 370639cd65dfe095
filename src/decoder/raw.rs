//! Decoders for uncompressed payloads

use super::{DecodeStatus, Decoder};
use crate::registry::DecoderInfo;
use crate::stream::{FrameState, MediaFrame, MediaStream, PixelFormat, PlaneLayout};
use crate::utils::error::{MediaError, Result};

/// Raw pictures: `i420` is planar YUV 4:2:0, `rgb32` is packed BGRA
pub struct RawVideoDecoder {
    format: PixelFormat,
    width: u32,
    height: u32,
}

impl RawVideoDecoder {
    pub fn new(format: PixelFormat) -> Self {
        Self { format, width: 0, height: 0 }
    }
}

impl Decoder for RawVideoDecoder {
    fn name(&self) -> &str {
        "raw-video"
    }

    fn open(&mut self, stream: &MediaStream) -> Result<()> {
        let video = stream.video().ok_or_else(|| {
            MediaError::InvalidStream(format!("stream {} is not a video stream", stream.index()))
        })?;
        if video.width == 0 || video.height == 0 {
            return Err(MediaError::InvalidStream(format!(
                "stream {} has empty dimensions {}x{}",
                stream.index(),
                video.width,
                video.height
            )));
        }
        self.width = video.width;
        self.height = video.height;
        Ok(())
    }

    fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    fn decode_frame(&mut self, frame: &mut MediaFrame) -> Result<DecodeStatus> {
        let expected = self.format.frame_size(self.width, self.height);
        if frame.len() < expected {
            return Err(MediaError::CorruptedMedia(format!(
                "raw picture has {} bytes, expected {}",
                frame.len(),
                expected
            )));
        }
        if frame.len() > expected {
            let mut data = frame.take_data();
            data.truncate(expected);
            frame.replace_buffer(data);
        }

        frame.width = self.width;
        frame.height = self.height;
        if self.format.is_planar() {
            frame.planes = PlaneLayout::yuv420p(self.width, self.height);
            frame.add_state(FrameState::PLANAR);
        } else {
            frame.planes = PlaneLayout::packed(self.width as usize * 4);
        }
        frame.add_state(FrameState::DECODED);
        Ok(DecodeStatus::Decoded)
    }
}

pub struct RawVideoDecoderInfo;

impl DecoderInfo for RawVideoDecoderInfo {
    fn name(&self) -> &str {
        "raw-video"
    }

    fn supports(&self, codec: &str) -> bool {
        matches!(codec, "i420" | "rgb32")
    }

    fn create(&self, stream: &MediaStream) -> Box<dyn Decoder> {
        let format = if stream.codec() == "i420" {
            PixelFormat::Yuv420p
        } else {
            PixelFormat::Rgb32
        };
        Box::new(RawVideoDecoder::new(format))
    }
}

/// Interleaved PCM passthrough
#[derive(Default)]
pub struct PcmDecoder {
    block_align: usize,
}

impl Decoder for PcmDecoder {
    fn name(&self) -> &str {
        "pcm"
    }

    fn open(&mut self, stream: &MediaStream) -> Result<()> {
        let audio = stream.audio().ok_or_else(|| {
            MediaError::InvalidStream(format!("stream {} is not an audio stream", stream.index()))
        })?;
        self.block_align = usize::from(audio.block_align.max(1));
        Ok(())
    }

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::None
    }

    fn decode_frame(&mut self, frame: &mut MediaFrame) -> Result<DecodeStatus> {
        let remainder = frame.len() % self.block_align;
        if remainder != 0 {
            log::warn!(
                "PCM frame of {} bytes is not a multiple of block align {}, truncating",
                frame.len(),
                self.block_align
            );
            let mut data = frame.take_data();
            data.truncate(data.len() - remainder);
            frame.replace_buffer(data);
        }
        frame.add_state(FrameState::DECODED);
        Ok(DecodeStatus::Decoded)
    }
}

pub struct PcmDecoderInfo;

impl DecoderInfo for PcmDecoderInfo {
    fn name(&self) -> &str {
        "pcm"
    }

    fn supports(&self, codec: &str) -> bool {
        codec == "pcm"
    }

    fn create(&self, _stream: &MediaStream) -> Box<dyn Decoder> {
        Box::new(PcmDecoder::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{AudioInfo, StreamDetails, StreamInfo, VideoInfo};

    #[test]
    fn test_i420_sets_planes() {
        let stream = MediaStream::new(0, StreamInfo::new("i420", StreamDetails::Video(VideoInfo::new(4, 4))));
        let mut decoder = RawVideoDecoderInfo.create(&stream);
        decoder.open(&stream).unwrap();
        assert_eq!(decoder.pixel_format(), PixelFormat::Yuv420p);

        let mut frame = MediaFrame::new(&stream);
        frame.set_data(&[128; 24]);
        decoder.decode_frame(&mut frame).unwrap();

        assert!(frame.has_state(FrameState::PLANAR | FrameState::DECODED));
        assert_eq!(frame.planes.count, 3);
        assert_eq!(frame.plane(1).unwrap().len(), 4);
    }

    #[test]
    fn test_short_picture_is_corrupted() {
        let stream = MediaStream::new(0, StreamInfo::new("rgb32", StreamDetails::Video(VideoInfo::new(2, 2))));
        let mut decoder = RawVideoDecoder::new(PixelFormat::Rgb32);
        decoder.open(&stream).unwrap();

        let mut frame = MediaFrame::new(&stream);
        frame.set_data(&[0; 15]);
        let err = decoder.decode_frame(&mut frame).unwrap_err();
        assert!(matches!(err, MediaError::CorruptedMedia(_)));
    }

    #[test]
    fn test_video_decoder_rejects_audio_stream() {
        let stream = MediaStream::new(0, StreamInfo::new("pcm", StreamDetails::Audio(AudioInfo::default())));
        assert!(RawVideoDecoder::new(PixelFormat::Rgb32).open(&stream).is_err());
    }

    #[test]
    fn test_pcm_truncates_partial_block() {
        let stream = MediaStream::new(0, StreamInfo::new("pcm", StreamDetails::Audio(AudioInfo::default())));
        stream.set_min_padding(4);
        let mut decoder = PcmDecoder::default();
        decoder.open(&stream).unwrap();

        let mut frame = MediaFrame::new(&stream);
        frame.set_data(&[7; 10]);
        decoder.decode_frame(&mut frame).unwrap();
        assert_eq!(frame.len(), 8);
        assert_eq!(frame.buffer().len(), 12);
    }
}
