//! Placeholder decoder used when no real codec is available
//!
//! Video frames become a checkerboard picture of the stream's dimensions,
//! audio frames become silence sized to the frame's duration (or the pts
//! span since the previous frame). Both are reported as ordinary successful
//! decodes. Sizes come from untrusted headers, so both outputs are capped.

use super::{DecodeStatus, Decoder};
use crate::registry::DecoderInfo;
use crate::stream::{FrameState, MediaFrame, MediaStream, MediaType, PixelFormat, PlaneLayout};
use crate::utils::error::{MediaError, Result};
use crate::utils::TICKS_PER_SECOND;

/// Codecs the placeholder stands in for
const SUPPORTED_CODECS: &[&str] = &[
    "wmv1", "wmv2", "wmv3", "wmva", "vc1", "wmav1", "wmav2", "mp3",
];

/// Edge length of a checkerboard tile in pixels
const TILE: u32 = 16;

/// Largest placeholder edge in pixels
const MAX_PICTURE_EDGE: u32 = 4096;

/// Longest stretch of silence produced for one frame
const MAX_SILENCE_TICKS: u64 = TICKS_PER_SECOND;

const MAX_SILENCE_BYTES: usize = 4 * 1024 * 1024;

const TILE_DARK: [u8; 4] = [0x30, 0x30, 0x30, 0xFF];
const TILE_LIGHT: [u8; 4] = [0x60, 0x60, 0x60, 0xFF];

enum Output {
    Unopened,
    Video { width: u32, height: u32, picture: Vec<u8> },
    Audio { sample_rate: u32, channels: u16, last_pts: Option<u64> },
}

pub struct NullDecoder {
    output: Output,
}

impl NullDecoder {
    pub fn new() -> Self {
        Self { output: Output::Unopened }
    }

    fn placeholder(width: u32, height: u32) -> Vec<u8> {
        let mut picture = Vec::with_capacity(PixelFormat::Rgb32.frame_size(width, height));
        for y in 0..height {
            for x in 0..width {
                let light = ((x / TILE) + (y / TILE)) % 2 == 1;
                picture.extend_from_slice(if light { &TILE_LIGHT } else { &TILE_DARK });
            }
        }
        picture
    }
}

impl Default for NullDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for NullDecoder {
    fn name(&self) -> &str {
        "null"
    }

    fn open(&mut self, stream: &MediaStream) -> Result<()> {
        self.output = match stream.media_type() {
            MediaType::Video => {
                let video = stream.video().cloned().unwrap_or_default();
                let width = video.width.min(MAX_PICTURE_EDGE);
                let height = video.height.min(MAX_PICTURE_EDGE);
                if (width, height) != (video.width, video.height) {
                    log::warn!(
                        "Placeholder for {}x{} stream clamped to {}x{}",
                        video.width,
                        video.height,
                        width,
                        height
                    );
                }
                Output::Video {
                    width,
                    height,
                    picture: Self::placeholder(width, height),
                }
            }
            MediaType::Audio => {
                let audio = stream.audio().cloned().unwrap_or_default();
                Output::Audio {
                    sample_rate: audio.sample_rate,
                    channels: audio.channels.max(1),
                    last_pts: None,
                }
            }
            other => {
                return Err(MediaError::InvalidStream(format!(
                    "placeholder decoder cannot handle {:?} streams",
                    other
                )))
            }
        };
        Ok(())
    }

    fn pixel_format(&self) -> PixelFormat {
        match self.output {
            Output::Video { .. } => PixelFormat::Rgb32,
            _ => PixelFormat::None,
        }
    }

    fn decode_frame(&mut self, frame: &mut MediaFrame) -> Result<DecodeStatus> {
        match &mut self.output {
            Output::Unopened => {
                return Err(MediaError::Codec("placeholder decoder used before open".to_string()))
            }
            Output::Video { width, height, picture } => {
                frame.set_data(&picture[..]);
                frame.width = *width;
                frame.height = *height;
                frame.planes = PlaneLayout::packed(*width as usize * 4);
                frame.state.remove(FrameState::PLANAR);
            }
            Output::Audio { sample_rate, channels, last_pts } => {
                let span = match *last_pts {
                    _ if frame.duration > 0 => frame.duration,
                    Some(last) if frame.pts > last => frame.pts - last,
                    _ => TICKS_PER_SECOND / 10,
                };
                *last_pts = Some(frame.pts);

                let samples = span.min(MAX_SILENCE_TICKS) * u64::from(*sample_rate) / TICKS_PER_SECOND;
                let block = usize::from(*channels) * 2;
                let bytes = usize::try_from(samples)
                    .unwrap_or(usize::MAX)
                    .saturating_mul(block)
                    .min(MAX_SILENCE_BYTES / block * block);
                frame.allocate(bytes);
            }
        }
        frame.add_state(FrameState::DECODED);
        Ok(DecodeStatus::Decoded)
    }

    fn flush(&mut self) {
        if let Output::Audio { last_pts, .. } = &mut self.output {
            *last_pts = None;
        }
    }
}

/// Registry descriptor for [`NullDecoder`]
pub struct NullDecoderInfo;

impl DecoderInfo for NullDecoderInfo {
    fn name(&self) -> &str {
        "null"
    }

    fn supports(&self, codec: &str) -> bool {
        SUPPORTED_CODECS.contains(&codec)
    }

    fn create(&self, _stream: &MediaStream) -> Box<dyn Decoder> {
        Box::new(NullDecoder::new())
    }
}
