//! Frame value object passed from demuxer to decoder to converter

use super::MediaStream;
use serde::{Deserialize, Serialize};
use std::ops::{BitOr, BitOrAssign};

/// Raw pixel formats understood by the pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    #[default]
    None,
    /// Packed 32bpp, B G R A byte order
    Rgb32,
    /// Planar YUV 4:2:0, 12bpp
    Yuv420p,
}

impl PixelFormat {
    /// Average bits per pixel
    pub const fn bits_per_pixel(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Yuv420p => 12,
            Self::Rgb32 => 32,
        }
    }

    pub const fn is_planar(self) -> bool {
        matches!(self, Self::Yuv420p)
    }

    /// Bytes needed for one picture of the given dimensions
    pub fn frame_size(self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self {
            Self::None => 0,
            Self::Rgb32 => w * h * 4,
            Self::Yuv420p => w * h + 2 * (w.div_ceil(2) * h.div_ceil(2)),
        }
    }
}

/// Kind of elementary stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    None,
    Video,
    Audio,
    Marker,
}

/// Processing stages a frame has gone through
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FrameState(u32);

impl FrameState {
    pub const NONE: FrameState = FrameState(0);
    pub const PLANAR: FrameState = FrameState(1 << 0);
    pub const DECODED: FrameState = FrameState(1 << 1);
    pub const DEMUXED: FrameState = FrameState(1 << 2);
    pub const CONVERTED: FrameState = FrameState(1 << 3);
    pub const KEYFRAME: FrameState = FrameState(1 << 4);
    pub const MARKER: FrameState = FrameState(1 << 6);

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True if every bit of `other` is set
    pub const fn contains(self, other: FrameState) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: FrameState) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: FrameState) {
        self.0 &= !other.0;
    }
}

impl BitOr for FrameState {
    type Output = FrameState;

    fn bitor(self, rhs: FrameState) -> FrameState {
        FrameState(self.0 | rhs.0)
    }
}

impl BitOrAssign for FrameState {
    fn bitor_assign(&mut self, rhs: FrameState) {
        self.0 |= rhs.0;
    }
}

/// In-band event carried by a frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FrameEvent {
    #[default]
    None,
    /// End of stream; the frame carries no data
    Eof,
}

/// Timed script command (caption, url, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaMarker {
    pub pts: u64,
    pub kind: String,
    pub text: String,
}

/// Plane layout of planar pixel data inside the frame buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaneLayout {
    pub offsets: [usize; 4],
    pub strides: [usize; 4],
    pub count: usize,
}

impl PlaneLayout {
    /// Layout of a tightly packed YUV 4:2:0 picture
    pub fn yuv420p(width: u32, height: u32) -> Self {
        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        Self {
            offsets: [0, w * h, w * h + cw * ch, 0],
            strides: [w, cw, cw, 0],
            count: 3,
        }
    }

    /// Layout of a single packed plane
    pub fn packed(stride: usize) -> Self {
        Self {
            offsets: [0; 4],
            strides: [stride, 0, 0, 0],
            count: 1,
        }
    }
}

/// One compressed or decoded unit of a stream
///
/// `buffer` always holds `length` bytes of payload followed by the stream's
/// `min_padding` zero bytes.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    stream_index: usize,
    media_type: MediaType,
    padding: usize,
    buffer: Vec<u8>,
    length: usize,
    pub pts: u64,
    pub duration: u64,
    pub state: FrameState,
    pub event: FrameEvent,
    pub width: u32,
    pub height: u32,
    pub planes: PlaneLayout,
    pub marker: Option<MediaMarker>,
}

impl MediaFrame {
    /// Empty frame for `stream`, sized with its current padding requirement
    pub fn new(stream: &MediaStream) -> Self {
        let padding = stream.min_padding();
        Self {
            stream_index: stream.index(),
            media_type: stream.media_type(),
            padding,
            buffer: vec![0; padding],
            length: 0,
            pts: 0,
            duration: 0,
            state: FrameState::NONE,
            event: FrameEvent::None,
            width: 0,
            height: 0,
            planes: PlaneLayout::default(),
            marker: None,
        }
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    /// Logical payload length
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Payload without padding
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.length]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[..self.length]
    }

    /// Whole allocation including padding
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn padding(&self) -> usize {
        self.padding
    }

    /// Copy `data` into a fresh padded buffer
    pub fn set_data(&mut self, data: &[u8]) {
        let mut buffer = Vec::with_capacity(data.len() + self.padding);
        buffer.extend_from_slice(data);
        buffer.resize(data.len() + self.padding, 0);
        self.buffer = buffer;
        self.length = data.len();
    }

    /// Take ownership of `data` as the payload, appending padding
    pub fn replace_buffer(&mut self, mut data: Vec<u8>) {
        self.length = data.len();
        data.resize(self.length + self.padding, 0);
        self.buffer = data;
    }

    /// Zeroed payload of `len` bytes, returned for in-place filling
    pub fn allocate(&mut self, len: usize) -> &mut [u8] {
        self.buffer = vec![0; len + self.padding];
        self.length = len;
        &mut self.buffer[..len]
    }

    /// Move the payload out, leaving the frame empty
    pub fn take_data(&mut self) -> Vec<u8> {
        let mut buffer = std::mem::replace(&mut self.buffer, vec![0; self.padding]);
        buffer.truncate(self.length);
        self.length = 0;
        buffer
    }

    /// Bytes of plane `index` according to `planes`
    pub fn plane(&self, index: usize) -> Option<&[u8]> {
        if index >= self.planes.count {
            return None;
        }
        let start = self.planes.offsets[index];
        let end = if index + 1 < self.planes.count {
            self.planes.offsets[index + 1]
        } else {
            self.length
        };
        self.data().get(start..end)
    }

    pub fn add_state(&mut self, state: FrameState) {
        self.state.insert(state);
    }

    pub fn has_state(&self, state: FrameState) -> bool {
        self.state.contains(state)
    }

    pub fn is_keyframe(&self) -> bool {
        self.has_state(FrameState::KEYFRAME)
    }

    pub fn is_eof(&self) -> bool {
        self.event == FrameEvent::Eof
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{AudioInfo, StreamDetails, StreamInfo};

    fn audio_stream(padding: usize) -> std::sync::Arc<MediaStream> {
        let stream = MediaStream::new(0, StreamInfo::new("pcm", StreamDetails::Audio(AudioInfo::default())));
        stream.set_min_padding(padding);
        stream
    }

    #[test]
    fn test_padding_is_zeroed() {
        let stream = audio_stream(8);
        let mut frame = MediaFrame::new(&stream);
        frame.set_data(&[0xFF; 5]);

        assert_eq!(frame.len(), 5);
        assert_eq!(frame.buffer().len(), 13);
        assert!(frame.buffer()[5..].iter().all(|&b| b == 0));

        frame.replace_buffer(vec![0xAA; 20]);
        assert_eq!(frame.buffer().len(), 28);
        assert!(frame.buffer()[20..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_state_bits() {
        let mut state = FrameState::DEMUXED | FrameState::KEYFRAME;
        assert!(state.contains(FrameState::DEMUXED));
        assert!(!state.contains(FrameState::DECODED));
        state |= FrameState::DECODED;
        state.remove(FrameState::KEYFRAME);
        assert_eq!(state.bits(), (1 << 1) | (1 << 2));
    }

    #[test]
    fn test_planes() {
        let stream = audio_stream(0);
        let mut frame = MediaFrame::new(&stream);
        frame.allocate(PixelFormat::Yuv420p.frame_size(4, 2));
        frame.planes = PlaneLayout::yuv420p(4, 2);

        assert_eq!(frame.plane(0).unwrap().len(), 8);
        assert_eq!(frame.plane(1).unwrap().len(), 2);
        assert_eq!(frame.plane(2).unwrap().len(), 2);
        assert!(frame.plane(3).is_none());
    }

    #[test]
    fn test_pixel_format_sizes() {
        assert_eq!(PixelFormat::Rgb32.frame_size(3, 3), 36);
        assert_eq!(PixelFormat::Yuv420p.frame_size(3, 3), 9 + 2 * 4);
        assert!(PixelFormat::Yuv420p.is_planar());
        assert_eq!(PixelFormat::Yuv420p.bits_per_pixel(), 12);
    }
}
