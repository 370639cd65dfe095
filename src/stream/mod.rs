//! Elementary streams
//!
//! A [`MediaStream`] is created by a demuxer while parsing the container
//! header. It carries the codec identity and format details used for decoder
//! selection, the decoder and converter attached during open, the selection
//! flag, and a FIFO consumers may use to buffer frames.

mod frame;
mod frame_queue;

pub use frame::{
    FrameEvent, FrameState, MediaFrame, MediaMarker, MediaType, PixelFormat, PlaneLayout,
};
pub use frame_queue::{FrameQueue, QueueStats};

use crate::converter::Converter;
use crate::decoder::Decoder;
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Default capacity of a stream's frame FIFO
const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Video stream format
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VideoInfo {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Bits per pixel declared by the container
    pub bits_per_sample: u32,
}

impl VideoInfo {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, bits_per_sample: 0 }
    }
}

/// Audio stream format
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioInfo {
    /// Number of channels
    pub channels: u16,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Bits per sample
    pub bits_per_sample: u16,

    /// Bytes per sample frame
    pub block_align: u16,
}

impl Default for AudioInfo {
    fn default() -> Self {
        Self {
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 16,
            block_align: 4,
        }
    }
}

/// Type specific stream details
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamDetails {
    Video(VideoInfo),
    Audio(AudioInfo),
    Marker,
}

/// Immutable description of an elementary stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamInfo {
    /// Codec identifier used for decoder matching
    pub codec: String,

    /// Raw container codec tag
    pub codec_id: u32,

    /// Codec specific setup data
    #[serde(skip)]
    pub extra_data: Vec<u8>,

    /// Stream duration in pts ticks
    pub duration: u64,

    /// Bitrate in bits per second (0 if unknown)
    pub bitrate: u32,

    pub details: StreamDetails,
}

impl StreamInfo {
    pub fn new(codec: impl Into<String>, details: StreamDetails) -> Self {
        Self {
            codec: codec.into(),
            codec_id: 0,
            extra_data: Vec::new(),
            duration: 0,
            bitrate: 0,
            details,
        }
    }

    pub fn with_codec_id(mut self, codec_id: u32) -> Self {
        self.codec_id = codec_id;
        self
    }

    pub fn with_extra_data(mut self, extra_data: Vec<u8>) -> Self {
        self.extra_data = extra_data;
        self
    }

    pub fn with_duration(mut self, duration: u64) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }
}

/// Receives selection changes of streams owned by a media
pub trait SelectionListener: Send + Sync {
    fn selection_changed(&self, stream_index: usize);
}

/// One elementary stream of a container
pub struct MediaStream {
    index: usize,
    info: StreamInfo,
    min_padding: AtomicUsize,
    selected: AtomicBool,
    decoder: Mutex<Option<Box<dyn Decoder>>>,
    converter: Mutex<Option<Box<dyn Converter>>>,
    queue: Mutex<FrameQueue>,
    listener: RwLock<Option<Weak<dyn SelectionListener>>>,
}

impl MediaStream {
    pub fn new(index: usize, info: StreamInfo) -> Arc<Self> {
        Self::with_queue_capacity(index, info, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(index: usize, info: StreamInfo, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            index,
            info,
            min_padding: AtomicUsize::new(0),
            selected: AtomicBool::new(false),
            decoder: Mutex::new(None),
            converter: Mutex::new(None),
            queue: Mutex::new(FrameQueue::new(capacity)),
            listener: RwLock::new(None),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    pub fn codec(&self) -> &str {
        &self.info.codec
    }

    pub fn codec_id(&self) -> u32 {
        self.info.codec_id
    }

    pub fn extra_data(&self) -> &[u8] {
        &self.info.extra_data
    }

    pub fn duration(&self) -> u64 {
        self.info.duration
    }

    pub fn bitrate(&self) -> u32 {
        self.info.bitrate
    }

    pub fn media_type(&self) -> MediaType {
        match self.info.details {
            StreamDetails::Video(_) => MediaType::Video,
            StreamDetails::Audio(_) => MediaType::Audio,
            StreamDetails::Marker => MediaType::Marker,
        }
    }

    pub fn video(&self) -> Option<&VideoInfo> {
        match &self.info.details {
            StreamDetails::Video(video) => Some(video),
            _ => None,
        }
    }

    pub fn audio(&self) -> Option<&AudioInfo> {
        match &self.info.details {
            StreamDetails::Audio(audio) => Some(audio),
            _ => None,
        }
    }

    /// Extra zeroed bytes every frame buffer of this stream must carry
    pub fn min_padding(&self) -> usize {
        self.min_padding.load(Ordering::Acquire)
    }

    pub fn set_min_padding(&self, padding: usize) {
        self.min_padding.store(padding, Ordering::Release);
    }

    pub fn is_selected(&self) -> bool {
        self.selected.load(Ordering::Acquire)
    }

    /// Change the selection flag and forward the change to the owning media
    pub fn set_selected(&self, selected: bool) {
        if self.selected.swap(selected, Ordering::AcqRel) == selected {
            return;
        }
        let listener = self.listener.read().as_ref().and_then(Weak::upgrade);
        if let Some(listener) = listener {
            listener.selection_changed(self.index);
        }
    }

    pub(crate) fn attach_listener(&self, listener: Weak<dyn SelectionListener>) {
        *self.listener.write() = Some(listener);
    }

    /// Lock the decoder slot
    pub fn decoder(&self) -> MutexGuard<'_, Option<Box<dyn Decoder>>> {
        self.decoder.lock()
    }

    pub fn has_decoder(&self) -> bool {
        self.decoder.lock().is_some()
    }

    pub fn set_decoder(&self, decoder: Option<Box<dyn Decoder>>) {
        *self.decoder.lock() = decoder;
    }

    /// Lock the converter slot
    pub fn converter(&self) -> MutexGuard<'_, Option<Box<dyn Converter>>> {
        self.converter.lock()
    }

    pub fn has_converter(&self) -> bool {
        self.converter.lock().is_some()
    }

    pub fn set_converter(&self, converter: Option<Box<dyn Converter>>) {
        *self.converter.lock() = converter;
    }

    /// Append a frame to the stream FIFO
    pub fn enqueue_frame(&self, frame: MediaFrame) {
        self.queue.lock().push_frame(frame);
    }

    /// Take the oldest frame from the stream FIFO
    pub fn pop_frame(&self) -> Option<MediaFrame> {
        self.queue.lock().pop_frame()
    }

    pub fn clear_queue(&self) {
        self.queue.lock().clear();
    }

    pub fn is_queue_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn first_pts(&self) -> Option<u64> {
        self.queue.lock().first_pts()
    }

    pub fn last_popped_pts(&self) -> Option<u64> {
        self.queue.lock().last_popped_pts()
    }

    pub fn last_enqueued_pts(&self) -> Option<u64> {
        self.queue.lock().last_enqueued_pts()
    }

    pub fn buffered_duration(&self) -> u64 {
        self.queue.lock().buffered_duration()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.lock().stats().clone()
    }
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("index", &self.index)
            .field("codec", &self.info.codec)
            .field("media_type", &self.media_type())
            .field("selected", &self.is_selected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder(Mutex<Vec<usize>>);

    impl SelectionListener for Recorder {
        fn selection_changed(&self, stream_index: usize) {
            self.0.lock().push(stream_index);
        }
    }

    #[test]
    fn test_stream_metadata() {
        let info = StreamInfo::new("i420", StreamDetails::Video(VideoInfo::new(320, 240)))
            .with_codec_id(u32::from_le_bytes(*b"I420"))
            .with_duration(10_000_000)
            .with_bitrate(128_000);
        let stream = MediaStream::new(3, info);

        assert_eq!(stream.index(), 3);
        assert_eq!(stream.codec(), "i420");
        assert_eq!(stream.media_type(), MediaType::Video);
        assert_eq!(stream.video().unwrap().width, 320);
        assert!(stream.audio().is_none());
        assert_eq!(stream.duration(), 10_000_000);
        assert!(!stream.is_selected());
        assert!(!stream.has_decoder());
    }

    #[test]
    fn test_selection_forwarded_once_per_change() {
        let stream = MediaStream::new(1, StreamInfo::new("pcm", StreamDetails::Audio(AudioInfo::default())));
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let listener: Arc<dyn SelectionListener> = recorder.clone();
        stream.attach_listener(Arc::downgrade(&listener));

        stream.set_selected(true);
        stream.set_selected(true);
        stream.set_selected(false);

        assert_eq!(*recorder.0.lock(), vec![1, 1]);
    }

    #[test]
    fn test_stream_fifo() {
        let stream = MediaStream::new(0, StreamInfo::new("marker", StreamDetails::Marker));
        let mut frame = MediaFrame::new(&stream);
        frame.pts = 5;
        stream.enqueue_frame(frame);

        assert_eq!(stream.last_enqueued_pts(), Some(5));
        assert_eq!(stream.pop_frame().unwrap().pts, 5);
        assert_eq!(stream.last_popped_pts(), Some(5));
        assert!(stream.is_queue_empty());
        assert_eq!(stream.queue_stats().frames_consumed, 1);
    }
}
