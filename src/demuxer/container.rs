//! CCMF container demuxer
//!
//! All integers are little endian. A file is a header followed by packets:
//!
//! ```text
//! magic "CCMF\r\n\x1a\n" | version u32 | header_len u32 | header body
//! header body: flags u32 | duration u64 | preroll u64 | stream_count u16
//!              streams... | marker_count u16 | markers...
//! packet:      stream u8 | flags u8 | pts u64 | duration u32 | length u32 | payload
//! ```
//!
//! Over a packet queue source the first chunk carries the header and every
//! later chunk exactly one packet.

use super::{codec_from_fourcc, fourcc_for_codec, Demuxer};
use crate::registry::{probe_prefix, DemuxerInfo, Probe};
use crate::source::{ByteSource, SeekMode, SourceKind};
use crate::stream::{
    AudioInfo, FrameState, MediaFrame, MediaMarker, MediaStream, StreamDetails, StreamInfo, VideoInfo,
};
use crate::utils::config::PipelineConfig;
use crate::utils::error::{MediaError, Result};
use bytes::{Buf, BufMut, Bytes};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

pub const CCMF_MAGIC: [u8; 8] = *b"CCMF\r\n\x1a\n";

const CCMF_VERSION: u32 = 1;

/// Magic, version and header length
const PREAMBLE_SIZE: usize = 16;

const PACKET_HEADER_SIZE: usize = 18;

const MAX_PACKET_SIZE: u32 = 64 * 1024 * 1024;

/// Read-ahead packets kept per selected stream nobody is pulling from
const MAX_PENDING_PACKETS: usize = 256;

const FLAG_BROADCAST: u32 = 1;

const PACKET_KEYFRAME: u8 = 1;

const KIND_VIDEO: u8 = 1;
const KIND_AUDIO: u8 = 2;
const KIND_MARKER: u8 = 3;

/// One demuxed packet
#[derive(Debug, Clone)]
struct Packet {
    stream: usize,
    keyframe: bool,
    pts: u64,
    duration: u32,
    payload: Bytes,
}

/// Keyframe position found while scanning packets
#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    pts: u64,
    offset: u64,
    stream: usize,
}

/// Parsed header, committed only once complete
struct Header {
    broadcast: bool,
    duration: u64,
    preroll: u64,
    streams: Vec<Arc<MediaStream>>,
    markers: Vec<MediaMarker>,
}

fn need(buf: &[u8], len: usize, what: &str) -> Result<()> {
    if buf.remaining() < len {
        return Err(MediaError::InvalidMedia(format!("header truncated in {}", what)));
    }
    Ok(())
}

fn get_string(buf: &mut &[u8], what: &str) -> Result<String> {
    need(buf, 2, what)?;
    let len = buf.get_u16_le() as usize;
    need(buf, len, what)?;
    let text = String::from_utf8_lossy(&buf[..len]).into_owned();
    buf.advance(len);
    Ok(text)
}

fn parse_stream(buf: &mut &[u8], index: usize, duration: u64, queue_capacity: usize) -> Result<Arc<MediaStream>> {
    need(buf, 1 + 4 + 4 + 2, "stream entry")?;
    let kind = buf.get_u8();
    let mut fourcc = [0u8; 4];
    buf.copy_to_slice(&mut fourcc);
    let bitrate = buf.get_u32_le();
    let extra_len = buf.get_u16_le() as usize;
    need(buf, extra_len, "stream extra data")?;
    let extra_data = buf[..extra_len].to_vec();
    buf.advance(extra_len);

    let details = match kind {
        KIND_VIDEO => {
            need(buf, 8, "video format")?;
            let width = buf.get_u32_le();
            let height = buf.get_u32_le();
            StreamDetails::Video(VideoInfo::new(width, height))
        }
        KIND_AUDIO => {
            need(buf, 10, "audio format")?;
            StreamDetails::Audio(AudioInfo {
                channels: buf.get_u16_le(),
                sample_rate: buf.get_u32_le(),
                bits_per_sample: buf.get_u16_le(),
                block_align: buf.get_u16_le(),
            })
        }
        KIND_MARKER => StreamDetails::Marker,
        other => {
            return Err(MediaError::InvalidMedia(format!(
                "stream {} has unknown kind {}",
                index, other
            )))
        }
    };

    let info = StreamInfo::new(codec_from_fourcc(fourcc), details)
        .with_codec_id(u32::from_le_bytes(fourcc))
        .with_extra_data(extra_data)
        .with_duration(duration)
        .with_bitrate(bitrate);
    Ok(MediaStream::with_queue_capacity(index, info, queue_capacity))
}

/// Parse everything after the header length field
fn parse_header(mut buf: &[u8], queue_capacity: usize) -> Result<Header> {
    let buf = &mut buf;
    need(buf, 4 + 8 + 8 + 2, "file properties")?;
    let flags = buf.get_u32_le();
    let duration = buf.get_u64_le();
    let preroll = buf.get_u64_le();
    let stream_count = buf.get_u16_le() as usize;
    if stream_count > u8::MAX as usize + 1 {
        return Err(MediaError::InvalidMedia(format!("{} streams declared", stream_count)));
    }

    let playable = duration.saturating_sub(preroll);
    let mut streams = Vec::with_capacity(stream_count);
    for index in 0..stream_count {
        streams.push(parse_stream(buf, index, playable, queue_capacity)?);
    }

    need(buf, 2, "marker count")?;
    let marker_count = buf.get_u16_le() as usize;
    let mut markers = Vec::with_capacity(marker_count);
    for _ in 0..marker_count {
        need(buf, 8, "marker")?;
        let pts = buf.get_u64_le().saturating_sub(preroll);
        let kind = get_string(buf, "marker type")?;
        let text = get_string(buf, "marker text")?;
        markers.push(MediaMarker { pts, kind, text });
    }

    Ok(Header {
        broadcast: flags & FLAG_BROADCAST != 0,
        duration: playable,
        preroll,
        streams,
        markers,
    })
}

/// Split the fixed packet header into (stream, keyframe, pts, duration, length)
fn parse_packet_header(mut head: &[u8]) -> Result<(usize, bool, u64, u32, u32)> {
    let stream = head.get_u8() as usize;
    let flags = head.get_u8();
    let pts = head.get_u64_le();
    let duration = head.get_u32_le();
    let length = head.get_u32_le();
    if length > MAX_PACKET_SIZE {
        return Err(MediaError::CorruptedMedia(format!(
            "packet of {} bytes exceeds the {} byte limit",
            length, MAX_PACKET_SIZE
        )));
    }
    Ok((stream, flags & PACKET_KEYFRAME != 0, pts, duration, length))
}

/// Demuxer for CCMF files and packet streams
pub struct ContainerDemuxer {
    source: Arc<dyn ByteSource>,
    queue_capacity: usize,
    header_read: bool,
    broadcast: bool,
    duration: u64,
    preroll: u64,
    streams: Vec<Arc<MediaStream>>,
    markers: Vec<MediaMarker>,
    /// Offset of the first packet (random access only)
    data_offset: u64,
    selected: Vec<bool>,
    /// Packets read ahead for selected streams other than the requested one
    pending: Vec<VecDeque<Packet>>,
    pending_limit: usize,
    index: Vec<IndexEntry>,
    /// File offset up to which packets have been indexed
    indexed_until: u64,
    /// Highest pts seen while indexing
    indexed_pts: Option<u64>,
}

impl ContainerDemuxer {
    pub fn new(source: Arc<dyn ByteSource>, config: &PipelineConfig) -> Self {
        Self {
            source,
            queue_capacity: config.worker.stream_queue_capacity,
            header_read: false,
            broadcast: false,
            duration: 0,
            preroll: 0,
            streams: Vec::new(),
            markers: Vec::new(),
            data_offset: 0,
            selected: Vec::new(),
            pending: Vec::new(),
            pending_limit: MAX_PENDING_PACKETS,
            index: Vec::new(),
            indexed_until: 0,
            indexed_pts: None,
        }
    }

    /// Whether the stream is live and cannot be repositioned
    pub fn is_broadcast(&self) -> bool {
        self.broadcast
    }

    /// Number of keyframes indexed so far
    pub fn indexed_keyframes(&self) -> usize {
        self.index.len()
    }

    fn is_packet_queue(&self) -> bool {
        self.source.kind() == SourceKind::MemoryQueue
    }

    /// True if `[0, end)` can be read now, or the source ends before `end`
    fn available(&self, end: u64) -> bool {
        self.source.last_available_position().covers(end)
            || self.source.size().is_some_and(|size| size < end)
            || self.source.is_aborted()
    }

    fn read_queue_header(&mut self) -> Result<Header> {
        let chunk = self
            .source
            .pop()?
            .ok_or_else(|| MediaError::InvalidMedia("packet queue ended before the header".to_string()))?;
        if chunk.len() < PREAMBLE_SIZE || chunk[..8] != CCMF_MAGIC {
            return Err(MediaError::InvalidMedia("first chunk is not a CCMF header".to_string()));
        }
        let mut preamble = &chunk[8..PREAMBLE_SIZE];
        let version = preamble.get_u32_le();
        let header_len = preamble.get_u32_le() as usize;
        if version != CCMF_VERSION {
            return Err(MediaError::InvalidMedia(format!("unsupported CCMF version {}", version)));
        }
        let body = chunk
            .get(PREAMBLE_SIZE..PREAMBLE_SIZE + header_len)
            .ok_or_else(|| MediaError::InvalidMedia("header chunk is truncated".to_string()))?;
        parse_header(body, self.queue_capacity)
    }

    fn read_file_header(&mut self) -> Result<Header> {
        let start = self.source.position();
        if !self.available(start + PREAMBLE_SIZE as u64) {
            return Err(MediaError::NotEnoughData);
        }

        let mut preamble = [0u8; PREAMBLE_SIZE];
        if !self.source.peek(&mut preamble)? {
            return Err(MediaError::InvalidMedia("file too short for a CCMF header".to_string()));
        }
        if preamble[..8] != CCMF_MAGIC {
            return Err(MediaError::InvalidMedia("missing CCMF magic".to_string()));
        }
        let mut fields = &preamble[8..];
        let version = fields.get_u32_le();
        let header_len = fields.get_u32_le() as usize;
        if version != CCMF_VERSION {
            return Err(MediaError::InvalidMedia(format!("unsupported CCMF version {}", version)));
        }

        let total = PREAMBLE_SIZE + header_len;
        if !self.available(start + total as u64) {
            return Err(MediaError::NotEnoughData);
        }

        let mut header = vec![0u8; total];
        if !self.source.read_all(&mut header)? {
            self.source.seek(start as i64, SeekMode::Start);
            if self.source.is_aborted() {
                return Err(MediaError::Read("source aborted while reading the header".to_string()));
            }
            return Err(MediaError::InvalidMedia("header truncated".to_string()));
        }

        match parse_header(&header[PREAMBLE_SIZE..], self.queue_capacity) {
            Ok(parsed) => {
                self.data_offset = start + total as u64;
                Ok(parsed)
            }
            Err(e) => {
                self.source.seek(start as i64, SeekMode::Start);
                Err(e)
            }
        }
    }

    /// Record `entry` if it lies beyond what has been indexed so far
    fn note_packet(&mut self, offset: u64, size: u64, stream: usize, keyframe: bool, pts: u64) {
        if offset < self.indexed_until {
            return;
        }
        if keyframe {
            self.index.push(IndexEntry { pts, offset, stream });
        }
        self.indexed_until = offset + size;
        self.indexed_pts = Some(self.indexed_pts.map_or(pts, |seen| seen.max(pts)));
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        if self.is_packet_queue() {
            return self.pop_packet();
        }

        let offset = self.source.position();
        let mut head = [0u8; PACKET_HEADER_SIZE];
        let read = self.source.read_some(&mut head)?;
        if read < PACKET_HEADER_SIZE {
            if self.source.is_aborted() {
                return Err(MediaError::Read("source aborted".to_string()));
            }
            if read > 0 {
                log::warn!("Ignoring {} trailing bytes at offset {}", read, offset);
            }
            return Ok(None);
        }

        let (stream, keyframe, pts, duration, length) = parse_packet_header(&head)?;
        let mut payload = vec![0u8; length as usize];
        if !self.source.read_all(&mut payload)? {
            if self.source.is_aborted() {
                return Err(MediaError::Read("source aborted".to_string()));
            }
            return Err(MediaError::CorruptedMedia(format!(
                "packet at offset {} is truncated",
                offset
            )));
        }

        let pts = pts.saturating_sub(self.preroll);
        self.note_packet(offset, (PACKET_HEADER_SIZE as u64) + u64::from(length), stream, keyframe, pts);
        Ok(Some(Packet {
            stream,
            keyframe,
            pts,
            duration,
            payload: Bytes::from(payload),
        }))
    }

    fn pop_packet(&mut self) -> Result<Option<Packet>> {
        let Some(chunk) = self.source.pop()? else {
            return Ok(None);
        };
        if chunk.len() < PACKET_HEADER_SIZE {
            return Err(MediaError::CorruptedMedia(format!(
                "{} byte chunk is too short for a packet",
                chunk.len()
            )));
        }
        let (stream, keyframe, pts, duration, length) = parse_packet_header(&chunk[..PACKET_HEADER_SIZE])?;
        let end = PACKET_HEADER_SIZE + length as usize;
        if chunk.len() < end {
            return Err(MediaError::CorruptedMedia("packet chunk is truncated".to_string()));
        }
        Ok(Some(Packet {
            stream,
            keyframe,
            pts: pts.saturating_sub(self.preroll),
            duration,
            payload: chunk.slice(PACKET_HEADER_SIZE..end),
        }))
    }

    fn fill_frame(&self, packet: Packet, frame: &mut MediaFrame) {
        frame.set_data(&packet.payload);
        frame.pts = packet.pts;
        frame.duration = u64::from(packet.duration);
        frame.add_state(FrameState::DEMUXED);
        if packet.keyframe {
            frame.add_state(FrameState::KEYFRAME);
        }
        if let Some(video) = self.streams[packet.stream].video() {
            frame.width = video.width;
            frame.height = video.height;
        }
    }

    /// Buffer a packet for a selected stream, dropping its oldest once full
    fn buffer_packet(&mut self, packet: Packet) {
        let queue = &mut self.pending[packet.stream];
        if queue.len() >= self.pending_limit {
            if let Some(dropped) = queue.pop_front() {
                log::debug!(
                    "Stream {} is not being read, dropping buffered packet at {}",
                    dropped.stream,
                    crate::utils::format_pts(dropped.pts)
                );
            }
        }
        queue.push_back(packet);
    }

    /// Index keyframes up to the first packet after `pts`
    ///
    /// The read position is left wherever indexing stopped.
    fn extend_index(&mut self, pts: u64) -> Result<()> {
        let mut offset = self.indexed_until.max(self.data_offset);
        while self.indexed_pts.map_or(true, |seen| seen <= pts) {
            if !self.source.seek(offset as i64, SeekMode::Start) {
                break;
            }
            let mut head = [0u8; PACKET_HEADER_SIZE];
            if !self.source.read_all(&mut head)? {
                break;
            }
            let (stream, keyframe, raw_pts, _, length) = parse_packet_header(&head)?;
            let size = PACKET_HEADER_SIZE as u64 + u64::from(length);
            if self.source.size().is_some_and(|total| offset + size > total) {
                break;
            }
            self.note_packet(offset, size, stream, keyframe, raw_pts.saturating_sub(self.preroll));
            offset += size;
        }
        Ok(())
    }

    /// Offset of the packet every considered stream can restart from
    fn seek_offset(&self, pts: u64) -> u64 {
        let selected: Vec<usize> = (0..self.streams.len()).filter(|&i| self.selected[i]).collect();
        let considered = if selected.is_empty() {
            (0..self.streams.len()).collect()
        } else {
            selected
        };

        considered
            .iter()
            .map(|&stream| {
                self.index
                    .iter()
                    .filter(|entry| entry.stream == stream && entry.pts <= pts)
                    .map(|entry| entry.offset)
                    .next_back()
                    .unwrap_or(self.data_offset)
            })
            .min()
            .unwrap_or(self.data_offset)
    }

    fn clear_pending(&mut self) {
        for queue in &mut self.pending {
            queue.clear();
        }
    }
}

impl Demuxer for ContainerDemuxer {
    fn name(&self) -> &str {
        "ccmf"
    }

    fn read_header(&mut self) -> Result<()> {
        if self.header_read {
            return Ok(());
        }

        let header = if self.is_packet_queue() {
            self.read_queue_header()?
        } else {
            self.read_file_header()?
        };

        log::info!(
            "CCMF header: {} streams, {} markers, duration {}{}",
            header.streams.len(),
            header.markers.len(),
            crate::utils::format_pts(header.duration),
            if header.broadcast { " (broadcast)" } else { "" }
        );

        self.selected = header.streams.iter().map(|s| s.is_selected()).collect();
        self.pending = vec![VecDeque::new(); header.streams.len()];
        self.broadcast = header.broadcast;
        self.duration = header.duration;
        self.preroll = header.preroll;
        self.streams = header.streams;
        self.markers = header.markers;
        self.indexed_until = self.data_offset;
        self.header_read = true;
        Ok(())
    }

    fn streams(&self) -> &[Arc<MediaStream>] {
        &self.streams
    }

    fn read_frame(&mut self, frame: &mut MediaFrame) -> Result<()> {
        let target = frame.stream_index();
        if target >= self.streams.len() {
            return Err(MediaError::InvalidStream(format!("no stream with index {}", target)));
        }

        if let Some(packet) = self.pending[target].pop_front() {
            self.fill_frame(packet, frame);
            return Ok(());
        }

        loop {
            let Some(packet) = self.read_packet()? else {
                frame.event = crate::stream::FrameEvent::Eof;
                return Err(MediaError::NoMoreData);
            };

            if packet.stream == target {
                self.fill_frame(packet, frame);
                return Ok(());
            }
            match self.selected.get(packet.stream) {
                Some(true) => self.buffer_packet(packet),
                Some(false) => log::trace!("Dropping packet for deselected stream {}", packet.stream),
                None => log::warn!("Dropping packet for undeclared stream {}", packet.stream),
            }
        }
    }

    fn seek(&mut self, pts: u64) -> Result<()> {
        if self.broadcast {
            return Err(MediaError::Seek("broadcast streams cannot seek".to_string()));
        }

        if self.is_packet_queue() {
            self.source.seek_to_pts(pts + self.preroll)?;
            self.clear_pending();
            return Ok(());
        }

        // a failed seek must leave reading where it was
        let resume = self.source.position();
        if let Err(e) = self.extend_index(pts) {
            self.source.seek(resume as i64, SeekMode::Start);
            return Err(e);
        }
        let offset = self.seek_offset(pts);
        if !self.source.seek(offset as i64, SeekMode::Start) {
            self.source.seek(resume as i64, SeekMode::Start);
            return Err(MediaError::Seek(format!("cannot reposition to offset {}", offset)));
        }
        self.clear_pending();
        log::debug!("Seek to {} resumes at offset {}", crate::utils::format_pts(pts), offset);
        Ok(())
    }

    fn update_selected(&mut self, stream: &MediaStream) {
        let index = stream.index();
        let Some(selected) = self.selected.get_mut(index) else {
            return;
        };
        *selected = stream.is_selected();
        if !*selected {
            self.pending[index].clear();
        }
    }

    fn duration(&self) -> u64 {
        self.duration
    }

    fn markers(&self) -> &[MediaMarker] {
        &self.markers
    }

    fn source(&self) -> &Arc<dyn ByteSource> {
        &self.source
    }
}

pub struct ContainerDemuxerInfo;

impl DemuxerInfo for ContainerDemuxerInfo {
    fn name(&self) -> &str {
        "ccmf"
    }

    fn supports(&self, source: &dyn ByteSource) -> Probe {
        probe_prefix(source, |head| head.starts_with(&CCMF_MAGIC))
    }

    fn create(&self, source: Arc<dyn ByteSource>, config: &PipelineConfig) -> Result<Box<dyn Demuxer>> {
        Ok(Box::new(ContainerDemuxer::new(source, config)))
    }
}

struct WriterStream {
    kind: u8,
    fourcc: [u8; 4],
    bitrate: u32,
    extra_data: Vec<u8>,
    details: StreamDetails,
}

/// Builds CCMF files and packet streams
#[derive(Default)]
pub struct CcmfWriter {
    broadcast: bool,
    duration: u64,
    preroll: u64,
    streams: Vec<WriterStream>,
    markers: Vec<MediaMarker>,
    packets: Vec<Vec<u8>>,
}

impl CcmfWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_duration(&mut self, duration: u64) -> &mut Self {
        self.duration = duration;
        self
    }

    pub fn set_preroll(&mut self, preroll: u64) -> &mut Self {
        self.preroll = preroll;
        self
    }

    pub fn set_broadcast(&mut self, broadcast: bool) -> &mut Self {
        self.broadcast = broadcast;
        self
    }

    /// Declare a stream; unknown codec names are written with their `codec_id` tag
    pub fn add_stream(&mut self, info: &StreamInfo) -> usize {
        let kind = match info.details {
            StreamDetails::Video(_) => KIND_VIDEO,
            StreamDetails::Audio(_) => KIND_AUDIO,
            StreamDetails::Marker => KIND_MARKER,
        };
        self.streams.push(WriterStream {
            kind,
            fourcc: fourcc_for_codec(&info.codec).unwrap_or_else(|| info.codec_id.to_le_bytes()),
            bitrate: info.bitrate,
            extra_data: info.extra_data.clone(),
            details: info.details.clone(),
        });
        self.streams.len() - 1
    }

    pub fn add_marker(&mut self, pts: u64, kind: &str, text: &str) -> &mut Self {
        self.markers.push(MediaMarker {
            pts,
            kind: kind.to_string(),
            text: text.to_string(),
        });
        self
    }

    pub fn add_packet(&mut self, stream: usize, pts: u64, duration: u32, keyframe: bool, payload: &[u8]) -> &mut Self {
        let mut packet = Vec::with_capacity(PACKET_HEADER_SIZE + payload.len());
        packet.put_u8(stream as u8);
        packet.put_u8(if keyframe { PACKET_KEYFRAME } else { 0 });
        packet.put_u64_le(pts);
        packet.put_u32_le(duration);
        packet.put_u32_le(payload.len() as u32);
        packet.put_slice(payload);
        self.packets.push(packet);
        self
    }

    /// Magic, version, length and header body
    pub fn header_bytes(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.put_u32_le(if self.broadcast { FLAG_BROADCAST } else { 0 });
        body.put_u64_le(self.duration);
        body.put_u64_le(self.preroll);
        body.put_u16_le(self.streams.len() as u16);
        for stream in &self.streams {
            body.put_u8(stream.kind);
            body.put_slice(&stream.fourcc);
            body.put_u32_le(stream.bitrate);
            body.put_u16_le(stream.extra_data.len() as u16);
            body.put_slice(&stream.extra_data);
            match &stream.details {
                StreamDetails::Video(video) => {
                    body.put_u32_le(video.width);
                    body.put_u32_le(video.height);
                }
                StreamDetails::Audio(audio) => {
                    body.put_u16_le(audio.channels);
                    body.put_u32_le(audio.sample_rate);
                    body.put_u16_le(audio.bits_per_sample);
                    body.put_u16_le(audio.block_align);
                }
                StreamDetails::Marker => {}
            }
        }
        body.put_u16_le(self.markers.len() as u16);
        for marker in &self.markers {
            body.put_u64_le(marker.pts);
            for text in [&marker.kind, &marker.text] {
                body.put_u16_le(text.len() as u16);
                body.put_slice(text.as_bytes());
            }
        }

        let mut header = Vec::with_capacity(PREAMBLE_SIZE + body.len());
        header.put_slice(&CCMF_MAGIC);
        header.put_u32_le(CCMF_VERSION);
        header.put_u32_le(body.len() as u32);
        header.extend_from_slice(&body);
        header
    }

    /// Encoded packets in insertion order, one chunk each
    pub fn packet_chunks(&self) -> impl Iterator<Item = &[u8]> {
        self.packets.iter().map(Vec::as_slice)
    }

    /// Complete file image
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.header_bytes();
        for packet in &self.packets {
            out.extend_from_slice(packet);
        }
        out
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_bytes())?;
        Ok(())
    }
}
