//! Demuxers
//!
//! A demuxer parses a container from a [`ByteSource`], creates one
//! [`MediaStream`] per elementary stream while reading the header, and then
//! hands out compressed frames one at a time.

mod container;
mod playlist;

pub use container::{CcmfWriter, ContainerDemuxer, ContainerDemuxerInfo, CCMF_MAGIC};
pub use playlist::{Playlist, PlaylistDemuxer, PlaylistDemuxerInfo, PlaylistEntry};

use crate::source::ByteSource;
use crate::stream::{MediaFrame, MediaMarker, MediaStream};
use crate::utils::error::Result;
use std::sync::Arc;

/// Container parser producing compressed frames
pub trait Demuxer: Send {
    /// Short name for logging
    fn name(&self) -> &str;

    /// Parse the container header and create the streams
    ///
    /// Returns `NotEnoughData` when the source does not yet hold the whole
    /// header. Nothing is committed in that case and the call may be repeated.
    fn read_header(&mut self) -> Result<()>;

    /// Streams created by [`Demuxer::read_header`], ordered by index
    fn streams(&self) -> &[Arc<MediaStream>];

    fn stream_count(&self) -> usize {
        self.streams().len()
    }

    fn stream(&self, index: usize) -> Option<&Arc<MediaStream>> {
        self.streams().get(index)
    }

    /// Read the next compressed frame of the stream `frame` was created for
    ///
    /// On success the frame holds the padded payload with `DEMUXED` set, plus
    /// `KEYFRAME` when the container flags it. At end of stream the frame's
    /// event is set to `FrameEvent::Eof` and `NoMoreData` is returned.
    fn read_frame(&mut self, frame: &mut MediaFrame) -> Result<()>;

    /// Reposition every selected stream to the nearest keyframe at or before `pts`
    fn seek(&mut self, pts: u64) -> Result<()>;

    /// Take note of a selection change on `stream`
    fn update_selected(&mut self, stream: &MediaStream);

    /// Presentation duration in pts ticks (0 if unknown)
    fn duration(&self) -> u64;

    /// Script commands stored in the header
    fn markers(&self) -> &[MediaMarker] {
        &[]
    }

    /// Playlist document, for demuxers that parse one
    fn playlist(&self) -> Option<&Playlist> {
        None
    }

    fn source(&self) -> &Arc<dyn ByteSource>;
}

/// Map a container fourcc to the codec name used for decoder matching
pub fn codec_from_fourcc(fourcc: [u8; 4]) -> String {
    let upper = fourcc.map(|b| b.to_ascii_uppercase());
    let name = match &upper {
        b"WMV1" => "wmv1",
        b"WMV2" => "wmv2",
        b"WMV3" => "wmv3",
        b"WMVA" => "wmva",
        b"WVC1" => "vc1",
        b"I420" => "i420",
        b"RGB4" => "rgb32",
        b"PCM " => "pcm",
        b"MP3 " => "mp3",
        b"WMA1" => "wmav1",
        b"WMA2" => "wmav2",
        b"MRKR" => "marker",
        _ => {
            let tag: String = fourcc
                .iter()
                .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' })
                .collect();
            return format!("unknown ({})", tag);
        }
    };
    name.to_string()
}

/// Inverse of [`codec_from_fourcc`] for the known codecs
pub fn fourcc_for_codec(codec: &str) -> Option<[u8; 4]> {
    Some(match codec {
        "wmv1" => *b"WMV1",
        "wmv2" => *b"WMV2",
        "wmv3" => *b"WMV3",
        "wmva" => *b"WMVA",
        "vc1" => *b"WVC1",
        "i420" => *b"I420",
        "rgb32" => *b"RGB4",
        "pcm" => *b"PCM ",
        "mp3" => *b"MP3 ",
        "wmav1" => *b"WMA1",
        "wmav2" => *b"WMA2",
        "marker" => *b"MRKR",
        _ => return None,
    })
}
