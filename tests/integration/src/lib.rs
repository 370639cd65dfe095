//! Integration test utilities for ccmedia
//!
//! This module provides common utilities for integration testing including:
//! - Test media file generation in the CCMF container
//! - Pipeline construction helpers
//! - Performance measurement

use anyhow::Result;
use ccmedia::decoder::encode_marker_payload;
use ccmedia::demuxer::CcmfWriter;
use ccmedia::media::{ClosureOutcome, Media, MediaClosure};
use ccmedia::registry::Registries;
use ccmedia::stream::{AudioInfo, FrameState, MediaStream, StreamDetails, StreamInfo, VideoInfo};
use ccmedia::utils::{PipelineConfig, TICKS_PER_SECOND};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Frames per stream in the generated clip
pub const CLIP_FRAMES: u64 = 10;

/// Every third video frame is a keyframe
pub const KEYFRAME_INTERVAL: u64 = 3;

pub const VIDEO_WIDTH: u32 = 4;
pub const VIDEO_HEIGHT: u32 = 4;

/// How long tests wait for a closure before failing
pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Test fixture for integration tests
pub struct TestFixture {
    pub temp_dir: TempDir,
    pub media_files: MediaFiles,
}

/// Collection of test media files
pub struct MediaFiles {
    /// i420 video, pcm audio and a marker stream, one frame per second
    pub clip: PathBuf,
    /// Single stream with a codec nothing decodes
    pub unknown_codec: PathBuf,
    pub asx_playlist: PathBuf,
    pub ini_playlist: PathBuf,
    /// Bytes no demuxer recognises
    pub garbage: PathBuf,
}

impl TestFixture {
    /// Create a new test fixture with generated media files
    pub fn new() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let media_files = MediaFiles::generate(&temp_dir)?;

        Ok(Self {
            temp_dir,
            media_files,
        })
    }

    /// Get the path to the temporary directory
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }
}

impl MediaFiles {
    fn generate(dir: &TempDir) -> Result<Self> {
        let clip = dir.path().join("clip.ccmf");
        clip_writer().write_to(&clip)?;

        let unknown_codec = dir.path().join("unknown.ccmf");
        let mut writer = CcmfWriter::new();
        writer.add_stream(
            &StreamInfo::new("h264", StreamDetails::Video(VideoInfo::new(VIDEO_WIDTH, VIDEO_HEIGHT)))
                .with_codec_id(0x3436_3248),
        );
        writer.add_packet(0, 0, 1000, true, &[0; 8]);
        writer.write_to(&unknown_codec)?;

        let asx_playlist = dir.path().join("list.asx");
        std::fs::write(
            &asx_playlist,
            concat!(
                "<ASX version=\"3.0\">\n",
                "  <Title>Evening shows</Title>\n",
                "  <Entry><Title>News</Title><Ref href=\"http://example.com/news.ccmf\"/></Entry>\n",
                "  <Entry><Ref HREF=\"http://example.com/weather.ccmf\"/></Entry>\n",
                "</ASX>\n"
            ),
        )?;

        let ini_playlist = dir.path().join("list.ini");
        std::fs::write(
            &ini_playlist,
            "[Reference]\r\nRef2=http://example.com/b.ccmf\r\nRef1=http://example.com/a.ccmf\r\n",
        )?;

        let garbage = dir.path().join("garbage.bin");
        std::fs::write(&garbage, vec![0x5au8; 256])?;

        Ok(Self {
            clip,
            unknown_codec,
            asx_playlist,
            ini_playlist,
            garbage,
        })
    }
}

/// Writer holding the standard test clip
///
/// Stream 0 is 4x4 i420 video, stream 1 pcm audio and stream 2 markers.
/// Packet `n` of every stream starts at `n` seconds.
pub fn clip_writer() -> CcmfWriter {
    let mut writer = CcmfWriter::new();
    writer.set_duration(CLIP_FRAMES * TICKS_PER_SECOND);
    writer.add_stream(&StreamInfo::new(
        "i420",
        StreamDetails::Video(VideoInfo::new(VIDEO_WIDTH, VIDEO_HEIGHT)),
    ));
    writer.add_stream(&StreamInfo::new("pcm", StreamDetails::Audio(AudioInfo::default())));
    writer.add_stream(&StreamInfo::new("marker", StreamDetails::Marker));
    writer.add_marker(0, "chapter", "Opening");
    writer.add_marker(5 * TICKS_PER_SECOND, "chapter", "Middle");

    let picture = (VIDEO_WIDTH * VIDEO_HEIGHT * 3 / 2) as usize;
    let second = TICKS_PER_SECOND as u32;
    for n in 0..CLIP_FRAMES {
        let pts = n * TICKS_PER_SECOND;
        writer.add_packet(0, pts, second, n % KEYFRAME_INTERVAL == 0, &vec![n as u8 + 16; picture]);
        writer.add_packet(1, pts, second, true, &[n as u8; 64]);
        writer.add_packet(2, pts, 0, true, &encode_marker_payload("caption", &format!("line {}", n)));
    }
    writer
}

/// Pipeline configuration with a short retry interval
pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.worker.retry_interval_ms = 5;
    config
}

pub fn new_media() -> Media {
    let config = test_config();
    Media::new(Arc::new(Registries::with_defaults(&config)), config)
}

/// Queue a frame request and block for its outcome
pub fn next_frame(media: &Media, stream: &Arc<MediaStream>, states: FrameState) -> Result<ClosureOutcome> {
    let (closure, rx) = MediaClosure::channel();
    media.get_next_frame_async(stream, states, closure)?;
    Ok(rx.recv_timeout(TIMEOUT)?)
}

/// Queue a seek and block for its outcome
pub fn seek(media: &Media, pts: u64) -> Result<ClosureOutcome> {
    let (closure, rx) = MediaClosure::channel();
    media.seek_async(pts, closure)?;
    Ok(rx.recv_timeout(TIMEOUT)?)
}

/// Performance measurement utilities
pub mod perf_test {
    use std::time::{Duration, Instant};

    pub struct PerfMeasure {
        name: String,
        start: Instant,
        measurements: Vec<Duration>,
    }

    impl PerfMeasure {
        pub fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                start: Instant::now(),
                measurements: Vec::new(),
            }
        }

        pub fn start(&mut self) {
            self.start = Instant::now();
        }

        pub fn stop(&mut self) {
            self.measurements.push(self.start.elapsed());
        }

        pub fn samples(&self) -> usize {
            self.measurements.len()
        }

        pub fn average(&self) -> Duration {
            if self.measurements.is_empty() {
                return Duration::ZERO;
            }

            let sum: Duration = self.measurements.iter().sum();
            sum / self.measurements.len() as u32
        }

        pub fn max(&self) -> Option<Duration> {
            self.measurements.iter().max().copied()
        }

        pub fn report(&self) {
            println!("Performance Report: {}", self.name);
            println!("  Samples: {}", self.measurements.len());
            println!("  Average: {:?}", self.average());
            println!("  Max: {:?}", self.max().unwrap_or(Duration::ZERO));
        }
    }
}
