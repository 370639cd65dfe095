//! Integration tests for the ccmedia pipeline
//!
//! These tests drive a `Media` end to end:
//! - Opening files, progressive downloads and packet queues
//! - Pulling demuxed, decoded and converted frames
//! - Seeking and end of stream
//! - Playlists and failure reporting
//! - Shutdown and resource cleanup

use anyhow::Result;
use ccmedia::media::{MediaClosure, MediaState};
use ccmedia::source::ByteSource;
use ccmedia::stream::{FrameState, MediaType};
use ccmedia::utils::{MediaCode, TICKS_PER_SECOND};
use ccmedia_integration_tests::{
    clip_writer, new_media, next_frame, perf_test::PerfMeasure, seek, test_config, TestFixture,
    CLIP_FRAMES, TIMEOUT, VIDEO_HEIGHT, VIDEO_WIDTH,
};
use ccmedia::{Media, Registries};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn open_clip(fixture: &TestFixture) -> Result<Media> {
    let media = new_media();
    media.initialize_file(&fixture.media_files.clip)?;
    media.open()?;
    Ok(media)
}

#[test]
fn test_open_file_reports_streams() -> Result<()> {
    let fixture = TestFixture::new()?;
    let media = open_clip(&fixture)?;

    assert_eq!(media.state(), MediaState::Opened);
    let streams = media.streams();
    assert_eq!(streams.len(), 3);
    assert_eq!(streams[0].codec(), "i420");
    assert_eq!(streams[0].media_type(), MediaType::Video);
    assert_eq!(streams[1].codec(), "pcm");
    assert_eq!(streams[2].media_type(), MediaType::Marker);
    assert!(streams.iter().all(|s| s.has_decoder() && s.is_selected()));
    assert!(streams[0].has_converter());

    assert_eq!(media.duration(), CLIP_FRAMES * TICKS_PER_SECOND);
    let markers = media.markers();
    assert_eq!(markers.len(), 2);
    assert_eq!(markers[1].text, "Middle");
    assert!(media.playlist().is_none());

    Ok(())
}

#[test]
fn test_video_frames_arrive_converted_and_in_order() -> Result<()> {
    let fixture = TestFixture::new()?;
    let media = open_clip(&fixture)?;
    let video = media.stream(0).unwrap();

    for n in 0..CLIP_FRAMES {
        let outcome = next_frame(&media, &video, FrameState::DECODED | FrameState::CONVERTED)?;
        assert_eq!(outcome.result, MediaCode::Success);
        let frame = outcome.frame.unwrap();
        assert_eq!(frame.pts, n * TICKS_PER_SECOND);
        assert!(frame.has_state(FrameState::CONVERTED));
        assert!(!frame.has_state(FrameState::PLANAR));
        assert_eq!(frame.len(), (VIDEO_WIDTH * VIDEO_HEIGHT * 4) as usize);
        assert_eq!(frame.is_keyframe(), n % 3 == 0);
    }

    let end = next_frame(&media, &video, FrameState::DECODED)?;
    assert_eq!(end.result, MediaCode::NoMoreData);
    assert!(end.frame.unwrap().is_eof());

    Ok(())
}

#[test]
fn test_marker_stream_decodes_commands() -> Result<()> {
    let fixture = TestFixture::new()?;
    let media = open_clip(&fixture)?;
    let markers = media.stream(2).unwrap();

    let outcome = next_frame(&media, &markers, FrameState::DECODED)?;
    let frame = outcome.frame.unwrap();
    assert!(frame.has_state(FrameState::MARKER));
    let marker = frame.marker.unwrap();
    assert_eq!(marker.kind, "caption");
    assert_eq!(marker.text, "line 0");

    Ok(())
}

#[test]
fn test_deselected_stream_does_not_block_others() -> Result<()> {
    let fixture = TestFixture::new()?;
    let media = open_clip(&fixture)?;
    let audio = media.stream(1).unwrap();
    media.stream(0).unwrap().set_selected(false);
    media.stream(2).unwrap().set_selected(false);

    for n in 0..CLIP_FRAMES {
        let frame = next_frame(&media, &audio, FrameState::DEMUXED)?.frame.unwrap();
        assert_eq!(frame.pts, n * TICKS_PER_SECOND);
        assert!(!frame.has_state(FrameState::DECODED));
    }

    Ok(())
}

#[test]
fn test_seek_lands_on_preceding_keyframe() -> Result<()> {
    let fixture = TestFixture::new()?;
    let media = open_clip(&fixture)?;
    let video = media.stream(0).unwrap();

    // keyframes sit at 0, 3, 6 and 9 seconds
    let outcome = seek(&media, 4 * TICKS_PER_SECOND + TICKS_PER_SECOND / 2)?;
    assert_eq!(outcome.result, MediaCode::Success);
    let frame = next_frame(&media, &video, FrameState::DECODED)?.frame.unwrap();
    assert_eq!(frame.pts, 3 * TICKS_PER_SECOND);
    assert!(frame.is_keyframe());

    seek(&media, 0)?;
    let frame = next_frame(&media, &video, FrameState::DECODED)?.frame.unwrap();
    assert_eq!(frame.pts, 0);

    Ok(())
}

#[test]
fn test_rapid_seeks_complete_latest() -> Result<()> {
    let fixture = TestFixture::new()?;
    let media = open_clip(&fixture)?;

    let mut receivers = Vec::new();
    for n in 0..CLIP_FRAMES {
        let (closure, rx) = MediaClosure::channel();
        media.seek_async(n * TICKS_PER_SECOND, closure)?;
        receivers.push(rx);
    }

    let last = receivers.pop().unwrap();
    assert_eq!(last.recv_timeout(TIMEOUT)?.result, MediaCode::Success);
    for rx in receivers {
        // superseded seeks are dropped without being called
        if let Ok(outcome) = rx.recv_timeout(TIMEOUT) {
            assert_eq!(outcome.result, MediaCode::Success);
        }
    }

    let video = media.stream(0).unwrap();
    let frame = next_frame(&media, &video, FrameState::DECODED)?.frame.unwrap();
    assert_eq!(frame.pts, 9 * TICKS_PER_SECOND);

    Ok(())
}

#[tokio::test]
async fn test_open_async_completes_oneshot() -> Result<()> {
    let fixture = TestFixture::new()?;
    let media = new_media();
    media.initialize_file(&fixture.media_files.clip)?;

    let (closure, opened) = MediaClosure::oneshot();
    media.open_async(media.source().unwrap(), closure)?;
    let outcome = opened.await?;
    assert_eq!(outcome.result, MediaCode::Success);
    assert_eq!(media.streams().len(), 3);

    Ok(())
}

#[test]
fn test_progressive_download_opens_as_data_arrives() -> Result<()> {
    let mut config = test_config();
    config.source.progressive_block_size = 1;
    let media = Media::new(Arc::new(Registries::with_defaults(&config)), config);
    let download = media.initialize_progressive()?;

    let (closure, opened) = MediaClosure::channel();
    media.open_async(Arc::clone(&download) as Arc<dyn ByteSource>, closure)?;

    let bytes = clip_writer().to_bytes();
    let writer = {
        let download = Arc::clone(&download);
        std::thread::spawn(move || -> ccmedia::Result<()> {
            for (i, chunk) in bytes.chunks(37).enumerate() {
                download.notify_bytes_written((i * 37) as u64, chunk)?;
                std::thread::sleep(Duration::from_millis(1));
            }
            download.notify_finished();
            Ok(())
        })
    };

    assert_eq!(opened.recv_timeout(TIMEOUT)?.result, MediaCode::Success);
    let audio = media.stream(1).unwrap();
    let mut frames = 0;
    loop {
        let outcome = next_frame(&media, &audio, FrameState::DECODED)?;
        if outcome.result == MediaCode::NoMoreData {
            break;
        }
        assert_eq!(outcome.result, MediaCode::Success);
        frames += 1;
    }
    assert_eq!(frames, CLIP_FRAMES);
    writer.join().unwrap()?;

    Ok(())
}

#[test]
fn test_packet_queue_source() -> Result<()> {
    let media = new_media();
    let queue = media.initialize_queue()?;

    let writer = clip_writer();
    queue.push(writer.header_bytes());
    for chunk in writer.packet_chunks() {
        queue.push(chunk.to_vec());
    }
    queue.notify_finished();

    media.open()?;
    let video = media.stream(0).unwrap();
    let frame = next_frame(&media, &video, FrameState::DECODED)?.frame.unwrap();
    assert_eq!(frame.pts, 0);
    assert_eq!(frame.width, VIDEO_WIDTH);

    Ok(())
}

#[test]
fn test_playlists_expose_entries() -> Result<()> {
    let fixture = TestFixture::new()?;

    let media = new_media();
    media.initialize_file(&fixture.media_files.asx_playlist)?;
    media.open()?;
    assert!(media.streams().is_empty());
    let playlist = media.playlist().unwrap();
    assert_eq!(playlist.title.as_deref(), Some("Evening shows"));
    let hrefs: Vec<_> = playlist.entries.iter().map(|e| e.href.as_str()).collect();
    assert_eq!(hrefs, ["http://example.com/news.ccmf", "http://example.com/weather.ccmf"]);

    let media = new_media();
    media.initialize_file(&fixture.media_files.ini_playlist)?;
    media.open()?;
    let hrefs: Vec<_> = media
        .playlist()
        .unwrap()
        .entries
        .into_iter()
        .map(|e| e.href)
        .collect();
    assert_eq!(hrefs, ["http://example.com/a.ccmf", "http://example.com/b.ccmf"]);

    Ok(())
}

#[test]
fn test_error_handling() -> Result<()> {
    let fixture = TestFixture::new()?;

    let media = new_media();
    media.initialize_file(&fixture.media_files.unknown_codec)?;
    let err = media.open().unwrap_err();
    assert_eq!(err.code(), MediaCode::UnknownCodec);
    assert!(media.messages().iter().any(|m| m.is_error()));
    assert!(!media.stream(0).unwrap().has_decoder());

    let media = new_media();
    media.initialize_file(&fixture.media_files.garbage)?;
    assert_eq!(media.open().unwrap_err().code(), MediaCode::UnknownMediaType);

    let media = new_media();
    assert!(media.initialize_file(&fixture.path().join("missing.ccmf")).is_err());
    assert_eq!(media.open().unwrap_err().code(), MediaCode::InvalidArgument);

    Ok(())
}

#[test]
fn test_stop_while_waiting_for_data() -> Result<()> {
    let media = new_media();
    let download = media.initialize_progressive()?;

    let (closure, opened) = MediaClosure::channel();
    media.open_async(download as Arc<dyn ByteSource>, closure)?;
    std::thread::sleep(Duration::from_millis(50));

    let start = Instant::now();
    media.stop_thread();
    assert!(start.elapsed() < TIMEOUT);
    assert!(media.is_stopped());

    let outcome = opened.recv_timeout(TIMEOUT)?;
    assert!(!outcome.result.is_success());
    assert_ne!(outcome.result, MediaCode::NotEnoughData);

    Ok(())
}

#[test]
fn test_resource_cleanup() -> Result<()> {
    let fixture = TestFixture::new()?;
    let handle = {
        let media = open_clip(&fixture)?;
        let video = media.stream(0).unwrap();
        let (closure, _rx) = MediaClosure::channel();
        media.get_next_frame_async(&video, FrameState::DECODED, closure)?;
        media.handle()
    };

    assert!(handle.is_stopped());
    assert_eq!(handle.state(), MediaState::Stopped);
    assert_eq!(handle.pending_work(), 0);
    let (closure, _rx) = MediaClosure::channel();
    assert!(handle.seek_async(0, closure).is_err());

    Ok(())
}

#[test]
fn test_performance_metrics() -> Result<()> {
    let fixture = TestFixture::new()?;
    let mut open_perf = PerfMeasure::new("Open");
    let mut frame_perf = PerfMeasure::new("Converted frame");

    for _ in 0..3 {
        open_perf.start();
        let media = open_clip(&fixture)?;
        open_perf.stop();

        let video = media.stream(0).unwrap();
        for _ in 0..CLIP_FRAMES {
            frame_perf.start();
            next_frame(&media, &video, FrameState::DECODED | FrameState::CONVERTED)?;
            frame_perf.stop();
        }
    }

    open_perf.report();
    frame_perf.report();
    assert_eq!(frame_perf.samples(), 3 * CLIP_FRAMES as usize);
    assert!(open_perf.average() < Duration::from_secs(1));
    assert!(frame_perf.average() < Duration::from_millis(100));

    Ok(())
}
