use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{debug, info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use ccmedia::demuxer::Playlist;
use ccmedia::media::{ClosureOutcome, Media, MediaClosure};
use ccmedia::registry::Registries;
use ccmedia::stream::{FrameState, MediaMarker, MediaStream, StreamInfo};
use ccmedia::utils::{self, format_pts, PipelineConfig, TICKS_PER_SECOND};

/// ccmedia - inspect a media file and pull frames through the pipeline
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Media file or playlist to open
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Number of frames to pull per stream
    #[arg(short, long, default_value = "10")]
    frames: usize,

    /// Stream to pull frames from (every selected stream by default)
    #[arg(short, long)]
    stream: Option<usize>,

    /// Seek to this position in seconds before pulling frames
    #[arg(long, value_name = "SECS")]
    seek: Option<f64>,

    /// Only demux, skip decoding
    #[arg(long)]
    demux_only: bool,

    /// Configuration file (defaults to the system and user config files)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print a JSON report instead of text
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Serialize)]
struct StreamReport {
    index: usize,
    selected: bool,
    decodable: bool,
    #[serde(flatten)]
    info: StreamInfo,
}

#[derive(Serialize)]
struct FrameReport {
    stream: usize,
    pts: u64,
    duration: u64,
    size: usize,
    keyframe: bool,
    state: u32,
}

#[derive(Serialize)]
struct Report {
    file: PathBuf,
    duration: u64,
    streams: Vec<StreamReport>,
    markers: Vec<MediaMarker>,
    playlist: Option<Playlist>,
    frames: Vec<FrameReport>,
    messages: Vec<ccmedia::media::MediaMessage>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => utils::load_config()?,
    };

    let log_level = if args.debug { "debug" } else { config.general.log_level.as_str() };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    info!("Starting ccmedia v{}", env!("CARGO_PKG_VERSION"));

    if !args.file.exists() {
        bail!("File not found: {:?}", args.file);
    }

    let registries = Arc::new(Registries::with_defaults(&config));
    let media = Media::new(registries, config);
    media.initialize_file(&args.file)?;

    let source = media.source().ok_or_else(|| anyhow!("media has no source"))?;
    let (closure, opened) = MediaClosure::oneshot();
    media.open_async(source, closure)?;
    check(opened.await.context("worker dropped the open request")?)?;

    if let Some(secs) = args.seek {
        let pts = (secs.max(0.0) * TICKS_PER_SECOND as f64) as u64;
        let (closure, seeked) = MediaClosure::oneshot();
        media.seek_async(pts, closure)?;
        check(seeked.await.context("worker dropped the seek request")?)?;
        info!("Seeked to {}", format_pts(pts));
    }

    let states = if args.demux_only {
        FrameState::DEMUXED
    } else {
        FrameState::DECODED | FrameState::CONVERTED
    };
    let streams = pick_streams(&media.streams(), args.stream);
    if streams.is_empty() {
        warn!("No selected stream to pull frames from");
    }

    let mut frames = Vec::new();
    for stream in &streams {
        for _ in 0..args.frames {
            let (closure, next) = MediaClosure::oneshot();
            media.get_next_frame_async(stream, states, closure)?;
            let outcome = next.await.context("worker dropped the frame request")?;
            if !outcome.result.is_success() {
                if !outcome.frame.as_ref().is_some_and(|f| f.is_eof()) {
                    warn!("Frame request on stream {} failed: {}", stream.index(), outcome.error.unwrap_or_default());
                }
                break;
            }
            if let Some(frame) = outcome.frame {
                debug!("Frame pts {} ({} bytes)", frame.pts, frame.len());
                frames.push(FrameReport {
                    stream: frame.stream_index(),
                    pts: frame.pts,
                    duration: frame.duration,
                    size: frame.len(),
                    keyframe: frame.is_keyframe(),
                    state: frame.state.bits(),
                });
            }
        }
    }

    let report = Report {
        file: args.file.clone(),
        duration: media.duration(),
        streams: media
            .streams()
            .iter()
            .map(|stream| StreamReport {
                index: stream.index(),
                selected: stream.is_selected(),
                decodable: stream.has_decoder(),
                info: stream.info().clone(),
            })
            .collect(),
        markers: media.markers(),
        playlist: media.playlist(),
        frames,
        messages: media.messages(),
    };
    media.stop_thread();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn check(outcome: ClosureOutcome) -> Result<()> {
    if outcome.result.is_success() {
        Ok(())
    } else {
        Err(anyhow!(
            "{}: {}",
            outcome.result,
            outcome.error.unwrap_or_default()
        ))
    }
}

/// The requested stream, or every selected stream
fn pick_streams(streams: &[Arc<MediaStream>], wanted: Option<usize>) -> Vec<Arc<MediaStream>> {
    match wanted {
        Some(index) => streams.get(index).cloned().into_iter().collect(),
        None => streams.iter().filter(|s| s.is_selected()).cloned().collect(),
    }
}

fn print_report(report: &Report) {
    println!("{} ({})", report.file.display(), format_pts(report.duration));

    for stream in &report.streams {
        println!(
            "  stream {}: {} {:?}{}",
            stream.index,
            stream.info.codec,
            stream.info.details,
            if stream.decodable { "" } else { " (no decoder)" }
        );
    }
    for marker in &report.markers {
        println!("  marker {} [{}] {}", format_pts(marker.pts), marker.kind, marker.text);
    }
    if let Some(playlist) = &report.playlist {
        println!("  playlist {}", playlist.title.as_deref().unwrap_or("(untitled)"));
        for entry in &playlist.entries {
            println!("    {}", entry.href);
        }
    }
    for frame in &report.frames {
        println!(
            "  frame s{} {} +{} {} bytes{}",
            frame.stream,
            format_pts(frame.pts),
            format_pts(frame.duration),
            frame.size,
            if frame.keyframe { " key" } else { "" }
        );
    }
    for message in &report.messages {
        println!("  ! {}", message.text);
    }
}
