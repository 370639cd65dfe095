//! Worker thread servicing a media's work queue

use super::{MediaInner, MediaState, MediaWork, WorkRequest};
use crate::converter::convert_frame;
use crate::decoder::DecodeStatus;
use crate::stream::{FrameState, MediaFrame, MediaStream};
use crate::utils::error::{MediaCode, MediaError, Result};
use log::{debug, error, trace, warn};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub(super) fn spawn(inner: Arc<MediaInner>) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("ccmedia-worker".to_string())
        .spawn(move || run(inner))
        .map_err(|e| MediaError::Internal(format!("failed to spawn media worker: {}", e)))
}

fn run(inner: Arc<MediaInner>) {
    let _ = inner.worker_thread_id.set(thread::current().id());
    debug!("Media worker started");

    loop {
        let work = {
            let mut queue = inner.queue.lock();
            loop {
                if inner.is_stopping() {
                    break None;
                }
                if let Some(work) = queue.pop() {
                    break Some(work);
                }
                inner.queue_signal.wait(&mut queue);
            }
        };
        let Some(work) = work else {
            break;
        };

        inner.apply_pending_selection();
        process(&inner, work);
    }

    inner.stopped.store(true, Ordering::SeqCst);
    inner.set_state(MediaState::Stopped);
    debug!("Media worker exited");
}

fn process(inner: &Arc<MediaInner>, work: MediaWork) {
    let MediaWork { request, mut closure } = work;
    debug!("Dispatching {:?}", request);

    let (result, frame) = match request {
        WorkRequest::Open(source) => (inner.open_source(source), None),
        WorkRequest::Seek(pts) => (inner.seek(pts), None),
        WorkRequest::GetFrame { stream, states } => get_frame(inner, &stream, states),
    };

    match result {
        Ok(()) => closure.set_result(MediaCode::Success),
        Err(e) => {
            if !e.is_end_of_stream() {
                warn!("Work item failed: {}", e);
            }
            closure.set_error(e);
        }
    }
    closure.set_frame(frame);
    closure.call();
}

/// Demux, decode and convert one frame of `stream`
///
/// End of stream returns the frame carrying the `Eof` event alongside `NoMoreData`.
fn get_frame(inner: &MediaInner, stream: &Arc<MediaStream>, states: FrameState) -> (Result<()>, Option<MediaFrame>) {
    let mut guard = inner.demuxer.lock();
    let Some(demuxer) = guard.as_mut() else {
        return (Err(MediaError::Fail("no media has been opened".to_string())), None);
    };
    let source = Arc::clone(demuxer.source());
    let decode = states.contains(FrameState::DECODED) || states.contains(FrameState::CONVERTED);

    let mut frame = loop {
        let mut frame = MediaFrame::new(stream);
        if let Err(e) = inner.retry(Some(&source), || demuxer.read_frame(&mut frame)) {
            let frame = frame.is_eof().then_some(frame);
            return (Err(e), frame);
        }
        if !decode {
            return (Ok(()), Some(frame));
        }

        let mut slot = stream.decoder();
        let Some(decoder) = slot.as_mut() else {
            return (
                Err(MediaError::UnknownCodec(format!(
                    "stream {} has no decoder for {}",
                    stream.index(),
                    stream.codec()
                ))),
                None,
            );
        };
        match decoder.decode_frame(&mut frame) {
            Ok(DecodeStatus::Decoded) => break frame,
            Ok(DecodeStatus::Delayed) => trace!("Decoder {} delayed pts {}", decoder.name(), frame.pts),
            Err(e) => return (Err(e), None),
        }
    };
    drop(guard);

    if states.contains(FrameState::CONVERTED) && !frame.has_state(FrameState::CONVERTED) {
        if let Some(converter) = stream.converter().as_mut() {
            if let Err(e) = convert_frame(converter.as_mut(), &mut frame) {
                error!("Conversion failed on stream {}: {}", stream.index(), e);
                return (Err(e), None);
            }
        }
    }
    (Ok(()), Some(frame))
}
