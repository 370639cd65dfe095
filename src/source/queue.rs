//! Packet queue source fed by a network thread
//!
//! Chunks are consumed whole with [`ByteSource::pop`]; there is no random
//! access. A consumer that needs to restart delivery at another timestamp
//! calls [`ByteSource::seek_to_pts`], which blocks until the producer picks
//! the request up through [`MemoryQueueSource::take_requested_pts`].

use super::{Availability, ByteSource, SeekMode, SourceKind, SourceSignal};
use crate::utils::error::{MediaError, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;

#[derive(Default)]
struct QueueState {
    chunks: VecDeque<Bytes>,
    /// Bytes handed out by `pop`
    consumed: u64,
    queued_bytes: u64,
    finished: bool,
    requested_pts: Option<u64>,
}

impl QueueState {
    fn clear(&mut self) {
        self.chunks.clear();
        self.queued_bytes = 0;
    }
}

/// Unbounded FIFO of byte chunks
#[derive(Default)]
pub struct MemoryQueueSource {
    state: Mutex<QueueState>,
    signal: SourceSignal,
}

impl MemoryQueueSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and wake the consumer
    ///
    /// Chunks pushed while a timestamp request is pending are stale and dropped.
    pub fn push(&self, chunk: impl Into<Bytes>) {
        let chunk = chunk.into();
        {
            let mut state = self.state.lock();
            if state.requested_pts.is_some() {
                log::trace!("Dropping {} byte chunk queued before pending seek", chunk.len());
                return;
            }
            state.queued_bytes += chunk.len() as u64;
            state.chunks.push_back(chunk);
        }
        self.signal.notify();
    }

    /// Report that the producer will push no more chunks
    pub fn notify_finished(&self) {
        self.state.lock().finished = true;
        self.signal.notify();
    }

    /// Collect a pending timestamp request, unblocking `seek_to_pts`
    pub fn take_requested_pts(&self) -> Option<u64> {
        let pts = self.state.lock().requested_pts.take();
        if pts.is_some() {
            self.signal.notify();
        }
        pts
    }

    /// Number of chunks waiting to be popped
    pub fn len(&self) -> usize {
        self.state.lock().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ByteSource for MemoryQueueSource {
    fn kind(&self) -> SourceKind {
        SourceKind::MemoryQueue
    }

    fn read_some(&self, _buf: &mut [u8]) -> Result<usize> {
        Err(MediaError::InvalidArgument(
            "packet queue sources are consumed with pop()".to_string(),
        ))
    }

    /// Copy from the queued chunks without consuming them
    fn peek(&self, buf: &mut [u8]) -> Result<bool> {
        let mut state = self.state.lock();
        let wanted = buf.len() as u64;
        self.signal
            .wait_until(&mut state, |s| s.queued_bytes >= wanted || s.finished);

        let mut filled = 0;
        for chunk in &state.chunks {
            if filled == buf.len() {
                break;
            }
            let n = chunk.len().min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&chunk[..n]);
            filled += n;
        }
        Ok(filled == buf.len())
    }

    fn seek(&self, _offset: i64, _mode: SeekMode) -> bool {
        false
    }

    fn position(&self) -> u64 {
        self.state.lock().consumed
    }

    fn size(&self) -> Option<u64> {
        let state = self.state.lock();
        state.finished.then_some(state.consumed + state.queued_bytes)
    }

    fn last_available_position(&self) -> Availability {
        let state = self.state.lock();
        Availability::UpTo(state.consumed + state.queued_bytes)
    }

    fn abort(&self) {
        self.signal.abort();
    }

    fn is_aborted(&self) -> bool {
        self.signal.is_aborted()
    }

    fn eof(&self) -> bool {
        let state = self.state.lock();
        state.finished && state.chunks.is_empty()
    }

    fn pop(&self) -> Result<Option<Bytes>> {
        let mut state = self.state.lock();
        if !self
            .signal
            .wait_until(&mut state, |s| !s.chunks.is_empty() || s.finished)
        {
            return Err(MediaError::Read("packet queue aborted".to_string()));
        }

        match state.chunks.pop_front() {
            Some(chunk) => {
                state.queued_bytes -= chunk.len() as u64;
                state.consumed += chunk.len() as u64;
                Ok(Some(chunk))
            }
            None => Ok(None),
        }
    }

    fn can_seek_to_pts(&self) -> bool {
        true
    }

    fn seek_to_pts(&self, pts: u64) -> Result<()> {
        let mut state = self.state.lock();
        state.clear();
        state.finished = false;
        state.requested_pts = Some(pts);
        self.signal.notify();

        if self.signal.wait_until(&mut state, |s| s.requested_pts.is_none()) {
            Ok(())
        } else {
            state.requested_pts = None;
            Err(MediaError::Seek(format!("seek to {} aborted", pts)))
        }
    }
}
