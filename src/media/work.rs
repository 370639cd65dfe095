//! Work items and the priority queue feeding the worker thread
//!
//! Items are kept in a `BTreeMap` keyed by `(rank, sequence)`. Open and seek
//! requests share the front rank with descending sequence numbers, so the most
//! recent one is serviced first. Get-frame requests rank by media type
//! (audio, video, marker) and keep arrival order among equals. A new seek
//! replaces any seek still waiting in the queue.

use super::MediaClosure;
use crate::source::ByteSource;
use crate::stream::{FrameState, MediaStream, MediaType};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Request carried by a work item
pub enum WorkRequest {
    Open(Arc<dyn ByteSource>),
    Seek(u64),
    GetFrame {
        stream: Arc<MediaStream>,
        /// Processing the caller wants applied (`DECODED`, `CONVERTED`)
        states: FrameState,
    },
}

impl WorkRequest {
    pub fn kind(&self) -> WorkKind {
        match self {
            WorkRequest::Open(_) => WorkKind::Open,
            WorkRequest::Seek(_) => WorkKind::Seek,
            WorkRequest::GetFrame { .. } => WorkKind::GetFrame,
        }
    }

    /// Queue rank; lower ranks are serviced first
    fn rank(&self) -> u8 {
        match self {
            WorkRequest::Open(_) | WorkRequest::Seek(_) => 0,
            WorkRequest::GetFrame { stream, .. } => match stream.media_type() {
                MediaType::Audio => 1,
                MediaType::Video => 2,
                MediaType::Marker => 3,
                MediaType::None => 4,
            },
        }
    }
}

impl std::fmt::Debug for WorkRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkRequest::Open(source) => write!(f, "Open({:?})", source.kind()),
            WorkRequest::Seek(pts) => write!(f, "Seek({})", pts),
            WorkRequest::GetFrame { stream, states } => {
                write!(f, "GetFrame(stream {}, states {:#x})", stream.index(), states.bits())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkKind {
    Open,
    Seek,
    GetFrame,
}

/// A request and the closure completed when it has been serviced
#[derive(Debug)]
pub struct MediaWork {
    pub request: WorkRequest,
    pub closure: MediaClosure,
}

impl MediaWork {
    pub fn new(request: WorkRequest, closure: MediaClosure) -> Self {
        Self { request, closure }
    }
}

#[derive(Default)]
pub(crate) struct WorkQueue {
    items: BTreeMap<(u8, i64), MediaWork>,
    next_sequence: i64,
}

impl WorkQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert `work`; returns the queued seek it replaced, if any
    pub(crate) fn push(&mut self, work: MediaWork) -> Option<MediaWork> {
        let replaced = match work.request {
            WorkRequest::Seek(_) => self.remove_seek(),
            _ => None,
        };

        self.next_sequence += 1;
        let rank = work.request.rank();
        let sequence = if rank == 0 {
            -self.next_sequence
        } else {
            self.next_sequence
        };
        self.items.insert((rank, sequence), work);
        replaced
    }

    fn remove_seek(&mut self) -> Option<MediaWork> {
        let key = self
            .items
            .iter()
            .find(|(_, work)| matches!(work.request, WorkRequest::Seek(_)))
            .map(|(key, _)| *key)?;
        self.items.remove(&key)
    }

    pub(crate) fn pop(&mut self) -> Option<MediaWork> {
        self.items.pop_first().map(|(_, work)| work)
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn has_open(&self) -> bool {
        self.items
            .values()
            .any(|work| matches!(work.request, WorkRequest::Open(_)))
    }

    /// Remove every item, returning them so the caller can drop them unlocked
    pub(crate) fn drain(&mut self) -> Vec<MediaWork> {
        std::mem::take(&mut self.items).into_values().collect()
    }

    #[cfg(test)]
    fn kinds(&self) -> Vec<WorkKind> {
        self.items.values().map(|work| work.request.kind()).collect()
    }
}
