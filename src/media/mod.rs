//! Media orchestration
//!
//! A [`Media`] binds a byte source to a demuxer and the decoders of its
//! streams, and services requests on a dedicated worker thread. Requests are
//! queued as [`MediaWork`] items and complete through a [`MediaClosure`].
//!
//! ```no_run
//! use ccmedia::media::{Media, MediaClosure};
//! use ccmedia::registry::Registries;
//! use ccmedia::stream::FrameState;
//! use ccmedia::utils::PipelineConfig;
//! use std::sync::Arc;
//!
//! # fn main() -> ccmedia::utils::Result<()> {
//! let config = PipelineConfig::default();
//! let media = Media::new(Arc::new(Registries::with_defaults(&config)), config);
//! media.initialize_file("clip.ccmf".as_ref())?;
//! media.open()?;
//!
//! let stream = Arc::clone(&media.streams()[0]);
//! let (closure, frames) = MediaClosure::channel();
//! media.get_next_frame_async(&stream, FrameState::DECODED, closure)?;
//! let outcome = frames.recv().expect("worker completed the request");
//! println!("{} -> {:?}", outcome.result, outcome.frame.map(|f| f.pts));
//! # Ok(())
//! # }
//! ```

mod closure;
mod work;
mod worker;

pub use closure::{ClosureOutcome, MediaClosure};
pub use work::{MediaWork, WorkKind, WorkRequest};

use crate::demuxer::{Demuxer, Playlist};
use crate::registry::{Probe, Registries};
use crate::source::{ByteSource, FileSource, MemoryQueueSource, ProgressiveSource};
use crate::stream::{FrameState, MediaMarker, MediaStream, MediaType, SelectionListener};
use crate::utils::config::PipelineConfig;
use crate::utils::error::{MediaCode, MediaError, Result};
use log::{debug, error, info, warn};
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex, RwLock};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use work::WorkQueue;

/// Lifecycle of a [`Media`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MediaState {
    Created,
    Initialized,
    Opened,
    Stopping,
    Stopped,
}

/// Diagnostic recorded while opening or playing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaMessage {
    /// Failure code for errors, `None` for informational messages
    pub code: Option<MediaCode>,
    pub text: String,
}

impl MediaMessage {
    pub fn is_error(&self) -> bool {
        self.code.is_some()
    }
}

pub(crate) struct MediaInner {
    registries: Arc<Registries>,
    config: PipelineConfig,
    state: Mutex<MediaState>,
    source: RwLock<Option<Arc<dyn ByteSource>>>,
    demuxer: Mutex<Option<Box<dyn Demuxer>>>,
    streams: RwLock<Vec<Arc<MediaStream>>>,
    markers: RwLock<Vec<MediaMarker>>,
    playlist: RwLock<Option<Playlist>>,
    duration: AtomicU64,
    opened: AtomicBool,
    queue: Mutex<WorkQueue>,
    queue_signal: Condvar,
    stopping: AtomicBool,
    stopped: AtomicBool,
    /// Selection changes the worker forwards before its next item
    pending_selection: Mutex<Vec<usize>>,
    messages: Mutex<Vec<MediaMessage>>,
    worker_thread_id: OnceCell<ThreadId>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MediaInner {
    fn set_state(&self, state: MediaState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!("Media state {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    fn add_message(&self, text: String) {
        warn!("{}", text);
        self.messages.lock().push(MediaMessage { code: None, text });
    }

    fn add_error(&self, error: &MediaError) {
        error!("{}", error);
        self.messages.lock().push(MediaMessage {
            code: Some(error.code()),
            text: error.to_string(),
        });
    }

    /// Run `op` until it stops asking for more data
    ///
    /// Waits `retry_interval_ms` between attempts and gives up once the media
    /// is stopping or `source` has been aborted.
    fn retry<T>(&self, source: Option<&Arc<dyn ByteSource>>, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let interval = std::time::Duration::from_millis(self.config.worker.retry_interval_ms);
        loop {
            match op() {
                Err(MediaError::NotEnoughData) => {
                    if self.is_stopping() || source.is_some_and(|s| s.is_aborted()) {
                        return Err(MediaError::Read("stopped while waiting for data".to_string()));
                    }
                    thread::sleep(interval);
                }
                other => return other,
            }
        }
    }

    /// Probe, read the header and attach decoders
    fn open_source(self: &Arc<Self>, source: Arc<dyn ByteSource>) -> Result<()> {
        // publish before checking, so a concurrent stop aborts this source
        *self.source.write() = Some(Arc::clone(&source));
        if self.is_stopping() {
            source.abort();
            return Err(MediaError::Fail("media is stopping".to_string()));
        }

        let info = self.retry(Some(&source), || match self.registries.find_demuxer(source.as_ref()) {
            Ok(info) => Ok(info),
            Err(Probe::NotEnoughData) => Err(MediaError::NotEnoughData),
            Err(_) => Err(MediaError::UnknownMediaType(format!(
                "no demuxer recognises the {:?} source",
                source.kind()
            ))),
        });
        let info = info.inspect_err(|e| self.add_error(e))?;
        debug!("Selected demuxer {}", info.name());

        let mut demuxer = info.create(Arc::clone(&source), &self.config)?;
        self.retry(Some(&source), || demuxer.read_header())
            .inspect_err(|e| self.add_error(e))?;

        let streams = demuxer.streams().to_vec();
        let decodable = self.attach_decoders(&streams);
        let duration = streams
            .iter()
            .map(|stream| stream.duration())
            .max()
            .unwrap_or(0)
            .max(demuxer.duration());

        *self.markers.write() = demuxer.markers().to_vec();
        *self.playlist.write() = demuxer.playlist().cloned();
        *self.streams.write() = streams.clone();
        self.duration.store(duration, Ordering::Release);
        *self.demuxer.lock() = Some(demuxer);
        self.opened.store(true, Ordering::SeqCst);

        let listener: Arc<dyn SelectionListener> = self.clone();
        for stream in &streams {
            stream.attach_listener(Arc::downgrade(&listener));
        }
        for stream in streams.iter().filter(|stream| stream.has_decoder()) {
            stream.set_selected(true);
        }

        if streams.is_empty() || decodable {
            info!("Opened media with {} streams", streams.len());
            self.set_state(MediaState::Opened);
            Ok(())
        } else {
            let error = MediaError::UnknownCodec("no stream has a usable decoder".to_string());
            self.add_error(&error);
            Err(error)
        }
    }

    /// Attach the first matching decoder (and converter) to every stream
    ///
    /// Returns true if at least one stream got a decoder.
    fn attach_decoders(&self, streams: &[Arc<MediaStream>]) -> bool {
        let mut decodable = false;
        for stream in streams {
            let Some(info) = self.registries.find_decoder(stream.codec()) else {
                self.add_message(format!(
                    "No decoder for stream {} (codec {})",
                    stream.index(),
                    stream.codec()
                ));
                continue;
            };

            let mut decoder = info.create(stream);
            if let Err(e) = decoder.open(stream) {
                self.add_message(format!(
                    "Decoder {} failed to open stream {}: {}",
                    info.name(),
                    stream.index(),
                    e
                ));
                continue;
            }
            stream.set_min_padding(stream.min_padding().max(decoder.required_padding()));

            if stream.media_type() == MediaType::Video {
                let input = decoder.pixel_format();
                let output = self.config.codecs.output_format;
                if input != output {
                    match self.registries.find_converter(input, output) {
                        Some(converter) => {
                            debug!("Stream {} converts with {}", stream.index(), converter.name());
                            stream.set_converter(Some(converter.create(stream, input, output)));
                        }
                        None => {
                            self.add_message(format!(
                                "No converter from {:?} to {:?} for stream {}",
                                input,
                                output,
                                stream.index()
                            ));
                            continue;
                        }
                    }
                }
            }

            debug!("Stream {} decodes with {}", stream.index(), info.name());
            stream.set_decoder(Some(decoder));
            decodable = true;
        }
        decodable
    }

    fn seek(&self, pts: u64) -> Result<()> {
        let mut guard = self.demuxer.lock();
        let demuxer = guard
            .as_mut()
            .ok_or_else(|| MediaError::Fail("no media has been opened".to_string()))?;
        demuxer.seek(pts)?;
        for stream in demuxer.streams() {
            if let Some(decoder) = stream.decoder().as_mut() {
                decoder.flush();
            }
            stream.clear_queue();
        }
        Ok(())
    }

    fn apply_pending_selection(&self) {
        let pending = std::mem::take(&mut *self.pending_selection.lock());
        if pending.is_empty() {
            return;
        }
        let mut guard = self.demuxer.lock();
        if let Some(demuxer) = guard.as_mut() {
            for index in pending {
                if let Some(stream) = demuxer.stream(index).cloned() {
                    demuxer.update_selected(&stream);
                }
            }
        }
    }
}

impl SelectionListener for MediaInner {
    fn selection_changed(&self, stream_index: usize) {
        match self.demuxer.try_lock() {
            Some(mut guard) => {
                if let Some(demuxer) = guard.as_mut() {
                    if let Some(stream) = demuxer.stream(stream_index).cloned() {
                        demuxer.update_selected(&stream);
                    }
                }
            }
            None => self.pending_selection.lock().push(stream_index),
        }
    }
}

/// Shared reference to a media, handed to closures
#[derive(Clone)]
pub struct MediaHandle {
    inner: Arc<MediaInner>,
}

impl MediaHandle {
    /// Bind `source` and start the worker thread
    pub fn initialize(&self, source: Arc<dyn ByteSource>) -> Result<()> {
        if self.inner.is_stopping() {
            return Err(MediaError::Fail("media has been stopped".to_string()));
        }
        *self.inner.source.write() = Some(source);
        self.ensure_worker()?;
        self.inner.set_state(MediaState::Initialized);
        Ok(())
    }

    pub fn initialize_file(&self, path: &Path) -> Result<()> {
        let source = FileSource::open(path, self.inner.config.source.read_ahead_size)?;
        info!("Initialized media from {:?}", path);
        self.initialize(Arc::new(source))
    }

    /// Bind a new progressive source; the caller feeds it as data arrives
    pub fn initialize_progressive(&self) -> Result<Arc<ProgressiveSource>> {
        let source = Arc::new(ProgressiveSource::new(&self.inner.config)?);
        self.initialize(Arc::clone(&source) as Arc<dyn ByteSource>)?;
        Ok(source)
    }

    /// Bind a new packet queue; the caller pushes chunks into it
    pub fn initialize_queue(&self) -> Result<Arc<MemoryQueueSource>> {
        let source = Arc::new(MemoryQueueSource::new());
        self.initialize(Arc::clone(&source) as Arc<dyn ByteSource>)?;
        Ok(source)
    }

    fn ensure_worker(&self) -> Result<()> {
        let mut slot = self.inner.worker.lock();
        if slot.is_some() {
            return Ok(());
        }
        let handle = worker::spawn(Arc::clone(&self.inner))?;
        let _ = self.inner.worker_thread_id.set(handle.thread().id());
        *slot = Some(handle);
        Ok(())
    }

    /// Open the bound source on the calling thread
    pub fn open(&self) -> Result<()> {
        let source = self
            .source()
            .ok_or_else(|| MediaError::InvalidArgument("media has no source".to_string()))?;
        self.inner.open_source(source)
    }

    pub fn open_async(&self, source: Arc<dyn ByteSource>, closure: MediaClosure) -> Result<()> {
        self.ensure_worker()?;
        self.enqueue_work(MediaWork::new(WorkRequest::Open(source), closure))
    }

    /// Queue a seek; fails unless media is open or an open is queued
    pub fn seek_async(&self, pts: u64, closure: MediaClosure) -> Result<()> {
        if !self.inner.opened.load(Ordering::SeqCst) && !self.inner.queue.lock().has_open() {
            return Err(MediaError::Fail("seek requested before open".to_string()));
        }
        self.enqueue_work(MediaWork::new(WorkRequest::Seek(pts), closure))
    }

    /// Queue a request for the next frame of `stream`
    ///
    /// `states` selects the processing applied: `DEMUXED` only returns the
    /// compressed frame, `DECODED` runs the decoder and `CONVERTED` also runs
    /// the stream's converter when it has one.
    pub fn get_next_frame_async(
        &self,
        stream: &Arc<MediaStream>,
        states: FrameState,
        closure: MediaClosure,
    ) -> Result<()> {
        self.enqueue_work(MediaWork::new(
            WorkRequest::GetFrame {
                stream: Arc::clone(stream),
                states,
            },
            closure,
        ))
    }

    /// Insert `work` in priority order and wake the worker
    pub fn enqueue_work(&self, mut work: MediaWork) -> Result<()> {
        if self.inner.is_stopping() {
            return Err(MediaError::Fail("media is stopping".to_string()));
        }
        work.closure.set_media(self.clone());

        let replaced = {
            let mut queue = self.inner.queue.lock();
            let replaced = queue.push(work);
            self.inner.queue_signal.notify_one();
            replaced
        };
        if let Some(replaced) = replaced {
            debug!("Dropped superseded {:?}", replaced.request);
        }
        Ok(())
    }

    /// Stop the worker, dropping queued work and aborting the source
    ///
    /// Safe to call repeatedly and from the worker thread itself, in which
    /// case the thread is not joined.
    pub fn stop_thread(&self) {
        let inner = &self.inner;
        if !inner.stopping.swap(true, Ordering::SeqCst) {
            info!("Stopping media worker");
            inner.set_state(MediaState::Stopping);

            let dropped = inner.queue.lock().drain();
            if !dropped.is_empty() {
                debug!("Dropped {} queued work items", dropped.len());
            }
            drop(dropped);

            if let Some(source) = inner.source.read().clone() {
                source.abort();
            }
            let _queue = inner.queue.lock();
            inner.queue_signal.notify_all();
        }

        if inner.worker_thread_id.get() == Some(&thread::current().id()) {
            return;
        }
        let handle = inner.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Media worker thread panicked");
            }
        }
        inner.set_state(MediaState::Stopped);
    }

    pub fn state(&self) -> MediaState {
        *self.inner.state.lock()
    }

    /// Whether the worker loop has exited
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    pub fn worker_thread_id(&self) -> Option<ThreadId> {
        self.inner.worker_thread_id.get().copied()
    }

    pub fn source(&self) -> Option<Arc<dyn ByteSource>> {
        self.inner.source.read().clone()
    }

    pub fn streams(&self) -> Vec<Arc<MediaStream>> {
        self.inner.streams.read().clone()
    }

    pub fn stream(&self, index: usize) -> Option<Arc<MediaStream>> {
        self.inner.streams.read().get(index).cloned()
    }

    /// Longest stream duration, or the container duration, in pts ticks
    pub fn duration(&self) -> u64 {
        self.inner.duration.load(Ordering::Acquire)
    }

    pub fn markers(&self) -> Vec<MediaMarker> {
        self.inner.markers.read().clone()
    }

    pub fn playlist(&self) -> Option<Playlist> {
        self.inner.playlist.read().clone()
    }

    pub fn add_message(&self, text: impl Into<String>) {
        self.inner.add_message(text.into());
    }

    pub fn add_error(&self, error: &MediaError) {
        self.inner.add_error(error);
    }

    pub fn messages(&self) -> Vec<MediaMessage> {
        self.inner.messages.lock().clone()
    }

    /// Number of queued work items
    pub fn pending_work(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn registries(&self) -> &Arc<Registries> {
        &self.inner.registries
    }
}

impl std::fmt::Debug for MediaHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaHandle")
            .field("state", &self.state())
            .field("streams", &self.inner.streams.read().len())
            .finish()
    }
}

/// Owner of a media pipeline; stops and joins the worker when dropped
pub struct Media {
    handle: MediaHandle,
}

impl Media {
    pub fn new(registries: Arc<Registries>, config: PipelineConfig) -> Self {
        let inner = Arc::new(MediaInner {
            registries,
            config,
            state: Mutex::new(MediaState::Created),
            source: RwLock::new(None),
            demuxer: Mutex::new(None),
            streams: RwLock::new(Vec::new()),
            markers: RwLock::new(Vec::new()),
            playlist: RwLock::new(None),
            duration: AtomicU64::new(0),
            opened: AtomicBool::new(false),
            queue: Mutex::new(WorkQueue::new()),
            queue_signal: Condvar::new(),
            stopping: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            pending_selection: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
            worker_thread_id: OnceCell::new(),
            worker: Mutex::new(None),
        });
        Self {
            handle: MediaHandle { inner },
        }
    }

    pub fn handle(&self) -> MediaHandle {
        self.handle.clone()
    }
}

impl std::ops::Deref for Media {
    type Target = MediaHandle;

    fn deref(&self) -> &MediaHandle {
        &self.handle
    }
}

impl Drop for Media {
    fn drop(&mut self) {
        self.handle.stop_thread();
    }
}
