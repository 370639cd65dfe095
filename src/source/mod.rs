//! Byte sources feeding the demuxers
//!
//! A [`ByteSource`] is a readable byte stream with partial-availability
//! semantics: reads block until the requested range has arrived, the whole
//! source is known to be available, or the source is aborted. Four variants
//! are provided:
//!
//! - [`FileSource`]: local file with a read-ahead window
//! - [`ProgressiveSource`]: file appended to by an external writer
//! - [`MemorySource`]: fixed buffer with independent nested cursors
//! - [`MemoryQueueSource`]: FIFO of discrete chunks consumed with `pop()`

mod file;
mod memory;
mod progressive;
mod queue;

pub use file::FileSource;
pub use memory::MemorySource;
pub use progressive::ProgressiveSource;
pub use queue::MemoryQueueSource;

use crate::utils::error::{MediaError, Result};
use bytes::Bytes;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Upper bound for a single condvar wait; waiters re-check their condition after it
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Origin for [`ByteSource::seek`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// Absolute offset from the beginning
    Start,
    /// Relative to the current position
    Current,
    /// Relative to the end; requires a known size
    End,
}

/// How much of a source can be read without blocking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Every byte is available
    Complete,
    /// Bytes `[0, n)` are available
    UpTo(u64),
}

impl Availability {
    /// True if bytes `[0, end)` are covered
    pub fn covers(self, end: u64) -> bool {
        match self {
            Availability::Complete => true,
            Availability::UpTo(n) => n >= end,
        }
    }
}

/// Concrete source variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    File,
    Progressive,
    Memory,
    MemoryQueue,
}

/// Readable byte stream shared between the worker and producer threads
pub trait ByteSource: Send + Sync {
    /// Variant of this source
    fn kind(&self) -> SourceKind;

    /// Read up to `buf.len()` bytes at the current position
    ///
    /// Blocks until the whole range is available, the source is complete or
    /// the source is aborted, then reads what is there.
    fn read_some(&self, buf: &mut [u8]) -> Result<usize>;

    /// Read exactly `buf.len()` bytes; returns false on a short read
    fn read_all(&self, buf: &mut [u8]) -> Result<bool> {
        Ok(self.read_some(buf)? == buf.len())
    }

    /// Fill `buf` from the current position without advancing it
    fn peek(&self, buf: &mut [u8]) -> Result<bool>;

    /// Move the read cursor; returns false if the target is invalid
    fn seek(&self, offset: i64, mode: SeekMode) -> bool;

    /// Current read position
    fn position(&self) -> u64;

    /// Total size, if known
    fn size(&self) -> Option<u64>;

    /// Range that can be read without blocking
    fn last_available_position(&self) -> Availability;

    /// Whether bytes up to and including `position` can be read without blocking
    fn is_position_available(&self, position: u64) -> bool {
        let end = position.saturating_add(1);
        let end = self.size().map_or(end, |size| end.min(size));
        self.last_available_position().covers(end)
    }

    /// Wake every waiter and make all future waits return immediately
    fn abort(&self);

    /// Whether [`ByteSource::abort`] has been called
    fn is_aborted(&self) -> bool;

    /// Whether the read cursor is at the known end of the source
    fn eof(&self) -> bool;

    /// Take the next discrete chunk (packet queue sources only)
    fn pop(&self) -> Result<Option<Bytes>> {
        Err(MediaError::InvalidArgument(format!(
            "{:?} source has no packet queue",
            self.kind()
        )))
    }

    /// Whether [`ByteSource::seek_to_pts`] is supported
    fn can_seek_to_pts(&self) -> bool {
        false
    }

    /// Ask the producer to restart delivery at `pts`
    fn seek_to_pts(&self, _pts: u64) -> Result<()> {
        Err(MediaError::Seek(format!(
            "{:?} source cannot seek by timestamp",
            self.kind()
        )))
    }
}

/// Condition variable with a sticky abort flag and a waiter count
#[derive(Default)]
pub(crate) struct SourceSignal {
    cond: Condvar,
    aborted: AtomicBool,
    waiters: AtomicUsize,
}

impl SourceSignal {
    /// Block on `guard` until `ready` holds or the signal is aborted
    ///
    /// Returns true if `ready` held, false on abort.
    pub(crate) fn wait_until<T>(
        &self,
        guard: &mut MutexGuard<'_, T>,
        mut ready: impl FnMut(&T) -> bool,
    ) -> bool {
        if ready(&**guard) {
            return true;
        }

        self.waiters.fetch_add(1, Ordering::SeqCst);
        let satisfied = loop {
            if ready(&**guard) {
                break true;
            }
            if self.is_aborted() {
                break false;
            }
            self.cond.wait_for(guard, WAIT_SLICE);
        };
        self.waiters.fetch_sub(1, Ordering::SeqCst);

        satisfied
    }

    pub(crate) fn notify(&self) {
        self.cond.notify_all();
    }

    /// Set the abort flag and keep signalling until nobody is waiting
    pub(crate) fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        loop {
            self.cond.notify_all();
            if self.waiters.load(Ordering::SeqCst) == 0 {
                break;
            }
            std::thread::yield_now();
        }
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn waiter_count(&self) -> usize {
        self.waiters.load(Ordering::SeqCst)
    }
}

/// Random-access storage behind a [`BlockingSource`]
pub(crate) trait SourceBackend: Send {
    /// Read at the cursor and advance it
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Read at the cursor without advancing it
    fn peek(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Move the cursor to an absolute offset
    fn seek_to(&mut self, position: u64) -> Result<()>;

    fn position(&self) -> u64;

    fn size(&self) -> Option<u64>;

    fn availability(&self) -> Availability {
        Availability::Complete
    }
}

/// Lock, condvar and waiting logic shared by the random-access variants
pub(crate) struct BlockingSource<B> {
    state: Mutex<B>,
    signal: SourceSignal,
}

impl<B: SourceBackend> BlockingSource<B> {
    pub(crate) fn new(backend: B) -> Self {
        Self {
            state: Mutex::new(backend),
            signal: SourceSignal::default(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, B> {
        self.state.lock()
    }

    pub(crate) fn signal(&self) -> &SourceSignal {
        &self.signal
    }

    fn range_ready(backend: &B, end: u64) -> bool {
        let end = backend.size().map_or(end, |size| end.min(size));
        backend.availability().covers(end)
    }

    /// Wait until `[0, end)` is readable, the source is complete or aborted
    fn wait_for_position(&self, guard: &mut MutexGuard<'_, B>, block: bool, end: u64) -> bool {
        if !block {
            return Self::range_ready(&**guard, end);
        }
        self.signal.wait_until(guard, |backend| Self::range_ready(backend, end))
    }

    pub(crate) fn read_some(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut guard = self.state.lock();
        let end = guard.position() + buf.len() as u64;
        self.wait_for_position(&mut guard, true, end);
        guard.read(buf)
    }

    pub(crate) fn peek(&self, buf: &mut [u8]) -> Result<bool> {
        if buf.is_empty() {
            return Ok(true);
        }
        let mut guard = self.state.lock();
        let end = guard.position() + buf.len() as u64;
        self.wait_for_position(&mut guard, true, end);
        Ok(guard.peek(buf)? == buf.len())
    }

    pub(crate) fn seek(&self, offset: i64, mode: SeekMode) -> bool {
        let mut guard = self.state.lock();
        let base = match mode {
            SeekMode::Start => 0i128,
            SeekMode::Current => guard.position() as i128,
            SeekMode::End => match guard.size() {
                Some(size) => size as i128,
                None => return false,
            },
        };
        let target = base + offset as i128;
        if target < 0 || target > u64::MAX as i128 {
            return false;
        }
        match guard.seek_to(target as u64) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Seek to {} failed: {}", target, e);
                false
            }
        }
    }

    pub(crate) fn position(&self) -> u64 {
        self.state.lock().position()
    }

    pub(crate) fn size(&self) -> Option<u64> {
        self.state.lock().size()
    }

    pub(crate) fn availability(&self) -> Availability {
        self.state.lock().availability()
    }

    pub(crate) fn eof(&self) -> bool {
        let guard = self.state.lock();
        guard.size().is_some_and(|size| guard.position() >= size)
    }
}

/// Implements [`ByteSource`] for a wrapper around `BlockingSource` exposed as `self.inner`
macro_rules! delegate_byte_source {
    ($ty:ty, $kind:expr) => {
        impl $crate::source::ByteSource for $ty {
            fn kind(&self) -> $crate::source::SourceKind {
                $kind
            }

            fn read_some(&self, buf: &mut [u8]) -> $crate::utils::error::Result<usize> {
                self.inner.read_some(buf)
            }

            fn peek(&self, buf: &mut [u8]) -> $crate::utils::error::Result<bool> {
                self.inner.peek(buf)
            }

            fn seek(&self, offset: i64, mode: $crate::source::SeekMode) -> bool {
                self.inner.seek(offset, mode)
            }

            fn position(&self) -> u64 {
                self.inner.position()
            }

            fn size(&self) -> Option<u64> {
                self.inner.size()
            }

            fn last_available_position(&self) -> $crate::source::Availability {
                self.inner.availability()
            }

            fn abort(&self) {
                self.inner.signal().abort();
            }

            fn is_aborted(&self) -> bool {
                self.inner.signal().is_aborted()
            }

            fn eof(&self) -> bool {
                self.inner.eof()
            }
        }
    };
}

pub(crate) use delegate_byte_source;
