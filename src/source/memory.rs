//! In-memory byte source

use super::{delegate_byte_source, BlockingSource, SourceBackend, SourceKind};
use crate::utils::error::Result;
use bytes::Bytes;

struct MemoryBackend {
    data: Bytes,
    /// Absolute offset of `data[0]`
    start: u64,
    /// Absolute cursor
    pos: u64,
}

impl MemoryBackend {
    fn copy_at(&self, buf: &mut [u8]) -> usize {
        let end = self.start + self.data.len() as u64;
        if self.pos < self.start || self.pos >= end {
            return 0;
        }
        let offset = (self.pos - self.start) as usize;
        let n = buf.len().min(self.data.len() - offset);
        buf[..n].copy_from_slice(&self.data[offset..offset + n]);
        n
    }
}

impl SourceBackend for MemoryBackend {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.copy_at(buf);
        self.pos += n as u64;
        Ok(n)
    }

    fn peek(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.copy_at(buf))
    }

    fn seek_to(&mut self, position: u64) -> Result<()> {
        self.pos = position;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn size(&self) -> Option<u64> {
        Some(self.start + self.data.len() as u64)
    }
}

/// Fixed buffer source; cheap to clone into independent cursors
pub struct MemorySource {
    inner: BlockingSource<MemoryBackend>,
    data: Bytes,
    start: u64,
}

impl MemorySource {
    /// Wrap `data`, positioned at offset 0
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self::with_start(data, 0)
    }

    /// Wrap `data` that begins at absolute offset `start`
    pub fn with_start(data: impl Into<Bytes>, start: u64) -> Self {
        let data = data.into();
        Self {
            inner: BlockingSource::new(MemoryBackend {
                data: data.clone(),
                start,
                pos: start,
            }),
            data,
            start,
        }
    }

    /// A new cursor over the same memory, positioned at the beginning
    pub fn nested(&self) -> MemorySource {
        MemorySource::with_start(self.data.clone(), self.start)
    }

    /// Backing bytes
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

delegate_byte_source!(MemorySource, SourceKind::Memory);
