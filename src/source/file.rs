//! File-backed byte source with a read-ahead window

use super::{delegate_byte_source, BlockingSource, SourceBackend, SourceKind};
use crate::utils::error::Result;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Buffered positional reader over an OS file
///
/// Seeks only move the logical cursor. The OS file is repositioned lazily on
/// the next read that misses the window.
pub(crate) struct FileReader {
    file: File,
    /// Logical read position
    pos: u64,
    /// Offset the OS file cursor is at
    file_cursor: u64,
    window: Vec<u8>,
    window_start: u64,
    window_len: usize,
}

impl FileReader {
    pub(crate) fn new(file: File, window_size: usize) -> Self {
        Self {
            file,
            pos: 0,
            file_cursor: 0,
            window: vec![0; window_size.max(1)],
            window_start: 0,
            window_len: 0,
        }
    }

    pub(crate) fn position(&self) -> u64 {
        self.pos
    }

    pub(crate) fn set_position(&mut self, pos: u64) {
        self.pos = pos;
    }

    fn window_contains(&self, pos: u64) -> bool {
        pos >= self.window_start && pos < self.window_start + self.window_len as u64
    }

    /// Read from the OS file at `offset` until `buf` is full or the file ends
    fn read_raw(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if self.file_cursor != offset {
            self.file.seek(SeekFrom::Start(offset))?;
            self.file_cursor = offset;
        }

        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.file_cursor += filled as u64;
        Ok(filled)
    }

    fn refill(&mut self, offset: u64) -> Result<()> {
        let mut window = std::mem::take(&mut self.window);
        let result = self.read_raw(offset, &mut window);
        self.window = window;
        self.window_start = offset;
        self.window_len = result.as_ref().map_or(0, |n| *n);
        result.map(|_| ())
    }

    /// Copy bytes at `offset` into `buf` without touching the cursor
    fn copy_at(&mut self, mut offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut copied = 0;
        while copied < buf.len() {
            if !self.window_contains(offset) {
                let remaining = buf.len() - copied;
                if remaining >= self.window.len() {
                    let n = self.read_raw(offset, &mut buf[copied..])?;
                    return Ok(copied + n);
                }
                self.refill(offset)?;
                if !self.window_contains(offset) {
                    break;
                }
            }

            let start = (offset - self.window_start) as usize;
            let n = (self.window_len - start).min(buf.len() - copied);
            buf[copied..copied + n].copy_from_slice(&self.window[start..start + n]);
            copied += n;
            offset += n as u64;
        }
        Ok(copied)
    }

    pub(crate) fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.copy_at(self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    pub(crate) fn peek(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.copy_at(self.pos, buf)
    }

    /// Forget cached bytes at or after `offset`
    pub(crate) fn invalidate_from(&mut self, offset: u64) {
        if offset < self.window_start + self.window_len as u64 {
            self.window_len = offset.saturating_sub(self.window_start) as usize;
        }
    }

    #[cfg(test)]
    pub(crate) fn window_range(&self) -> (u64, usize) {
        (self.window_start, self.window_len)
    }
}

struct FileBackend {
    reader: FileReader,
    size: u64,
}

impl SourceBackend for FileBackend {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.reader.read(buf)
    }

    fn peek(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.reader.peek(buf)
    }

    fn seek_to(&mut self, position: u64) -> Result<()> {
        self.reader.set_position(position);
        Ok(())
    }

    fn position(&self) -> u64 {
        self.reader.position()
    }

    fn size(&self) -> Option<u64> {
        Some(self.size)
    }
}

/// Local file source
pub struct FileSource {
    inner: BlockingSource<FileBackend>,
    path: PathBuf,
}

impl FileSource {
    /// Open `path` with the given read-ahead window size
    pub fn open(path: &Path, read_ahead_size: usize) -> Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        log::debug!("Opened file source {:?} ({} bytes)", path, size);

        Ok(Self {
            inner: BlockingSource::new(FileBackend {
                reader: FileReader::new(file, read_ahead_size),
                size,
            }),
            path: path.to_path_buf(),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

delegate_byte_source!(FileSource, SourceKind::File);
