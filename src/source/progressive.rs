//! File-backed source appended to by an out-of-band writer
//!
//! The downloader writes through [`ProgressiveSource::notify_bytes_written`]
//! while the worker reads through the [`ByteSource`] interface. Reads that
//! run past the write cursor block until the data lands, the writer reports
//! completion or the source is aborted.

use super::file::FileReader;
use super::{delegate_byte_source, Availability, BlockingSource, SourceBackend, SourceKind};
use crate::utils::config::PipelineConfig;
use crate::utils::error::Result;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_FILE_ID: AtomicU64 = AtomicU64::new(0);

struct ProgressiveBackend {
    reader: FileReader,
    writer: File,
    write_pos: u64,
    size: Option<u64>,
    block_size: u64,
}

impl SourceBackend for ProgressiveBackend {
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
        self.size
    }

    fn availability(&self) -> Availability {
        if self.size == Some(self.write_pos) {
            Availability::UpTo(self.write_pos)
        } else {
            Availability::UpTo(self.write_pos - self.write_pos % self.block_size)
        }
    }
}

/// Progressively downloaded file
pub struct ProgressiveSource {
    inner: BlockingSource<ProgressiveBackend>,
    path: PathBuf,
    keep_file: bool,
}

impl ProgressiveSource {
    /// Create a source backed by a fresh file in the configured temp dir
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let dir = config.temp_dir();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!(
            "ccmedia-{}-{}.part",
            std::process::id(),
            NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed)
        ));
        Self::with_path(&path, config)
    }

    /// Create a source that downloads into `path`, truncating it
    pub fn with_path(path: &Path, config: &PipelineConfig) -> Result<Self> {
        let writer = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let reader = File::open(path)?;
        log::debug!("Created progressive source at {:?}", path);

        Ok(Self {
            inner: BlockingSource::new(ProgressiveBackend {
                reader: FileReader::new(reader, config.source.read_ahead_size),
                writer,
                write_pos: 0,
                size: None,
                block_size: config.source.progressive_block_size.max(1),
            }),
            path: path.to_path_buf(),
            keep_file: config.source.keep_media,
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store `data` at `offset` and wake blocked readers
    ///
    /// An empty `data` marks the download as finished.
    pub fn notify_bytes_written(&self, offset: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            self.notify_finished();
            return Ok(());
        }

        {
            let mut state = self.inner.lock();
            state.writer.seek(SeekFrom::Start(offset))?;
            state.writer.write_all(data)?;
            state.writer.flush()?;
            state.reader.invalidate_from(offset);
            state.write_pos = state.write_pos.max(offset + data.len() as u64);
        }
        self.inner.signal().notify();
        Ok(())
    }

    /// Report the final size once the writer knows it
    pub fn notify_total_size(&self, size: u64) {
        self.inner.lock().size = Some(size);
        self.inner.signal().notify();
    }

    /// Report that no more bytes will be written
    pub fn notify_finished(&self) {
        {
            let mut state = self.inner.lock();
            state.size = Some(state.write_pos);
            log::debug!("Progressive source {:?} finished at {} bytes", self.path, state.write_pos);
        }
        self.inner.signal().notify();
    }

    /// Bytes written so far
    pub fn write_position(&self) -> u64 {
        self.inner.lock().write_pos
    }
}

delegate_byte_source!(ProgressiveSource, SourceKind::Progressive);

impl Drop for ProgressiveSource {
    fn drop(&mut self) {
        if self.keep_file {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::warn!("Failed to remove progressive file {:?}: {}", self.path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ByteSource, SeekMode};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn config(dir: &Path, block: u64) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.source.temp_dir = Some(dir.to_path_buf());
        config.source.progressive_block_size = block;
        config
    }

    #[test]
    fn test_round_trip_after_finish() {
        let dir = tempfile::tempdir().unwrap();
        let source = ProgressiveSource::new(&config(dir.path(), 4096)).unwrap();
        let data: Vec<u8> = (0..10_000u32).map(|i| (i * 7 % 256) as u8).collect();

        for (i, chunk) in data.chunks(1500).enumerate() {
            source.notify_bytes_written((i * 1500) as u64, chunk).unwrap();
        }
        assert_eq!(source.size(), None);
        source.notify_finished();
        assert_eq!(source.size(), Some(10_000));

        let mut out = vec![0u8; 10_000];
        assert!(source.read_all(&mut out).unwrap());
        assert_eq!(out, data);
        assert!(source.eof());
    }

    #[test]
    fn test_availability_rounds_to_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let source = ProgressiveSource::new(&config(dir.path(), 4096)).unwrap();

        source.notify_bytes_written(0, &vec![1u8; 5000]).unwrap();
        assert_eq!(source.last_available_position(), Availability::UpTo(4096));

        source.notify_total_size(5000);
        assert_eq!(source.last_available_position(), Availability::UpTo(5000));
        assert!(source.is_position_available(4999));
    }

    #[test]
    fn test_blocking_read_waits_for_writer() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(ProgressiveSource::new(&config(dir.path(), 1)).unwrap());
        source.notify_total_size(1000);
        source.notify_bytes_written(0, &[0xAB; 500]).unwrap();
        assert_eq!(source.last_available_position(), Availability::UpTo(500));
        assert!(source.seek(400, SeekMode::Start));

        let reader = {
            let source = Arc::clone(&source);
            std::thread::spawn(move || {
                let mut buf = vec![0u8; 300];
                let n = source.read_some(&mut buf).unwrap();
                (n, source.last_available_position())
            })
        };

        std::thread::sleep(Duration::from_millis(100));
        assert!(!reader.is_finished());

        source.notify_bytes_written(500, &[0xCD; 150]).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert!(!reader.is_finished());

        source.notify_bytes_written(650, &[0xEF; 50]).unwrap();
        let (n, available) = reader.join().unwrap();
        assert_eq!(n, 300);
        assert!(available.covers(700));
    }

    #[test]
    fn test_abort_releases_reader() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(ProgressiveSource::new(&config(dir.path(), 1)).unwrap());
        source.notify_bytes_written(0, &[1u8; 10]).unwrap();

        let reader = {
            let source = Arc::clone(&source);
            std::thread::spawn(move || {
                let mut buf = vec![0u8; 100];
                source.read_some(&mut buf).unwrap()
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        let start = Instant::now();
        source.abort();
        assert_eq!(reader.join().unwrap(), 10);
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(source.is_aborted());
    }

    #[test]
    fn test_empty_write_marks_finished() {
        let dir = tempfile::tempdir().unwrap();
        let source = ProgressiveSource::new(&config(dir.path(), 4096)).unwrap();
        source.notify_bytes_written(0, b"hello").unwrap();
        source.notify_bytes_written(5, b"").unwrap();

        assert_eq!(source.size(), Some(5));
        let mut buf = [0u8; 16];
        assert_eq!(source.read_some(&mut buf).unwrap(), 5);
    }

    #[test]
    fn test_file_removed_unless_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let source = ProgressiveSource::new(&config(dir.path(), 4096)).unwrap();
            source.path().to_path_buf()
        };
        assert!(!path.exists());

        let mut keep = config(dir.path(), 4096);
        keep.source.keep_media = true;
        let path = {
            let source = ProgressiveSource::new(&keep).unwrap();
            source.path().to_path_buf()
        };
        assert!(path.exists());
    }

    #[test]
    fn test_abort_releases_every_blocked_reader() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(ProgressiveSource::new(&config(dir.path(), 1)).unwrap());

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let source = Arc::clone(&source);
                std::thread::spawn(move || {
                    let mut buf = vec![0u8; 64];
                    source.read_some(&mut buf)
                })
            })
            .collect();
        let peeker = {
            let source = Arc::clone(&source);
            std::thread::spawn(move || {
                let mut buf = vec![0u8; 64];
                source.peek(&mut buf)
            })
        };

        let start = Instant::now();
        while source.inner.signal().waiter_count() < 5 && start.elapsed() < Duration::from_secs(2) {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(source.inner.signal().waiter_count(), 5);

        source.abort();
        // nothing was written, so every released read comes back empty
        for reader in readers {
            assert_eq!(reader.join().unwrap().unwrap(), 0);
        }
        assert!(!peeker.join().unwrap().unwrap());
        assert_eq!(source.inner.signal().waiter_count(), 0);
        assert!(source.is_aborted());
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
