//! Size-adaptive storage for request bodies.
//!
//! Bytes are kept in memory until the running total would cross
//! `memory_max`, at which point everything buffered so far is copied into an
//! anonymous-named temporary file and all further writes go there. The switch
//! is one-way: a body never moves back to memory.

use std::io::{self, Seek, SeekFrom, Write};
use std::mem;

use tempfile::NamedTempFile;
use tracing::trace;

use super::RequestInput;

/// Bodies up to this many bytes stay in memory.
pub const DEFAULT_MEMORY_MAX: u64 = 1024 * 1024;

const SPILL_FILE_PREFIX: &str = "prefork-body-";

#[derive(Debug)]
pub struct BufferedBody {
    size: u64,
    memory_max: u64,
    storage: Storage,
}

#[derive(Debug)]
enum Storage {
    Memory(Vec<u8>),
    Disk(NamedTempFile),
}

impl BufferedBody {
    /// Creates a body with unknown final length, starting in memory.
    pub fn new() -> Self {
        Self { size: 0, memory_max: DEFAULT_MEMORY_MAX, storage: Storage::Memory(Vec::new()) }
    }

    /// Creates a body sized for a declared length.
    ///
    /// A declared length above `memory_max` goes straight to disk without a memory phase.
    pub fn with_length(length: u64, memory_max: u64) -> io::Result<Self> {
        let storage = if length > memory_max {
            trace!(length, memory_max, "declared body exceeds memory threshold, buffering on disk");
            Storage::Disk(spill_file()?)
        } else {
            let capacity = usize::try_from(length).unwrap_or(0);
            Storage::Memory(Vec::with_capacity(capacity))
        };
        Ok(Self { size: 0, memory_max, storage })
    }

    /// Appends `buf`, migrating to disk first if this write would cross the threshold.
    pub fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        let new_size = self.size + buf.len() as u64;

        if new_size > self.memory_max
            && let Storage::Memory(memory) = &self.storage
        {
            let mut file = spill_file()?;
            file.write_all(memory)?;
            trace!(migrated = memory.len(), "request body crossed memory threshold, moved to disk");
            self.storage = Storage::Disk(file);
        }

        match &mut self.storage {
            Storage::Memory(memory) => memory.extend_from_slice(buf),
            Storage::Disk(file) => file.write_all(buf)?,
        }
        self.size = new_size;
        Ok(())
    }

    /// Total bytes written so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_on_disk(&self) -> bool {
        matches!(self.storage, Storage::Disk(_))
    }

    /// Repositions the storage to its start and hands it over as a readable input.
    pub fn rewind(self) -> io::Result<RequestInput> {
        match self.storage {
            Storage::Memory(memory) => Ok(RequestInput::memory(memory)),
            Storage::Disk(mut file) => {
                file.flush()?;
                file.seek(SeekFrom::Start(0))?;
                Ok(RequestInput::disk(file, self.size))
            }
        }
    }

    /// Drops the buffered bytes, deleting the backing file if there is one.
    pub fn release(mut self) -> io::Result<()> {
        match mem::replace(&mut self.storage, Storage::Memory(Vec::new())) {
            Storage::Memory(_) => Ok(()),
            Storage::Disk(file) => file.close(),
        }
    }
}

impl Default for BufferedBody {
    fn default() -> Self {
        Self::new()
    }
}

fn spill_file() -> io::Result<NamedTempFile> {
    tempfile::Builder::new().prefix(SPILL_FILE_PREFIX).tempfile()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn read_all(input: &mut RequestInput) -> Vec<u8> {
        let mut out = Vec::new();
        input.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn small_body_stays_in_memory() {
        let mut body = BufferedBody::with_length(11, 16).unwrap();
        body.write(b"hello ").unwrap();
        body.write(b"world").unwrap();

        assert_eq!(body.size(), 11);
        assert!(!body.is_on_disk());

        let mut input = body.rewind().unwrap();
        assert!(!input.is_on_disk());
        assert_eq!(read_all(&mut input), b"hello world");
    }

    #[test]
    fn body_exactly_at_threshold_stays_in_memory() {
        let mut body = BufferedBody::with_length(16, 16).unwrap();
        body.write(&[b'x'; 16]).unwrap();
        assert!(!body.is_on_disk());
    }

    #[test]
    fn declared_length_above_threshold_starts_on_disk() {
        let body = BufferedBody::with_length(17, 16).unwrap();
        assert!(body.is_on_disk());
        assert_eq!(body.size(), 0);
    }

    #[test]
    fn crossing_threshold_mid_stream_keeps_every_byte() {
        let mut body = BufferedBody::with_length(0, 8).unwrap();
        body.write(b"abcde").unwrap();
        assert!(!body.is_on_disk());

        body.write(b"fghij").unwrap();
        assert!(body.is_on_disk());

        body.write(b"klm").unwrap();
        assert_eq!(body.size(), 13);

        let mut input = body.rewind().unwrap();
        assert!(input.is_on_disk());
        assert_eq!(input.len(), 13);
        assert_eq!(read_all(&mut input), b"abcdefghijklm");
    }

    #[test]
    fn large_body_round_trips_through_disk() {
        let data: Vec<u8> = (0..3 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
        let mut body = BufferedBody::with_length(data.len() as u64, DEFAULT_MEMORY_MAX).unwrap();
        for piece in data.chunks(16 * 1024) {
            body.write(piece).unwrap();
        }

        let mut input = body.rewind().unwrap();
        assert!(input.is_on_disk());
        assert_eq!(read_all(&mut input), data);
    }

    #[test]
    fn release_deletes_spill_file() {
        let mut body = BufferedBody::with_length(0, 4).unwrap();
        body.write(b"0123456789").unwrap();

        let input = body.rewind().unwrap();
        let path = input.path().unwrap().to_path_buf();
        assert!(path.exists());

        input.release().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn release_before_rewind_deletes_spill_file() {
        let mut body = BufferedBody::with_length(100, 4).unwrap();
        body.write(b"0123456789").unwrap();
        body.release().unwrap();
    }
}
