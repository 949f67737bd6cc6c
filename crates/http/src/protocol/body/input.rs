use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use tempfile::NamedTempFile;

/// The request body as the application sees it: a rewound, seekable byte source.
///
/// Dropping the input deletes any backing file; [`RequestInput::release`] does
/// the same but reports the outcome.
#[derive(Debug)]
pub struct RequestInput {
    len: u64,
    inner: Inner,
}

#[derive(Debug)]
enum Inner {
    Memory(Cursor<Vec<u8>>),
    Disk(NamedTempFile),
}

impl RequestInput {
    /// An input that is already at end of stream.
    pub fn empty() -> Self {
        Self::memory(Vec::new())
    }

    pub(crate) fn memory(bytes: Vec<u8>) -> Self {
        Self { len: bytes.len() as u64, inner: Inner::Memory(Cursor::new(bytes)) }
    }

    pub(crate) fn disk(file: NamedTempFile, len: u64) -> Self {
        Self { len, inner: Inner::Disk(file) }
    }

    /// Total body length in bytes, independent of the read position.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_on_disk(&self) -> bool {
        matches!(self.inner, Inner::Disk(_))
    }

    /// Location of the backing file, for disk-backed inputs.
    pub fn path(&self) -> Option<&Path> {
        match &self.inner {
            Inner::Memory(_) => None,
            Inner::Disk(file) => Some(file.path()),
        }
    }

    /// Reads everything from the current position to the end.
    pub fn read_to_vec(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(usize::try_from(self.len).unwrap_or(0));
        self.read_to_end(&mut buf)?;
        Ok(buf)
    }

    pub fn release(self) -> io::Result<()> {
        match self.inner {
            Inner::Memory(_) => Ok(()),
            Inner::Disk(file) => file.close(),
        }
    }
}

impl Default for RequestInput {
    fn default() -> Self {
        Self::empty()
    }
}

impl Read for RequestInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            Inner::Memory(cursor) => cursor.read(buf),
            Inner::Disk(file) => file.read(buf),
        }
    }
}

impl Seek for RequestInput {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match &mut self.inner {
            Inner::Memory(cursor) => cursor.seek(pos),
            Inner::Disk(file) => file.seek(pos),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_at_eof() {
        let mut input = RequestInput::empty();
        assert!(input.is_empty());
        assert_eq!(input.read_to_vec().unwrap(), b"");
    }

    #[test]
    fn input_can_be_rewound_by_the_application() {
        let mut input = RequestInput::memory(b"abc".to_vec());
        assert_eq!(input.read_to_vec().unwrap(), b"abc");
        input.rewind().unwrap();
        assert_eq!(input.read_to_vec().unwrap(), b"abc");
    }
}
