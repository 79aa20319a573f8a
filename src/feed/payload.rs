//! Random-access sources the extractor reads a feed from.
//!
//! A payload is read front to back most of the time, but recovery needs to
//! restart the scan at an earlier or later offset, and content ids need the
//! raw bytes of one offer. Downloads are spooled to a temporary file so a
//! large feed never sits in memory as a whole.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};

use tempfile::NamedTempFile;

/// A byte source that can be reopened at any offset.
pub trait Payload {
    type Source: BufRead;

    /// A fresh reader positioned at `offset`. Offsets past the end yield an
    /// empty reader.
    fn reader_at(&self, offset: u64) -> io::Result<Self::Source>;

    /// The bytes in `start..end`, truncated at the end of the payload.
    fn span(&self, start: u64, end: u64) -> io::Result<Vec<u8>>;
}

impl<'a> Payload for &'a [u8] {
    type Source = &'a [u8];

    fn reader_at(&self, offset: u64) -> io::Result<&'a [u8]> {
        let bytes: &'a [u8] = self;
        Ok(&bytes[clamp(offset, bytes.len())..])
    }

    fn span(&self, start: u64, end: u64) -> io::Result<Vec<u8>> {
        let end = clamp(end, self.len());
        let start = clamp(start, end);
        Ok(self[start..end].to_vec())
    }
}

fn clamp(offset: u64, len: usize) -> usize {
    usize::try_from(offset).map_or(len, |offset| offset.min(len))
}

/// A payload spooled to a temporary file, removed when dropped.
#[derive(Debug)]
pub struct SpooledPayload {
    file: NamedTempFile,
}

impl SpooledPayload {
    pub fn new(file: NamedTempFile) -> Self {
        Self { file }
    }

    fn open_at(&self, offset: u64) -> io::Result<File> {
        // Each reopen has its own cursor, independent of the writer's
        let mut file = self.file.reopen()?;
        file.seek(SeekFrom::Start(offset))?;
        Ok(file)
    }
}

impl Payload for SpooledPayload {
    type Source = BufReader<File>;

    fn reader_at(&self, offset: u64) -> io::Result<BufReader<File>> {
        Ok(BufReader::new(self.open_at(offset)?))
    }

    fn span(&self, start: u64, end: u64) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.open_at(start)?
            .take(end.saturating_sub(start))
            .read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}
