#![forbid(unsafe_code)]

//! Random-access trace IO shared by live chunks, HTTP ranges and plain files.

mod chunked;
mod file;
mod http;
mod live;

pub use chunked::{ChunkSource, ChunkedIo, FetchedChunk};
pub use file::FileTraceIo;
pub use http::{HttpChunks, HttpTraceIo, RangeResponse, RangeTransport, ReqwestTransport};
pub use live::{LiveChunks, LiveTraceIo};
pub use std::io::SeekFrom;

use crate::TraceError;
use std::path::Path;

/// A trace with a fixed size and a movable cursor.
///
/// Read-only backends reject `write`, `truncate` and `flush` with
/// [`TraceError::NotSupported`].
pub trait TraceIo {
    fn size(&self) -> u64;

    fn tell(&self) -> u64;

    /// Moves the cursor. Positions outside `[0, size]` are an error, never clamped.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64, TraceError>;

    /// Reads `length` bytes from the cursor, or everything up to the end when
    /// `length` is `None`. Returns an empty buffer at the end of the trace.
    fn read(&mut self, length: Option<u64>) -> Result<Vec<u8>, TraceError>;

    /// Reads through the next `\n` (inclusive), or to the end of the trace.
    fn readline(&mut self) -> Result<Vec<u8>, TraceError>;

    fn write(&mut self, data: &[u8]) -> Result<usize, TraceError>;

    fn truncate(&mut self, offset: u64) -> Result<(), TraceError>;

    fn flush(&mut self) -> Result<(), TraceError>;

    fn eof(&self) -> bool {
        self.tell() >= self.size()
    }

    fn path(&self) -> Option<&Path> {
        None
    }

    fn url(&self) -> Option<&str> {
        None
    }

    fn close(&mut self) -> Result<(), TraceError> {
        Ok(())
    }
}

/// Absolute position for `pos` in a stream of `size` bytes with the cursor at `tell`.
pub fn resolve_seek(pos: SeekFrom, tell: u64, size: u64) -> Result<u64, TraceError> {
    let position = match pos {
        SeekFrom::Start(offset) => i128::from(offset),
        SeekFrom::Current(delta) => i128::from(tell) + i128::from(delta),
        SeekFrom::End(delta) => i128::from(size) + i128::from(delta),
    };
    if position < 0 || position > i128::from(size) {
        return Err(TraceError::PositionOutOfRange { position, size });
    }
    Ok(position as u64)
}

/// Lines from the cursor on, each paired with the byte offset it starts at.
pub struct LinesWithPos<'a> {
    io: &'a mut dyn TraceIo,
    done: bool,
}

impl<'a> LinesWithPos<'a> {
    pub fn new(io: &'a mut dyn TraceIo) -> Self {
        Self { io, done: false }
    }
}

impl Iterator for LinesWithPos<'_> {
    type Item = Result<(Vec<u8>, u64), TraceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let pos = self.io.tell();
        match self.io.readline() {
            Ok(line) if line.is_empty() => {
                self.done = true;
                None
            }
            Ok(line) => Some(Ok((line, pos))),
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// [`std::io::Read`] over the cursor of a [`TraceIo`].
pub struct TraceReader<'a> {
    io: &'a mut dyn TraceIo,
}

impl<'a> TraceReader<'a> {
    pub fn new(io: &'a mut dyn TraceIo) -> Self {
        Self { io }
    }
}

impl std::io::Read for TraceReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let data = self
            .io
            .read(Some(buf.len() as u64))
            .map_err(std::io::Error::other)?;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }
}
