#![forbid(unsafe_code)]

use super::{SeekFrom, TraceIo, resolve_seek};
use crate::TraceError;
use jobtrace_core::chunk::ChunkWindow;
use std::ops::Range;

/// Bytes returned by a [`ChunkSource`] together with the trace range they cover.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchedChunk {
    pub data: Vec<u8>,
    pub range: Range<u64>,
}

/// Where a [`ChunkedIo`] gets its bytes from.
///
/// Sources are read-only unless they override `writable` and the mutating methods.
pub trait ChunkSource {
    fn buffer_size(&self) -> u64;

    /// Bytes covering `window`. The returned range may be wider than the window
    /// but has to start at or before `window.start + window.offset`.
    fn fetch(&mut self, window: ChunkWindow) -> Result<FetchedChunk, TraceError>;

    fn writable(&self) -> bool {
        false
    }

    fn write_at(&mut self, _offset: u64, _data: &[u8]) -> Result<(), TraceError> {
        Err(TraceError::NotSupported("write"))
    }

    fn truncate(&mut self, _offset: u64) -> Result<(), TraceError> {
        Err(TraceError::NotSupported("truncate"))
    }

    fn flush(&mut self) -> Result<(), TraceError> {
        Err(TraceError::NotSupported("flush"))
    }

    fn url(&self) -> Option<&str> {
        None
    }
}

/// A random-access trace assembled from the windows of a [`ChunkSource`].
///
/// The last fetched window is kept and reused while the cursor stays inside it.
#[derive(Debug)]
pub struct ChunkedIo<S> {
    source: S,
    size: u64,
    tell: u64,
    chunk: Vec<u8>,
    chunk_range: Option<Range<u64>>,
}

impl<S: ChunkSource> ChunkedIo<S> {
    pub fn new(source: S, size: u64) -> Self {
        Self {
            source,
            size,
            tell: 0,
            chunk: Vec::new(),
            chunk_range: None,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    fn invalidate(&mut self) {
        self.chunk.clear();
        self.chunk_range = None;
    }

    /// Bytes of the cached window from the cursor to the end of the trace or window.
    fn slice_from_cursor(&mut self) -> Result<&[u8], TraceError> {
        let cached = self
            .chunk_range
            .as_ref()
            .filter(|range| range.contains(&self.tell))
            .map(|range| range.start);
        let start = match cached {
            Some(start) => start,
            None => {
                let window =
                    ChunkWindow::locate(self.tell, self.source.buffer_size(), self.size);
                let fetched = self.source.fetch(window)?;
                self.chunk = fetched.data;
                self.chunk_range = Some(fetched.range.clone());
                fetched.range.start
            }
        };
        if self.tell < start {
            return Err(TraceError::FailedToGetChunk { offset: self.tell });
        }

        let from = (self.tell - start) as usize;
        let until = usize::try_from(self.size - start)
            .map_or(self.chunk.len(), |limit| limit.min(self.chunk.len()));
        if from >= until {
            return Err(TraceError::FailedToGetChunk { offset: self.tell });
        }
        Ok(&self.chunk[from..until])
    }
}

impl<S: ChunkSource> TraceIo for ChunkedIo<S> {
    fn size(&self) -> u64 {
        self.size
    }

    fn tell(&self) -> u64 {
        self.tell
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, TraceError> {
        self.tell = resolve_seek(pos, self.tell, self.size)?;
        Ok(self.tell)
    }

    fn read(&mut self, length: Option<u64>) -> Result<Vec<u8>, TraceError> {
        let mut remaining = match length {
            Some(length) => length.min(self.size - self.tell),
            None => self.size - self.tell,
        };
        let mut out = Vec::with_capacity(remaining.min(self.source.buffer_size()) as usize);

        while remaining > 0 && !self.eof() {
            let data = self.slice_from_cursor()?;
            let take = data.len().min(remaining as usize);
            out.extend_from_slice(&data[..take]);
            self.tell += take as u64;
            remaining -= take as u64;
        }
        Ok(out)
    }

    fn readline(&mut self) -> Result<Vec<u8>, TraceError> {
        let mut out = Vec::new();
        while !self.eof() {
            let data = self.slice_from_cursor()?;
            let (take, found) = match data.iter().position(|&byte| byte == b'\n') {
                Some(newline) => (newline + 1, true),
                None => (data.len(), false),
            };
            out.extend_from_slice(&data[..take]);
            self.tell += take as u64;
            if found {
                break;
            }
        }
        Ok(out)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TraceError> {
        if !self.source.writable() {
            return Err(TraceError::NotSupported("write"));
        }
        if data.is_empty() {
            return Ok(0);
        }
        self.invalidate();
        self.source.write_at(self.tell, data)?;
        self.tell += data.len() as u64;
        self.size = self.size.max(self.tell);
        Ok(data.len())
    }

    fn truncate(&mut self, offset: u64) -> Result<(), TraceError> {
        if !self.source.writable() {
            return Err(TraceError::NotSupported("truncate"));
        }
        if offset > self.size {
            return Err(TraceError::PositionOutOfRange {
                position: i128::from(offset),
                size: self.size,
            });
        }
        if offset == self.size {
            return Ok(());
        }
        self.invalidate();
        self.source.truncate(offset)?;
        self.size = offset;
        self.tell = self.tell.min(offset);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TraceError> {
        self.source.flush()
    }

    fn url(&self) -> Option<&str> {
        self.source.url()
    }
}
