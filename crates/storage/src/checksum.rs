#![forbid(unsafe_code)]

use crate::TraceError;
use crate::store::{PendingStateRow, TraceStore};
use jobtrace_core::checksum::{ChunkChecksum, CombinedChecksum, combine_chunks};
use std::cell::OnceCell;

/// Consistency of a live trace against the checksum the runner reported.
///
/// Chunk metadata is loaded once, at construction; the combined CRC32 is
/// computed on first use and kept for the lifetime of the value.
#[derive(Debug)]
pub struct TraceChecksum {
    job_id: i64,
    chunk_size: u64,
    pending: Option<PendingStateRow>,
    chunks: Vec<ChunkChecksum>,
    combined: OnceCell<CombinedChecksum>,
}

impl TraceChecksum {
    pub fn load(store: &TraceStore, job_id: i64) -> Result<Self, TraceError> {
        Ok(Self::new(
            job_id,
            store.config().chunk_size,
            store.pending_state_get(job_id)?,
            store.chunk_checksums(job_id)?,
        ))
    }

    pub fn new(
        job_id: i64,
        chunk_size: u64,
        pending: Option<PendingStateRow>,
        chunks: Vec<ChunkChecksum>,
    ) -> Self {
        Self {
            job_id,
            chunk_size,
            pending,
            chunks,
            combined: OnceCell::new(),
        }
    }

    pub fn job_id(&self) -> i64 {
        self.job_id
    }

    /// The reported CRC32 exists and matches the combined chunk CRC32.
    pub fn valid(&self) -> bool {
        self.state_crc32()
            .is_some_and(|expected| expected == self.chunks_crc32())
    }

    /// A size was reported, the CRC32 does not match, and neither does the size.
    pub fn corrupted(&self) -> bool {
        let Some(expected) = self.state_bytesize() else {
            return false;
        };
        !self.valid() && expected != self.chunks_bytesize()
    }

    pub fn chunks_crc32(&self) -> u32 {
        self.combined().crc32
    }

    pub fn chunks_bytesize(&self) -> u64 {
        self.chunks.iter().map(|chunk| chunk.size).sum()
    }

    pub fn chunks_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn state_crc32(&self) -> Option<u32> {
        self.pending.as_ref().and_then(|state| state.crc32)
    }

    pub fn state_bytesize(&self) -> Option<u64> {
        self.pending.as_ref().and_then(|state| state.trace_bytesize)
    }

    fn combined(&self) -> &CombinedChecksum {
        self.combined
            .get_or_init(|| combine_chunks(&self.chunks, self.chunk_size))
    }
}
