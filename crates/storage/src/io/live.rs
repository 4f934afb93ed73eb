#![forbid(unsafe_code)]

use super::{ChunkSource, ChunkedIo, FetchedChunk};
use crate::TraceError;
use crate::store::TraceStore;
use jobtrace_core::chunk::ChunkWindow;

/// Chunks of a running job, read from the cache or the database and
/// written through [`TraceStore::chunk_append`].
///
/// One writer per job is assumed; nothing here arbitrates between writers.
#[derive(Debug)]
pub struct LiveChunks {
    store: TraceStore,
    job_id: i64,
}

pub type LiveTraceIo = ChunkedIo<LiveChunks>;

impl LiveChunks {
    pub fn new(store: TraceStore, job_id: i64) -> Self {
        Self { store, job_id }
    }

    pub fn job_id(&self) -> i64 {
        self.job_id
    }

    pub fn store(&self) -> &TraceStore {
        &self.store
    }

    fn chunk_size(&self) -> u64 {
        self.store.config().chunk_size
    }
}

impl ChunkedIo<LiveChunks> {
    /// Opens the live trace of `job_id`, sized from its last chunk.
    pub fn open_live(store: TraceStore, job_id: i64) -> Result<Self, TraceError> {
        let size = store.trace_size(job_id)?;
        Ok(ChunkedIo::new(LiveChunks::new(store, job_id), size))
    }
}

impl ChunkSource for LiveChunks {
    fn buffer_size(&self) -> u64 {
        self.chunk_size()
    }

    fn fetch(&mut self, window: ChunkWindow) -> Result<FetchedChunk, TraceError> {
        let chunk = self
            .store
            .chunk_get(self.job_id, window.index)?
            .ok_or(TraceError::FailedToGetChunk {
                offset: window.start,
            })?;
        let data = self.store.chunk_data(&chunk)?;
        let range = window.start..window.start + data.len() as u64;
        Ok(FetchedChunk { data, range })
    }

    fn writable(&self) -> bool {
        true
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), TraceError> {
        let chunk_size = self.chunk_size();
        let mut offset = offset;
        let mut rest = data;
        while !rest.is_empty() {
            let chunk_index = offset / chunk_size;
            let chunk_offset = offset % chunk_size;
            let take = rest.len().min((chunk_size - chunk_offset) as usize);
            self.store
                .chunk_append(self.job_id, chunk_index, &rest[..take], chunk_offset)?;
            offset += take as u64;
            rest = &rest[take..];
        }
        Ok(())
    }

    fn truncate(&mut self, offset: u64) -> Result<(), TraceError> {
        let chunk_size = self.chunk_size();
        let chunk_index = offset / chunk_size;
        let chunk_offset = offset % chunk_size;
        if chunk_offset == 0 {
            // Cutting on a boundary drops the chunk that would start there.
            match chunk_index.checked_sub(1) {
                Some(previous) => self.store.chunks_delete_after(self.job_id, previous)?,
                None => self.store.chunks_delete(self.job_id)?,
            };
            return Ok(());
        }
        self.store.chunks_delete_after(self.job_id, chunk_index)?;
        self.store
            .chunk_truncate(self.job_id, chunk_index, chunk_offset)
    }

    fn flush(&mut self) -> Result<(), TraceError> {
        let persisted = self.store.chunks_flush(self.job_id)?;
        tracing::trace!(job_id = self.job_id, persisted, "live trace flushed");
        Ok(())
    }
}
