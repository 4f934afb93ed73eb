#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

type ChunkKey = (i64, u64);

/// Shared in-memory home of chunks that are still being filled.
///
/// Clones share the same map, the way separate processes share one cache server.
#[derive(Clone, Debug, Default)]
pub struct ChunkCache {
    entries: Arc<Mutex<HashMap<ChunkKey, Vec<u8>>>>,
}

impl ChunkCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, job_id: i64, chunk_index: u64) -> Option<Vec<u8>> {
        self.lock().get(&(job_id, chunk_index)).cloned()
    }

    pub fn set(&self, job_id: i64, chunk_index: u64, data: Vec<u8>) {
        self.lock().insert((job_id, chunk_index), data);
    }

    pub fn delete(&self, job_id: i64, chunk_index: u64) -> bool {
        self.lock().remove(&(job_id, chunk_index)).is_some()
    }

    pub fn delete_job(&self, job_id: i64) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(job, _), _| *job != job_id);
        before - entries.len()
    }

    pub fn delete_after(&self, job_id: i64, chunk_index: u64) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(job, index), _| !(*job == job_id && *index > chunk_index));
        before - entries.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ChunkKey, Vec<u8>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
