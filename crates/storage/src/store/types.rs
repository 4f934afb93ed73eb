#![forbid(unsafe_code)]

use crate::config::DataStore;
use jobtrace_core::checksum::ChunkChecksum;
use jobtrace_core::model::JobStatus;

#[derive(Clone, Debug)]
pub struct JobRow {
    pub id: i64,
    pub project: String,
    pub status: JobStatus,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl JobRow {
    pub fn is_complete(&self) -> bool {
        self.status.is_complete()
    }
}

#[derive(Clone, Debug)]
pub struct JobCreateRequest {
    pub project: String,
    pub status: JobStatus,
}

/// Chunk metadata. The payload is read separately through the chunk's data store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceChunkRow {
    pub job_id: i64,
    pub chunk_index: u64,
    pub data_store: DataStore,
    pub checksum: Option<u32>,
    pub size: u64,
    pub lock_version: i64,
}

impl TraceChunkRow {
    pub fn start_offset(&self, chunk_size: u64) -> u64 {
        self.chunk_index * chunk_size
    }

    pub fn end_offset(&self, chunk_size: u64) -> u64 {
        self.start_offset(chunk_size) + self.size
    }

    pub fn is_persisted(&self) -> bool {
        self.data_store == DataStore::Database
    }

    pub fn checksum_meta(&self) -> Option<ChunkChecksum> {
        self.checksum.map(|crc32| ChunkChecksum {
            index: self.chunk_index,
            crc32,
            size: self.size,
        })
    }
}

/// Final checksum and size reported by the runner while the job is finishing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingStateRow {
    pub job_id: i64,
    pub crc32: Option<u32>,
    pub trace_bytesize: Option<u64>,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug)]
pub struct PendingStateRequest {
    pub job_id: i64,
    pub crc32: Option<u32>,
    pub trace_bytesize: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TraceMetadataRow {
    pub job_id: i64,
    pub trace_artifact_id: Option<i64>,
    pub archival_attempts: u32,
    pub last_archival_attempt_at_ms: Option<i64>,
    /// MD5 of the archived file, computed locally before upload.
    pub checksum: Option<String>,
    /// MD5 reported by the object store after upload.
    pub remote_checksum: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileStore {
    Local,
    Remote,
}

impl FileStore {
    pub fn as_str(self) -> &'static str {
        match self {
            FileStore::Local => "local",
            FileStore::Remote => "remote",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "local" => Some(FileStore::Local),
            "remote" => Some(FileStore::Remote),
            _ => None,
        }
    }
}

/// Location of an uploaded artifact file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredFile {
    pub store: FileStore,
    pub key: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceArtifactRow {
    pub id: i64,
    pub job_id: i64,
    pub project: String,
    pub file: StoredFile,
    pub size: u64,
    pub file_sha256: String,
    pub created_at_ms: i64,
}

impl TraceArtifactRow {
    pub fn local_store(&self) -> bool {
        self.file.store == FileStore::Local
    }
}

#[derive(Clone, Debug)]
pub struct TraceArchiveRequest {
    pub job_id: i64,
    pub size: u64,
    pub file_sha256: String,
    pub md5: Option<String>,
}
