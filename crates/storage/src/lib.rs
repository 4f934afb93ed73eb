#![forbid(unsafe_code)]

//! Storage and streaming of CI job traces.
//!
//! Live traces are written in fixed-size chunks that start out in a shared
//! cache and move into SQLite once full. Finished traces are archived into an
//! artifact store and read back through the same [`Stream`] interface.

pub mod ansi;
pub mod archive;
pub mod checksum;
pub mod config;
mod error;
pub mod io;
pub mod metrics;
pub mod remote_checksum;
mod store;
pub mod stream;
pub mod trace;
pub mod uploader;

pub use archive::Archive;
pub use checksum::TraceChecksum;
pub use config::{DataStore, TraceConfig};
pub use error::TraceError;
pub use metrics::{CounterMetrics, ErrorReason, TraceMetrics, TraceOperation};
pub use remote_checksum::{ObjectAttributes, ObjectStoreConfig, ObjectStoreProvider, RemoteChecksum};
pub use store::{
    ChunkCache, FileStore, JobCreateRequest, JobRow, PendingStateRequest, PendingStateRow,
    StoredFile, TraceArchiveRequest, TraceArtifactRow, TraceChunkRow, TraceMetadataRow,
    TraceStore,
};
pub use stream::Stream;
pub use trace::{ArchiveStatus, Trace, VerifyReport};
pub use uploader::{ArtifactUploader, LocalArtifactStore};
