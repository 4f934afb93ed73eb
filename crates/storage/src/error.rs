#![forbid(unsafe_code)]

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    #[error("invalid config {key}: {message}")]
    InvalidConfig { key: &'static str, message: String },

    #[error("unknown job {0}")]
    UnknownJob(i64),

    #[error("new position {position} is outside of file (size={size})")]
    PositionOutOfRange { position: i128, size: u64 },

    #[error("offset {offset} is out of range (size={size})")]
    OffsetOutOfRange { offset: u64, size: u64 },

    #[error("chunk size overflow ({requested} > {chunk_size})")]
    ChunkSizeOverflow { requested: u64, chunk_size: u64 },

    #[error("{0} is not supported by this stream")]
    NotSupported(&'static str),

    #[error("failed to get chunk at offset {offset}")]
    FailedToGetChunk { offset: u64 },

    #[error("failed to persist trace chunk: {0}")]
    FailedToPersistData(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("unexpected http status {0}")]
    HttpStatus(u16),

    #[error("invalid checksum: {0}")]
    InvalidChecksum(String),

    #[error("invalid coverage regex: {0}")]
    CoverageRegex(#[from] regex::Error),

    #[error("archive failed: {0}")]
    Archive(String),

    #[error("trace is already archived")]
    AlreadyArchived,

    #[error("job is not finished yet")]
    JobNotFinished,

    #[error("no trace found")]
    NoTrace,
}

impl TraceError {
    /// Whether the error is a caller bug rather than a storage or network failure.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::PositionOutOfRange { .. }
                | Self::OffsetOutOfRange { .. }
                | Self::ChunkSizeOverflow { .. }
                | Self::NotSupported(_)
        )
    }
}
