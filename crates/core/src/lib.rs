#![forbid(unsafe_code)]

pub mod backoff;
pub mod checksum;
pub mod chunk;
pub mod coverage;
pub mod section;

pub mod limits {
    use std::time::Duration;

    /// Unit in which live traces are chunked and checksummed.
    pub const CHUNK_SIZE: u64 = 128 * 1024;
    /// Fetch window of the HTTP range reader.
    pub const HTTP_BUFFER_SIZE: u64 = 128 * 1024;
    /// Block size used when a stream is read backwards.
    pub const STREAM_BUFFER_SIZE: u64 = 4096;
    /// Default tail limit applied when a trace is shown truncated.
    pub const LIMIT_SIZE: u64 = 500 * 1024;
    pub const MAX_ARCHIVAL_ATTEMPTS: u32 = 5;
    /// How long cached live chunks are retained.
    pub const CHUNKS_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
}

pub mod model {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum JobStatus {
        Created,
        Pending,
        Running,
        Success,
        Failed,
        Canceled,
        Skipped,
    }

    impl JobStatus {
        pub fn as_str(self) -> &'static str {
            match self {
                JobStatus::Created => "created",
                JobStatus::Pending => "pending",
                JobStatus::Running => "running",
                JobStatus::Success => "success",
                JobStatus::Failed => "failed",
                JobStatus::Canceled => "canceled",
                JobStatus::Skipped => "skipped",
            }
        }

        pub fn parse(value: &str) -> Option<Self> {
            match value.trim() {
                "created" => Some(JobStatus::Created),
                "pending" => Some(JobStatus::Pending),
                "running" => Some(JobStatus::Running),
                "success" => Some(JobStatus::Success),
                "failed" => Some(JobStatus::Failed),
                "canceled" => Some(JobStatus::Canceled),
                "skipped" => Some(JobStatus::Skipped),
                _ => None,
            }
        }

        /// Whether the job reached a state where its trace no longer grows.
        pub fn is_complete(self) -> bool {
            matches!(
                self,
                JobStatus::Success | JobStatus::Failed | JobStatus::Canceled | JobStatus::Skipped
            )
        }
    }
}
