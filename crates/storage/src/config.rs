#![forbid(unsafe_code)]

use crate::TraceError;
use jobtrace_core::limits::{
    CHUNK_SIZE, CHUNKS_TTL, HTTP_BUFFER_SIZE, LIMIT_SIZE, MAX_ARCHIVAL_ATTEMPTS,
};
use std::path::PathBuf;
use std::time::Duration;

/// Where the payload of a live chunk currently lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataStore {
    Cache,
    Database,
}

impl DataStore {
    pub fn as_str(self) -> &'static str {
        match self {
            DataStore::Cache => "cache",
            DataStore::Database => "database",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "cache" => Some(DataStore::Cache),
            "database" => Some(DataStore::Database),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TraceConfig {
    pub chunk_size: u64,
    pub http_buffer_size: u64,
    pub limit_size: u64,
    pub max_archival_attempts: u32,
    pub chunks_ttl: Duration,
    /// MD5 is unavailable in FIPS mode, which also disables remote checksum validation.
    pub fips_mode: bool,
    pub default_data_store: DataStore,
    pub scratch_dir: PathBuf,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            http_buffer_size: HTTP_BUFFER_SIZE,
            limit_size: LIMIT_SIZE,
            max_archival_attempts: MAX_ARCHIVAL_ATTEMPTS,
            chunks_ttl: CHUNKS_TTL,
            fips_mode: false,
            default_data_store: DataStore::Cache,
            scratch_dir: std::env::temp_dir().join("jobtrace"),
        }
    }
}

impl TraceConfig {
    /// Defaults overridden by `JOBTRACE_*` environment variables.
    pub fn from_env() -> Result<Self, TraceError> {
        let mut config = Self::default();
        if let Some(value) = env_u64("JOBTRACE_CHUNK_SIZE")? {
            config.chunk_size = value;
        }
        if let Some(value) = env_u64("JOBTRACE_HTTP_BUFFER_SIZE")? {
            config.http_buffer_size = value;
        }
        if let Some(value) = env_u64("JOBTRACE_LIMIT_SIZE")? {
            config.limit_size = value;
        }
        if let Some(value) = env_u64("JOBTRACE_MAX_ARCHIVAL_ATTEMPTS")? {
            config.max_archival_attempts =
                u32::try_from(value).map_err(|_| TraceError::InvalidConfig {
                    key: "JOBTRACE_MAX_ARCHIVAL_ATTEMPTS",
                    message: format!("{value} does not fit in u32"),
                })?;
        }
        if let Some(value) = env_u64("JOBTRACE_CHUNKS_TTL_S")? {
            config.chunks_ttl = Duration::from_secs(value);
        }
        if let Some(value) = env_var("JOBTRACE_FIPS") {
            config.fips_mode = parse_flag("JOBTRACE_FIPS", &value)?;
        }
        if let Some(value) = env_var("JOBTRACE_DATA_STORE") {
            config.default_data_store =
                DataStore::parse(&value).ok_or_else(|| TraceError::InvalidConfig {
                    key: "JOBTRACE_DATA_STORE",
                    message: format!("expected cache|database, got {value}"),
                })?;
        }
        if let Some(value) = env_var("JOBTRACE_SCRATCH_DIR") {
            config.scratch_dir = PathBuf::from(value);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TraceError> {
        if self.chunk_size == 0 {
            return Err(TraceError::InvalidConfig {
                key: "chunk_size",
                message: "must be positive".to_string(),
            });
        }
        if self.http_buffer_size == 0 {
            return Err(TraceError::InvalidConfig {
                key: "http_buffer_size",
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_u64(name: &'static str) -> Result<Option<u64>, TraceError> {
    env_var(name)
        .map(|value| {
            value.parse::<u64>().map_err(|err| TraceError::InvalidConfig {
                key: name,
                message: format!("{value}: {err}"),
            })
        })
        .transpose()
}

pub fn parse_flag(key: &'static str, value: &str) -> Result<bool, TraceError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(TraceError::InvalidConfig {
            key,
            message: format!("expected a boolean, got {other}"),
        }),
    }
}
