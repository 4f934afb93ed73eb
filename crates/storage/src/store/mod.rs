#![forbid(unsafe_code)]

mod artifacts;
mod cache;
mod chunks;
mod jobs;
mod metadata;
mod pending;
mod schema;
mod types;

pub use cache::ChunkCache;
pub use types::*;

use crate::config::TraceConfig;
use crate::error::TraceError;
use crate::metrics::TraceMetrics;
use rusqlite::{Connection, ErrorCode, params};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const DB_FILE_NAME: &str = "jobtrace.db";
const SCHEMA_VERSION: &str = "v1";

/// SQLite-backed home of jobs, live trace chunks and archived trace records.
///
/// Every handle owns its own connection. Handles made with [`TraceStore::try_clone`]
/// share the chunk cache, so a reader opened from a clone sees chunks that are
/// still cached by the writer.
pub struct TraceStore {
    conn: Connection,
    storage_dir: PathBuf,
    config: TraceConfig,
    cache: ChunkCache,
    metrics: Arc<dyn TraceMetrics>,
}

impl std::fmt::Debug for TraceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceStore")
            .field("storage_dir", &self.storage_dir)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TraceStore {
    pub fn open(
        storage_dir: impl AsRef<Path>,
        config: TraceConfig,
        metrics: Arc<dyn TraceMetrics>,
    ) -> Result<Self, TraceError> {
        Self::open_with_cache(storage_dir, config, ChunkCache::new(), metrics)
    }

    pub fn open_with_cache(
        storage_dir: impl AsRef<Path>,
        config: TraceConfig,
        cache: ChunkCache,
        metrics: Arc<dyn TraceMetrics>,
    ) -> Result<Self, TraceError> {
        config.validate()?;
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;

        let conn = open_connection(&storage_dir)?;
        schema::install(&conn)?;
        conn.execute(
            "INSERT OR IGNORE INTO meta(key, value) VALUES (?1, ?2)",
            params!["schema_version", SCHEMA_VERSION],
        )?;

        Ok(Self {
            conn,
            storage_dir,
            config,
            cache,
            metrics,
        })
    }

    /// Opens another connection to the same database, sharing cache, config and metrics.
    pub fn try_clone(&self) -> Result<Self, TraceError> {
        Ok(Self {
            conn: open_connection(&self.storage_dir)?,
            storage_dir: self.storage_dir.clone(),
            config: self.config.clone(),
            cache: self.cache.clone(),
            metrics: Arc::clone(&self.metrics),
        })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<dyn TraceMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn cache(&self) -> &ChunkCache {
        &self.cache
    }
}

fn open_connection(storage_dir: &Path) -> Result<Connection, TraceError> {
    let conn = Connection::open(storage_dir.join(DB_FILE_NAME))?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
    Ok(conn)
}

pub(crate) fn now_ms() -> i64 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    now.as_millis().min(i64::MAX as u128) as i64
}

fn to_sqlite_i64(value: u64) -> Result<i64, TraceError> {
    i64::try_from(value).map_err(|_| TraceError::InvalidInput("numeric overflow"))
}

fn from_sqlite_u64(value: i64) -> Result<u64, TraceError> {
    u64::try_from(value).map_err(|_| TraceError::InvalidInput("negative value in storage"))
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, _) => code.code == ErrorCode::ConstraintViolation,
        _ => false,
    }
}
