#![forbid(unsafe_code)]

use crate::error::TraceError;
use rusqlite::Connection;

const SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS meta (
      key TEXT PRIMARY KEY,
      value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS jobs (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      project TEXT NOT NULL,
      status TEXT NOT NULL,
      created_at_ms INTEGER NOT NULL,
      updated_at_ms INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS trace_chunks (
      job_id INTEGER NOT NULL,
      chunk_index INTEGER NOT NULL,
      data_store TEXT NOT NULL,
      raw_data BLOB,
      checksum INTEGER,
      size INTEGER NOT NULL DEFAULT 0,
      lock_version INTEGER NOT NULL DEFAULT 0,
      created_at_ms INTEGER NOT NULL,
      PRIMARY KEY (job_id, chunk_index)
    );

    CREATE TABLE IF NOT EXISTS pending_states (
      job_id INTEGER PRIMARY KEY,
      crc32 INTEGER,
      trace_bytesize INTEGER,
      created_at_ms INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS trace_metadata (
      job_id INTEGER PRIMARY KEY,
      trace_artifact_id INTEGER,
      archival_attempts INTEGER NOT NULL DEFAULT 0,
      last_archival_attempt_at_ms INTEGER,
      checksum TEXT,
      remote_checksum TEXT
    );

    CREATE TABLE IF NOT EXISTS trace_artifacts (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      job_id INTEGER NOT NULL UNIQUE,
      project TEXT NOT NULL,
      file_type TEXT NOT NULL,
      file_store TEXT NOT NULL,
      file_key TEXT NOT NULL,
      size INTEGER NOT NULL,
      file_sha256 TEXT NOT NULL,
      created_at_ms INTEGER NOT NULL
    );
"#;

pub(super) fn install(conn: &Connection) -> Result<(), TraceError> {
    conn.execute_batch(SQL)?;
    Ok(())
}
