#![forbid(unsafe_code)]

use super::*;
use rusqlite::OptionalExtension;

const FILE_TYPE_TRACE: &str = "trace";
const PENDING_FILE_KEY: &str = "";

impl TraceStore {
    pub fn trace_artifact_get(&self, job_id: i64) -> Result<Option<TraceArtifactRow>, TraceError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, project, file_store, file_key, size, file_sha256, created_at_ms \
                 FROM trace_artifacts WHERE job_id = ?1 AND file_type = ?2",
                params![job_id, FILE_TYPE_TRACE],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, project, file_store, file_key, size, file_sha256, created_at_ms)) = row else {
            return Ok(None);
        };
        let store = FileStore::parse(&file_store)
            .ok_or(TraceError::InvalidInput("unknown artifact file store in storage"))?;
        Ok(Some(TraceArtifactRow {
            id,
            job_id,
            project,
            file: StoredFile {
                store,
                key: file_key,
            },
            size: from_sqlite_u64(size)?,
            file_sha256,
            created_at_ms,
        }))
    }

    /// Creates the trace artifact and records the archival attempt as one unit.
    ///
    /// `upload` receives the new artifact id and stores the file. When it fails,
    /// or anything after it fails, neither the artifact row nor the attempt
    /// counter change survives.
    pub fn trace_archive_commit<F>(
        &mut self,
        request: TraceArchiveRequest,
        upload: F,
    ) -> Result<TraceArtifactRow, TraceError>
    where
        F: FnOnce(i64) -> Result<StoredFile, TraceError>,
    {
        let job = self.job_require(request.job_id)?;
        let size = to_sqlite_i64(request.size)?;
        let now_ms = now_ms();

        let tx = self.conn.transaction()?;
        let existing = tx
            .query_row(
                "SELECT id FROM trace_artifacts WHERE job_id = ?1",
                params![request.job_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(TraceError::AlreadyArchived);
        }

        tx.execute(
            "INSERT INTO trace_artifacts(job_id, project, file_type, file_store, file_key, size, file_sha256, created_at_ms) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                request.job_id,
                job.project,
                FILE_TYPE_TRACE,
                FileStore::Local.as_str(),
                PENDING_FILE_KEY,
                size,
                request.file_sha256,
                now_ms
            ],
        )?;
        let artifact_id = tx.last_insert_rowid();

        let file = upload(artifact_id)?;
        tx.execute(
            "UPDATE trace_artifacts SET file_store = ?2, file_key = ?3 WHERE id = ?1",
            params![artifact_id, file.store.as_str(), file.key],
        )?;
        tx.execute(
            "INSERT INTO trace_metadata(job_id, trace_artifact_id, archival_attempts, last_archival_attempt_at_ms, checksum) \
             VALUES (?1, ?2, 1, ?3, ?4) \
             ON CONFLICT(job_id) DO UPDATE SET \
               trace_artifact_id = excluded.trace_artifact_id, \
               archival_attempts = archival_attempts + 1, \
               last_archival_attempt_at_ms = excluded.last_archival_attempt_at_ms, \
               checksum = excluded.checksum",
            params![request.job_id, artifact_id, now_ms, request.md5],
        )?;
        tx.commit()?;

        tracing::info!(
            job_id = request.job_id,
            artifact_id,
            size = request.size,
            "trace artifact created"
        );
        Ok(TraceArtifactRow {
            id: artifact_id,
            job_id: request.job_id,
            project: job.project,
            file,
            size: request.size,
            file_sha256: request.file_sha256,
            created_at_ms: now_ms,
        })
    }

    /// Drops the artifact row and detaches it from the archival metadata.
    pub fn trace_artifact_delete(&mut self, job_id: i64) -> Result<bool, TraceError> {
        let tx = self.conn.transaction()?;
        let deleted = tx.execute(
            "DELETE FROM trace_artifacts WHERE job_id = ?1",
            params![job_id],
        )?;
        tx.execute(
            "UPDATE trace_metadata SET trace_artifact_id = NULL, remote_checksum = NULL WHERE job_id = ?1",
            params![job_id],
        )?;
        tx.commit()?;
        Ok(deleted > 0)
    }
}
