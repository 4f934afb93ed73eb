#![forbid(unsafe_code)]

use super::*;
use jobtrace_core::backoff::Backoff;
use rand::Rng;
use rusqlite::OptionalExtension;

impl TraceStore {
    /// Archival bookkeeping for a job; a job that was never attempted gets the default row.
    pub fn trace_metadata_get(&self, job_id: i64) -> Result<TraceMetadataRow, TraceError> {
        let row = self
            .conn
            .query_row(
                "SELECT trace_artifact_id, archival_attempts, last_archival_attempt_at_ms, checksum, remote_checksum \
                 FROM trace_metadata WHERE job_id = ?1",
                params![job_id],
                |row| {
                    Ok((
                        row.get::<_, Option<i64>>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((trace_artifact_id, attempts, last_at_ms, checksum, remote_checksum)) = row else {
            return Ok(TraceMetadataRow {
                job_id,
                ..TraceMetadataRow::default()
            });
        };
        Ok(TraceMetadataRow {
            job_id,
            trace_artifact_id,
            archival_attempts: u32::try_from(attempts)
                .map_err(|_| TraceError::InvalidInput("archival_attempts out of range"))?,
            last_archival_attempt_at_ms: last_at_ms,
            checksum,
            remote_checksum,
        })
    }

    /// Bumps the attempt counter without touching the archived state.
    pub fn trace_metadata_record_failed_attempt(
        &mut self,
        job_id: i64,
        attempted_at_ms: i64,
    ) -> Result<TraceMetadataRow, TraceError> {
        self.conn.execute(
            "INSERT INTO trace_metadata(job_id, archival_attempts, last_archival_attempt_at_ms) VALUES (?1, 1, ?2) \
             ON CONFLICT(job_id) DO UPDATE SET \
               archival_attempts = archival_attempts + 1, \
               last_archival_attempt_at_ms = excluded.last_archival_attempt_at_ms",
            params![job_id, attempted_at_ms],
        )?;
        self.trace_metadata_get(job_id)
    }

    pub fn trace_metadata_set_remote_checksum(
        &mut self,
        job_id: i64,
        remote_checksum: Option<&str>,
    ) -> Result<(), TraceError> {
        self.conn.execute(
            "INSERT INTO trace_metadata(job_id, remote_checksum) VALUES (?1, ?2) \
             ON CONFLICT(job_id) DO UPDATE SET remote_checksum = excluded.remote_checksum",
            params![job_id, remote_checksum],
        )?;
        Ok(())
    }
}

impl TraceMetadataRow {
    pub fn archival_attempts_available(&self, max_attempts: u32) -> bool {
        self.archival_attempts <= max_attempts
    }

    /// True when no attempt was made yet, or the jittered backoff since the
    /// last attempt has elapsed.
    pub fn can_attempt_archival_now<R: Rng + ?Sized>(
        &self,
        now_ms: i64,
        config: &TraceConfig,
        rng: &mut R,
    ) -> bool {
        let Some(last_ms) = self.last_archival_attempt_at_ms else {
            return true;
        };
        let backoff = Backoff::with_limits(
            self.archival_attempts,
            config.chunks_ttl,
            config.max_archival_attempts,
        );
        let wait_ms = backoff
            .value_with_jitter(rng)
            .as_millis()
            .min(i64::MAX as u128) as i64;
        last_ms.saturating_add(wait_ms) < now_ms
    }

    pub fn remote_checksum_valid(&self) -> bool {
        match (&self.checksum, &self.remote_checksum) {
            (Some(local), Some(remote)) => local == remote,
            _ => false,
        }
    }

    pub fn archival_attempts_message(&self, max_attempts: u32) -> &'static str {
        if self.archival_attempts_available(max_attempts) {
            "The job can not be archived right now."
        } else {
            "The job is out of archival attempts."
        }
    }
}
