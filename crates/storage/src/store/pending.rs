#![forbid(unsafe_code)]

use super::*;
use rusqlite::OptionalExtension;

impl TraceStore {
    /// Records the checksum and size the runner reported for a finishing job.
    pub fn pending_state_set(
        &mut self,
        request: PendingStateRequest,
    ) -> Result<PendingStateRow, TraceError> {
        self.job_require(request.job_id)?;
        let crc32 = request.crc32.map(i64::from);
        let bytesize = request.trace_bytesize.map(to_sqlite_i64).transpose()?;
        let now_ms = now_ms();

        self.conn.execute(
            "INSERT INTO pending_states(job_id, crc32, trace_bytesize, created_at_ms) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(job_id) DO UPDATE SET crc32 = excluded.crc32, trace_bytesize = excluded.trace_bytesize",
            params![request.job_id, crc32, bytesize, now_ms],
        )?;

        self.pending_state_get(request.job_id)?
            .ok_or(TraceError::UnknownJob(request.job_id))
    }

    pub fn pending_state_get(&self, job_id: i64) -> Result<Option<PendingStateRow>, TraceError> {
        let row = self
            .conn
            .query_row(
                "SELECT crc32, trace_bytesize, created_at_ms FROM pending_states WHERE job_id = ?1",
                params![job_id],
                |row| {
                    Ok((
                        row.get::<_, Option<i64>>(0)?,
                        row.get::<_, Option<i64>>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((crc32, trace_bytesize, created_at_ms)) = row else {
            return Ok(None);
        };
        let crc32 = crc32
            .map(|value| {
                u32::try_from(value).map_err(|_| TraceError::InvalidInput("pending crc32 overflow"))
            })
            .transpose()?;
        Ok(Some(PendingStateRow {
            job_id,
            crc32,
            trace_bytesize: trace_bytesize.map(from_sqlite_u64).transpose()?,
            created_at_ms,
        }))
    }

    pub fn pending_state_remove(&mut self, job_id: i64) -> Result<bool, TraceError> {
        let deleted = self
            .conn
            .execute("DELETE FROM pending_states WHERE job_id = ?1", params![job_id])?;
        Ok(deleted > 0)
    }
}
