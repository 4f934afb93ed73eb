#![forbid(unsafe_code)]

use super::*;
use jobtrace_core::model::JobStatus;
use rusqlite::OptionalExtension;

const MAX_PROJECT_LEN: usize = 255;

impl TraceStore {
    pub fn job_create(&mut self, request: JobCreateRequest) -> Result<JobRow, TraceError> {
        let project = request.project.trim();
        if project.is_empty() {
            return Err(TraceError::InvalidInput("job.project must not be empty"));
        }
        if project.len() > MAX_PROJECT_LEN {
            return Err(TraceError::InvalidInput("job.project is too long"));
        }

        let now_ms = now_ms();
        self.conn.execute(
            "INSERT INTO jobs(project, status, created_at_ms, updated_at_ms) VALUES (?1, ?2, ?3, ?3)",
            params![project, request.status.as_str(), now_ms],
        )?;

        Ok(JobRow {
            id: self.conn.last_insert_rowid(),
            project: project.to_string(),
            status: request.status,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        })
    }

    pub fn job_get(&self, job_id: i64) -> Result<Option<JobRow>, TraceError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, project, status, created_at_ms, updated_at_ms FROM jobs WHERE id = ?1",
                params![job_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, project, status, created_at_ms, updated_at_ms)) = row else {
            return Ok(None);
        };
        let status = JobStatus::parse(&status)
            .ok_or(TraceError::InvalidInput("unknown job status in storage"))?;
        Ok(Some(JobRow {
            id,
            project,
            status,
            created_at_ms,
            updated_at_ms,
        }))
    }

    pub fn job_require(&self, job_id: i64) -> Result<JobRow, TraceError> {
        self.job_get(job_id)?.ok_or(TraceError::UnknownJob(job_id))
    }

    pub fn job_set_status(&mut self, job_id: i64, status: JobStatus) -> Result<JobRow, TraceError> {
        let updated = self.conn.execute(
            "UPDATE jobs SET status = ?2, updated_at_ms = ?3 WHERE id = ?1",
            params![job_id, status.as_str(), now_ms()],
        )?;
        if updated == 0 {
            return Err(TraceError::UnknownJob(job_id));
        }
        self.job_require(job_id)
    }
}
