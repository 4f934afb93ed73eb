#![forbid(unsafe_code)]

use super::*;
use crate::config::DataStore;
use crate::metrics::TraceOperation;
use jobtrace_core::checksum::{ChunkChecksum, crc32};
use rusqlite::OptionalExtension;

type RawChunk = (i64, i64, String, Option<i64>, i64, i64);

const CHUNK_COLUMNS: &str = "job_id, chunk_index, data_store, checksum, size, lock_version";

fn read_chunk_columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawChunk> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn chunk_row(raw: RawChunk) -> Result<TraceChunkRow, TraceError> {
    let (job_id, chunk_index, data_store, checksum, size, lock_version) = raw;
    let data_store = DataStore::parse(&data_store)
        .ok_or(TraceError::InvalidInput("unknown chunk data store in storage"))?;
    let checksum = checksum
        .map(|value| {
            u32::try_from(value).map_err(|_| TraceError::InvalidInput("chunk checksum overflow"))
        })
        .transpose()?;
    Ok(TraceChunkRow {
        job_id,
        chunk_index: from_sqlite_u64(chunk_index)?,
        data_store,
        checksum,
        size: from_sqlite_u64(size)?,
        lock_version,
    })
}

impl TraceStore {
    pub fn chunk_get(
        &self,
        job_id: i64,
        chunk_index: u64,
    ) -> Result<Option<TraceChunkRow>, TraceError> {
        let raw = self
            .conn
            .query_row(
                &format!(
                    "SELECT {CHUNK_COLUMNS} FROM trace_chunks WHERE job_id = ?1 AND chunk_index = ?2"
                ),
                params![job_id, to_sqlite_i64(chunk_index)?],
                read_chunk_columns,
            )
            .optional()?;
        raw.map(chunk_row).transpose()
    }

    pub fn chunks_list(&self, job_id: i64) -> Result<Vec<TraceChunkRow>, TraceError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CHUNK_COLUMNS} FROM trace_chunks WHERE job_id = ?1 ORDER BY chunk_index ASC"
        ))?;
        let rows = stmt.query_map(params![job_id], read_chunk_columns)?;
        rows.map(|raw| chunk_row(raw?)).collect()
    }

    pub fn chunk_last(&self, job_id: i64) -> Result<Option<TraceChunkRow>, TraceError> {
        let raw = self
            .conn
            .query_row(
                &format!(
                    "SELECT {CHUNK_COLUMNS} FROM trace_chunks WHERE job_id = ?1 \
                     ORDER BY chunk_index DESC LIMIT 1"
                ),
                params![job_id],
                read_chunk_columns,
            )
            .optional()?;
        raw.map(chunk_row).transpose()
    }

    pub fn chunks_exist(&self, job_id: i64) -> Result<bool, TraceError> {
        Ok(self
            .conn
            .query_row(
                "SELECT 1 FROM trace_chunks WHERE job_id = ?1 LIMIT 1",
                params![job_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    /// Byte length of the live trace: the end offset of its last chunk.
    pub fn trace_size(&self, job_id: i64) -> Result<u64, TraceError> {
        Ok(self
            .chunk_last(job_id)?
            .map(|chunk| chunk.end_offset(self.config.chunk_size))
            .unwrap_or(0))
    }

    /// CRC32 metadata of every persisted chunk, without reading any payload.
    pub fn chunk_checksums(&self, job_id: i64) -> Result<Vec<ChunkChecksum>, TraceError> {
        let mut stmt = self.conn.prepare(
            "SELECT chunk_index, checksum, size FROM trace_chunks \
             WHERE job_id = ?1 AND data_store = 'database' AND checksum IS NOT NULL \
             ORDER BY chunk_index ASC",
        )?;
        let rows = stmt.query_map(params![job_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut checksums = Vec::new();
        for row in rows {
            let (index, crc32, size) = row?;
            checksums.push(ChunkChecksum {
                index: from_sqlite_u64(index)?,
                crc32: u32::try_from(crc32)
                    .map_err(|_| TraceError::InvalidInput("chunk checksum overflow"))?,
                size: from_sqlite_u64(size)?,
            });
        }
        Ok(checksums)
    }

    /// Payload of `chunk`, read from the store it currently lives in.
    pub fn chunk_data(&self, chunk: &TraceChunkRow) -> Result<Vec<u8>, TraceError> {
        match chunk.data_store {
            DataStore::Cache => Ok(self
                .cache
                .get(chunk.job_id, chunk.chunk_index)
                .unwrap_or_default()),
            DataStore::Database => {
                let data: Option<Option<Vec<u8>>> = self
                    .conn
                    .query_row(
                        "SELECT raw_data FROM trace_chunks WHERE job_id = ?1 AND chunk_index = ?2",
                        params![chunk.job_id, to_sqlite_i64(chunk.chunk_index)?],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(data.flatten().unwrap_or_default())
            }
        }
    }

    /// A chunk is final when the runner already reported the trace as complete
    /// and no chunk follows it.
    pub fn chunk_is_final(&self, chunk: &TraceChunkRow) -> Result<bool, TraceError> {
        if self.pending_state_get(chunk.job_id)?.is_none() {
            return Ok(false);
        }
        Ok(self
            .chunk_last(chunk.job_id)?
            .is_some_and(|last| last.chunk_index == chunk.chunk_index))
    }

    /// Replaces the chunk bytes from `offset` on with `data`.
    pub fn chunk_append(
        &mut self,
        job_id: i64,
        chunk_index: u64,
        data: &[u8],
        offset: u64,
    ) -> Result<(), TraceError> {
        let existing = self.chunk_get(job_id, chunk_index)?;
        let current_size = existing.as_ref().map_or(0, |chunk| chunk.size);
        if offset > current_size {
            return Err(TraceError::OffsetOutOfRange {
                offset,
                size: current_size,
            });
        }
        let chunk_size = self.config.chunk_size;
        let requested = offset + data.len() as u64;
        if requested > chunk_size {
            return Err(TraceError::ChunkSizeOverflow {
                requested,
                chunk_size,
            });
        }
        if data.is_empty() {
            return Ok(());
        }

        let chunk = match existing {
            Some(chunk) => {
                if chunk.is_persisted() {
                    self.metrics
                        .increment_trace_operation(TraceOperation::Mutated);
                }
                chunk
            }
            None => self.chunk_create(job_id, chunk_index)?,
        };

        let mut merged = self.chunk_data(&chunk)?;
        merged.truncate(offset as usize);
        merged.extend_from_slice(data);
        let chunk = self.chunk_store_data(chunk, merged)?;
        self.metrics
            .increment_trace_operation(TraceOperation::Appended);

        if !chunk.is_persisted() && chunk.size == chunk_size {
            self.chunk_persist(job_id, chunk_index)?;
        }
        Ok(())
    }

    pub fn chunk_truncate(
        &mut self,
        job_id: i64,
        chunk_index: u64,
        offset: u64,
    ) -> Result<(), TraceError> {
        let Some(chunk) = self.chunk_get(job_id, chunk_index)? else {
            if offset == 0 {
                return Ok(());
            }
            return Err(TraceError::OffsetOutOfRange { offset, size: 0 });
        };
        if offset > chunk.size {
            return Err(TraceError::OffsetOutOfRange {
                offset,
                size: chunk.size,
            });
        }
        if offset == chunk.size {
            return Ok(());
        }

        let mut data = self.chunk_data(&chunk)?;
        data.truncate(offset as usize);
        self.chunk_store_data(chunk, data)?;
        Ok(())
    }

    /// Moves a cached chunk into the database and records its CRC32.
    ///
    /// Only full chunks and the final chunk of a finished trace may be persisted.
    pub fn chunk_persist(
        &mut self,
        job_id: i64,
        chunk_index: u64,
    ) -> Result<TraceChunkRow, TraceError> {
        let chunk = self.chunk_get(job_id, chunk_index)?.ok_or_else(|| {
            TraceError::FailedToPersistData(format!("chunk {job_id}/{chunk_index} not found"))
        })?;
        if chunk.is_persisted() {
            return Ok(chunk);
        }

        let data = self.cache.get(job_id, chunk_index).unwrap_or_default();
        if data.is_empty() {
            return Err(TraceError::FailedToPersistData(format!(
                "chunk {job_id}/{chunk_index} has no data"
            )));
        }
        let size = data.len() as u64;
        if size < self.config.chunk_size && !self.chunk_is_final(&chunk)? {
            return Err(TraceError::FailedToPersistData(format!(
                "chunk {job_id}/{chunk_index} is neither full nor final"
            )));
        }

        let checksum = crc32(&data);
        let updated = self.conn.execute(
            "UPDATE trace_chunks \
             SET data_store = 'database', raw_data = ?3, checksum = ?4, size = ?5, lock_version = lock_version + 1 \
             WHERE job_id = ?1 AND chunk_index = ?2 AND lock_version = ?6 AND data_store = 'cache'",
            params![
                job_id,
                to_sqlite_i64(chunk_index)?,
                data,
                i64::from(checksum),
                to_sqlite_i64(size)?,
                chunk.lock_version
            ],
        )?;
        if updated == 0 {
            self.metrics.increment_trace_operation(TraceOperation::Locked);
            tracing::warn!(job_id, chunk_index, "trace chunk changed while persisting");
            return Err(TraceError::FailedToPersistData(format!(
                "modified trace chunk detected ({job_id}/{chunk_index})"
            )));
        }
        self.cache.delete(job_id, chunk_index);
        tracing::debug!(job_id, chunk_index, size, checksum, "trace chunk persisted");

        Ok(TraceChunkRow {
            data_store: DataStore::Database,
            checksum: Some(checksum),
            size,
            lock_version: chunk.lock_version + 1,
            ..chunk
        })
    }

    /// Persists every cached chunk that is allowed to move; returns how many moved.
    pub fn chunks_flush(&mut self, job_id: i64) -> Result<usize, TraceError> {
        let mut persisted = 0;
        for chunk in self.chunks_list(job_id)? {
            if chunk.is_persisted() || chunk.size == 0 {
                continue;
            }
            if chunk.size == self.config.chunk_size || self.chunk_is_final(&chunk)? {
                self.chunk_persist(job_id, chunk.chunk_index)?;
                persisted += 1;
            }
        }
        Ok(persisted)
    }

    pub fn chunks_delete_after(&mut self, job_id: i64, chunk_index: u64) -> Result<usize, TraceError> {
        let deleted = self.conn.execute(
            "DELETE FROM trace_chunks WHERE job_id = ?1 AND chunk_index > ?2",
            params![job_id, to_sqlite_i64(chunk_index)?],
        )?;
        self.cache.delete_after(job_id, chunk_index);
        Ok(deleted)
    }

    pub fn chunks_delete(&mut self, job_id: i64) -> Result<usize, TraceError> {
        let deleted = self
            .conn
            .execute("DELETE FROM trace_chunks WHERE job_id = ?1", params![job_id])?;
        self.cache.delete_job(job_id);
        Ok(deleted)
    }

    fn chunk_create(&mut self, job_id: i64, chunk_index: u64) -> Result<TraceChunkRow, TraceError> {
        self.job_require(job_id)?;
        let data_store = self.config.default_data_store;
        let inserted = self.conn.execute(
            "INSERT INTO trace_chunks(job_id, chunk_index, data_store, raw_data, checksum, size, lock_version, created_at_ms) \
             VALUES (?1, ?2, ?3, NULL, NULL, 0, 0, ?4)",
            params![job_id, to_sqlite_i64(chunk_index)?, data_store.as_str(), now_ms()],
        );
        if let Err(err) = inserted {
            if is_constraint_violation(&err) {
                return Err(TraceError::FailedToPersistData(format!(
                    "chunk {job_id}/{chunk_index} was created concurrently"
                )));
            }
            return Err(err.into());
        }
        self.metrics.increment_trace_operation(TraceOperation::Chunked);

        Ok(TraceChunkRow {
            job_id,
            chunk_index,
            data_store,
            checksum: None,
            size: 0,
            lock_version: 0,
        })
    }

    fn chunk_store_data(
        &mut self,
        chunk: TraceChunkRow,
        data: Vec<u8>,
    ) -> Result<TraceChunkRow, TraceError> {
        let size = data.len() as u64;
        match chunk.data_store {
            DataStore::Cache => {
                self.cache.set(chunk.job_id, chunk.chunk_index, data);
                self.conn.execute(
                    "UPDATE trace_chunks SET size = ?3 WHERE job_id = ?1 AND chunk_index = ?2",
                    params![
                        chunk.job_id,
                        to_sqlite_i64(chunk.chunk_index)?,
                        to_sqlite_i64(size)?
                    ],
                )?;
                Ok(TraceChunkRow { size, ..chunk })
            }
            DataStore::Database => {
                let checksum = crc32(&data);
                self.conn.execute(
                    "UPDATE trace_chunks \
                     SET raw_data = ?3, checksum = ?4, size = ?5, lock_version = lock_version + 1 \
                     WHERE job_id = ?1 AND chunk_index = ?2",
                    params![
                        chunk.job_id,
                        to_sqlite_i64(chunk.chunk_index)?,
                        data,
                        i64::from(checksum),
                        to_sqlite_i64(size)?
                    ],
                )?;
                Ok(TraceChunkRow {
                    checksum: Some(checksum),
                    size,
                    lock_version: chunk.lock_version + 1,
                    ..chunk
                })
            }
        }
    }
}
