#![forbid(unsafe_code)]

use crate::TraceError;
use crate::ansi::AnsiRenderer;
use crate::archive::Archive;
use crate::checksum::TraceChecksum;
use crate::io::ChunkedIo;
use crate::metrics::{ErrorReason, TraceOperation};
use crate::store::{PendingStateRequest, TraceArtifactRow, TraceStore, now_ms};
use crate::stream::Stream;
use crate::uploader::ArtifactUploader;
use jobtrace_core::section::TraceSection;
use rand::Rng;
use serde::Serialize;

/// Result of one archival request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArchiveStatus {
    Archived(TraceArtifactRow),
    /// Attempts are used up; the trace stays live until its chunks expire.
    OutOfAttempts { attempts: u32 },
    /// The backoff since the previous attempt has not elapsed yet.
    NotYet { attempts: u32 },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub job_id: i64,
    pub valid: bool,
    pub corrupted: bool,
    pub chunks: usize,
    pub chunks_crc32: u32,
    pub chunks_bytesize: u64,
    pub state_crc32: Option<u32>,
    pub state_bytesize: Option<u64>,
}

/// The trace of one job, whichever form it is in right now.
pub struct Trace<'a> {
    store: &'a mut TraceStore,
    uploader: &'a dyn ArtifactUploader,
    job_id: i64,
}

impl<'a> Trace<'a> {
    pub fn new(store: &'a mut TraceStore, uploader: &'a dyn ArtifactUploader, job_id: i64) -> Self {
        Self {
            store,
            uploader,
            job_id,
        }
    }

    pub fn job_id(&self) -> i64 {
        self.job_id
    }

    pub fn live(&self) -> Result<bool, TraceError> {
        self.store.chunks_exist(self.job_id)
    }

    pub fn archived(&self) -> Result<bool, TraceError> {
        Ok(self.store.trace_artifact_get(self.job_id)?.is_some())
    }

    pub fn exist(&self) -> Result<bool, TraceError> {
        Ok(self.archived()? || self.live()?)
    }

    /// The archived artifact if there is one, the live chunks otherwise.
    pub fn read_stream(&self) -> Result<Stream, TraceError> {
        let metrics = self.store.metrics();
        if let Some(artifact) = self.store.trace_artifact_get(self.job_id)? {
            return Ok(Stream::new(self.uploader.open(&artifact)?, metrics));
        }
        if self.store.chunks_exist(self.job_id)? {
            let io = ChunkedIo::open_live(self.store.try_clone()?, self.job_id)?;
            return Ok(Stream::new(Box::new(io), metrics));
        }
        Ok(Stream::empty(metrics))
    }

    fn write_stream(&mut self) -> Result<Stream, TraceError> {
        self.store.job_require(self.job_id)?;
        if self.archived()? {
            return Err(TraceError::AlreadyArchived);
        }
        let io = ChunkedIo::open_live(self.store.try_clone()?, self.job_id)?;
        Ok(Stream::new(Box::new(io), self.store.metrics()))
    }

    pub fn raw(&self, last_lines: Option<usize>) -> Result<Option<String>, TraceError> {
        self.read_stream()?.raw(last_lines)
    }

    /// The end of the trace, at most `last_bytes` long and starting on a full line.
    pub fn tail(&self, last_bytes: u64) -> Result<Option<String>, TraceError> {
        let mut stream = self.read_stream()?;
        if !stream.valid() {
            return Ok(None);
        }
        stream.limit(last_bytes)?;
        stream.raw(None)
    }

    pub fn html(
        &self,
        renderer: &dyn AnsiRenderer,
        last_lines: Option<usize>,
    ) -> Result<String, TraceError> {
        self.read_stream()?.html(renderer, last_lines)
    }

    pub fn extract_coverage(&self, regex: &str) -> Result<Option<String>, TraceError> {
        Ok(self.read_stream()?.extract_coverage(regex))
    }

    pub fn extract_sections(&self) -> Result<Vec<TraceSection>, TraceError> {
        self.read_stream()?.extract_sections()
    }

    /// Appends `data` when `offset` matches the current size. Returns the trace size afterwards.
    ///
    /// A mismatching offset is a conflict: nothing is written and the current size is returned.
    pub fn append(&mut self, data: &[u8], offset: u64) -> Result<u64, TraceError> {
        let metrics = self.store.metrics();
        metrics.increment_trace_operation(TraceOperation::Accepted);

        let mut stream = self.write_stream()?;
        let current = stream.size();
        if current != offset {
            metrics.increment_trace_operation(TraceOperation::Conflict);
            tracing::debug!(job_id = self.job_id, current, offset, "trace append conflict");
            return Ok(current);
        }
        stream.append(data, offset)?;
        Ok(stream.size())
    }

    /// Replaces the whole live trace.
    pub fn set(&mut self, data: &[u8]) -> Result<u64, TraceError> {
        let mut stream = self.write_stream()?;
        stream.set(data)?;
        self.store
            .metrics()
            .increment_trace_operation(TraceOperation::Overwrite);
        Ok(stream.size())
    }

    pub fn checksum(&self) -> Result<TraceChecksum, TraceError> {
        TraceChecksum::load(self.store, self.job_id)
    }

    /// Records the checksum and size reported by the runner, persists the
    /// final chunk and verifies the result.
    pub fn finalize(
        &mut self,
        crc32: Option<u32>,
        trace_bytesize: Option<u64>,
    ) -> Result<VerifyReport, TraceError> {
        self.store.pending_state_set(PendingStateRequest {
            job_id: self.job_id,
            crc32,
            trace_bytesize,
        })?;
        self.store.chunks_flush(self.job_id)?;
        self.verify()
    }

    /// Compares the persisted chunks with the reported checksum and counts the outcome.
    pub fn verify(&self) -> Result<VerifyReport, TraceError> {
        let checksum = self.checksum()?;
        let metrics = self.store.metrics();
        let valid = checksum.valid();
        let corrupted = checksum.corrupted();

        if valid {
            metrics.increment_trace_operation(TraceOperation::Finalized);
        } else {
            metrics.increment_trace_operation(TraceOperation::Invalid);
            metrics.increment_error_counter(ErrorReason::ChunksInvalidChecksum);
            if corrupted {
                metrics.increment_error_counter(ErrorReason::ChunksInvalidSize);
            }
            tracing::warn!(
                job_id = self.job_id,
                corrupted,
                chunks_crc32 = checksum.chunks_crc32(),
                state_crc32 = ?checksum.state_crc32(),
                "trace checksum mismatch"
            );
        }

        Ok(VerifyReport {
            job_id: self.job_id,
            valid,
            corrupted,
            chunks: checksum.chunks_count(),
            chunks_crc32: checksum.chunks_crc32(),
            chunks_bytesize: checksum.chunks_bytesize(),
            state_crc32: checksum.state_crc32(),
            state_bytesize: checksum.state_bytesize(),
        })
    }

    /// Archives a finished job's live trace, honoring attempt limits and backoff.
    pub fn archive<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<ArchiveStatus, TraceError> {
        let job = self.store.job_require(self.job_id)?;
        if !job.is_complete() {
            return Err(TraceError::JobNotFinished);
        }
        if self.archived()? {
            return Err(TraceError::AlreadyArchived);
        }

        let config = self.store.config().clone();
        let metadata = self.store.trace_metadata_get(self.job_id)?;
        let attempts = metadata.archival_attempts;
        if !metadata.archival_attempts_available(config.max_archival_attempts) {
            tracing::warn!(
                job_id = self.job_id,
                attempts,
                "{}",
                metadata.archival_attempts_message(config.max_archival_attempts)
            );
            return Ok(ArchiveStatus::OutOfAttempts { attempts });
        }
        if !metadata.can_attempt_archival_now(now_ms(), &config, rng) {
            return Ok(ArchiveStatus::NotYet { attempts });
        }

        match self.archive_live(&config) {
            Ok(artifact) => Ok(ArchiveStatus::Archived(artifact)),
            Err(err) => {
                let metrics = self.store.metrics();
                metrics.increment_error_counter(ErrorReason::ArchiveFailed);
                self.store
                    .trace_metadata_record_failed_attempt(self.job_id, now_ms())?;
                tracing::warn!(job_id = self.job_id, error = %err, "trace archival failed");
                Err(err)
            }
        }
    }

    fn archive_live(
        &mut self,
        config: &crate::config::TraceConfig,
    ) -> Result<TraceArtifactRow, TraceError> {
        if !self.live()? {
            return Err(TraceError::NoTrace);
        }
        let io = ChunkedIo::open_live(self.store.try_clone()?, self.job_id)?;
        let mut stream = Stream::new(Box::new(io), self.store.metrics());

        let archive = Archive::new(self.job_id, config, self.uploader, self.store.metrics());
        let artifact = archive.execute(self.store, &mut stream)?;
        stream.close()?;

        self.store.chunks_delete(self.job_id)?;
        self.store.pending_state_remove(self.job_id)?;
        tracing::info!(job_id = self.job_id, artifact_id = artifact.id, "trace archived");
        Ok(artifact)
    }

    /// Removes every form of the trace: live chunks, pending state and artifact.
    pub fn erase(&mut self) -> Result<(), TraceError> {
        if let Some(artifact) = self.store.trace_artifact_get(self.job_id)? {
            self.uploader.remove(&artifact.file)?;
            self.store.trace_artifact_delete(self.job_id)?;
        }
        self.store.chunks_delete(self.job_id)?;
        self.store.pending_state_remove(self.job_id)?;
        Ok(())
    }
}
