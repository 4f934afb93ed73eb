#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TraceOperation {
    Appended,
    Streamed,
    Chunked,
    Mutated,
    Overwrite,
    Accepted,
    Finalized,
    Discarded,
    Conflict,
    Locked,
    Invalid,
}

impl TraceOperation {
    pub const ALL: [TraceOperation; 11] = [
        TraceOperation::Appended,
        TraceOperation::Streamed,
        TraceOperation::Chunked,
        TraceOperation::Mutated,
        TraceOperation::Overwrite,
        TraceOperation::Accepted,
        TraceOperation::Finalized,
        TraceOperation::Discarded,
        TraceOperation::Conflict,
        TraceOperation::Locked,
        TraceOperation::Invalid,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TraceOperation::Appended => "appended",
            TraceOperation::Streamed => "streamed",
            TraceOperation::Chunked => "chunked",
            TraceOperation::Mutated => "mutated",
            TraceOperation::Overwrite => "overwrite",
            TraceOperation::Accepted => "accepted",
            TraceOperation::Finalized => "finalized",
            TraceOperation::Discarded => "discarded",
            TraceOperation::Conflict => "conflict",
            TraceOperation::Locked => "locked",
            TraceOperation::Invalid => "invalid",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorReason {
    ArchiveInvalidChecksum,
    ArchiveFailed,
    ChunksInvalidChecksum,
    ChunksInvalidSize,
}

impl ErrorReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorReason::ArchiveInvalidChecksum => "archive_invalid_checksum",
            ErrorReason::ArchiveFailed => "archive_failed",
            ErrorReason::ChunksInvalidChecksum => "chunks_invalid_checksum",
            ErrorReason::ChunksInvalidSize => "chunks_invalid_size",
        }
    }
}

/// Sink for trace counters. Owned by the application and handed to every
/// component that reports, never looked up globally.
pub trait TraceMetrics: Send + Sync {
    fn increment_trace_operation(&self, operation: TraceOperation);
    fn increment_trace_bytes(&self, size: u64);
    fn increment_error_counter(&self, reason: ErrorReason);
}

/// In-process counters, readable back for reporting and tests.
#[derive(Debug, Default)]
pub struct CounterMetrics {
    operations: Mutex<BTreeMap<TraceOperation, u64>>,
    errors: Mutex<BTreeMap<ErrorReason, u64>>,
    bytes: AtomicU64,
}

impl CounterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operation_count(&self, operation: TraceOperation) -> u64 {
        self.operations
            .lock()
            .map(|counts| counts.get(&operation).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn error_count(&self, reason: ErrorReason) -> u64 {
        self.errors
            .lock()
            .map(|counts| counts.get(&reason).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn trace_bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl TraceMetrics for CounterMetrics {
    fn increment_trace_operation(&self, operation: TraceOperation) {
        tracing::trace!(operation = operation.as_str(), "trace operation");
        if let Ok(mut counts) = self.operations.lock() {
            *counts.entry(operation).or_insert(0) += 1;
        }
    }

    fn increment_trace_bytes(&self, size: u64) {
        self.bytes.fetch_add(size, Ordering::Relaxed);
    }

    fn increment_error_counter(&self, reason: ErrorReason) {
        tracing::debug!(reason = reason.as_str(), "trace error counted");
        if let Ok(mut counts) = self.errors.lock() {
            *counts.entry(reason).or_insert(0) += 1;
        }
    }
}
