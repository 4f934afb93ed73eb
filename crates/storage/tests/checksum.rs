#![forbid(unsafe_code)]

mod support;

use jobtrace_core::checksum::{crc32, crc32_combine};
use jobtrace_core::model::JobStatus;
use jobtrace_storage::{
    DataStore, ErrorReason, PendingStateRequest, Trace, TraceChecksum, TraceOperation,
};
use support::{Fixture, config, create_job, payload, setup};

/// A running job with three persisted chunks of 1024, 1024 and 512 bytes.
fn three_chunk_trace() -> (Fixture, i64, Vec<u8>) {
    let mut fx = setup(config(1024, DataStore::Database));
    let job = create_job(&mut fx.store, JobStatus::Running);
    let data = payload(2560);
    let size = Trace::new(&mut fx.store, &fx.uploader, job)
        .append(&data, 0)
        .expect("append");
    assert_eq!(size, 2560);
    (fx, job, data)
}

fn report(fx: &mut Fixture, job: i64, crc32: Option<u32>, trace_bytesize: Option<u64>) {
    fx.store
        .pending_state_set(PendingStateRequest {
            job_id: job,
            crc32,
            trace_bytesize,
        })
        .expect("pending state");
}

#[test]
fn matching_runner_checksum_is_valid() {
    let (mut fx, job, data) = three_chunk_trace();
    let c0 = crc32(&data[..1024]);
    let c1 = crc32(&data[1024..2048]);
    let c2 = crc32(&data[2048..]);
    let expected = crc32_combine(crc32_combine(c0, c1, 1024), c2, 512);
    assert_eq!(expected, crc32(&data));

    report(&mut fx, job, Some(expected), Some(2560));
    let checksum = TraceChecksum::load(&fx.store, job).expect("checksum");
    assert_eq!(checksum.chunks_count(), 3);
    assert_eq!(checksum.chunks_crc32(), expected);
    assert_eq!(checksum.chunks_bytesize(), 2560);
    assert!(checksum.valid());
    assert!(!checksum.corrupted());
}

#[test]
fn mismatched_size_is_corruption() {
    let (mut fx, job, _) = three_chunk_trace();
    report(&mut fx, job, Some(0xdead_beef), Some(3000));

    let checksum = TraceChecksum::load(&fx.store, job).expect("checksum");
    assert!(!checksum.valid());
    assert!(checksum.corrupted());
}

#[test]
fn checksum_mismatch_with_matching_size_is_not_corruption() {
    let (mut fx, job, _) = three_chunk_trace();
    report(&mut fx, job, Some(0xdead_beef), Some(2560));

    let checksum = TraceChecksum::load(&fx.store, job).expect("checksum");
    assert!(!checksum.valid());
    assert!(!checksum.corrupted());
}

#[test]
fn missing_report_is_neither_valid_nor_corrupted() {
    let (mut fx, job, data) = three_chunk_trace();
    let checksum = TraceChecksum::load(&fx.store, job).expect("checksum");
    assert!(!checksum.valid());
    assert!(!checksum.corrupted());

    report(&mut fx, job, None, None);
    let checksum = TraceChecksum::load(&fx.store, job).expect("checksum");
    assert_eq!(checksum.chunks_crc32(), crc32(&data));
    assert!(!checksum.valid());
    assert!(!checksum.corrupted());
}

#[test]
fn cached_chunks_are_left_out_until_persisted() {
    let mut fx = setup(config(1024, DataStore::Cache));
    let job = create_job(&mut fx.store, JobStatus::Running);
    let data = payload(1500);
    Trace::new(&mut fx.store, &fx.uploader, job)
        .append(&data, 0)
        .expect("append");

    let checksum = TraceChecksum::load(&fx.store, job).expect("checksum");
    assert_eq!(checksum.chunks_count(), 1);
    assert_eq!(checksum.chunks_bytesize(), 1024);

    let report = Trace::new(&mut fx.store, &fx.uploader, job)
        .finalize(Some(crc32(&data)), Some(1500))
        .expect("finalize");
    assert!(report.valid);
    assert_eq!(report.chunks, 2);
    assert_eq!(report.chunks_bytesize, 1500);
}

#[test]
fn verify_counts_outcomes() {
    let (mut fx, job, data) = three_chunk_trace();

    report(&mut fx, job, Some(crc32(&data)), Some(2560));
    let verified = Trace::new(&mut fx.store, &fx.uploader, job)
        .verify()
        .expect("verify");
    assert!(verified.valid);
    assert_eq!(fx.metrics.operation_count(TraceOperation::Finalized), 1);

    report(&mut fx, job, Some(1), Some(10));
    let verified = Trace::new(&mut fx.store, &fx.uploader, job)
        .verify()
        .expect("verify");
    assert!(!verified.valid);
    assert!(verified.corrupted);
    assert_eq!(fx.metrics.operation_count(TraceOperation::Invalid), 1);
    assert_eq!(fx.metrics.error_count(ErrorReason::ChunksInvalidChecksum), 1);
    assert_eq!(fx.metrics.error_count(ErrorReason::ChunksInvalidSize), 1);
}
