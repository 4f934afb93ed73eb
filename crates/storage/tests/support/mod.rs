#![allow(dead_code)]

use jobtrace_core::model::JobStatus;
use jobtrace_storage::{
    CounterMetrics, DataStore, JobCreateRequest, LocalArtifactStore, TraceConfig, TraceStore,
};
use std::sync::Arc;
use tempfile::TempDir;

pub struct Fixture {
    pub dir: TempDir,
    pub store: TraceStore,
    pub metrics: Arc<CounterMetrics>,
    pub uploader: LocalArtifactStore,
}

pub fn config(chunk_size: u64, data_store: DataStore) -> TraceConfig {
    TraceConfig {
        chunk_size,
        default_data_store: data_store,
        ..TraceConfig::default()
    }
}

pub fn setup(mut config: TraceConfig) -> Fixture {
    let dir = tempfile::tempdir().expect("temp dir");
    config.scratch_dir = dir.path().join("scratch");
    let metrics = Arc::new(CounterMetrics::new());
    let store =
        TraceStore::open(dir.path().join("db"), config, metrics.clone()).expect("open store");
    let uploader = LocalArtifactStore::new(dir.path().join("artifacts"));
    Fixture {
        dir,
        store,
        metrics,
        uploader,
    }
}

pub fn create_job(store: &mut TraceStore, status: JobStatus) -> i64 {
    store
        .job_create(JobCreateRequest {
            project: "group/project".to_string(),
            status,
        })
        .expect("create job")
        .id
}

/// Deterministic, non-repeating payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
