#![forbid(unsafe_code)]

mod support;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use jobtrace_core::model::JobStatus;
use jobtrace_storage::io::{FileTraceIo, SeekFrom, TraceIo, resolve_seek};
use jobtrace_storage::{
    Archive, ArchiveStatus, ArtifactUploader, DataStore, ErrorReason, FileStore,
    ObjectAttributes, ObjectStoreConfig, ObjectStoreProvider, Stream, StoredFile, Trace,
    TraceArtifactRow, TraceError, TraceMetrics,
};
use md5::Md5;
use rand::SeedableRng;
use rand::rngs::StdRng;
use sha2::{Digest, Sha256};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use support::{Fixture, config, create_job, payload, setup};

fn finished_trace(fx: &mut Fixture, data: &[u8]) -> i64 {
    let job = create_job(&mut fx.store, JobStatus::Running);
    Trace::new(&mut fx.store, &fx.uploader, job)
        .append(data, 0)
        .expect("append");
    fx.store
        .job_set_status(job, JobStatus::Success)
        .expect("finish job");
    job
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_millis() as i64
}

fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

fn rng() -> StdRng {
    StdRng::seed_from_u64(7)
}

/// Object store fake: files live under a directory, attributes are canned.
struct RemoteStore {
    root: PathBuf,
    object_store: ObjectStoreConfig,
    attributes: ObjectAttributes,
    fail_upload: bool,
    removed: RefCell<Vec<StoredFile>>,
}

impl RemoteStore {
    fn new(root: &Path, provider: ObjectStoreProvider, attributes: ObjectAttributes) -> Self {
        Self {
            root: root.to_path_buf(),
            object_store: ObjectStoreConfig {
                enabled: true,
                provider,
            },
            attributes,
            fail_upload: false,
            removed: RefCell::new(Vec::new()),
        }
    }
}

impl ArtifactUploader for RemoteStore {
    fn object_store(&self) -> &ObjectStoreConfig {
        &self.object_store
    }

    fn upload(
        &self,
        job_id: i64,
        artifact_id: i64,
        source: &Path,
    ) -> Result<StoredFile, TraceError> {
        if self.fail_upload {
            return Err(TraceError::Archive("bucket unavailable".to_string()));
        }
        let key = format!("{job_id}-{artifact_id}.log");
        std::fs::create_dir_all(&self.root)?;
        std::fs::copy(source, self.root.join(&key))?;
        Ok(StoredFile {
            store: FileStore::Remote,
            key,
        })
    }

    fn open(&self, artifact: &TraceArtifactRow) -> Result<Box<dyn TraceIo>, TraceError> {
        Ok(Box::new(FileTraceIo::open(self.root.join(&artifact.file.key))?))
    }

    fn remove(&self, file: &StoredFile) -> Result<(), TraceError> {
        self.removed.borrow_mut().push(file.clone());
        Ok(())
    }

    fn fetch_attributes(&self, _file: &StoredFile) -> Result<ObjectAttributes, TraceError> {
        Ok(self.attributes.clone())
    }
}

/// Claims more bytes than it can deliver.
struct ShortIo {
    data: Vec<u8>,
    claimed: u64,
    tell: u64,
}

impl TraceIo for ShortIo {
    fn size(&self) -> u64 {
        self.claimed
    }

    fn tell(&self) -> u64 {
        self.tell
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, TraceError> {
        self.tell = resolve_seek(pos, self.tell, self.claimed)?;
        Ok(self.tell)
    }

    fn read(&mut self, length: Option<u64>) -> Result<Vec<u8>, TraceError> {
        let start = (self.tell as usize).min(self.data.len());
        let end = match length {
            Some(length) => (start + length as usize).min(self.data.len()),
            None => self.data.len(),
        };
        self.tell += (end - start) as u64;
        Ok(self.data[start..end].to_vec())
    }

    fn readline(&mut self) -> Result<Vec<u8>, TraceError> {
        self.read(None)
    }

    fn write(&mut self, _data: &[u8]) -> Result<usize, TraceError> {
        Err(TraceError::NotSupported("write"))
    }

    fn truncate(&mut self, _offset: u64) -> Result<(), TraceError> {
        Err(TraceError::NotSupported("truncate"))
    }

    fn flush(&mut self) -> Result<(), TraceError> {
        Err(TraceError::NotSupported("flush"))
    }
}

#[test]
fn archive_moves_the_live_trace_into_an_artifact() {
    let mut fx = setup(config(1024, DataStore::Cache));
    let data = payload(2500);
    let job = finished_trace(&mut fx, &data);

    let status = Trace::new(&mut fx.store, &fx.uploader, job)
        .archive(&mut rng())
        .expect("archive");
    let ArchiveStatus::Archived(artifact) = status else {
        panic!("expected an artifact, got {status:?}");
    };

    assert_eq!(artifact.job_id, job);
    assert_eq!(artifact.size, 2500);
    assert_eq!(artifact.file.store, FileStore::Local);
    assert_eq!(artifact.file.key, format!("{job}/{}/job.log", artifact.id));
    assert_eq!(artifact.file_sha256, hex::encode(Sha256::digest(&data)));
    let stored = std::fs::read(fx.uploader.root().join(&artifact.file.key)).expect("artifact");
    assert_eq!(stored, data);

    let metadata = fx.store.trace_metadata_get(job).expect("metadata");
    assert_eq!(metadata.trace_artifact_id, Some(artifact.id));
    assert_eq!(metadata.archival_attempts, 1);
    assert_eq!(metadata.checksum.as_deref(), Some(md5_hex(&data).as_str()));
    assert_eq!(metadata.remote_checksum, None);

    assert!(!fx.store.chunks_exist(job).expect("chunks"));
    assert_eq!(fx.store.pending_state_get(job).expect("pending"), None);

    let trace = Trace::new(&mut fx.store, &fx.uploader, job);
    assert!(trace.archived().expect("archived"));
    assert!(!trace.live().expect("live"));
    let mut stream = trace.read_stream().expect("stream");
    assert!(stream.path().is_some());
    assert_eq!(stream.size(), 2500);
    let archived = stream.io_mut().expect("io").read(None).expect("read");
    assert_eq!(archived, data);

    let scratch: Vec<_> = std::fs::read_dir(&fx.store.config().scratch_dir)
        .expect("scratch dir")
        .collect();
    assert!(scratch.is_empty(), "scratch clone was not cleaned up");
}

#[test]
fn running_jobs_and_archived_traces_are_rejected() {
    let mut fx = setup(config(64, DataStore::Database));
    let job = create_job(&mut fx.store, JobStatus::Running);
    let mut trace = Trace::new(&mut fx.store, &fx.uploader, job);
    trace.append(b"still running\n", 0).expect("append");
    assert!(matches!(
        trace.archive(&mut rng()),
        Err(TraceError::JobNotFinished)
    ));

    let job = finished_trace(&mut fx, b"done\n");
    let mut trace = Trace::new(&mut fx.store, &fx.uploader, job);
    assert!(matches!(trace.archive(&mut rng()), Ok(ArchiveStatus::Archived(_))));
    assert!(matches!(
        trace.archive(&mut rng()),
        Err(TraceError::AlreadyArchived)
    ));
    assert!(matches!(
        trace.append(b"more\n", 5),
        Err(TraceError::AlreadyArchived)
    ));
}

#[test]
fn finished_job_without_chunks_has_nothing_to_archive() {
    let mut fx = setup(config(64, DataStore::Database));
    let job = create_job(&mut fx.store, JobStatus::Failed);
    let result = Trace::new(&mut fx.store, &fx.uploader, job).archive(&mut rng());
    assert!(matches!(result, Err(TraceError::NoTrace)));
    assert_eq!(fx.metrics.error_count(ErrorReason::ArchiveFailed), 1);
    assert_eq!(
        fx.store.trace_metadata_get(job).expect("metadata").archival_attempts,
        1
    );
}

#[test]
fn failed_upload_leaves_no_artifact_behind() {
    let mut fx = setup(config(64, DataStore::Database));
    let job = finished_trace(&mut fx, b"line\n");
    let mut remote = RemoteStore::new(
        &fx.dir.path().join("bucket"),
        ObjectStoreProvider::Aws,
        ObjectAttributes::default(),
    );
    remote.fail_upload = true;

    let config = fx.store.config().clone();
    let archive = Archive::new(job, &config, &remote, fx.store.metrics());
    let mut stream = Trace::new(&mut fx.store, &remote, job)
        .read_stream()
        .expect("stream");
    let err = archive
        .execute(&mut fx.store, &mut stream)
        .expect_err("upload fails");
    assert!(matches!(err, TraceError::Archive(_)));

    assert_eq!(fx.store.trace_artifact_get(job).expect("artifact"), None);
    let metadata = fx.store.trace_metadata_get(job).expect("metadata");
    assert_eq!(metadata.archival_attempts, 0);
    assert_eq!(metadata.trace_artifact_id, None);
    assert!(fx.store.chunks_exist(job).expect("chunks"));
}

#[test]
fn upload_is_removed_when_the_commit_fails() {
    let mut fx = setup(config(64, DataStore::Database));
    let job = finished_trace(&mut fx, b"line\n");
    let remote = RemoteStore::new(
        &fx.dir.path().join("bucket"),
        ObjectStoreProvider::Aws,
        ObjectAttributes::default(),
    );

    let db_path = fx.store.storage_dir().join("jobtrace.db");
    let admin = rusqlite::Connection::open(&db_path).expect("second connection");
    admin
        .execute_batch(
            "CREATE TRIGGER reject_metadata BEFORE INSERT ON trace_metadata \
             BEGIN SELECT RAISE(ABORT, 'metadata is read-only'); END;",
        )
        .expect("create trigger");

    let config = fx.store.config().clone();
    let archive = Archive::new(job, &config, &remote, fx.store.metrics());
    let mut stream = Trace::new(&mut fx.store, &remote, job)
        .read_stream()
        .expect("stream");
    let err = archive
        .execute(&mut fx.store, &mut stream)
        .expect_err("commit fails after the upload");
    assert!(matches!(err, TraceError::Sql(_)));

    let removed = remote.removed.borrow();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].store, FileStore::Remote);
    assert!(removed[0].key.starts_with(&format!("{job}-")));
    drop(removed);

    admin
        .execute_batch("DROP TRIGGER reject_metadata;")
        .expect("drop trigger");
    assert_eq!(fx.store.trace_artifact_get(job).expect("artifact"), None);
    let metadata = fx.store.trace_metadata_get(job).expect("metadata");
    assert_eq!(metadata.archival_attempts, 0);
    assert_eq!(metadata.checksum, None);
    assert!(fx.store.chunks_exist(job).expect("chunks"));
}

#[test]
fn failed_archive_counts_an_attempt_and_backs_off() {
    let mut fx = setup(config(64, DataStore::Database));
    let job = finished_trace(&mut fx, b"line\n");
    let mut remote = RemoteStore::new(
        &fx.dir.path().join("bucket"),
        ObjectStoreProvider::Aws,
        ObjectAttributes::default(),
    );
    remote.fail_upload = true;

    let mut trace = Trace::new(&mut fx.store, &remote, job);
    assert!(trace.archive(&mut rng()).is_err());
    assert_eq!(
        trace.archive(&mut rng()).expect("status"),
        ArchiveStatus::NotYet { attempts: 1 }
    );
    assert_eq!(fx.metrics.error_count(ErrorReason::ArchiveFailed), 1);

    let metadata = fx.store.trace_metadata_get(job).expect("metadata");
    assert_eq!(metadata.archival_attempts, 1);
    let last = metadata.last_archival_attempt_at_ms.expect("attempt time");
    assert!(last <= now_ms());
    assert!(fx.store.chunks_exist(job).expect("chunks"));
}

#[test]
fn attempts_past_the_limit_are_refused() {
    let mut fx = setup(config(64, DataStore::Database));
    let job = finished_trace(&mut fx, b"line\n");
    for _ in 0..6 {
        fx.store
            .trace_metadata_record_failed_attempt(job, 0)
            .expect("record attempt");
    }
    let status = Trace::new(&mut fx.store, &fx.uploader, job)
        .archive(&mut rng())
        .expect("status");
    assert_eq!(status, ArchiveStatus::OutOfAttempts { attempts: 6 });
    assert!(fx.store.chunks_exist(job).expect("chunks"));
}

#[test]
fn old_failed_attempt_allows_a_retry() {
    let mut fx = setup(config(64, DataStore::Database));
    let job = finished_trace(&mut fx, b"line\n");
    fx.store
        .trace_metadata_record_failed_attempt(job, 0)
        .expect("record attempt");
    let status = Trace::new(&mut fx.store, &fx.uploader, job)
        .archive(&mut rng())
        .expect("status");
    assert!(matches!(status, ArchiveStatus::Archived(_)));
    assert_eq!(
        fx.store.trace_metadata_get(job).expect("metadata").archival_attempts,
        2
    );
}

#[test]
fn fips_mode_skips_md5() {
    let mut cfg = config(64, DataStore::Database);
    cfg.fips_mode = true;
    let mut fx = setup(cfg);
    let job = finished_trace(&mut fx, b"fips\n");
    let status = Trace::new(&mut fx.store, &fx.uploader, job)
        .archive(&mut rng())
        .expect("archive");
    assert!(matches!(status, ArchiveStatus::Archived(_)));
    assert_eq!(fx.store.trace_metadata_get(job).expect("metadata").checksum, None);
}

#[test]
fn matching_aws_etag_is_recorded() {
    let mut fx = setup(config(64, DataStore::Database));
    let data = payload(300);
    let job = finished_trace(&mut fx, &data);
    let remote = RemoteStore::new(
        &fx.dir.path().join("bucket"),
        ObjectStoreProvider::Aws,
        ObjectAttributes {
            content_md5: None,
            etag: Some(format!("\"{}\"", md5_hex(&data))),
        },
    );

    let status = Trace::new(&mut fx.store, &remote, job)
        .archive(&mut rng())
        .expect("archive");
    let ArchiveStatus::Archived(artifact) = status else {
        panic!("expected an artifact, got {status:?}");
    };
    assert_eq!(artifact.file.store, FileStore::Remote);

    let metadata = fx.store.trace_metadata_get(job).expect("metadata");
    assert_eq!(metadata.remote_checksum.as_deref(), Some(md5_hex(&data).as_str()));
    assert!(metadata.remote_checksum_valid());
    assert_eq!(fx.metrics.error_count(ErrorReason::ArchiveInvalidChecksum), 0);
}

#[test]
fn mismatching_checksums_are_counted_but_kept() {
    let mut fx = setup(config(64, DataStore::Database));
    let data = payload(300);
    let job = finished_trace(&mut fx, &data);
    let wrong = Md5::digest(b"something else");
    let remote = RemoteStore::new(
        &fx.dir.path().join("bucket"),
        ObjectStoreProvider::Google,
        ObjectAttributes {
            content_md5: Some(STANDARD.encode(&wrong)),
            etag: None,
        },
    );

    let status = Trace::new(&mut fx.store, &remote, job)
        .archive(&mut rng())
        .expect("archive");
    assert!(matches!(status, ArchiveStatus::Archived(_)));

    let metadata = fx.store.trace_metadata_get(job).expect("metadata");
    assert_eq!(metadata.remote_checksum, Some(hex::encode(&wrong)));
    assert!(!metadata.remote_checksum_valid());
    assert_eq!(fx.metrics.error_count(ErrorReason::ArchiveInvalidChecksum), 1);
    assert!(remote.removed.borrow().is_empty());
}

#[test]
fn short_stream_fails_the_clone() {
    let mut fx = setup(config(64, DataStore::Database));
    let job = create_job(&mut fx.store, JobStatus::Success);
    let config = fx.store.config().clone();
    let metrics: std::sync::Arc<dyn TraceMetrics> = fx.metrics.clone();
    let archive = Archive::new(job, &config, &fx.uploader, metrics.clone());
    let mut stream = Stream::new(
        Box::new(ShortIo {
            data: b"12345".to_vec(),
            claimed: 10,
            tell: 0,
        }),
        metrics,
    );

    let err = archive
        .execute(&mut fx.store, &mut stream)
        .expect_err("size mismatch");
    assert!(matches!(err, TraceError::Archive(_)));
    assert_eq!(fx.store.trace_artifact_get(job).expect("artifact"), None);
}
