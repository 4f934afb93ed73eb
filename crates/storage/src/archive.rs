#![forbid(unsafe_code)]

use crate::TraceError;
use crate::config::TraceConfig;
use crate::io::{SeekFrom, TraceReader};
use crate::metrics::{ErrorReason, TraceMetrics};
use crate::remote_checksum::RemoteChecksum;
use crate::store::{StoredFile, TraceArchiveRequest, TraceArtifactRow, TraceStore};
use crate::stream::Stream;
use crate::uploader::ArtifactUploader;
use md5::Md5;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

const DIGEST_BLOCK: usize = 64 * 1024;

/// Moves a finished trace into artifact storage.
///
/// The stream is cloned into a scratch file first, so the upload and both
/// digests see exactly the same bytes.
pub struct Archive<'a> {
    job_id: i64,
    config: &'a TraceConfig,
    uploader: &'a dyn ArtifactUploader,
    metrics: Arc<dyn TraceMetrics>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct FileDigests {
    sha256: String,
    md5: Option<String>,
}

impl<'a> Archive<'a> {
    pub fn new(
        job_id: i64,
        config: &'a TraceConfig,
        uploader: &'a dyn ArtifactUploader,
        metrics: Arc<dyn TraceMetrics>,
    ) -> Self {
        Self {
            job_id,
            config,
            uploader,
            metrics,
        }
    }

    pub fn execute(
        &self,
        store: &mut TraceStore,
        stream: &mut Stream,
    ) -> Result<TraceArtifactRow, TraceError> {
        let clone = self.clone_stream(stream)?;
        let digests = digest_file(clone.path(), !self.config.fips_mode)?;
        let size = clone.as_file().metadata()?.len();

        let request = TraceArchiveRequest {
            job_id: self.job_id,
            size,
            file_sha256: digests.sha256.clone(),
            md5: digests.md5.clone(),
        };
        let mut uploaded: Option<StoredFile> = None;
        let committed = store.trace_archive_commit(request, |artifact_id| {
            let file = self.uploader.upload(self.job_id, artifact_id, clone.path())?;
            uploaded = Some(file.clone());
            Ok(file)
        });
        let artifact = match committed {
            Ok(artifact) => artifact,
            Err(err) => {
                if let Some(file) = uploaded {
                    if let Err(remove_err) = self.uploader.remove(&file) {
                        tracing::warn!(job_id = self.job_id, error = %remove_err, "orphaned trace upload left behind");
                    }
                }
                return Err(err);
            }
        };

        if !self.config.fips_mode {
            self.validate_remote_checksum(store, &artifact, digests.md5.as_deref());
        }
        Ok(artifact)
    }

    fn clone_stream(&self, stream: &mut Stream) -> Result<tempfile::NamedTempFile, TraceError> {
        let io = stream.io_mut().ok_or(TraceError::NoTrace)?;
        let expected = io.size();

        std::fs::create_dir_all(&self.config.scratch_dir)?;
        let mut clone = tempfile::Builder::new()
            .prefix(&format!("tmp-trace-{}-", self.job_id))
            .suffix(".log")
            .tempfile_in(&self.config.scratch_dir)?;

        io.seek(SeekFrom::Start(0))?;
        let copied = std::io::copy(&mut TraceReader::new(io), clone.as_file_mut())?;
        clone.as_file_mut().flush()?;
        if copied != expected {
            return Err(TraceError::Archive(format!(
                "trace size mismatch: copied {copied} of {expected} bytes"
            )));
        }
        Ok(clone)
    }

    /// Records what the object store reports and counts a mismatch. Never fails the archive.
    fn validate_remote_checksum(
        &self,
        store: &mut TraceStore,
        artifact: &TraceArtifactRow,
        md5: Option<&str>,
    ) {
        let remote = match RemoteChecksum::new(artifact, self.uploader).md5_checksum() {
            Ok(Some(remote)) => remote,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(job_id = self.job_id, error = %err, "remote checksum unavailable");
                return;
            }
        };
        if let Err(err) = store.trace_metadata_set_remote_checksum(self.job_id, Some(&remote)) {
            tracing::warn!(job_id = self.job_id, error = %err, "remote checksum not recorded");
        }
        if md5 != Some(remote.as_str()) {
            tracing::warn!(
                job_id = self.job_id,
                local = md5.unwrap_or("-"),
                remote = %remote,
                "archived trace checksum mismatch"
            );
            self.metrics
                .increment_error_counter(ErrorReason::ArchiveInvalidChecksum);
        }
    }
}

fn digest_file(path: &Path, with_md5: bool) -> Result<FileDigests, TraceError> {
    let mut file = std::fs::File::open(path)?;
    let mut sha256 = Sha256::new();
    let mut md5 = with_md5.then(<Md5 as Digest>::new);
    let mut buf = vec![0u8; DIGEST_BLOCK];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        sha256.update(&buf[..read]);
        if let Some(md5) = md5.as_mut() {
            md5.update(&buf[..read]);
        }
    }
    Ok(FileDigests {
        sha256: hex::encode(sha256.finalize()),
        md5: md5.map(|md5| hex::encode(md5.finalize())),
    })
}
