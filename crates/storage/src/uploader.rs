#![forbid(unsafe_code)]

use crate::TraceError;
use crate::io::{FileTraceIo, TraceIo};
use crate::remote_checksum::{ObjectAttributes, ObjectStoreConfig};
use crate::store::{FileStore, StoredFile, TraceArtifactRow};
use std::path::{Path, PathBuf};

/// Durable home of archived trace files.
pub trait ArtifactUploader {
    fn object_store(&self) -> &ObjectStoreConfig;

    /// Stores the file at `source` for the given artifact.
    fn upload(&self, job_id: i64, artifact_id: i64, source: &Path)
    -> Result<StoredFile, TraceError>;

    fn open(&self, artifact: &TraceArtifactRow) -> Result<Box<dyn TraceIo>, TraceError>;

    fn remove(&self, file: &StoredFile) -> Result<(), TraceError>;

    /// Current object attributes, read from the store rather than any local copy.
    fn fetch_attributes(&self, file: &StoredFile) -> Result<ObjectAttributes, TraceError>;
}

/// Keeps artifacts as plain files under a root directory.
#[derive(Clone, Debug)]
pub struct LocalArtifactStore {
    root: PathBuf,
    object_store: ObjectStoreConfig,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            object_store: ObjectStoreConfig::disabled(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, file: &StoredFile) -> Result<PathBuf, TraceError> {
        if file.store != FileStore::Local {
            return Err(TraceError::NotSupported("remote artifact in a local store"));
        }
        if file.key.is_empty() || file.key.split('/').any(|part| part.is_empty() || part == "..") {
            return Err(TraceError::InvalidInput("artifact key is not a relative path"));
        }
        Ok(self.root.join(&file.key))
    }
}

impl ArtifactUploader for LocalArtifactStore {
    fn object_store(&self) -> &ObjectStoreConfig {
        &self.object_store
    }

    fn upload(
        &self,
        job_id: i64,
        artifact_id: i64,
        source: &Path,
    ) -> Result<StoredFile, TraceError> {
        let file = StoredFile {
            store: FileStore::Local,
            key: format!("{job_id}/{artifact_id}/job.log"),
        };
        let destination = self.path_of(&file)?;
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(source, &destination)?;
        tracing::debug!(job_id, artifact_id, path = %destination.display(), "trace artifact stored");
        Ok(file)
    }

    fn open(&self, artifact: &TraceArtifactRow) -> Result<Box<dyn TraceIo>, TraceError> {
        Ok(Box::new(FileTraceIo::open(self.path_of(&artifact.file)?)?))
    }

    fn remove(&self, file: &StoredFile) -> Result<(), TraceError> {
        match std::fs::remove_file(self.path_of(file)?) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn fetch_attributes(&self, _file: &StoredFile) -> Result<ObjectAttributes, TraceError> {
        Ok(ObjectAttributes::default())
    }
}
