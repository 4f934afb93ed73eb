#![forbid(unsafe_code)]

use crate::TraceError;
use crate::store::TraceArtifactRow;
use crate::uploader::ArtifactUploader;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::cell::OnceCell;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObjectStoreProvider {
    Aws,
    Google,
    Other(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectStoreConfig {
    pub enabled: bool,
    pub provider: ObjectStoreProvider,
}

impl ObjectStoreConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            provider: ObjectStoreProvider::Other("none".to_string()),
        }
    }
}

/// Object metadata as reported by the object store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectAttributes {
    /// Base64 of the raw MD5 digest (Google Cloud Storage).
    pub content_md5: Option<String>,
    /// Hex MD5 for single-part uploads (S3 and compatibles).
    pub etag: Option<String>,
}

/// MD5 of an uploaded trace artifact as the object store sees it, hex encoded.
pub struct RemoteChecksum<'a> {
    artifact: &'a TraceArtifactRow,
    uploader: &'a dyn ArtifactUploader,
    md5: OnceCell<Option<String>>,
}

impl<'a> RemoteChecksum<'a> {
    pub fn new(artifact: &'a TraceArtifactRow, uploader: &'a dyn ArtifactUploader) -> Self {
        Self {
            artifact,
            uploader,
            md5: OnceCell::new(),
        }
    }

    /// `None` when the artifact is not in object storage or the provider gives no checksum.
    pub fn md5_checksum(&self) -> Result<Option<String>, TraceError> {
        if let Some(md5) = self.md5.get() {
            return Ok(md5.clone());
        }
        let md5 = self.fetch_md5_checksum()?;
        Ok(self.md5.get_or_init(|| md5).clone())
    }

    fn fetch_md5_checksum(&self) -> Result<Option<String>, TraceError> {
        let object_store = self.uploader.object_store();
        if !object_store.enabled || self.artifact.local_store() {
            return Ok(None);
        }

        // Attributes are always fetched again; the ones seen before upload are stale.
        let attributes = self.uploader.fetch_attributes(&self.artifact.file)?;
        let checksum = match &object_store.provider {
            ObjectStoreProvider::Google => attributes
                .content_md5
                .as_deref()
                .map(decode_content_md5)
                .transpose()?,
            ObjectStoreProvider::Aws => attributes
                .etag
                .map(|etag| etag.trim().trim_matches('"').to_string()),
            ObjectStoreProvider::Other(_) => None,
        };
        Ok(checksum.filter(|value| !value.is_empty()))
    }
}

fn decode_content_md5(value: &str) -> Result<String, TraceError> {
    let digest = STANDARD
        .decode(value.trim())
        .map_err(|err| TraceError::InvalidChecksum(format!("content_md5 {value}: {err}")))?;
    Ok(hex::encode(digest))
}
