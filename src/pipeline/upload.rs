//! Object store uploader: copies staged files into the bucket under their basename.

use std::sync::Arc;

use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};

use crate::error::UploadError;
use crate::storage::object_uri;

use super::stage::StagedFile;

/// An object that has been written to the bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedObject {
    pub bucket: String,
    pub key: String,
    pub bytes: u64,
}

impl UploadedObject {
    pub fn uri(&self) -> String {
        object_uri(&self.bucket, &self.key)
    }

    pub fn location(&self) -> ObjectPath {
        ObjectPath::from(self.key.as_str())
    }
}

pub struct Uploader {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl Uploader {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    /// Upload one staged file. One attempt; the caller decides what a failure means.
    pub async fn upload(&self, staged: &StagedFile) -> Result<UploadedObject, UploadError> {
        let key = staged
            .key()
            .ok_or_else(|| UploadError::BadKey(staged.path.clone()))?
            .to_string();

        let body = tokio::fs::read(&staged.path)
            .await
            .map_err(|source| UploadError::Read {
                path: staged.path.clone(),
                source,
            })?;
        let bytes = body.len() as u64;

        self.store
            .put(&ObjectPath::from(key.as_str()), PutPayload::from(body))
            .await
            .map_err(|source| UploadError::Store {
                key: key.clone(),
                source,
            })?;

        Ok(UploadedObject {
            bucket: self.bucket.clone(),
            key,
            bytes,
        })
    }
}
