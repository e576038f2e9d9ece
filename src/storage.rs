//! Object store construction for S3 and local filesystem buckets.

use std::sync::Arc;
use std::time::Duration;

use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::{ClientOptions, ObjectStore, RetryConfig};

use crate::config::{ObjectStoreCredentials, Settings};
use crate::error::ConfigError;

/// Client options for uploads of staged chunk files.
fn create_client_options(settings: &Settings) -> ClientOptions {
    ClientOptions::new()
        .with_connect_timeout(settings.request_timeout())
        // Staged chunks can be a few hundred MB; allow generous transfer time.
        .with_timeout(settings.request_timeout().max(Duration::from_secs(300)))
}

/// A single attempt per request; failures are reported, not retried.
fn create_retry_config() -> RetryConfig {
    RetryConfig {
        max_retries: 0,
        ..Default::default()
    }
}

/// Create the store staged files are uploaded to.
///
/// Uses `LocalFileSystem` if `local_path` is set, otherwise S3 with the
/// configured keys.
pub fn create_store(
    creds: &ObjectStoreCredentials,
    settings: &Settings,
) -> Result<Arc<dyn ObjectStore>, ConfigError> {
    if let Some(ref local_path) = creds.local_path {
        std::fs::create_dir_all(local_path).map_err(|e| {
            ConfigError::Invalid(format!(
                "cannot create local bucket directory {}: {}",
                local_path.display(),
                e
            ))
        })?;
        tracing::info!("Creating LocalFileSystem store at: {}", local_path.display());
        let store = LocalFileSystem::new_with_prefix(local_path)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        return Ok(Arc::new(store));
    }

    tracing::info!("Creating S3 client for bucket: {}", creds.bucket);
    let mut builder = AmazonS3Builder::new()
        .with_bucket_name(&creds.bucket)
        .with_access_key_id(&creds.access_key)
        .with_secret_access_key(&creds.secret_key)
        .with_region(creds.region.as_deref().unwrap_or("us-east-1"))
        .with_client_options(create_client_options(settings))
        .with_retry(create_retry_config());
    if let Some(ref endpoint) = creds.endpoint {
        builder = builder
            .with_endpoint(endpoint)
            .with_allow_http(endpoint.starts_with("http://"));
    }

    let store = builder
        .build()
        .map_err(|e| ConfigError::Invalid(format!("object store: {}", e)))?;
    Ok(Arc::new(store))
}

/// `s3://bucket/key` URI for an uploaded object.
pub fn object_uri(bucket: &str, key: &str) -> String {
    format!("s3://{}/{}", bucket, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> ObjectStoreCredentials {
        ObjectStoreCredentials {
            access_key: "AKIAEXAMPLE".to_string(),
            secret_key: "secret".to_string(),
            bucket: "wiki-dumps".to_string(),
            region: Some("us-west-2".to_string()),
            endpoint: None,
            local_path: None,
        }
    }

    #[test]
    fn builds_s3_store_without_network() {
        assert!(create_store(&creds(), &Settings::default()).is_ok());
    }

    #[test]
    fn local_path_selects_filesystem_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut creds = creds();
        creds.local_path = Some(dir.path().join("bucket"));
        let store = create_store(&creds, &Settings::default()).unwrap();
        assert!(dir.path().join("bucket").is_dir());
        assert!(store.to_string().contains("LocalFileSystem"));
    }

    #[test]
    fn object_uri_is_flat() {
        assert_eq!(object_uri("b", "wiki_1.csv"), "s3://b/wiki_1.csv");
    }
}
