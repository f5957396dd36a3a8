// crates/crucible-server/src/archive.rs
// ============================================================================
// Module: Blob Archive
// Description: S3-compatible blob store behind the BlobStore trait.
// Purpose: Persist submission payloads and archived worker artifacts.
// Dependencies: aws-config, aws-sdk-s3, crucible-core, sha2, tokio
// ============================================================================

//! ## Overview
//! Two buckets ride the same client: incoming submission payloads under
//! content-addressed keys, and the long-term artifact archive keyed by the
//! worker's object names. Writes are idempotent by key; reads are bounded
//! by the caller's size limit and stream in chunks so an oversized object
//! aborts early.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::Region;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use crucible_core::BlobError;
use crucible_core::BlobStore;
use sha2::Digest;
use sha2::Sha256;
use tokio::io::AsyncReadExt;

// ============================================================================
// SECTION: Content Addressing
// ============================================================================

/// Returns the content-addressed key for a payload (`sha256/<hex>`).
#[must_use]
pub fn content_address(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let digest = Sha256::digest(bytes);
    let mut key = String::with_capacity(7 + digest.len() * 2);
    key.push_str("sha256/");
    for byte in digest {
        let _ = write!(key, "{byte:02x}");
    }
    key
}

// ============================================================================
// SECTION: S3 Store
// ============================================================================

/// Options for building an S3-backed blob store.
#[derive(Debug, Clone)]
pub struct S3BlobStoreConfig {
    /// Endpoint URL; `None` uses the ambient AWS environment.
    pub endpoint: Option<String>,
    /// Region name.
    pub region: Option<String>,
    /// Bucket name.
    pub bucket: String,
    /// Optional key prefix.
    pub prefix: Option<String>,
    /// Use path-style addressing.
    pub force_path_style: bool,
}

/// S3-compatible blob store.
pub struct S3BlobStore {
    /// Underlying S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Normalized key prefix (empty or ending in `/`).
    prefix: String,
}

impl S3BlobStore {
    /// Builds a store, loading shared AWS configuration.
    pub async fn new(config: S3BlobStoreConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = config.region.clone() {
            loader = loader.region(Region::new(region));
        }
        if let Some(endpoint) = config.endpoint.clone() {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }
        let prefix = config
            .prefix
            .as_deref()
            .map(|prefix| {
                let trimmed = prefix.trim_matches('/');
                if trimmed.is_empty() {
                    String::new()
                } else {
                    format!("{trimmed}/")
                }
            })
            .unwrap_or_default();
        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket,
            prefix,
        }
    }

    /// Applies the configured prefix to a key.
    fn prefixed(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), BlobError> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(self.prefixed(key))
            .body(ByteStream::from(bytes));
        if let Some(content_type) = content_type {
            request = request.content_type(content_type);
        }
        request.send().await.map_err(|err| BlobError::Backend(err.to_string()))?;
        Ok(())
    }

    async fn get(&self, key: &str, max_bytes: usize) -> Result<Vec<u8>, BlobError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.prefixed(key))
            .send()
            .await
            .map_err(|err| {
                let rendered = err.to_string();
                if rendered.contains("NoSuchKey") {
                    BlobError::NotFound(key.to_string())
                } else {
                    BlobError::Backend(rendered)
                }
            })?;
        if let Some(length) = output.content_length() {
            let actual_bytes = usize::try_from(length).unwrap_or(usize::MAX);
            if actual_bytes > max_bytes {
                return Err(BlobError::TooLarge {
                    key: key.to_string(),
                    max_bytes,
                    actual_bytes,
                });
            }
        }
        let mut reader = output.body.into_async_read();
        let mut buffer = Vec::new();
        let mut total_bytes = 0usize;
        let mut chunk = [0u8; 8192];
        loop {
            let read = reader
                .read(&mut chunk)
                .await
                .map_err(|err| BlobError::Backend(err.to_string()))?;
            if read == 0 {
                break;
            }
            total_bytes = total_bytes
                .checked_add(read)
                .ok_or_else(|| BlobError::Backend("blob size overflow".to_string()))?;
            if total_bytes > max_bytes {
                return Err(BlobError::TooLarge {
                    key: key.to_string(),
                    max_bytes,
                    actual_bytes: total_bytes,
                });
            }
            buffer.extend_from_slice(&chunk[.. read]);
        }
        Ok(buffer)
    }
}

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// In-memory blob store for tests and local development.
#[derive(Default)]
pub struct InMemoryBlobStore {
    /// Stored objects keyed by name.
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored keys.
    ///
    /// # Panics
    ///
    /// Panics when the internal lock is poisoned (test-only type).
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        #[allow(clippy::unwrap_used, reason = "Test double; poisoning is a test bug.")]
        let objects = self.objects.lock().unwrap();
        objects.keys().cloned().collect()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: Option<&str>,
    ) -> Result<(), BlobError> {
        self.objects
            .lock()
            .map_err(|_| BlobError::Backend("blob lock poisoned".to_string()))?
            .insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str, max_bytes: usize) -> Result<Vec<u8>, BlobError> {
        let bytes = self
            .objects
            .lock()
            .map_err(|_| BlobError::Backend("blob lock poisoned".to_string()))?
            .get(key)
            .ok_or_else(|| BlobError::NotFound(key.to_string()))?
            .clone();
        if bytes.len() > max_bytes {
            return Err(BlobError::TooLarge {
                key: key.to_string(),
                max_bytes,
                actual_bytes: bytes.len(),
            });
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests;
