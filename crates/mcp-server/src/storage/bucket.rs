//! Typed façade over the S3-compatible bucket.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as StorePath;
use object_store::{ObjectStore, PutPayload, RetryConfig};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use crate::config::Config;

/// Listing entry. Callers never see pagination; `list` drains the stream.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object store configuration rejected: {0}")]
    Config(#[source] object_store::Error),
    #[error("object store request failed for '{key}': {source}")]
    Request {
        key: String,
        #[source]
        source: object_store::Error,
    },
    #[error("stored JSON at '{key}' is corrupt: {message}")]
    Corrupt { key: String, message: String },
}

/// The single mutable resource of the whole service.
///
/// Holds an `Arc<dyn ObjectStore>` so deployments with split signing
/// strategies can swap in a dispatching client without touching callers;
/// the stock build uses one AWS-style client with path-style addressing.
#[derive(Clone)]
pub struct BucketStore {
    inner: Arc<dyn ObjectStore>,
}

impl BucketStore {
    /// Connect to the configured bucket. Transient request failures are
    /// retried with exponential backoff inside the client.
    pub fn open(config: &Config) -> Result<Self, StoreError> {
        let s3 = AmazonS3Builder::new()
            .with_endpoint(&config.s3_endpoint)
            .with_allow_http(true)
            .with_virtual_hosted_style_request(false)
            .with_bucket_name(&config.s3_bucket)
            .with_region(&config.s3_region)
            .with_access_key_id(&config.s3_access_key)
            .with_secret_access_key(&config.s3_secret_key)
            .with_retry(RetryConfig {
                max_retries: 3,
                ..RetryConfig::default()
            })
            .build()
            .map_err(StoreError::Config)?;
        Ok(Self {
            inner: Arc::new(s3),
        })
    }

    /// Store backed by process memory, for tests.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(object_store::memory::InMemory::new()),
        }
    }

    /// Wrap an existing client. Lets tests inject failure-injecting stores.
    pub fn with_client(inner: Arc<dyn ObjectStore>) -> Self {
        Self { inner }
    }

    /// The underlying client, so wrappers can share the same objects.
    pub fn client(&self) -> Arc<dyn ObjectStore> {
        self.inner.clone()
    }

    /// Fetch an object. Absent keys are `None`, never an error.
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let path = StorePath::from(key);
        match self.inner.get(&path).await {
            Ok(result) => {
                let bytes = result.bytes().await.map_err(|source| StoreError::Request {
                    key: key.to_string(),
                    source,
                })?;
                Ok(Some(bytes))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(source) => Err(StoreError::Request {
                key: key.to_string(),
                source,
            }),
        }
    }

    /// Fetch an object as UTF-8 text. Invalid UTF-8 counts as corruption.
    pub async fn get_text(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.get(key).await? {
            None => Ok(None),
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    key: key.to_string(),
                    message: format!("not valid UTF-8: {e}"),
                }),
        }
    }

    /// Fetch and decode a JSON object. Decode failures are surfaced as
    /// `Corrupt`; the damaged object is left exactly as it is.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key).await? {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
        }
    }

    pub async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let path = StorePath::from(key);
        self.inner
            .put(&path, PutPayload::from(bytes))
            .await
            .map(|_| ())
            .map_err(|source| StoreError::Request {
                key: key.to_string(),
                source,
            })
    }

    pub async fn put_text(&self, key: &str, text: &str) -> Result<(), StoreError> {
        self.put(key, text.as_bytes().to_vec()).await
    }

    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        self.put(key, bytes).await
    }

    /// Delete an object. Deleting an absent key succeeds.
    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = StorePath::from(key);
        match self.inner.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(source) => Err(StoreError::Request {
                key: key.to_string(),
                source,
            }),
        }
    }

    /// List every object under a prefix, sorted by key. The client paginates
    /// internally; callers always see the complete listing.
    pub async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StoreError> {
        let path = StorePath::from(prefix);
        let metas: Vec<object_store::ObjectMeta> = self
            .inner
            .list(Some(&path))
            .try_collect()
            .await
            .map_err(|source| StoreError::Request {
                key: prefix.to_string(),
                source,
            })?;
        let mut entries: Vec<ObjectInfo> = metas
            .into_iter()
            .map(|meta| ObjectInfo {
                key: meta.location.to_string(),
                size: meta.size as u64,
                modified: meta.last_modified,
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// List the immediate child prefixes of a prefix (delimiter listing).
    /// Used to enumerate spaces and backup snapshots.
    pub async fn list_prefixes(&self, prefix: Option<&str>) -> Result<Vec<String>, StoreError> {
        let path = prefix.map(StorePath::from);
        let result = self
            .inner
            .list_with_delimiter(path.as_ref())
            .await
            .map_err(|source| StoreError::Request {
                key: prefix.unwrap_or("").to_string(),
                source,
            })?;
        let mut prefixes: Vec<String> = result
            .common_prefixes
            .into_iter()
            .map(|p| {
                let full = p.to_string();
                match full.rsplit_once('/') {
                    Some((_, last)) => last.to_string(),
                    None => full,
                }
            })
            .collect();
        prefixes.sort();
        Ok(prefixes)
    }

    pub async fn head(&self, key: &str) -> Result<Option<ObjectInfo>, StoreError> {
        let path = StorePath::from(key);
        match self.inner.head(&path).await {
            Ok(meta) => Ok(Some(ObjectInfo {
                key: meta.location.to_string(),
                size: meta.size as u64,
                modified: meta.last_modified,
            })),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(source) => Err(StoreError::Request {
                key: key.to_string(),
                source,
            }),
        }
    }
}
