//! src/services/store_service.rs
//!
//! Bucket-level access to the object store consumed by the ingestion cycle.
//! `BucketStore` is the seam the cycle and the archival policy talk to;
//! `StoreService` implements it on top of `object_store`, with one store per
//! bucket rooted beneath `base_path/{bucket}` or held in memory.

use crate::{
    errors::{IngestError, IngestResult},
    models::object::CandidateObject,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::{
    ObjectMeta, ObjectStore, PutPayload, local::LocalFileSystem, memory::InMemory,
    path::Path as ObjectPath,
};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::RwLock,
};
use tracing::debug;

/// Operations the ingestion pipeline needs from an object store.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Fail with `BucketNotFound` unless `bucket` can be accessed.
    async fn ensure_bucket_accessible(&self, bucket: &str) -> IngestResult<()>;

    /// Create `bucket` if it does not already exist.
    async fn create_bucket(&self, bucket: &str) -> IngestResult<()>;

    /// List every object whose key starts with `prefix`.
    async fn list_objects(&self, bucket: &str, prefix: &str)
    -> IngestResult<Vec<CandidateObject>>;

    /// Stream an object's content into a local file, returning bytes written.
    async fn download_object(&self, bucket: &str, key: &str, dest: &Path) -> IngestResult<u64>;

    /// Copy `key` from `src_bucket` to `dst_key` in `dst_bucket`.
    async fn copy_object(
        &self,
        src_bucket: &str,
        key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> IngestResult<()>;

    /// Copy, then remove the source.
    async fn move_object(
        &self,
        src_bucket: &str,
        key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> IngestResult<()>;

    async fn delete_object(&self, bucket: &str, key: &str) -> IngestResult<()>;
}

#[derive(Debug, Clone)]
enum Backend {
    /// Each bucket is a directory beneath this root.
    Local(PathBuf),
    /// Buckets live only in memory and vanish with the process.
    Memory,
}

/// `BucketStore` backed by the `object_store` crate.
#[derive(Clone)]
pub struct StoreService {
    backend: Backend,

    /// Opened per-bucket stores, keyed by bucket name.
    buckets: Arc<RwLock<HashMap<String, Arc<dyn ObjectStore>>>>,
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MAX_LEN: usize = 255;

impl StoreService {
    /// Buckets are subdirectories of `base_path`.
    pub fn local(base_path: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::Local(base_path.into()),
            buckets: Arc::default(),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory,
            buckets: Arc::default(),
        }
    }

    /// Put raw bytes under `key`. Only used to seed buckets.
    #[cfg(test)]
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: impl Into<Bytes>,
    ) -> IngestResult<()> {
        let store = self.bucket(bucket).await?;
        store
            .put(&object_path(key)?, PutPayload::from(body.into()))
            .await?;
        Ok(())
    }

    /// Whether `key` currently exists in `bucket`.
    #[cfg(test)]
    pub async fn contains(&self, bucket: &str, key: &str) -> IngestResult<bool> {
        let store = self.bucket(bucket).await?;
        match store.head(&object_path(key)?).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Compute the physical folder path for a bucket on the local backend.
    fn bucket_root(base_path: &Path, bucket: &str) -> PathBuf {
        let mut path = base_path.to_path_buf();
        path.push(bucket);
        path
    }

    /// Resolve an already-existing bucket to its store.
    async fn bucket(&self, bucket: &str) -> IngestResult<Arc<dyn ObjectStore>> {
        if let Some(store) = self.buckets.read().await.get(bucket) {
            return Ok(store.clone());
        }

        let store: Arc<dyn ObjectStore> = match &self.backend {
            Backend::Local(base_path) => {
                ensure_bucket_name_safe(bucket)?;
                let root = Self::bucket_root(base_path, bucket);
                if !fs::metadata(&root)
                    .await
                    .map(|meta| meta.is_dir())
                    .unwrap_or(false)
                {
                    return Err(IngestError::BucketNotFound(bucket.to_string()));
                }
                Arc::new(LocalFileSystem::new_with_prefix(&root)?)
            }
            Backend::Memory => return Err(IngestError::BucketNotFound(bucket.to_string())),
        };

        let mut buckets = self.buckets.write().await;
        Ok(buckets.entry(bucket.to_string()).or_insert(store).clone())
    }
}

#[async_trait]
impl BucketStore for StoreService {
    async fn ensure_bucket_accessible(&self, bucket: &str) -> IngestResult<()> {
        let store = self.bucket(bucket).await?;
        // A listing proves read access; `LocalFileSystem` surfaces permission
        // errors here rather than at construction.
        let mut listing = store.list(None);
        if let Some(Err(err)) = listing.next().await {
            return Err(IngestError::BucketUnavailable {
                bucket: bucket.to_string(),
                reason: err.to_string(),
            });
        }
        Ok(())
    }

    async fn create_bucket(&self, bucket: &str) -> IngestResult<()> {
        if self.buckets.read().await.contains_key(bucket) {
            return Ok(());
        }
        ensure_bucket_name_safe(bucket)?;

        let store: Arc<dyn ObjectStore> = match &self.backend {
            Backend::Local(base_path) => {
                let root = Self::bucket_root(base_path, bucket);
                fs::create_dir_all(&root).await?;
                debug!("created bucket directory {}", root.display());
                Arc::new(LocalFileSystem::new_with_prefix(&root)?)
            }
            Backend::Memory => Arc::new(InMemory::new()),
        };

        self.buckets
            .write()
            .await
            .entry(bucket.to_string())
            .or_insert(store);
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> IngestResult<Vec<CandidateObject>> {
        let store = self.bucket(bucket).await?;

        // `object_store` lists by whole path segments, while bucket prefixes are
        // plain string prefixes: list the enclosing directory and filter.
        let directory = prefix
            .rfind('/')
            .map(|pos| ObjectPath::from(&prefix[..pos]));
        let listed: Vec<ObjectMeta> = store.list(directory.as_ref()).try_collect().await?;

        let objects = listed
            .into_iter()
            .filter(|meta| meta.location.as_ref().starts_with(prefix))
            .map(|meta| CandidateObject {
                key: meta.location.to_string(),
                last_modified: meta.last_modified,
                size_bytes: meta.size,
                etag: meta.e_tag,
            })
            .collect::<Vec<_>>();
        debug!(
            "listed {} objects under `{}` in bucket `{}`",
            objects.len(),
            prefix,
            bucket
        );
        Ok(objects)
    }

    async fn download_object(&self, bucket: &str, key: &str, dest: &Path) -> IngestResult<u64> {
        let store = self.bucket(bucket).await?;
        let location = object_path(key)?;
        let result = store.get(&location).await.map_err(|err| match err {
            object_store::Error::NotFound { .. } => IngestError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            other => IngestError::Store(other),
        })?;

        let mut stream = result.into_stream();
        let mut file = File::create(dest).await?;
        let mut size_bytes: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            size_bytes += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;

        debug!("downloaded {}/{} ({} bytes) to {}", bucket, key, size_bytes, dest.display());
        Ok(size_bytes)
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> IngestResult<()> {
        let from = object_path(key)?;
        let to = object_path(dst_key)?;
        let source = self.bucket(src_bucket).await?;

        if src_bucket == dst_bucket {
            source.copy(&from, &to).await?;
        } else {
            let destination = self.bucket(dst_bucket).await?;
            let body: Bytes = source.get(&from).await?.bytes().await?;
            destination.put(&to, PutPayload::from(body)).await?;
        }
        Ok(())
    }

    async fn move_object(
        &self,
        src_bucket: &str,
        key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> IngestResult<()> {
        if src_bucket == dst_bucket {
            let store = self.bucket(src_bucket).await?;
            store.rename(&object_path(key)?, &object_path(dst_key)?).await?;
            return Ok(());
        }
        self.copy_object(src_bucket, key, dst_bucket, dst_key).await?;
        self.delete_object(src_bucket, key).await
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> IngestResult<()> {
        let store = self.bucket(bucket).await?;
        store.delete(&object_path(key)?).await?;
        debug!("deleted {}/{}", bucket, key);
        Ok(())
    }
}

/// Basic key validation before handing a key to `object_store`.
///
/// Rejects empty, oversized and control-character keys, then defers to
/// `ObjectPath::parse` for segment rules (no `.`/`..`, no empty segments).
fn object_path(key: &str) -> IngestResult<ObjectPath> {
    let invalid = || IngestError::InvalidObjectKey(key.to_string());
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(invalid());
    }
    if key.bytes().any(|b| b.is_ascii_control() || b == b'\\') {
        return Err(invalid());
    }
    ObjectPath::parse(key).map_err(|_| invalid())
}

/// Validate a bucket name.
///
/// Only what keeps the name a single directory on the local backend is
/// enforced; provider naming rules (S3 lowercase, GCS underscores) are left
/// to the provider.
fn ensure_bucket_name_safe(name: &str) -> IngestResult<()> {
    let unavailable = |reason: &str| IngestError::BucketUnavailable {
        bucket: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() || name.len() > BUCKET_NAME_MAX_LEN {
        return Err(unavailable("must be between 1 and 255 bytes"));
    }
    if name == "." || name == ".." {
        return Err(unavailable("must not be `.` or `..`"));
    }
    if name.chars().any(|c| c == '/' || c == '\\' || c.is_control()) {
        return Err(unavailable(
            "must not contain path separators or control characters",
        ));
    }
    Ok(())
}
