//! Test double recording every call the pipeline makes to the store.

use crate::{
    errors::{IngestError, IngestResult},
    models::object::CandidateObject,
    services::store_service::{BucketStore, StoreService},
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::{
    collections::{HashMap, HashSet},
    io,
    path::Path,
};
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Download(String),
    Copy { from: String, to: String },
    Move { from: String, to: String },
    Delete(String),
}

/// In-memory `StoreService` that logs mutating and download calls as
/// `bucket/key` strings, can be told to fail selected downloads, and reports
/// caller-chosen last-modified times.
pub struct RecordingStore {
    pub inner: StoreService,
    calls: Mutex<Vec<Call>>,
    failing_downloads: Mutex<HashSet<String>>,
    modified: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self {
            inner: StoreService::in_memory(),
            calls: Mutex::default(),
            failing_downloads: Mutex::default(),
            modified: Mutex::default(),
        }
    }

    /// Seed `key` and report it as last modified `secs` after the epoch.
    pub async fn seed_at(&self, bucket: &str, key: &str, body: &[u8], secs: i64) {
        self.seed(bucket, key, body).await;
        self.modified
            .lock()
            .await
            .insert(key.to_string(), Utc.timestamp_opt(secs, 0).unwrap());
    }

    pub async fn seed(&self, bucket: &str, key: &str, body: &[u8]) {
        self.inner.create_bucket(bucket).await.unwrap();
        self.inner.put_object(bucket, key, body.to_vec()).await.unwrap();
    }

    pub async fn fail_download(&self, key: &str) {
        self.failing_downloads.lock().await.insert(key.to_string());
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    pub async fn downloads(&self) -> Vec<String> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|call| match call {
                Call::Download(key) => Some(key),
                _ => None,
            })
            .collect()
    }

    async fn record(&self, call: Call) {
        self.calls.lock().await.push(call);
    }
}

#[async_trait]
impl BucketStore for RecordingStore {
    async fn ensure_bucket_accessible(&self, bucket: &str) -> IngestResult<()> {
        self.inner.ensure_bucket_accessible(bucket).await
    }

    async fn create_bucket(&self, bucket: &str) -> IngestResult<()> {
        self.inner.create_bucket(bucket).await
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> IngestResult<Vec<CandidateObject>> {
        let mut objects = self.inner.list_objects(bucket, prefix).await?;
        let modified = self.modified.lock().await;
        for object in &mut objects {
            if let Some(stamp) = modified.get(&object.key) {
                object.last_modified = *stamp;
            }
        }
        Ok(objects)
    }

    async fn download_object(&self, bucket: &str, key: &str, dest: &Path) -> IngestResult<u64> {
        self.record(Call::Download(format!("{}/{}", bucket, key))).await;
        if self.failing_downloads.lock().await.contains(key) {
            return Err(IngestError::Io(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "injected download failure",
            )));
        }
        self.inner.download_object(bucket, key, dest).await
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> IngestResult<()> {
        self.record(Call::Copy {
            from: format!("{}/{}", src_bucket, key),
            to: format!("{}/{}", dst_bucket, dst_key),
        })
        .await;
        self.inner
            .copy_object(src_bucket, key, dst_bucket, dst_key)
            .await
    }

    async fn move_object(
        &self,
        src_bucket: &str,
        key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> IngestResult<()> {
        self.record(Call::Move {
            from: format!("{}/{}", src_bucket, key),
            to: format!("{}/{}", dst_bucket, dst_key),
        })
        .await;
        self.inner
            .move_object(src_bucket, key, dst_bucket, dst_key)
            .await
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> IngestResult<()> {
        self.record(Call::Delete(format!("{}/{}", bucket, key))).await;
        self.inner.delete_object(bucket, key).await
    }
}
