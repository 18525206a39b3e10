//! Persisted "since" watermark for one (bucket, prefix) pair.
//!
//! The file holds a single RFC 3339 timestamp. Objects whose last-modified
//! time is at or before it are considered already ingested.

use crate::errors::IngestResult;
use chrono::{DateTime, Utc};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Checkpoint file state, owned by the ingestion cycle.
///
/// The stored value is read lazily on first use and then cached for the
/// lifetime of the value; only `advance` changes it afterwards.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    cached: Option<DateTime<Utc>>,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: None,
        }
    }

    /// Default checkpoint location: `<dir>/.sincedb_<md5(bucket+prefix)>`.
    pub fn default_path(dir: &Path, bucket: &str, prefix: &str) -> PathBuf {
        let digest = md5::compute(format!("{}+{}", bucket, prefix));
        dir.join(format!(".sincedb_{:x}", digest))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current watermark, loading it from disk on first call.
    pub async fn current(&mut self) -> DateTime<Utc> {
        if let Some(value) = self.cached {
            return value;
        }
        let value = self.load().await;
        self.cached = Some(value);
        value
    }

    /// True iff `timestamp` is strictly after the stored watermark.
    pub async fn is_newer(&mut self, timestamp: DateTime<Utc>) -> bool {
        timestamp > self.current().await
    }

    /// Overwrite the watermark with `timestamp`, or the current wall-clock
    /// time when `None`.
    ///
    /// Callers are responsible for only advancing past fully processed objects;
    /// no monotonicity check is made here.
    pub async fn advance(&mut self, timestamp: Option<DateTime<Utc>>) -> IngestResult<()> {
        let timestamp = timestamp.unwrap_or_else(Utc::now);
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent).await?;

        // Write beside the target and rename over it, so readers only ever
        // observe a complete value.
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let write = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(timestamp.to_rfc3339().as_bytes()).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, &self.path).await
        };
        if let Err(err) = write.await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        self.cached = Some(timestamp);
        debug!("checkpoint {} advanced to {}", self.path.display(), timestamp);
        Ok(())
    }

    /// Read the persisted value, falling back to the epoch.
    async fn load(&self) -> DateTime<Utc> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    "no checkpoint at {}, processing from the beginning",
                    self.path.display()
                );
                return DateTime::<Utc>::UNIX_EPOCH;
            }
            Err(err) => {
                warn!(
                    "checkpoint {} unreadable ({}), processing from the beginning",
                    self.path.display(),
                    err
                );
                return DateTime::<Utc>::UNIX_EPOCH;
            }
        };

        let trimmed = contents.trim();
        if trimmed.is_empty() {
            return DateTime::<Utc>::UNIX_EPOCH;
        }
        match DateTime::parse_from_rfc3339(trimmed) {
            Ok(value) => value.with_timezone(&Utc),
            Err(err) => {
                warn!(
                    "checkpoint {} holds `{}` which is not a timestamp ({}), processing from the beginning",
                    self.path.display(),
                    trimmed,
                    err
                );
                DateTime::<Utc>::UNIX_EPOCH
            }
        }
    }
}
