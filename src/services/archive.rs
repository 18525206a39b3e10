//! Post-processing disposal of a fully ingested object.
//!
//! Steps run in a fixed order and are not rolled back: a failure part-way
//! leaves earlier steps applied (e.g. copied to the backup bucket but not yet
//! copied to the backup directory).

use crate::{
    errors::IngestResult,
    models::object::CandidateObject,
    services::store_service::BucketStore,
};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Where, and whether, processed objects are kept or removed.
#[derive(Debug, Clone, Default)]
pub struct ArchivalPolicy {
    pub backup_bucket: Option<String>,
    pub backup_prefix: String,
    pub backup_dir: Option<PathBuf>,
    pub delete: bool,
}

impl ArchivalPolicy {
    /// Key an object is stored under in the backup bucket.
    pub fn backup_key(&self, key: &str) -> String {
        format!("{}{}", self.backup_prefix, key)
    }

    /// Back up and/or remove `object` from `bucket`.
    ///
    /// With a backup bucket, `delete` turns the copy into a move and no
    /// separate delete is issued.
    pub async fn apply(
        &self,
        store: &dyn BucketStore,
        bucket: &str,
        object: &CandidateObject,
        staging: &Path,
    ) -> IngestResult<()> {
        if let Some(backup_bucket) = &self.backup_bucket {
            let backup_key = self.backup_key(&object.key);
            if self.delete {
                store
                    .move_object(bucket, &object.key, backup_bucket, &backup_key)
                    .await?;
                debug!("moved {} to {}/{}", object.key, backup_bucket, backup_key);
            } else {
                store
                    .copy_object(bucket, &object.key, backup_bucket, &backup_key)
                    .await?;
                debug!("copied {} to {}/{}", object.key, backup_bucket, backup_key);
            }
        }

        if let Some(backup_dir) = &self.backup_dir {
            let dest = backup_dir.join(object.base_name());
            fs::copy(staging, &dest).await?;
            debug!("copied {} to {}", object.key, dest.display());
        }

        if self.delete && self.backup_bucket.is_none() {
            store.delete_object(bucket, &object.key).await?;
        }

        Ok(())
    }
}
