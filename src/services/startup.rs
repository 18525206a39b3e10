//! Checks run once before the first cycle; any failure here is fatal.

use crate::{config::AppConfig, services::store_service::BucketStore};
use anyhow::{Context, Result};
use tokio::fs;
use tracing::info;

/// Verify the source bucket and create the backup bucket, backup directory
/// and staging directory a cycle depends on.
pub async fn prepare(cfg: &AppConfig, store: &dyn BucketStore) -> Result<()> {
    store
        .ensure_bucket_accessible(&cfg.bucket)
        .await
        .with_context(|| format!("source bucket `{}` is not accessible", cfg.bucket))?;

    if let Some(backup_bucket) = &cfg.backup_bucket {
        store
            .create_bucket(backup_bucket)
            .await
            .with_context(|| format!("cannot create backup bucket `{}`", backup_bucket))?;
        info!("Backing up processed objects to bucket {}", backup_bucket);
    }

    if let Some(backup_dir) = &cfg.backup_dir {
        fs::create_dir_all(backup_dir)
            .await
            .with_context(|| format!("cannot create backup directory {}", backup_dir.display()))?;
    }

    fs::create_dir_all(&cfg.temporary_directory)
        .await
        .with_context(|| {
            format!(
                "cannot create temporary directory {}",
                cfg.temporary_directory.display()
            )
        })?;

    info!(
        "Using checkpoint {} for {}/{}",
        cfg.checkpoint_path.display(),
        cfg.bucket,
        cfg.prefix
    );
    Ok(())
}
