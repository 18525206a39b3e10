//! Represents an object listed from the source bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single listed object considered for ingestion in the current cycle.
///
/// Materialized from a bucket listing and discarded at the end of the cycle;
/// it carries only what the pipeline needs, never the content bytes.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CandidateObject {
    /// Object key (full path-like identifier within the bucket).
    pub key: String,

    /// Timestamp when object was last modified.
    pub last_modified: DateTime<Utc>,

    /// Size in bytes.
    pub size_bytes: u64,

    /// Entity tag reported by the store, if any.
    pub etag: Option<String>,
}

impl CandidateObject {
    /// Last path segment of the key, used as the staging file name.
    pub fn base_name(&self) -> &str {
        self.key
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or(self.key.as_str())
    }
}
