//! Represents a decoded record handed to the downstream consumer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One decoded record plus the pipeline metadata attached before hand-off.
///
/// Decoders only fill `message`; the ingestion cycle adds `bucket`, `key`,
/// `last_modified` and any configured extras to `metadata`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Record {
    /// Decoded text payload.
    pub message: String,

    /// Metadata key/value pairs, ordered for stable output.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Record {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Set a metadata field, keeping any value a decoder already set.
    pub fn decorate(&mut self, key: &str, value: impl Into<String>) {
        self.metadata
            .entry(key.to_string())
            .or_insert_with(|| value.into());
    }
}
