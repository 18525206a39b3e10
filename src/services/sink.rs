//! Downstream hand-off for decorated records.

use crate::{
    errors::{IngestError, IngestResult},
    models::record::Record,
};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Consumer of decorated records.
///
/// `deliver` may apply backpressure by not returning until the record has
/// been accepted.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn deliver(&self, record: Record) -> IngestResult<()>;
}

#[async_trait]
impl RecordSink for mpsc::Sender<Record> {
    async fn deliver(&self, record: Record) -> IngestResult<()> {
        self.send(record).await.map_err(|_| IngestError::SinkClosed)
    }
}
