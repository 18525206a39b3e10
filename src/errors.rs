use std::io;
use thiserror::Error;

/// Errors raised while discovering, downloading, decoding or archiving objects.
///
/// At startup `BucketNotFound` and `BucketUnavailable` are fatal. During a
/// cycle an error fails the object at hand (or the whole pass, when listing
/// fails) and the work is retried on the next cycle.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{bucket}` unavailable: {reason}")]
    BucketUnavailable { bucket: String, reason: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    #[error("failed to read `{path}`: {source}")]
    Decode {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("record sink closed")]
    SinkClosed,
    #[error(transparent)]
    Store(#[from] object_store::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type IngestResult<T> = Result<T, IngestError>;
