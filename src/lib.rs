//! Incremental ingestion of newly-appended objects from a bucket.
//!
//! Each cycle lists the bucket, keeps the objects modified after the
//! persisted checkpoint, and for each one in last-modified order downloads it,
//! decodes its lines into records for a [`services::sink::RecordSink`],
//! archives or deletes it, and only then advances the checkpoint.

pub mod codecs;
pub mod config;
pub mod errors;
pub mod models;
pub mod services;
