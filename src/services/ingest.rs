//! src/services/ingest.rs
//!
//! One ingestion cycle: list → filter → sort → per object
//! {download → decode → archive → drop staging → advance checkpoint}.
//!
//! The checkpoint only ever moves to the last-modified time of an object that
//! completed, and only once every earlier candidate in the cycle completed too,
//! so a crash or failure at any point leaves unfinished objects above it.

use crate::{
    codecs::LineDecoder,
    errors::{IngestError, IngestResult},
    models::{object::CandidateObject, record::Record},
    services::{
        archive::ArchivalPolicy, checkpoint::CheckpointStore, filter::ObjectFilter,
        line_reader::LineReader, sink::RecordSink, store_service::BucketStore,
    },
};
use futures::StreamExt;
use regex::Regex;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    pin::pin,
    sync::Arc,
};
use tokio::{fs, runtime::Handle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Source and decoration settings for a cycle.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub bucket: String,
    pub prefix: String,
    pub temporary_directory: PathBuf,
    pub gzip_pattern: Regex,
    /// Attach `size` and `etag` to every record.
    pub include_object_properties: bool,
    /// Extra metadata attached to every record.
    pub add_fields: Vec<(String, String)>,
}

/// What one call to [`IngestCycle::run_once`] did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleSummary {
    pub listed: usize,
    pub candidates: usize,
    pub processed: usize,
    pub failed: usize,
    pub records: usize,
    pub cancelled: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum ObjectOutcome {
    Completed { records: usize },
    Cancelled,
}

/// Local copy of one object.
///
/// [`StagingFile::remove`] deletes it; if the owning future is dropped
/// first, removal is handed to the runtime.
struct StagingFile {
    path: PathBuf,
    removed: bool,
}

impl StagingFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            removed: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn remove(mut self) {
        self.removed = true;
        remove_staging(&self.path).await;
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Ok(handle) = Handle::try_current() {
            let path = std::mem::take(&mut self.path);
            handle.spawn(async move { remove_staging(&path).await });
        }
    }
}

async fn remove_staging(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!("removed staging file {}", path.display()),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!("failed to remove staging file {}: {}", path.display(), err),
    }
}

/// CloudFront access logs carry `#Version:` and `#Fields:` lines; they
/// describe the records that follow rather than being records themselves.
/// Concatenated logs repeat them, so they are recognised anywhere.
#[derive(Debug, Default)]
struct CloudfrontHeader {
    version: Option<String>,
    fields: Option<String>,
}

impl CloudfrontHeader {
    /// Consume `line` if it is a header line.
    fn capture(&mut self, line: &str) -> bool {
        if let Some(version) = line.strip_prefix("#Version: ") {
            self.version = Some(version.trim().to_string());
            true
        } else if let Some(fields) = line.strip_prefix("#Fields: ") {
            self.fields = Some(fields.trim().to_string());
            true
        } else {
            false
        }
    }
}

/// The ingestion state for one (bucket, prefix) source.
///
/// Built once per process and reused for every cycle; it owns the checkpoint
/// cache and the decoder state.
pub struct IngestCycle {
    store: Arc<dyn BucketStore>,
    settings: IngestSettings,
    filter: ObjectFilter,
    archival: ArchivalPolicy,
    checkpoint: CheckpointStore,
    decoder: Box<dyn LineDecoder>,
    sink: Arc<dyn RecordSink>,
}

impl IngestCycle {
    pub fn new(
        store: Arc<dyn BucketStore>,
        settings: IngestSettings,
        filter: ObjectFilter,
        archival: ArchivalPolicy,
        checkpoint: CheckpointStore,
        decoder: Box<dyn LineDecoder>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            store,
            settings,
            filter,
            archival,
            checkpoint,
            decoder,
            sink,
        }
    }

    /// Run a single pass over the source.
    ///
    /// Listing and staging-directory errors fail the whole pass. Per-object
    /// errors are logged and counted; after the first one the checkpoint stays
    /// where it is for the rest of the pass, so the failed object is listed
    /// again next time.
    pub async fn run_once(&mut self, cancel: &CancellationToken) -> IngestResult<CycleSummary> {
        let mut summary = CycleSummary::default();
        fs::create_dir_all(&self.settings.temporary_directory).await?;

        let listed = self
            .store
            .list_objects(&self.settings.bucket, &self.settings.prefix)
            .await?;
        summary.listed = listed.len();

        let mut candidates = Vec::with_capacity(listed.len());
        for object in listed {
            if self.filter.should_ignore(&object.key) {
                debug!("ignoring {}", object.key);
                continue;
            }
            if !self.checkpoint.is_newer(object.last_modified).await {
                debug!(
                    "skipping {} (last modified {} not after checkpoint)",
                    object.key, object.last_modified
                );
                continue;
            }
            candidates.push(object);
        }
        // Stable: equal timestamps keep listing order.
        candidates.sort_by_key(|object| object.last_modified);
        summary.candidates = candidates.len();

        let mut hold_checkpoint = false;
        for (index, object) in candidates.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(
                    "shutdown requested, leaving {} objects for the next cycle",
                    candidates.len() - index
                );
                summary.cancelled = true;
                break;
            }

            match self.process_object(object, cancel).await {
                Ok(ObjectOutcome::Completed { records }) => {
                    summary.processed += 1;
                    summary.records += records;
                    info!(
                        "ingested {}/{} ({} records)",
                        self.settings.bucket, object.key, records
                    );

                    // Objects sharing a timestamp advance together: moving past
                    // the first would hide the rest from the next listing.
                    let group_complete = candidates
                        .get(index + 1)
                        .is_none_or(|next| next.last_modified > object.last_modified);
                    if hold_checkpoint || !group_complete {
                        continue;
                    }
                    if let Err(err) = self.checkpoint.advance(Some(object.last_modified)).await {
                        error!(
                            "failed to write checkpoint {}: {}",
                            self.checkpoint.path().display(),
                            err
                        );
                        hold_checkpoint = true;
                    }
                }
                Ok(ObjectOutcome::Cancelled) => {
                    info!(
                        "shutdown requested while reading {}, it will be read again",
                        object.key
                    );
                    summary.cancelled = true;
                    break;
                }
                Err(err) => {
                    error!(
                        "failed to ingest {}/{}: {}",
                        self.settings.bucket, object.key, err
                    );
                    summary.failed += 1;
                    hold_checkpoint = true;
                }
            }
        }

        Ok(summary)
    }

    /// Download, decode and archive one object.
    ///
    /// The staging file is removed on every return path before the caller
    /// touches the checkpoint.
    async fn process_object(
        &mut self,
        object: &CandidateObject,
        cancel: &CancellationToken,
    ) -> IngestResult<ObjectOutcome> {
        let staging = StagingFile::new(self.settings.temporary_directory.join(object.base_name()));
        let outcome = self.stage_and_process(object, staging.path(), cancel).await;
        staging.remove().await;
        outcome
    }

    async fn stage_and_process(
        &mut self,
        object: &CandidateObject,
        staging: &Path,
        cancel: &CancellationToken,
    ) -> IngestResult<ObjectOutcome> {
        self.store
            .download_object(&self.settings.bucket, &object.key, staging)
            .await?;

        let outcome = self.decode_object(object, staging, cancel).await;
        if !matches!(outcome, Ok(ObjectOutcome::Completed { .. })) {
            self.decoder.reset();
            return outcome;
        }

        self.archival
            .apply(self.store.as_ref(), &self.settings.bucket, object, staging)
            .await?;
        outcome
    }

    /// Feed every line of the staged file through the decoder and on to the
    /// sink, checking for shutdown between lines.
    async fn decode_object(
        &mut self,
        object: &CandidateObject,
        path: &Path,
        cancel: &CancellationToken,
    ) -> IngestResult<ObjectOutcome> {
        let decode_error = |source| IngestError::Decode {
            path: object.key.clone(),
            source,
        };

        let lines = LineReader::open(path, &self.settings.gzip_pattern)
            .await
            .map_err(decode_error)?
            .into_stream();
        let mut lines = pin!(lines);
        let mut header = CloudfrontHeader::default();
        let mut pending: Vec<Record> = Vec::new();
        let mut records = 0;

        while let Some(line) = lines.next().await {
            if cancel.is_cancelled() {
                return Ok(ObjectOutcome::Cancelled);
            }
            let line = line.map_err(decode_error)?;
            if header.capture(&line) {
                continue;
            }

            self.decoder.decode(&line, &mut |record| pending.push(record));
            for record in pending.drain(..) {
                self.deliver(record, object, &header).await?;
                records += 1;
            }
        }

        self.decoder.flush(&mut |record| pending.push(record));
        for record in pending.drain(..) {
            self.deliver(record, object, &header).await?;
            records += 1;
        }

        Ok(ObjectOutcome::Completed { records })
    }

    async fn deliver(
        &self,
        mut record: Record,
        object: &CandidateObject,
        header: &CloudfrontHeader,
    ) -> IngestResult<()> {
        record.decorate("bucket", self.settings.bucket.as_str());
        record.decorate("key", object.key.as_str());
        record.decorate("last_modified", object.last_modified.to_rfc3339());
        if self.settings.include_object_properties {
            record.decorate("size", object.size_bytes.to_string());
            if let Some(etag) = &object.etag {
                record.decorate("etag", etag.as_str());
            }
        }
        if let Some(version) = &header.version {
            record.decorate("cloudfront_version", version.as_str());
        }
        if let Some(fields) = &header.fields {
            record.decorate("cloudfront_fields", fields.as_str());
        }
        for (key, value) in &self.settings.add_fields {
            record.decorate(key, value.as_str());
        }

        self.sink.deliver(record).await
    }
}
