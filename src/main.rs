use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::{
    io::{AsyncWriteExt, stdout},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use object_ingest::{
    config,
    models::record::Record,
    services::{
        checkpoint::CheckpointStore,
        ingest::{IngestCycle, IngestSettings},
        scheduler::Scheduler,
        startup,
        store_service::StoreService,
    },
};

const RECORD_BUFFER: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup (stdout carries records) ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // --- Parse config ---
    let cfg = config::AppConfig::from_env_and_args()?;
    tracing::info!("Starting object-ingest with config: {:?}", cfg);

    // --- Validate everything a cycle depends on before the first one ---
    let store = Arc::new(StoreService::local(&cfg.store_root));
    startup::prepare(&cfg, store.as_ref()).await?;

    // --- Downstream consumer ---
    let (tx, rx) = mpsc::channel(RECORD_BUFFER);
    let printer = tokio::spawn(print_records(rx));

    // --- Shutdown wiring ---
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            wait_for_signal().await;
            cancel.cancel();
        }
    });

    let mut cycle = IngestCycle::new(
        store,
        IngestSettings {
            bucket: cfg.bucket.clone(),
            prefix: cfg.prefix.clone(),
            temporary_directory: cfg.temporary_directory.clone(),
            gzip_pattern: cfg.gzip_pattern.clone(),
            include_object_properties: cfg.include_object_properties,
            add_fields: cfg.add_fields.clone(),
        },
        cfg.object_filter(),
        cfg.archival_policy(),
        CheckpointStore::new(&cfg.checkpoint_path),
        cfg.decoder(),
        Arc::new(tx),
    );

    Scheduler::new(cfg.interval, cfg.watch_for_new_files)
        .run(&mut cycle, &cancel)
        .await;

    // Dropping the cycle closes the channel, letting the printer drain and exit.
    drop(cycle);
    printer.await.context("record printer panicked")??;

    Ok(())
}

/// Write each record to stdout as one JSON line.
async fn print_records(mut rx: mpsc::Receiver<Record>) -> Result<()> {
    let mut out = stdout();
    while let Some(record) = rx.recv().await {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        out.write_all(&line).await?;
    }
    out.flush().await?;
    Ok(())
}

/// Wait for a `SIGTERM` or `SIGINT`.
#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = term.recv() => tracing::info!("Received SIGTERM"),
                _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT"),
            }
        }
        Err(err) => {
            tracing::warn!("Cannot listen for SIGTERM ({}), only SIGINT stops ingestion", err);
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received SIGINT");
        }
    }
}

/// Wait for a `ctrl+c` on non-UNIX systems.
#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Received SIGINT");
}
