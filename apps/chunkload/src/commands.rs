//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chunkload_chunk_store::{ChunkStore, MergeEngine};
use chunkload_transfer::{ChunkReader, HashEvent, spawn_fingerprint};
use chunkload_upload_channel::{UploadClient, UploadServer};
use chunkload_uploader::{UploadCoordinator, UploadEvent, UploadOutcome};

use crate::config::Config;

/// Cancels `cancel` on Ctrl-C.
fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            cancel.cancel();
        }
    });
}

pub async fn serve(config: Config) -> anyhow::Result<()> {
    let store = Arc::new(ChunkStore::open(&config.storage).await?);
    let engine = Arc::new(MergeEngine::from_config(Arc::clone(&store), &config.storage));

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let listener = UploadServer::bind(config.listen_addr.as_str()).await?;
    let server = Arc::new(UploadServer::new(store, engine, cancel));
    server.serve(listener).await?;

    info!("server stopped");
    Ok(())
}

pub async fn upload(config: Config, file: &Path) -> anyhow::Result<()> {
    let mut coordinator = UploadCoordinator::new(config.upload.clone());
    let cancel = coordinator.cancel_token();
    cancel_on_ctrl_c(cancel.clone());

    let client = UploadClient::new(config.server_addr.clone()).with_cancel(cancel);

    let reporter = coordinator.take_events().map(|mut events| {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                report(&event);
            }
        })
    });

    let result = coordinator.upload(&client, file).await;
    drop(coordinator);
    if let Some(reporter) = reporter {
        let _ = reporter.await;
    }

    match result? {
        UploadOutcome::Merged {
            fingerprint, path, ..
        } => println!("{fingerprint}  {path}"),
        UploadOutcome::AlreadyUploaded { fingerprint } => {
            println!("{fingerprint}  already on server")
        }
    }
    Ok(())
}

fn report(event: &UploadEvent) {
    match event {
        UploadEvent::State(state) => info!(?state, "upload state"),
        UploadEvent::HashProgress {
            completed,
            total,
            percentage,
        } => debug!(completed, total, "hashing {percentage:.1}%"),
        UploadEvent::ChunkStored {
            index,
            uploaded,
            to_upload,
            bytes_per_second,
        } => info!(
            index,
            "uploaded {uploaded}/{to_upload} chunks ({:.1} MiB/s)",
            bytes_per_second / (1024.0 * 1024.0)
        ),
        UploadEvent::ChunkFailed { index, error } => warn!(index, %error, "chunk failed"),
        UploadEvent::Done(_) | UploadEvent::Failed { .. } => {}
    }
}

pub async fn hash(file: &Path, chunk_size: u64) -> anyhow::Result<()> {
    let reader = Arc::new(ChunkReader::open(file, chunk_size).await?);
    let specs = reader.specs()?;

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let mut task = spawn_fingerprint(reader, specs, cancel);
    if let Some(mut events) = task.take_events() {
        while let Some(event) = events.recv().await {
            if let HashEvent::Progress {
                completed,
                total,
                percentage,
            } = event
            {
                debug!(completed, total, "hashing {percentage:.1}%");
            }
        }
    }

    let fingerprint = task.join().await?;
    println!("{fingerprint}  {}", file.display());
    Ok(())
}
