//! Handle for queuing cache writes and controlling the background worker.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::cache::CacheStats;
use crate::error::{ArchiverError, Result};
use crate::storage::Storage;
use crate::worker;

/// One cache entry to persist: file name inside the cache directory, body,
/// and the content type it was served with.
#[derive(Clone, Debug)]
pub struct WriteJob {
    pub key: String,
    pub bytes: Arc<[u8]>,
    pub content_type: String,
}

/// Lightweight, cloneable sender for fire-and-forget cache writes.
///
/// Obtained from [`CacheWorker::writer`]. Does **not** own the shutdown
/// signal or the worker join handle -- dropping all writers will not stop the
/// worker.
#[derive(Clone)]
pub struct CacheWriter {
    sender: mpsc::Sender<WriteJob>,
}

impl CacheWriter {
    /// Queue a write. Returns [`ArchiverError::Storage`] if the channel is
    /// full or the worker has stopped.
    pub fn save(&self, job: WriteJob) -> Result<()> {
        self.sender
            .try_send(job)
            .map_err(|e| ArchiverError::Storage(format!("cache writer unavailable: {e}").into()))
    }

    /// Queue a write, logging the error via `tracing` on failure instead of
    /// returning it. A dropped write only costs a cache miss on the next run.
    pub fn save_or_log(&self, job: WriteJob) {
        let key = job.key.clone();
        if let Err(e) = self.save(job) {
            tracing::warn!("Failed to queue cache write for {key}: {e}");
        }
    }
}

/// Owns the background task that persists cache entries and periodically
/// reports the cache hit rate.
pub struct CacheWorker {
    sender: mpsc::Sender<WriteJob>,
    shutdown: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl CacheWorker {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn<S: Storage>(
        storage: S,
        stats: Arc<CacheStats>,
        report_interval: Duration,
        channel_buffer: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<WriteJob>(channel_buffer);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let worker = tokio::spawn(worker::run(rx, shutdown_rx, storage, stats, report_interval));

        Self {
            sender: tx,
            shutdown: Some(shutdown_tx),
            worker: Some(worker),
        }
    }

    pub fn writer(&self) -> CacheWriter {
        CacheWriter {
            sender: self.sender.clone(),
        }
    }

    /// Gracefully shut down the background worker.
    ///
    /// Sends a shutdown signal, waits for the worker to drain any queued
    /// writes, then returns.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.worker.take() {
            let _ = handle.await;
        }
    }
}
