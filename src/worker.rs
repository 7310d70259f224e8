//! Background worker that persists cache entries and reports hit rates.
//!
//! This module is internal -- callers interact with it through
//! [`CacheWorker`](crate::handle::CacheWorker) and
//! [`CacheWriter`](crate::handle::CacheWriter).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, MissedTickBehavior};

use crate::cache::CacheStats;
use crate::handle::WriteJob;
use crate::storage::Storage;

pub async fn run<S: Storage>(
    mut rx: mpsc::Receiver<WriteJob>,
    mut shutdown_rx: oneshot::Receiver<()>,
    storage: S,
    stats: Arc<CacheStats>,
    report_interval: Duration,
) {
    let mut interval = time::interval(report_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // Skip the first immediate tick
    interval.tick().await;

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown_rx => {
                tracing::debug!("Shutdown signal received, draining cache writes");
                rx.close();
                while let Some(job) = rx.recv().await {
                    write(&storage, job).await;
                }
                if stats.total() > 0 {
                    stats.report();
                }
                tracing::debug!("Cache worker shut down");
                return;
            }

            Some(job) = rx.recv() => {
                write(&storage, job).await;
            }

            _ = interval.tick() => {
                if stats.total() > 0 {
                    stats.report();
                }
            }
        }
    }
}

async fn write<S: Storage>(storage: &S, job: WriteJob) {
    if let Err(e) = storage.put(&job.key, &job.bytes, &job.content_type).await {
        tracing::warn!("Failed to write cache entry {}: {e}", job.key);
    }
}
