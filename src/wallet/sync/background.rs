//! Background sync worker.
//!
//! `POST /events/sync` must return before the run finishes. Instead of detaching a task per
//! request, triggers are queued to a `SyncWorker`, which runs each job in its own task,
//! logs failures, and drains in-flight jobs when stopped.

use crate::wallet::sync::events::DiscardSink;
use crate::wallet::sync::{SyncOrchestrator, SyncRequest};
use crate::wallet::WalletSyncError;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

/// Jobs that can wait for the worker before submissions are rejected.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Reasons a job could not be queued.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Sync queue is full")]
    QueueFull,

    #[error("Sync worker is stopped")]
    Stopped,
}

/// Cloneable handle for submitting jobs.
#[derive(Debug, Clone)]
pub struct SyncWorkerHandle {
    jobs: mpsc::Sender<SyncRequest>,
}

impl SyncWorkerHandle {
    /// Queue a sync job without waiting for it to run.
    pub fn submit(&self, request: SyncRequest) -> Result<(), WorkerError> {
        self.jobs.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => WorkerError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => WorkerError::Stopped,
        })
    }
}

/// Supervised worker running queued sync jobs.
pub struct SyncWorker {
    handle: SyncWorkerHandle,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncWorker {
    /// Spawn the worker loop.
    pub fn start(orchestrator: Arc<SyncOrchestrator>) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::channel(DEFAULT_QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(worker_loop(orchestrator, jobs_rx, shutdown_rx));
        info!("Background sync worker started");

        Self {
            handle: SyncWorkerHandle { jobs: jobs_tx },
            shutdown: shutdown_tx,
            task,
        }
    }

    pub fn handle(&self) -> SyncWorkerHandle {
        self.handle.clone()
    }

    /// Stop accepting jobs and wait for running ones to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!("Background sync worker panicked: {}", e);
        }
        info!("Background sync worker stopped");
    }
}

async fn worker_loop(
    orchestrator: Arc<SyncOrchestrator>,
    mut jobs: mpsc::Receiver<SyncRequest>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut running = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            Some(joined) = running.join_next(), if !running.is_empty() => {
                if let Err(e) = joined {
                    error!("Background sync task panicked: {}", e);
                }
            }
            job = jobs.recv() => match job {
                Some(request) => {
                    debug!("Starting background sync for {}", request.wallet);
                    running.spawn(run_job(orchestrator.clone(), request));
                }
                None => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    // Jobs already accepted still run; new submissions now fail with `Stopped`.
    jobs.close();
    while let Some(request) = jobs.recv().await {
        running.spawn(run_job(orchestrator.clone(), request));
    }
    if !running.is_empty() {
        info!("Waiting for {} background syncs to finish", running.len());
    }
    while let Some(joined) = running.join_next().await {
        if let Err(e) = joined {
            error!("Background sync task panicked: {}", e);
        }
    }
}

async fn run_job(orchestrator: Arc<SyncOrchestrator>, request: SyncRequest) {
    let wallet = request.wallet.clone();
    match orchestrator.run(request, DiscardSink).await {
        Ok(outcome) => debug!(
            "Background sync for {} stored {} events",
            wallet, outcome.total_events
        ),
        Err(WalletSyncError::AlreadySyncing(_)) => {
            info!("Background sync for {} skipped, already syncing", wallet)
        }
        Err(e) => error!("Background sync for {} failed: {}", wallet, e),
    }
}
