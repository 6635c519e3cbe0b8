//! Sync orchestrator for a single wallet.
//!
//! This module defines `SyncOrchestrator`, which decides how a sync request is served and drives
//! the run to its single terminal frame:
//!
//! - A wallet with cached events and no refresh request is served from the store: one `Progress`,
//!   one `Chunk` with every cached event, then `Complete{from_cache: true}`. The indexer is not called.
//! - Otherwise the orchestrator takes the wallet's lease, purges the cache when a refresh was
//!   requested, and walks the indexer pages in order. Every page is announced with a `Progress`
//!   frame, normalized, upserted, and reported as a `Chunk`.
//! - Any error that breaks page ordering ends the run with an `Error` frame.
//!
//! The lease is held until after the terminal frame has been written, so a client that sees the
//! terminal frame and then asks for the sync status observes `idle`.

use crate::indexer::EventSource;
use crate::retry::{RetryPolicy, Sleeper};
use crate::wallet::sync::{
    event_store::EventStore,
    events::{FrameSink, ProgressFrame, ProgressStreamer},
    normalizer::normalize_page,
    paginator::CursorPaginator,
    progress_tracker::SyncProgressTracker,
    status::{SyncLease, SyncStatusRegistry},
};
use crate::wallet::{WalletAddress, WalletSyncError};

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tuning shared by every run.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Retry schedule applied to each rate-limited page.
    pub retry: RetryPolicy,
    /// Pause between consecutive page requests.
    pub page_delay: Duration,
}

/// A request to sync one wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub wallet: WalletAddress,
    /// Page cap for this run, already clamped by the caller.
    pub max_pages: u32,
    /// Purge cached events and refetch from the first page.
    pub refresh: bool,
}

/// Summary of a successful run, mirrored by the `Complete` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub total_pages: u32,
    pub total_events: u64,
    pub has_more: bool,
    pub from_cache: bool,
}

impl SyncOutcome {
    fn complete_frame(&self) -> ProgressFrame {
        ProgressFrame::Complete {
            total_pages: self.total_pages,
            total_events: self.total_events,
            has_more: self.has_more,
            from_cache: self.from_cache,
        }
    }
}

/// Coordinates paginator, normalizer, store and progress stream for sync runs.
///
/// One orchestrator serves every wallet; runs for different wallets are independent and may
/// proceed concurrently. Runs for the same wallet are serialized by the status registry.
pub struct SyncOrchestrator {
    source: Arc<dyn EventSource>,
    store: Arc<dyn EventStore>,
    status: Arc<SyncStatusRegistry>,
    sleeper: Arc<dyn Sleeper>,
    config: SyncConfig,
}

impl SyncOrchestrator {
    pub fn new(
        source: Arc<dyn EventSource>,
        store: Arc<dyn EventStore>,
        status: Arc<SyncStatusRegistry>,
        sleeper: Arc<dyn Sleeper>,
        config: SyncConfig,
    ) -> Self {
        Self {
            source,
            store,
            status,
            sleeper,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn status(&self) -> &Arc<SyncStatusRegistry> {
        &self.status
    }

    /// Run one sync, writing frames to `sink`.
    ///
    /// Exactly one terminal frame is written and the sink is dropped before this returns,
    /// whatever the outcome.
    pub async fn run<S: FrameSink>(
        &self,
        request: SyncRequest,
        sink: S,
    ) -> Result<SyncOutcome, WalletSyncError> {
        let mut streamer = ProgressStreamer::new(sink);
        let mut lease = None;

        let result = self.drive(&request, &mut streamer, &mut lease).await;

        let terminal = match &result {
            Ok(outcome) => {
                info!(
                    "Sync for {} complete: {} pages, {} events (has_more: {}, from_cache: {})",
                    request.wallet,
                    outcome.total_pages,
                    outcome.total_events,
                    outcome.has_more,
                    outcome.from_cache
                );
                outcome.complete_frame()
            }
            Err(e) => {
                if matches!(e, WalletSyncError::AlreadySyncing(_)) {
                    info!("Sync for {} skipped, another run is active", request.wallet);
                } else {
                    warn!("Sync for {} failed: {}", request.wallet, e);
                }
                ProgressFrame::from_error(e)
            }
        };

        if let Err(e) = streamer.finish(terminal).await {
            debug!("Terminal frame for {} not delivered: {}", request.wallet, e);
        }
        drop(lease);

        result
    }

    async fn drive<S: FrameSink>(
        &self,
        request: &SyncRequest,
        streamer: &mut ProgressStreamer<S>,
        lease: &mut Option<SyncLease>,
    ) -> Result<SyncOutcome, WalletSyncError> {
        let wallet = &request.wallet;

        if !request.refresh {
            let cached = self.store.read_all(wallet).await?;
            if !cached.is_empty() {
                return self.serve_cache(wallet, cached, streamer).await;
            }
        }

        *lease = Some(
            self.status
                .try_acquire(wallet)
                .ok_or_else(|| WalletSyncError::AlreadySyncing(wallet.clone()))?,
        );

        if request.refresh {
            match self.store.purge(wallet).await {
                Ok(removed) => info!("Purged {} cached events for {}", removed, wallet),
                Err(e) => warn!("Failed to purge cached events for {}: {}", wallet, e),
            }
        }

        self.fetch_pages(request, streamer).await
    }

    async fn serve_cache<S: FrameSink>(
        &self,
        wallet: &WalletAddress,
        cached: Vec<crate::wallet::NormalizedEvent>,
        streamer: &mut ProgressStreamer<S>,
    ) -> Result<SyncOutcome, WalletSyncError> {
        let total_events = cached.len() as u64;
        debug!("Serving {} cached events for {}", total_events, wallet);

        let tracker = SyncProgressTracker::new(1);
        streamer
            .emit(tracker.progress_frame(format!("Loaded {} cached events", total_events), 1))
            .await?;
        streamer
            .emit(ProgressFrame::Chunk {
                events: cached,
                page_index: 1,
                total_events_so_far: total_events,
            })
            .await?;

        Ok(SyncOutcome {
            total_pages: 1,
            total_events,
            has_more: false,
            from_cache: true,
        })
    }

    async fn fetch_pages<S: FrameSink>(
        &self,
        request: &SyncRequest,
        streamer: &mut ProgressStreamer<S>,
    ) -> Result<SyncOutcome, WalletSyncError> {
        let wallet = &request.wallet;
        info!(
            "Starting sync for {} (max pages: {}, refresh: {})",
            wallet, request.max_pages, request.refresh
        );

        let mut tracker = SyncProgressTracker::new(request.max_pages);
        let mut paginator = CursorPaginator::new(
            self.source.as_ref(),
            self.sleeper.as_ref(),
            wallet,
            self.config.retry.clone(),
            request.max_pages,
            self.config.page_delay,
        );

        while !paginator.is_finished() {
            let next_index = paginator.pages_emitted() + 1;
            streamer
                .emit(tracker.progress_frame(format!("Fetching page {}", next_index), next_index))
                .await?;

            let Some(page) = paginator.next_page().await? else {
                break;
            };

            let events = normalize_page(wallet, &page.events, page.index, Utc::now());
            let report = self.store.upsert_many(wallet, &events).await;
            if report.failed > 0 {
                warn!(
                    "Page {} for {}: {} of {} events failed to store",
                    page.index,
                    wallet,
                    report.failed,
                    events.len()
                );
            }
            tracker.record_page(events.len());
            tracker.record_write_failures(report.failed);

            streamer
                .emit(ProgressFrame::Chunk {
                    events,
                    page_index: page.index,
                    total_events_so_far: tracker.events_so_far(),
                })
                .await?;
        }

        tracker.log_progress(wallet.as_str());
        info!("Sync stats for {}: {}", wallet, tracker.stats().summary());

        Ok(SyncOutcome {
            total_pages: tracker.pages_processed(),
            total_events: tracker.events_so_far(),
            has_more: paginator.has_more(),
            from_cache: false,
        })
    }
}
