//! Progress tracking for a single sync run.
//!
//! `SyncProgressTracker` counts fetched pages and normalized events, measures elapsed
//! time, and turns those counters into `Progress` frames. Percent is estimated against
//! the run's page cap, since the indexer never reports how many pages exist.

use super::events::ProgressFrame;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Counters for one run.
#[derive(Debug, Clone)]
pub struct SyncProgressTracker {
    /// When the run started
    started: Instant,
    /// Upper bound on pages for this run, used as the page estimate
    page_cap: u32,
    /// Pages whose events were received
    pages_processed: u32,
    /// Events normalized so far
    events_so_far: u64,
    /// Records the store failed to write
    write_failures: u64,
}

impl SyncProgressTracker {
    pub fn new(page_cap: u32) -> Self {
        Self {
            started: Instant::now(),
            page_cap: page_cap.max(1),
            pages_processed: 0,
            events_so_far: 0,
            write_failures: 0,
        }
    }

    /// Record a fetched page and the number of events it produced.
    pub fn record_page(&mut self, event_count: usize) {
        self.pages_processed += 1;
        self.events_so_far += event_count as u64;
    }

    /// Record records the store could not write.
    pub fn record_write_failures(&mut self, failed: usize) {
        self.write_failures += failed as u64;
    }

    pub fn pages_processed(&self) -> u32 {
        self.pages_processed
    }

    pub fn events_so_far(&self) -> u64 {
        self.events_so_far
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Estimated completion after `page_index` pages, capped at 100.
    pub fn percent(&self, page_index: u32) -> u8 {
        let percent = (page_index as u64 * 100) / self.page_cap as u64;
        percent.min(100) as u8
    }

    /// `Progress` frame for work on `page_index`.
    pub fn progress_frame(&self, message: impl Into<String>, page_index: u32) -> ProgressFrame {
        ProgressFrame::Progress {
            message: message.into(),
            page_index,
            total_pages_estimate: self.page_cap,
            percent: self.percent(page_index),
            elapsed_ms: u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Log the counters gathered so far.
    pub fn log_progress(&self, wallet: &str) {
        info!(
            "Sync progress for {}: {} pages, {} events ({}% of page cap)",
            wallet,
            self.pages_processed,
            self.events_so_far,
            self.percent(self.pages_processed)
        );
    }

    pub fn stats(&self) -> SyncStats {
        SyncStats {
            pages_processed: self.pages_processed,
            events_processed: self.events_so_far,
            write_failures: self.write_failures,
            elapsed: self.elapsed(),
        }
    }
}

/// Statistics about a finished run
#[derive(Debug, Clone)]
pub struct SyncStats {
    pub pages_processed: u32,
    pub events_processed: u64,
    pub write_failures: u64,
    pub elapsed: Duration,
}

impl SyncStats {
    /// Get a human-readable summary of the sync statistics
    pub fn summary(&self) -> String {
        format!(
            "{} pages, {} events in {:?}{}",
            self.pages_processed,
            self.events_processed,
            self.elapsed,
            if self.write_failures == 0 {
                String::new()
            } else {
                format!(" ({} failed writes)", self.write_failures)
            }
        )
    }
}
