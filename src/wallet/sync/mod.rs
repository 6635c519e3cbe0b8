//! Wallet Activity Synchronization Module
//!
//! This module holds the server side of the activity sync pipeline. Each submodule owns one
//! stage of a run:
//!
//! - `paginator`: Walks the indexer's cursor pages in order, retrying rate-limited pages.
//! - `normalizer`: Maps raw indexer events onto the canonical `NormalizedEvent`.
//! - `event_store`: Idempotent per-wallet persistence of normalized events.
//! - `events`: The progress frame protocol and the streamer that enforces its ordering.
//! - `progress_tracker`: Counts pages and events and builds progress frames.
//! - `status`: Per-wallet run leases, from which `syncing`/`idle` is derived.
//! - `orchestrator`: Chooses cache hit, fresh fetch or forced refresh and drives a run.
//! - `background`: Supervised worker for fire-and-forget sync triggers.

/// Supervised background sync worker
pub mod background;
/// Idempotent event persistence
pub mod event_store;
/// Progress frame protocol
pub mod events;
/// Raw to canonical event mapping
pub mod normalizer;
/// Main coordinator for a sync run
pub mod orchestrator;
/// Cursor pagination with bounded retry
pub mod paginator;
/// Page and event counters for a run
pub mod progress_tracker;
/// Per-wallet sync leases
pub mod status;

pub use orchestrator::*;
