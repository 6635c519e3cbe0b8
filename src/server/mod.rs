//! HTTP surface of the sync service.
//!
//! - `GET /health`
//! - `GET /events?address=&maxPages=&refresh=`: SSE stream of progress frames
//! - `GET /events/sync-status?address=`
//! - `POST /events/sync?address=&maxPages=&refresh=`: background trigger, `202 Accepted`
//! - `GET /events/cached?address=&page=&limit=`: paginated read of stored events

mod error;
pub mod handlers;

use crate::config::SyncSettings;
use crate::wallet::sync::SyncOrchestrator;
use crate::wallet::sync::background::SyncWorkerHandle;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;

pub use error::ApiError;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SyncOrchestrator>,
    pub worker: SyncWorkerHandle,
    pub sync: SyncSettings,
}

/// Build the HTTP router with all endpoints.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/events", get(handlers::stream_events))
        .route("/events/sync-status", get(handlers::sync_status))
        .route("/events/sync", post(handlers::trigger_sync))
        .route("/events/cached", get(handlers::cached_events))
        .with_state(state)
}
