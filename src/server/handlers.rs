//! Route handlers.

use super::AppState;
use super::error::ApiError;
use crate::wallet::sync::SyncRequest;
use crate::wallet::sync::events::ProgressFrame;
use crate::wallet::{EventPage, SyncStatus, WalletAddress};
use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

/// Frames buffered between a run and its SSE response.
const FRAME_BUFFER: usize = 16;

/// Default number of events per cached page.
const DEFAULT_PAGE_LIMIT: u32 = 20;
/// Largest number of events per cached page.
const MAX_PAGE_LIMIT: u32 = 100;

/// Query for `GET /events` and `POST /events/sync`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQuery {
    pub address: Option<String>,
    pub max_pages: Option<u32>,
    #[serde(default)]
    pub refresh: bool,
}

/// Query for endpoints that only need a wallet.
#[derive(Debug, Deserialize)]
pub struct AddressQuery {
    pub address: Option<String>,
}

/// Query for `GET /events/cached`.
#[derive(Debug, Deserialize)]
pub struct CachedQuery {
    pub address: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct SyncStatusResponse {
    pub address: WalletAddress,
    pub status: SyncStatus,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub address: WalletAddress,
    pub accepted: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub active_syncs: usize,
}

fn parse_address(address: Option<&str>) -> Result<WalletAddress, ApiError> {
    Ok(WalletAddress::parse(address.unwrap_or_default())?)
}

fn sync_request(state: &AppState, query: &SyncQuery) -> Result<SyncRequest, ApiError> {
    Ok(SyncRequest {
        wallet: parse_address(query.address.as_deref())?,
        max_pages: state.sync.clamp_max_pages(query.max_pages),
        refresh: query.refresh,
    })
}

fn frame_event(frame: &ProgressFrame) -> Event {
    Event::default().data(frame_data(frame))
}

/// JSON for one SSE `data:` field. A frame that cannot be encoded is replaced by an
/// `Error` frame, so the client decoder always sees a `ProgressFrame`.
fn frame_data<T: Serialize>(frame: &T) -> String {
    match serde_json::to_string(frame) {
        Ok(data) => data,
        Err(e) => {
            warn!("Failed to encode progress frame: {}", e);
            let fallback = ProgressFrame::Error {
                message: format!("Failed to encode progress frame: {}", e),
                status: Some(500),
            };
            serde_json::to_string(&fallback).unwrap_or_else(|_| {
                r#"{"type":"error","message":"Failed to encode progress frame","status":500}"#
                    .to_string()
            })
        }
    }
}

/// `GET /events`: run a sync and stream its frames.
///
/// Address validation happens before the stream opens, so a bad address is a plain 400.
pub async fn stream_events(
    State(state): State<AppState>,
    Query(query): Query<SyncQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let request = sync_request(&state, &query)?;
    info!(
        "Streaming sync for {} (max pages: {}, refresh: {})",
        request.wallet, request.max_pages, request.refresh
    );

    let (tx, rx) = mpsc::channel::<ProgressFrame>(FRAME_BUFFER);
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        let wallet = request.wallet.clone();
        if let Err(e) = orchestrator.run(request, tx).await {
            debug!("Streamed sync for {} ended with error: {}", wallet, e);
        }
    });

    let stream = ReceiverStream::new(rx).map(|frame| Ok(frame_event(&frame)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// `GET /events/sync-status`
pub async fn sync_status(
    State(state): State<AppState>,
    Query(query): Query<AddressQuery>,
) -> Result<Json<SyncStatusResponse>, ApiError> {
    let address = parse_address(query.address.as_deref())?;
    let status = state.orchestrator.status().status(&address);
    Ok(Json(SyncStatusResponse { address, status }))
}

/// `POST /events/sync`: queue a background sync and return immediately.
pub async fn trigger_sync(
    State(state): State<AppState>,
    Query(query): Query<SyncQuery>,
) -> Result<(StatusCode, Json<TriggerResponse>), ApiError> {
    let request = sync_request(&state, &query)?;
    let address = request.wallet.clone();
    state.worker.submit(request)?;
    debug!("Queued background sync for {}", address);

    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            address,
            accepted: true,
        }),
    ))
}

/// `GET /events/cached`: one page of stored events.
pub async fn cached_events(
    State(state): State<AppState>,
    Query(query): Query<CachedQuery>,
) -> Result<Json<EventPage>, ApiError> {
    let address = parse_address(query.address.as_deref())?;
    let page = query.page.unwrap_or(1).max(1);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_LIMIT)
        .clamp(1, MAX_PAGE_LIMIT);

    let events = state.orchestrator.store().read_page(&address, page, limit).await?;
    Ok(Json(events))
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_syncs: state.orchestrator.status().active_runs(),
    })
}
