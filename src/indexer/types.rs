//! Wire types for the marketplace activity indexer.

use serde::{Deserialize, Serialize};

/// One page of account activity as returned by the indexer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEventPage {
    /// Events on this page, newest first.
    #[serde(default, alias = "asset_events")]
    pub events: Vec<RawExternalEvent>,
    /// Cursor for the following page; absent or empty on the last page.
    #[serde(default)]
    pub next: Option<String>,
}

/// A single activity event in the indexer's own shape.
///
/// Different event types populate different subsets of these fields: sales
/// carry a `seller`, transfers and mints carry explicit `from_address` /
/// `to_address`. Nothing here is persisted as-is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawExternalEvent {
    /// Indexer-assigned identifier. Missing on some event types.
    pub id: Option<String>,
    /// Event type tag (`sale`, `transfer`, `mint`, ...).
    #[serde(default)]
    pub event_type: String,
    /// Unix timestamp in seconds.
    pub event_timestamp: Option<i64>,
    /// Transaction hash.
    pub transaction: Option<String>,
    pub nft: Option<RawNft>,
    pub payment: Option<RawPayment>,
    pub seller: Option<String>,
    pub seller_username: Option<String>,
    pub from_address: Option<String>,
    pub from_username: Option<String>,
    pub to_address: Option<String>,
    pub to_username: Option<String>,
    pub quantity: Option<u64>,
}

/// NFT reference attached to an event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawNft {
    /// Token id within the contract.
    pub identifier: Option<String>,
    pub contract: Option<String>,
    pub name: Option<String>,
    pub image_url: Option<String>,
    /// Collection slug.
    pub collection: Option<String>,
}

/// Payment leg of a sale or order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPayment {
    /// Amount in the token's smallest unit, as a decimal string.
    pub quantity: Option<String>,
    pub token_address: Option<String>,
    pub decimals: Option<u32>,
    pub symbol: Option<String>,
}

/// Error types for indexer requests
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    #[error("Rate limited by indexer")]
    RateLimited,

    #[error("Indexer returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}
