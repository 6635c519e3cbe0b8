use crate::indexer::IndexerError;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of a wallet address in bytes.
const ADDRESS_BYTES: usize = 20;

/// A validated, lowercased `0x`-prefixed wallet address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress(String);

impl WalletAddress {
	/// Validate and canonicalize a user supplied address.
	pub fn parse(input: &str) -> Result<Self, WalletSyncError> {
		let trimmed = input.trim();
		if trimmed.is_empty() {
			return Err(WalletSyncError::Validation(
				"wallet address is required".to_string(),
			));
		}

		let hex_part = trimmed
			.strip_prefix("0x")
			.or_else(|| trimmed.strip_prefix("0X"))
			.ok_or_else(|| {
				WalletSyncError::Validation(format!("wallet address {} must start with 0x", trimmed))
			})?;

		let bytes = hex::decode(hex_part).map_err(|e| {
			WalletSyncError::Validation(format!("wallet address {} is not valid hex: {}", trimmed, e))
		})?;
		if bytes.len() != ADDRESS_BYTES {
			return Err(WalletSyncError::Validation(format!(
				"wallet address {} must be {} bytes, got {}",
				trimmed,
				ADDRESS_BYTES,
				bytes.len()
			)));
		}

		Ok(Self(format!("0x{}", hex::encode(bytes))))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for WalletAddress {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl TryFrom<String> for WalletAddress {
	type Error = WalletSyncError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::parse(&value)
	}
}

impl From<WalletAddress> for String {
	fn from(address: WalletAddress) -> Self {
		address.0
	}
}

/// Canonical activity record stored per wallet.
///
/// `(wallet_address, id)` is unique in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
	pub id: String,
	pub wallet_address: WalletAddress,
	pub event_type: String,
	pub created_at: DateTime<Utc>,
	pub transaction_hash: Option<String>,
	pub nft: NftRef,
	pub payment: PaymentInfo,
	pub from_address: Option<String>,
	pub from_username: Option<String>,
	pub to_address: Option<String>,
	pub to_username: Option<String>,
	pub quantity: u64,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NftRef {
	pub contract: Option<String>,
	pub token_id: Option<String>,
	pub name: Option<String>,
	pub image_url: Option<String>,
	pub collection_slug: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInfo {
	/// Amount in the token's smallest unit; `None` when the event carries no payment.
	pub raw_quantity: Option<String>,
	pub token_address: Option<String>,
	pub decimals: String,
	pub symbol: String,
}

impl Default for PaymentInfo {
	fn default() -> Self {
		Self {
			raw_quantity: None,
			token_address: None,
			decimals: "18".to_string(),
			symbol: "ETH".to_string(),
		}
	}
}

/// Whether a sync run is in flight for a wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
	Syncing,
	Idle,
}

/// One page of cached events plus paging metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPage {
	pub events: Vec<NormalizedEvent>,
	pub pagination: Pagination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
	pub current_page: u32,
	pub total_pages: u32,
	pub total_items: u64,
	pub limit: u32,
}

impl Pagination {
	/// Paging metadata for `total_items` split into pages of `limit`. Always at least one page.
	pub fn new(current_page: u32, limit: u32, total_items: u64) -> Self {
		let limit = limit.max(1);
		let total_pages = total_items.div_ceil(limit as u64).max(1);
		Self {
			current_page,
			total_pages: u32::try_from(total_pages).unwrap_or(u32::MAX),
			total_items,
			limit,
		}
	}
}

/// Event store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("Database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error("Corrupt row for event {id}: {reason}")]
	CorruptRow { id: String, reason: String },
}

/// Errors raised by the sync pipeline
#[derive(Debug, thiserror::Error)]
pub enum WalletSyncError {
	#[error("Validation error: {0}")]
	Validation(String),

	#[error("Rate limit exceeded after {attempts} attempts")]
	RateLimitExceeded { attempts: u32 },

	#[error("Upstream error (HTTP {status}): {message}")]
	Upstream { status: u16, message: String },

	#[error("Transport error: {0}")]
	Transport(String),

	#[error("Upstream returned cursor {cursor} twice in a row")]
	CursorStalled { cursor: String },

	#[error("Store error: {0}")]
	Store(#[from] StoreError),

	#[error("A sync is already running for {0}")]
	AlreadySyncing(WalletAddress),

	#[error("Progress stream closed by the receiver")]
	StreamClosed,
}

impl WalletSyncError {
	/// HTTP-style status attached to the terminal `Error` frame.
	pub fn status(&self) -> Option<u16> {
		match self {
			WalletSyncError::Validation(_) => Some(400),
			WalletSyncError::RateLimitExceeded { .. } => Some(429),
			WalletSyncError::Upstream { status, .. } => Some(*status),
			WalletSyncError::AlreadySyncing(_) => Some(409),
			_ => None,
		}
	}
}

impl From<IndexerError> for WalletSyncError {
	fn from(err: IndexerError) -> Self {
		match err {
			IndexerError::RateLimited => WalletSyncError::RateLimitExceeded { attempts: 1 },
			IndexerError::Upstream { status, body } => WalletSyncError::Upstream {
				status,
				message: body,
			},
			other => WalletSyncError::Transport(other.to_string()),
		}
	}
}
