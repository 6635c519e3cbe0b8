//! Mapping from raw indexer events to `NormalizedEvent`.
//!
//! Each event kind resolves its counterparties with its own function, chosen from
//! `PARTY_RESOLVERS`. Everything else is shared: payment defaults, NFT fields, and
//! id synthesis for events the indexer did not assign an id to.

use crate::indexer::RawExternalEvent;
use crate::wallet::{NftRef, NormalizedEvent, PaymentInfo, WalletAddress};

use chrono::{DateTime, Utc};

/// Event kinds the indexer reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
	Sale,
	Transfer,
	Mint,
	Order,
	Cancel,
	Other,
}

impl EventKind {
	pub fn from_tag(tag: &str) -> Self {
		match tag.trim().to_ascii_lowercase().as_str() {
			"sale" => EventKind::Sale,
			"transfer" => EventKind::Transfer,
			"mint" => EventKind::Mint,
			"order" | "listing" | "offer" => EventKind::Order,
			"cancel" => EventKind::Cancel,
			_ => EventKind::Other,
		}
	}
}

/// Sender and receiver of an event.
#[derive(Debug, Clone, Default, PartialEq)]
struct Parties {
	from_address: Option<String>,
	from_username: Option<String>,
	to_address: Option<String>,
	to_username: Option<String>,
}

type PartyResolver = fn(&RawExternalEvent) -> Parties;

const PARTY_RESOLVERS: &[(EventKind, PartyResolver)] = &[
	(EventKind::Sale, seller_parties),
	(EventKind::Transfer, explicit_parties),
	(EventKind::Mint, explicit_parties),
	(EventKind::Order, explicit_parties),
	(EventKind::Cancel, explicit_parties),
	(EventKind::Other, explicit_parties),
];

fn party_resolver(kind: EventKind) -> PartyResolver {
	PARTY_RESOLVERS
		.iter()
		.find(|(k, _)| *k == kind)
		.map(|(_, resolver)| *resolver)
		.unwrap_or(explicit_parties)
}

/// Sales report a single `seller` field; both sides of the record come from it.
fn seller_parties(raw: &RawExternalEvent) -> Parties {
	Parties {
		from_address: raw.seller.clone(),
		from_username: raw.seller_username.clone(),
		to_address: raw.seller.clone(),
		to_username: raw.seller_username.clone(),
	}
}

fn explicit_parties(raw: &RawExternalEvent) -> Parties {
	Parties {
		from_address: raw.from_address.clone(),
		from_username: raw.from_username.clone(),
		to_address: raw.to_address.clone(),
		to_username: raw.to_username.clone(),
	}
}

/// Id for an event the indexer did not identify.
///
/// Unique within a page: the event's position on the page is part of the id.
fn synthesize_id(
	raw: &RawExternalEvent,
	now: DateTime<Utc>,
	page_index: u32,
	position: usize,
) -> String {
	let token_id = raw.nft.as_ref().and_then(|nft| nft.identifier.as_deref());
	format!(
		"{}-{}-{}-{}-{}",
		raw.transaction.as_deref().unwrap_or("notx"),
		token_id.unwrap_or("notoken"),
		now.timestamp_millis(),
		page_index,
		position
	)
}

fn payment_info(raw: &RawExternalEvent) -> PaymentInfo {
	let defaults = PaymentInfo::default();
	match &raw.payment {
		Some(payment) => PaymentInfo {
			raw_quantity: payment.quantity.clone(),
			token_address: payment.token_address.clone(),
			decimals: payment
				.decimals
				.map(|d| d.to_string())
				.unwrap_or(defaults.decimals),
			symbol: payment.symbol.clone().unwrap_or(defaults.symbol),
		},
		None => defaults,
	}
}

/// Normalize one raw event fetched on page `page_index` for `wallet`.
///
/// `now` stamps `updated_at`, stands in for a missing timestamp, and feeds id synthesis.
pub fn normalize(
	wallet: &WalletAddress,
	raw: &RawExternalEvent,
	page_index: u32,
	now: DateTime<Utc>,
) -> NormalizedEvent {
	normalize_at(wallet, raw, page_index, 0, now)
}

fn normalize_at(
	wallet: &WalletAddress,
	raw: &RawExternalEvent,
	page_index: u32,
	position: usize,
	now: DateTime<Utc>,
) -> NormalizedEvent {
	let kind = EventKind::from_tag(&raw.event_type);
	let parties = party_resolver(kind)(raw);

	let id = raw
		.id
		.clone()
		.filter(|id| !id.is_empty())
		.unwrap_or_else(|| synthesize_id(raw, now, page_index, position));

	let created_at = raw
		.event_timestamp
		.and_then(|secs| DateTime::from_timestamp(secs, 0))
		.unwrap_or(now);

	let nft = raw
		.nft
		.as_ref()
		.map(|nft| NftRef {
			contract: nft.contract.clone(),
			token_id: nft.identifier.clone(),
			name: nft.name.clone(),
			image_url: nft.image_url.clone(),
			collection_slug: nft.collection.clone(),
		})
		.unwrap_or_default();

	NormalizedEvent {
		id,
		wallet_address: wallet.clone(),
		event_type: raw.event_type.trim().to_ascii_lowercase(),
		created_at,
		transaction_hash: raw.transaction.clone(),
		nft,
		payment: payment_info(raw),
		from_address: parties.from_address,
		from_username: parties.from_username,
		to_address: parties.to_address,
		to_username: parties.to_username,
		quantity: raw.quantity.unwrap_or(1),
		updated_at: now,
	}
}

/// Normalize every event of one page.
pub fn normalize_page(
	wallet: &WalletAddress,
	raw_events: &[RawExternalEvent],
	page_index: u32,
	now: DateTime<Utc>,
) -> Vec<NormalizedEvent> {
	raw_events
		.iter()
		.enumerate()
		.map(|(position, raw)| normalize_at(wallet, raw, page_index, position, now))
		.collect()
}
