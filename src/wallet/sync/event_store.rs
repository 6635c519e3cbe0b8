//! Persistent store of normalized events.
//!
//! Events are keyed by `(wallet_address, id)`. Writes are last-write-wins upserts, so
//! replaying the same upstream pages leaves the store unchanged. Reads are ordered by
//! `created_at` descending.

use crate::wallet::{EventPage, NftRef, NormalizedEvent, Pagination, PaymentInfo, StoreError, WalletAddress};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

/// Outcome of a bulk upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub written: usize,
    pub failed: usize,
}

/// Storage for normalized events.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert or overwrite each event. A failing record does not stop the others.
    async fn upsert_many(&self, wallet: &WalletAddress, events: &[NormalizedEvent]) -> UpsertReport;

    /// Every stored event for `wallet`, newest first.
    async fn read_all(&self, wallet: &WalletAddress) -> Result<Vec<NormalizedEvent>, StoreError>;

    /// One page of stored events, newest first. `page` is 1-based.
    async fn read_page(
        &self,
        wallet: &WalletAddress,
        page: u32,
        limit: u32,
    ) -> Result<EventPage, StoreError>;

    async fn count(&self, wallet: &WalletAddress) -> Result<u64, StoreError>;

    /// Delete every stored event for `wallet`, returning how many were removed.
    async fn purge(&self, wallet: &WalletAddress) -> Result<u64, StoreError>;
}

/// SQLite-backed event store.
///
/// Uses WAL mode for concurrent reads/writes.
#[derive(Clone)]
pub struct SqliteEventStore {
    pool: SqlitePool,
}

impl SqliteEventStore {
    /// Open (or create) the database at `path`.
    pub async fn new(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// In-memory store (for testing).
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(":memory:")?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wallet_events (
                wallet_address TEXT NOT NULL,
                id TEXT NOT NULL CHECK (length(id) > 0),
                event_type TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                transaction_hash TEXT,
                nft_contract TEXT,
                nft_token_id TEXT,
                nft_name TEXT,
                nft_image_url TEXT,
                nft_collection_slug TEXT,
                payment_raw_quantity TEXT,
                payment_token_address TEXT,
                payment_decimals TEXT NOT NULL,
                payment_symbol TEXT NOT NULL,
                from_address TEXT,
                from_username TEXT,
                to_address TEXT,
                to_username TEXT,
                quantity INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (wallet_address, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_wallet_events_created ON wallet_events(wallet_address, created_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_one(&self, event: &NormalizedEvent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO wallet_events (
                wallet_address, id, event_type, created_at, transaction_hash,
                nft_contract, nft_token_id, nft_name, nft_image_url, nft_collection_slug,
                payment_raw_quantity, payment_token_address, payment_decimals, payment_symbol,
                from_address, from_username, to_address, to_username, quantity, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
            ON CONFLICT(wallet_address, id) DO UPDATE SET
                event_type = excluded.event_type,
                created_at = excluded.created_at,
                transaction_hash = excluded.transaction_hash,
                nft_contract = excluded.nft_contract,
                nft_token_id = excluded.nft_token_id,
                nft_name = excluded.nft_name,
                nft_image_url = excluded.nft_image_url,
                nft_collection_slug = excluded.nft_collection_slug,
                payment_raw_quantity = excluded.payment_raw_quantity,
                payment_token_address = excluded.payment_token_address,
                payment_decimals = excluded.payment_decimals,
                payment_symbol = excluded.payment_symbol,
                from_address = excluded.from_address,
                from_username = excluded.from_username,
                to_address = excluded.to_address,
                to_username = excluded.to_username,
                quantity = excluded.quantity,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(event.wallet_address.as_str())
        .bind(&event.id)
        .bind(&event.event_type)
        .bind(event.created_at.timestamp_millis())
        .bind(&event.transaction_hash)
        .bind(&event.nft.contract)
        .bind(&event.nft.token_id)
        .bind(&event.nft.name)
        .bind(&event.nft.image_url)
        .bind(&event.nft.collection_slug)
        .bind(&event.payment.raw_quantity)
        .bind(&event.payment.token_address)
        .bind(&event.payment.decimals)
        .bind(&event.payment.symbol)
        .bind(&event.from_address)
        .bind(&event.from_username)
        .bind(&event.to_address)
        .bind(&event.to_username)
        .bind(i64::try_from(event.quantity).unwrap_or(i64::MAX))
        .bind(event.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT wallet_address, id, event_type, created_at, transaction_hash,
           nft_contract, nft_token_id, nft_name, nft_image_url, nft_collection_slug,
           payment_raw_quantity, payment_token_address, payment_decimals, payment_symbol,
           from_address, from_username, to_address, to_username, quantity, updated_at
    FROM wallet_events
"#;

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn upsert_many(&self, wallet: &WalletAddress, events: &[NormalizedEvent]) -> UpsertReport {
        let mut report = UpsertReport::default();
        for event in events {
            match self.upsert_one(event).await {
                Ok(()) => report.written += 1,
                Err(e) => {
                    warn!("Failed to store event {} for {}: {}", event.id, wallet, e);
                    report.failed += 1;
                }
            }
        }
        debug!(
            "Stored {} events for {} ({} failed)",
            report.written, wallet, report.failed
        );
        report
    }

    async fn read_all(&self, wallet: &WalletAddress) -> Result<Vec<NormalizedEvent>, StoreError> {
        let query = format!(
            "{} WHERE wallet_address = ?1 ORDER BY created_at DESC, id ASC",
            SELECT_COLUMNS
        );
        let rows = sqlx::query_as::<_, EventRow>(&query)
            .bind(wallet.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(NormalizedEvent::try_from).collect()
    }

    async fn read_page(
        &self,
        wallet: &WalletAddress,
        page: u32,
        limit: u32,
    ) -> Result<EventPage, StoreError> {
        let page = page.max(1);
        let limit = limit.max(1);
        let total_items = self.count(wallet).await?;
        let offset = (page as i64 - 1) * limit as i64;

        let query = format!(
            "{} WHERE wallet_address = ?1 ORDER BY created_at DESC, id ASC LIMIT ?2 OFFSET ?3",
            SELECT_COLUMNS
        );
        let rows = sqlx::query_as::<_, EventRow>(&query)
            .bind(wallet.as_str())
            .bind(limit as i64)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let events = rows
            .into_iter()
            .map(NormalizedEvent::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(EventPage {
            events,
            pagination: Pagination::new(page, limit, total_items),
        })
    }

    async fn count(&self, wallet: &WalletAddress) -> Result<u64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM wallet_events WHERE wallet_address = ?1")
                .bind(wallet.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }

    async fn purge(&self, wallet: &WalletAddress) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM wallet_events WHERE wallet_address = ?1")
            .bind(wallet.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Row type for database queries.
#[derive(sqlx::FromRow)]
struct EventRow {
    wallet_address: String,
    id: String,
    event_type: String,
    created_at: i64,
    transaction_hash: Option<String>,
    nft_contract: Option<String>,
    nft_token_id: Option<String>,
    nft_name: Option<String>,
    nft_image_url: Option<String>,
    nft_collection_slug: Option<String>,
    payment_raw_quantity: Option<String>,
    payment_token_address: Option<String>,
    payment_decimals: String,
    payment_symbol: String,
    from_address: Option<String>,
    from_username: Option<String>,
    to_address: Option<String>,
    to_username: Option<String>,
    quantity: i64,
    updated_at: i64,
}

fn millis_to_datetime(id: &str, millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| StoreError::CorruptRow {
        id: id.to_string(),
        reason: format!("timestamp {} out of range", millis),
    })
}

impl TryFrom<EventRow> for NormalizedEvent {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let wallet_address =
            WalletAddress::parse(&row.wallet_address).map_err(|e| StoreError::CorruptRow {
                id: row.id.clone(),
                reason: e.to_string(),
            })?;
        let created_at = millis_to_datetime(&row.id, row.created_at)?;
        let updated_at = millis_to_datetime(&row.id, row.updated_at)?;

        Ok(NormalizedEvent {
            id: row.id,
            wallet_address,
            event_type: row.event_type,
            created_at,
            transaction_hash: row.transaction_hash,
            nft: NftRef {
                contract: row.nft_contract,
                token_id: row.nft_token_id,
                name: row.nft_name,
                image_url: row.nft_image_url,
                collection_slug: row.nft_collection_slug,
            },
            payment: PaymentInfo {
                raw_quantity: row.payment_raw_quantity,
                token_address: row.payment_token_address,
                decimals: row.payment_decimals,
                symbol: row.payment_symbol,
            },
            from_address: row.from_address,
            from_username: row.from_username,
            to_address: row.to_address,
            to_username: row.to_username,
            quantity: row.quantity.max(0) as u64,
            updated_at,
        })
    }
}
