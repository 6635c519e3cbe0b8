//! Fakes and fixtures shared by unit tests.

use crate::indexer::{EventSource, IndexerError, RawEventPage, RawExternalEvent, RawNft};
use crate::retry::Sleeper;
use crate::wallet::sync::event_store::{EventStore, SqliteEventStore, UpsertReport};
use crate::wallet::{
    EventPage, NftRef, NormalizedEvent, PaymentInfo, StoreError, WalletAddress,
};
use chrono::DateTime;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

pub fn wallet() -> WalletAddress {
    WalletAddress::parse("0x1111111111111111111111111111111111111111").unwrap()
}

pub fn other_wallet() -> WalletAddress {
    WalletAddress::parse("0x2222222222222222222222222222222222222222").unwrap()
}

/// Transfer event with an id, a timestamp in seconds and a transaction hash.
pub fn raw_event(id: &str, timestamp: i64) -> RawExternalEvent {
    RawExternalEvent {
        id: Some(id.to_string()),
        event_type: "transfer".to_string(),
        event_timestamp: Some(timestamp),
        transaction: Some(format!("0xtx-{}", id)),
        nft: Some(RawNft {
            identifier: Some("1".to_string()),
            contract: Some("0xcontract".to_string()),
            ..RawNft::default()
        }),
        from_address: Some("0xfrom".to_string()),
        to_address: Some("0xto".to_string()),
        quantity: Some(1),
        ..RawExternalEvent::default()
    }
}

/// Page of transfer events; later ids get older timestamps.
pub fn raw_page(ids: &[&str], next: Option<&str>) -> RawEventPage {
    RawEventPage {
        events: ids
            .iter()
            .enumerate()
            .map(|(i, id)| raw_event(id, 1_700_000_000 - i as i64))
            .collect(),
        next: next.map(str::to_string),
    }
}

/// Stored event created `created_secs` after the epoch.
pub fn normalized_event(wallet: &WalletAddress, id: &str, created_secs: i64) -> NormalizedEvent {
    let created_at = DateTime::from_timestamp(created_secs, 0).unwrap();
    NormalizedEvent {
        id: id.to_string(),
        wallet_address: wallet.clone(),
        event_type: "sale".to_string(),
        created_at,
        transaction_hash: Some(format!("0xtx-{}", id)),
        nft: NftRef {
            contract: Some("0xcontract".to_string()),
            token_id: Some("7".to_string()),
            name: Some("Token #7".to_string()),
            image_url: None,
            collection_slug: Some("collection".to_string()),
        },
        payment: PaymentInfo::default(),
        from_address: Some("0xseller".to_string()),
        from_username: None,
        to_address: Some("0xseller".to_string()),
        to_username: None,
        quantity: 1,
        updated_at: created_at,
    }
}

/// Sleeper that returns immediately and remembers every requested delay.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    recorded: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn recorded(&self) -> Vec<Duration> {
        self.recorded.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.recorded.lock().unwrap().push(duration);
    }
}

/// One scripted indexer response.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Page(RawEventPage),
    RateLimited,
    Upstream(u16),
}

/// `EventSource` that replays a fixed script.
///
/// Once the script runs out it serves an empty last page. In endless mode every call
/// returns a fresh page with a new cursor.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    steps: Mutex<VecDeque<ScriptStep>>,
    endless_page_size: Option<usize>,
    requests: Mutex<Vec<Option<String>>>,
}

impl ScriptedSource {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            ..Self::default()
        }
    }

    pub fn endless(page_size: usize) -> Self {
        Self {
            endless_page_size: Some(page_size),
            ..Self::default()
        }
    }

    /// Cursor of every request, in order.
    pub fn requested_cursors(&self) -> Vec<Option<String>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl EventSource for ScriptedSource {
    async fn fetch_page(
        &self,
        _wallet: &str,
        cursor: Option<&str>,
    ) -> Result<RawEventPage, IndexerError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(cursor.map(str::to_string));
            requests.len()
        };

        if let Some(page_size) = self.endless_page_size {
            let ids: Vec<String> = (0..page_size).map(|i| format!("p{}-{}", call, i)).collect();
            let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
            let next = format!("cursor-{}", call + 1);
            return Ok(raw_page(&ids, Some(&next)));
        }

        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(ScriptStep::Page(page)) => Ok(page),
            Some(ScriptStep::RateLimited) => Err(IndexerError::RateLimited),
            Some(ScriptStep::Upstream(status)) => Err(IndexerError::Upstream {
                status,
                body: "scripted failure".to_string(),
            }),
            None => Ok(RawEventPage::default()),
        }
    }
}

/// Store whose purge always fails; everything else goes to SQLite.
pub struct FailingPurgeStore {
    inner: SqliteEventStore,
}

impl FailingPurgeStore {
    pub fn new(inner: SqliteEventStore) -> Self {
        Self { inner }
    }
}

#[async_trait::async_trait]
impl EventStore for FailingPurgeStore {
    async fn upsert_many(&self, wallet: &WalletAddress, events: &[NormalizedEvent]) -> UpsertReport {
        self.inner.upsert_many(wallet, events).await
    }

    async fn read_all(&self, wallet: &WalletAddress) -> Result<Vec<NormalizedEvent>, StoreError> {
        self.inner.read_all(wallet).await
    }

    async fn read_page(
        &self,
        wallet: &WalletAddress,
        page: u32,
        limit: u32,
    ) -> Result<EventPage, StoreError> {
        self.inner.read_page(wallet, page, limit).await
    }

    async fn count(&self, wallet: &WalletAddress) -> Result<u64, StoreError> {
        self.inner.count(wallet).await
    }

    async fn purge(&self, _wallet: &WalletAddress) -> Result<u64, StoreError> {
        Err(StoreError::CorruptRow {
            id: "*".to_string(),
            reason: "purge disabled".to_string(),
        })
    }
}
