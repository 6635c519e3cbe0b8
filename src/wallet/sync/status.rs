//! Per-wallet sync leases.
//!
//! A wallet is `syncing` exactly while a `SyncLease` for it is alive. Leases are
//! acquired with a compare-and-set on the registry, so at most one run per wallet
//! holds one at a time, and they are released when dropped, on every exit path.

use crate::wallet::{SyncStatus, WalletAddress};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

#[derive(Debug, Clone)]
struct LeaseInfo {
    run_id: u64,
    started_at: DateTime<Utc>,
}

/// Registry of in-flight sync runs, keyed by wallet.
#[derive(Debug, Default)]
pub struct SyncStatusRegistry {
    leases: DashMap<WalletAddress, LeaseInfo>,
    next_run_id: AtomicU64,
}

impl SyncStatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lease for `wallet`, or `None` if another run holds it.
    pub fn try_acquire(self: &Arc<Self>, wallet: &WalletAddress) -> Option<SyncLease> {
        match self.leases.entry(wallet.clone()) {
            Entry::Occupied(existing) => {
                debug!(
                    "Sync run {} for {} already active since {}",
                    existing.get().run_id,
                    wallet,
                    existing.get().started_at
                );
                None
            }
            Entry::Vacant(slot) => {
                let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed) + 1;
                slot.insert(LeaseInfo {
                    run_id,
                    started_at: Utc::now(),
                });
                Some(SyncLease {
                    registry: Arc::clone(self),
                    wallet: wallet.clone(),
                    run_id,
                })
            }
        }
    }

    pub fn status(&self, wallet: &WalletAddress) -> SyncStatus {
        if self.leases.contains_key(wallet) {
            SyncStatus::Syncing
        } else {
            SyncStatus::Idle
        }
    }

    /// Number of wallets currently syncing.
    pub fn active_runs(&self) -> usize {
        self.leases.len()
    }

    fn release(&self, wallet: &WalletAddress, run_id: u64) {
        if self
            .leases
            .remove_if(wallet, |_, info| info.run_id == run_id)
            .is_some()
        {
            debug!("Released sync lease {} for {}", run_id, wallet);
        }
    }
}

/// Proof that the holder is the only run syncing `wallet`.
#[derive(Debug)]
pub struct SyncLease {
    registry: Arc<SyncStatusRegistry>,
    wallet: WalletAddress,
    run_id: u64,
}

impl SyncLease {
    pub fn wallet(&self) -> &WalletAddress {
        &self.wallet
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }
}

impl Drop for SyncLease {
    fn drop(&mut self) {
        self.registry.release(&self.wallet, self.run_id);
    }
}
