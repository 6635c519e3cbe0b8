//! Wallet marketplace-activity sync.
//!
//! Pulls a wallet's marketplace events from a rate-limited, cursor-paginated indexer,
//! normalizes them, stores them idempotently, and streams progress to clients over SSE.
//! The `client` module holds the controller that drives a sync from the consumer side.

pub mod client;
pub mod config;
pub mod indexer;
pub mod retry;
pub mod server;
pub mod wallet;

#[cfg(test)]
mod test_utils;
