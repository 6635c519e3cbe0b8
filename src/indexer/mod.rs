//! Indexer integration module for marketplace activity
//!
//! This module provides the client and wire types for the external, rate-limited
//! activity indexer. The indexer serves a wallet's events one cursor page at a time.

/// HTTP client for the activity indexer
mod client;
/// Type definitions for indexer payloads
mod types;

pub use client::{ActivityIndexerClient, EventSource};
pub use types::*;
