//!
//! HTTP client for the marketplace activity indexer.
//!
//! The indexer exposes a cursor-paginated account activity endpoint guarded by an
//! API key header. A `429` response means the caller is being rate limited; any other
//! non-success status is reported as-is. Retrying is the caller's concern.

use super::types::*;
use crate::config::UpstreamConfig;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Source of raw activity pages.
///
/// Implemented by the HTTP client and by scripted sources in tests.
#[async_trait::async_trait]
pub trait EventSource: Send + Sync {
	/// Fetch one page of events for `wallet`, starting at `cursor` (first page when `None`).
	async fn fetch_page(
		&self,
		wallet: &str,
		cursor: Option<&str>,
	) -> Result<RawEventPage, IndexerError>;
}

/// Activity indexer client
#[derive(Clone)]
pub struct ActivityIndexerClient {
	/// The underlying HTTP client.
	http_client: Client,
	/// Base URL of the indexer API, without trailing slash.
	base_url: String,
	/// Value of the `x-api-key` header, if configured.
	api_key: Option<String>,
	/// Chain the account activity is queried on.
	chain: String,
	/// Number of events requested per page.
	page_size: u32,
	/// Event type filter sent with every request.
	event_types: Vec<String>,
}

impl ActivityIndexerClient {
	/// Create a new indexer client from the upstream configuration.
	///
	/// # Errors
	/// Returns `IndexerError::HttpError` if the HTTP client cannot be built.
	pub fn new(config: &UpstreamConfig) -> Result<Self, IndexerError> {
		let http_client = Client::builder()
			.timeout(Duration::from_secs(config.request_timeout_secs))
			.build()?;

		Ok(Self {
			http_client,
			base_url: config.base_url.trim_end_matches('/').to_string(),
			api_key: config.api_key.clone(),
			chain: config.chain.clone(),
			page_size: config.effective_page_size(),
			event_types: config.event_types.clone(),
		})
	}

	fn query_params(&self, cursor: Option<&str>) -> Vec<(&'static str, String)> {
		let mut params = vec![
			("chain", self.chain.clone()),
			("limit", self.page_size.to_string()),
		];
		for event_type in &self.event_types {
			params.push(("event_type", event_type.clone()));
		}
		if let Some(cursor) = cursor.filter(|c| !c.is_empty()) {
			params.push(("next", cursor.to_string()));
		}
		params
	}
}

#[async_trait::async_trait]
impl EventSource for ActivityIndexerClient {
	async fn fetch_page(
		&self,
		wallet: &str,
		cursor: Option<&str>,
	) -> Result<RawEventPage, IndexerError> {
		let url = format!("{}/events/accounts/{}", self.base_url, wallet);
		debug!("Requesting activity page for {} (cursor: {:?})", wallet, cursor);

		let mut request = self
			.http_client
			.get(&url)
			.query(&self.query_params(cursor))
			.header("Accept", "application/json");
		if let Some(api_key) = &self.api_key {
			request = request.header("x-api-key", api_key);
		}

		let response = request.send().await?;
		let status = response.status();

		if status == StatusCode::TOO_MANY_REQUESTS {
			return Err(IndexerError::RateLimited);
		}

		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(IndexerError::Upstream {
				status: status.as_u16(),
				body,
			});
		}

		let body = response.text().await?;
		let page: RawEventPage = serde_json::from_str(&body)?;

		debug!(
			"Received {} events for {} (next: {:?})",
			page.events.len(),
			wallet,
			page.next
		);
		Ok(page)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn client_with(config: UpstreamConfig) -> ActivityIndexerClient {
		ActivityIndexerClient::new(&config).unwrap()
	}

	#[test]
	fn first_page_has_no_cursor_param() {
		let client = client_with(UpstreamConfig::default());
		let params = client.query_params(None);

		assert!(params.iter().all(|(key, _)| *key != "next"));
		assert!(params.contains(&("limit", "50".to_string())));
	}

	#[test]
	fn empty_cursor_is_treated_as_first_page() {
		let client = client_with(UpstreamConfig::default());
		let params = client.query_params(Some(""));

		assert!(params.iter().all(|(key, _)| *key != "next"));
	}

	#[test]
	fn event_type_filter_is_repeated() {
		let config = UpstreamConfig {
			event_types: vec!["sale".to_string(), "transfer".to_string()],
			..UpstreamConfig::default()
		};
		let client = client_with(config);
		let params = client.query_params(Some("abc"));

		let types: Vec<_> = params
			.iter()
			.filter(|(key, _)| *key == "event_type")
			.map(|(_, value)| value.as_str())
			.collect();
		assert_eq!(types, vec!["sale", "transfer"]);
		assert!(params.contains(&("next", "abc".to_string())));
	}
}
