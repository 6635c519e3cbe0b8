//!
//! Client-side access to the sync service.
//!
//! `ActivityApi` is what the controller needs from the service: a cached page, the sync
//! status, and a fire-and-forget trigger. `HttpActivityApi` implements it over reqwest and
//! also exposes the SSE progress stream, decoded frame by frame with `SseFrameDecoder`.

use crate::wallet::sync::events::ProgressFrame;
use crate::wallet::{EventPage, SyncStatus, WalletAddress};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::{Client, Response};
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

/// Errors raised by client transports.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("Service returned HTTP {status}: {body}")]
	Status { status: u16, body: String },

	#[error("Invalid frame: {0}")]
	Decode(#[from] serde_json::Error),

	#[error("Invalid address: {0}")]
	Resolution(String),
}

/// Service operations the controller depends on.
#[async_trait::async_trait]
pub trait ActivityApi: Send + Sync + 'static {
	async fn cached_page(
		&self,
		wallet: &WalletAddress,
		page: u32,
		limit: u32,
	) -> Result<EventPage, ClientError>;

	async fn sync_status(&self, wallet: &WalletAddress) -> Result<SyncStatus, ClientError>;

	/// Ask the service to sync `wallet` in the background.
	async fn trigger_sync(&self, wallet: &WalletAddress) -> Result<(), ClientError>;
}

/// Turns user input into a wallet address.
#[async_trait::async_trait]
pub trait AddressResolver: Send + Sync + 'static {
	async fn resolve(&self, input: &str) -> Result<WalletAddress, ClientError>;
}

/// Accepts `0x`-prefixed 20-byte hex addresses only.
#[derive(Debug, Clone, Copy, Default)]
pub struct HexAddressResolver;

#[async_trait::async_trait]
impl AddressResolver for HexAddressResolver {
	async fn resolve(&self, input: &str) -> Result<WalletAddress, ClientError> {
		WalletAddress::parse(input).map_err(|e| ClientError::Resolution(e.to_string()))
	}
}

#[derive(Debug, Deserialize)]
struct StatusBody {
	status: SyncStatus,
}

/// Stream of decoded progress frames.
pub type FrameStream = BoxStream<'static, Result<ProgressFrame, ClientError>>;

/// HTTP client for the sync service
#[derive(Clone)]
pub struct HttpActivityApi {
	http_client: Client,
	base_url: String,
	/// Timeout for non-streaming requests.
	request_timeout: Duration,
}

impl HttpActivityApi {
	/// Create a client for the service at `base_url`.
	///
	/// The underlying client has no global timeout so progress streams can stay open.
	pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, ClientError> {
		Ok(Self {
			http_client: Client::builder().build()?,
			base_url: base_url.trim_end_matches('/').to_string(),
			request_timeout,
		})
	}

	async fn check(response: Response) -> Result<Response, ClientError> {
		let status = response.status();
		if status.is_success() {
			return Ok(response);
		}
		let body = response.text().await.unwrap_or_default();
		Err(ClientError::Status {
			status: status.as_u16(),
			body,
		})
	}

	/// Open `GET /events` and decode its frames as they arrive.
	///
	/// The stream ends after the server closes the response.
	pub async fn stream_events(
		&self,
		wallet: &WalletAddress,
		max_pages: Option<u32>,
		refresh: bool,
	) -> Result<FrameStream, ClientError> {
		let mut params = vec![
			("address", wallet.to_string()),
			("refresh", refresh.to_string()),
		];
		if let Some(max_pages) = max_pages {
			params.push(("maxPages", max_pages.to_string()));
		}

		let response = self
			.http_client
			.get(format!("{}/events", self.base_url))
			.query(&params)
			.header("Accept", "text/event-stream")
			.send()
			.await?;
		let response = Self::check(response).await?;
		debug!("Progress stream opened for {}", wallet);

		let bytes = Box::pin(response.bytes_stream());
		let state = (bytes, SseFrameDecoder::default(), VecDeque::new(), false);

		let frames = futures_util::stream::unfold(
			state,
			|(mut bytes, mut decoder, mut pending, mut done)| async move {
				loop {
					if let Some(frame) = pending.pop_front() {
						return Some((frame, (bytes, decoder, pending, done)));
					}
					if done {
						return None;
					}
					match bytes.next().await {
						Some(Ok(chunk)) => pending.extend(decoder.push(&chunk)),
						Some(Err(e)) => {
							done = true;
							pending.push_back(Err(ClientError::Http(e)));
						}
						None => {
							done = true;
							pending.extend(decoder.finish());
						}
					}
				}
			},
		);

		Ok(frames.boxed())
	}
}

#[async_trait::async_trait]
impl ActivityApi for HttpActivityApi {
	async fn cached_page(
		&self,
		wallet: &WalletAddress,
		page: u32,
		limit: u32,
	) -> Result<EventPage, ClientError> {
		let response = self
			.http_client
			.get(format!("{}/events/cached", self.base_url))
			.query(&[
				("address", wallet.to_string()),
				("page", page.to_string()),
				("limit", limit.to_string()),
			])
			.timeout(self.request_timeout)
			.send()
			.await?;
		let body = Self::check(response).await?.text().await?;
		Ok(serde_json::from_str(&body)?)
	}

	async fn sync_status(&self, wallet: &WalletAddress) -> Result<SyncStatus, ClientError> {
		let response = self
			.http_client
			.get(format!("{}/events/sync-status", self.base_url))
			.query(&[("address", wallet.as_str())])
			.timeout(self.request_timeout)
			.send()
			.await?;
		let body = Self::check(response).await?.text().await?;
		let parsed: StatusBody = serde_json::from_str(&body)?;
		Ok(parsed.status)
	}

	async fn trigger_sync(&self, wallet: &WalletAddress) -> Result<(), ClientError> {
		let response = self
			.http_client
			.post(format!("{}/events/sync", self.base_url))
			.query(&[("address", wallet.as_str())])
			.timeout(self.request_timeout)
			.send()
			.await?;
		Self::check(response).await?;
		Ok(())
	}
}

/// Incremental decoder for `text/event-stream` bodies carrying JSON frames.
///
/// Events are separated by a blank line. Only `data:` lines are read; comments such as
/// keep-alives produce nothing.
#[derive(Debug, Default)]
pub struct SseFrameDecoder {
	buffer: Vec<u8>,
}

impl SseFrameDecoder {
	/// Feed a chunk and return every event it completed.
	pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<ProgressFrame, ClientError>> {
		self.buffer
			.extend(chunk.iter().copied().filter(|byte| *byte != b'\r'));

		let mut frames = Vec::new();
		while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
			let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
			if let Some(frame) = parse_block(&block[..end]) {
				frames.push(frame);
			}
		}
		frames
	}

	/// Decode whatever is left once the body has ended.
	pub fn finish(&mut self) -> Option<Result<ProgressFrame, ClientError>> {
		let block = std::mem::take(&mut self.buffer);
		parse_block(&block)
	}
}

fn parse_block(block: &[u8]) -> Option<Result<ProgressFrame, ClientError>> {
	let text = String::from_utf8_lossy(block);
	let data: Vec<&str> = text
		.lines()
		.filter_map(|line| line.strip_prefix("data:"))
		.map(|value| value.strip_prefix(' ').unwrap_or(value))
		.collect();
	if data.is_empty() {
		return None;
	}
	Some(serde_json::from_str(&data.join("\n")).map_err(ClientError::from))
}
