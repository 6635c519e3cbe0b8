use crate::indexer::{EventSource, IndexerError, RawExternalEvent};
use crate::retry::{RetryError, RetryPolicy, Sleeper, execute_with_retry};
use crate::wallet::{WalletAddress, WalletSyncError};
use tracing::{debug, info, warn};

/// One page handed out by the paginator.
#[derive(Debug, Clone)]
pub struct FetchedPage {
	/// 1-based position of the page within this run.
	pub index: u32,
	pub events: Vec<RawExternalEvent>,
	/// Cursor for the following page, if the indexer reported one.
	pub next_cursor: Option<String>,
}

/// Walks the indexer's cursor pages for one wallet, oldest request first.
///
/// Pages are strictly sequential: the cursor for page N+1 is only known once page N
/// has been fetched. Rate-limited pages are retried with `retry`; every other failure
/// aborts the run. A run ends when the indexer stops returning a cursor or when
/// `page_cap` pages have been emitted.
pub struct CursorPaginator<'a> {
	source: &'a dyn EventSource,
	sleeper: &'a dyn Sleeper,
	wallet: &'a WalletAddress,
	retry: RetryPolicy,
	page_cap: u32,
	page_delay: std::time::Duration,
	cursor: Option<String>,
	pages_emitted: u32,
	finished: bool,
	has_more: bool,
}

impl<'a> CursorPaginator<'a> {
	pub fn new(
		source: &'a dyn EventSource,
		sleeper: &'a dyn Sleeper,
		wallet: &'a WalletAddress,
		retry: RetryPolicy,
		page_cap: u32,
		page_delay: std::time::Duration,
	) -> Self {
		Self {
			source,
			sleeper,
			wallet,
			retry,
			page_cap: page_cap.max(1),
			page_delay,
			cursor: None,
			pages_emitted: 0,
			finished: false,
			has_more: false,
		}
	}

	/// Fetch the next page, or `None` once the run is over.
	pub async fn next_page(&mut self) -> Result<Option<FetchedPage>, WalletSyncError> {
		if self.finished {
			return Ok(None);
		}

		if self.pages_emitted > 0 && !self.page_delay.is_zero() {
			self.sleeper.sleep(self.page_delay).await;
		}

		let requested = self.cursor.clone();
		let page = match self.fetch_with_retry(requested.as_deref()).await {
			Ok(page) => page,
			Err(err) => {
				self.finished = true;
				return Err(err);
			}
		};

		self.pages_emitted += 1;
		let index = self.pages_emitted;
		let next_cursor = page.next.filter(|c| !c.is_empty());

		match &next_cursor {
			None => {
				debug!("Page {} for {} is the last page", index, self.wallet);
				self.finished = true;
			}
			Some(next) if requested.as_deref() == Some(next.as_str()) => {
				warn!(
					"Indexer returned cursor {} again for {}, stopping",
					next, self.wallet
				);
				self.finished = true;
				return Err(WalletSyncError::CursorStalled {
					cursor: next.clone(),
				});
			}
			Some(_) if index >= self.page_cap => {
				info!(
					"Reached page cap of {} for {}, more pages remain",
					self.page_cap, self.wallet
				);
				self.finished = true;
				self.has_more = true;
			}
			Some(next) => {
				self.cursor = Some(next.clone());
			}
		}

		Ok(Some(FetchedPage {
			index,
			events: page.events,
			next_cursor,
		}))
	}

	async fn fetch_with_retry(
		&mut self,
		cursor: Option<&str>,
	) -> Result<crate::indexer::RawEventPage, WalletSyncError> {
		let source = self.source;
		let wallet = self.wallet.as_str();
		let page_number = self.pages_emitted + 1;

		let result = execute_with_retry(&mut self.retry, self.sleeper, |attempt| async move {
			match source.fetch_page(wallet, cursor).await {
				Ok(page) => Ok(page),
				Err(IndexerError::RateLimited) => {
					warn!(
						"Rate limited on page {} for {} (attempt {})",
						page_number, wallet, attempt
					);
					Err(backoff::Error::transient(IndexerError::RateLimited))
				}
				Err(err) => Err(backoff::Error::permanent(err)),
			}
		})
		.await;

		match result {
			Ok(page) => Ok(page),
			Err(RetryError::Exhausted { attempts, .. }) => {
				Err(WalletSyncError::RateLimitExceeded { attempts })
			}
			Err(RetryError::Permanent(err)) => Err(err.into()),
		}
	}

	pub fn is_finished(&self) -> bool {
		self.finished
	}

	/// Whether the run stopped at the page cap with pages left upstream.
	pub fn has_more(&self) -> bool {
		self.has_more
	}

	pub fn pages_emitted(&self) -> u32 {
		self.pages_emitted
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_utils::{RecordingSleeper, ScriptStep, ScriptedSource, raw_page, wallet};
	use std::time::Duration;

	fn retry() -> RetryPolicy {
		RetryPolicy::fixed(5, Duration::from_secs(5))
	}

	async fn drain(paginator: &mut CursorPaginator<'_>) -> Result<Vec<FetchedPage>, WalletSyncError> {
		let mut pages = Vec::new();
		while let Some(page) = paginator.next_page().await? {
			pages.push(page);
		}
		Ok(pages)
	}

	#[tokio::test]
	async fn follows_cursors_until_exhausted() {
		let source = ScriptedSource::new(vec![
			ScriptStep::Page(raw_page(&["a", "b"], Some("c2"))),
			ScriptStep::Page(raw_page(&["c"], Some("c3"))),
			ScriptStep::Page(raw_page(&["d"], None)),
		]);
		let sleeper = RecordingSleeper::default();
		let wallet = wallet();
		let mut paginator =
			CursorPaginator::new(&source, &sleeper, &wallet, retry(), 10, Duration::from_millis(500));

		let pages = drain(&mut paginator).await.unwrap();

		assert_eq!(pages.iter().map(|p| p.index).collect::<Vec<_>>(), vec![1, 2, 3]);
		assert_eq!(
			source.requested_cursors(),
			vec![None, Some("c2".to_string()), Some("c3".to_string())]
		);
		assert!(!paginator.has_more());
		// Delay before every page after the first.
		assert_eq!(sleeper.recorded(), vec![Duration::from_millis(500); 2]);
	}

	#[tokio::test]
	async fn stops_at_page_cap_with_more_available() {
		let source = ScriptedSource::endless(2);
		let sleeper = RecordingSleeper::default();
		let wallet = wallet();
		let mut paginator = CursorPaginator::new(&source, &sleeper, &wallet, retry(), 3, Duration::ZERO);

		let pages = drain(&mut paginator).await.unwrap();

		assert_eq!(pages.len(), 3);
		assert_eq!(source.requested_cursors().len(), 3);
		assert!(paginator.has_more());
		assert!(paginator.is_finished());
	}

	#[tokio::test]
	async fn empty_cursor_ends_the_run() {
		let source = ScriptedSource::new(vec![
			ScriptStep::Page(raw_page(&["a"], Some(""))),
			ScriptStep::Page(raw_page(&["never"], None)),
		]);
		let sleeper = RecordingSleeper::default();
		let wallet = wallet();
		let mut paginator = CursorPaginator::new(&source, &sleeper, &wallet, retry(), 10, Duration::ZERO);

		let pages = drain(&mut paginator).await.unwrap();

		assert_eq!(pages.len(), 1);
		assert_eq!(pages[0].next_cursor, None);
		assert!(!paginator.has_more());
	}

	#[tokio::test]
	async fn rate_limited_page_is_retried_then_continues() {
		let source = ScriptedSource::new(vec![
			ScriptStep::Page(raw_page(&["a"], Some("c2"))),
			ScriptStep::RateLimited,
			ScriptStep::RateLimited,
			ScriptStep::Page(raw_page(&["b"], None)),
		]);
		let sleeper = RecordingSleeper::default();
		let wallet = wallet();
		let mut paginator = CursorPaginator::new(&source, &sleeper, &wallet, retry(), 10, Duration::ZERO);

		let pages = drain(&mut paginator).await.unwrap();

		assert_eq!(pages.len(), 2);
		assert_eq!(pages[1].index, 2);
		assert_eq!(sleeper.recorded(), vec![Duration::from_secs(5); 2]);
		// Retries repeat the same cursor.
		assert_eq!(
			source.requested_cursors(),
			vec![
				None,
				Some("c2".to_string()),
				Some("c2".to_string()),
				Some("c2".to_string())
			]
		);
	}

	#[tokio::test]
	async fn retry_budget_is_per_page() {
		let source = ScriptedSource::new(vec![
			ScriptStep::RateLimited,
			ScriptStep::RateLimited,
			ScriptStep::RateLimited,
			ScriptStep::RateLimited,
			ScriptStep::Page(raw_page(&["a"], Some("c2"))),
			ScriptStep::RateLimited,
			ScriptStep::RateLimited,
			ScriptStep::RateLimited,
			ScriptStep::RateLimited,
			ScriptStep::Page(raw_page(&["b"], None)),
		]);
		let sleeper = RecordingSleeper::default();
		let wallet = wallet();
		let mut paginator = CursorPaginator::new(&source, &sleeper, &wallet, retry(), 10, Duration::ZERO);

		let pages = drain(&mut paginator).await.unwrap();
		assert_eq!(pages.len(), 2);
		assert_eq!(sleeper.recorded().len(), 8);
	}

	#[tokio::test]
	async fn persistent_rate_limit_aborts_after_five_attempts() {
		let source = ScriptedSource::new(vec![ScriptStep::RateLimited; 6]);
		let sleeper = RecordingSleeper::default();
		let wallet = wallet();
		let mut paginator = CursorPaginator::new(&source, &sleeper, &wallet, retry(), 10, Duration::ZERO);

		let err = paginator.next_page().await.unwrap_err();

		assert!(matches!(err, WalletSyncError::RateLimitExceeded { attempts: 5 }));
		assert_eq!(source.requested_cursors().len(), 5);
		assert_eq!(sleeper.recorded(), vec![Duration::from_secs(5); 4]);
		assert!(paginator.next_page().await.unwrap().is_none());
	}

	#[tokio::test]
	async fn upstream_error_is_not_retried() {
		let source = ScriptedSource::new(vec![ScriptStep::Upstream(500)]);
		let sleeper = RecordingSleeper::default();
		let wallet = wallet();
		let mut paginator = CursorPaginator::new(&source, &sleeper, &wallet, retry(), 10, Duration::ZERO);

		let err = paginator.next_page().await.unwrap_err();

		assert!(matches!(err, WalletSyncError::Upstream { status: 500, .. }));
		assert_eq!(source.requested_cursors().len(), 1);
		assert!(sleeper.recorded().is_empty());
	}

	#[tokio::test]
	async fn repeated_cursor_aborts_the_run() {
		let source = ScriptedSource::new(vec![
			ScriptStep::Page(raw_page(&["a"], Some("c2"))),
			ScriptStep::Page(raw_page(&["b"], Some("c2"))),
		]);
		let sleeper = RecordingSleeper::default();
		let wallet = wallet();
		let mut paginator = CursorPaginator::new(&source, &sleeper, &wallet, retry(), 10, Duration::ZERO);

		assert!(paginator.next_page().await.unwrap().is_some());
		let err = paginator.next_page().await.unwrap_err();

		assert!(matches!(err, WalletSyncError::CursorStalled { ref cursor } if cursor == "c2"));
		assert!(paginator.is_finished());
	}
}
