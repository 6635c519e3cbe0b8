//!
//! Retry policy and execution helper.
//!
//! `RetryPolicy` is a bounded, fixed-or-computed delay schedule that implements
//! `backoff::backoff::Backoff`. `execute_with_retry` drives any operation that
//! classifies its failures as `backoff::Error::{Transient, Permanent}`, sleeping
//! through an injected `Sleeper` so tests never wait on the wall clock.

use backoff::backoff::Backoff;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Something that can pause the current task.
#[async_trait::async_trait]
pub trait Sleeper: Send + Sync {
	async fn sleep(&self, duration: Duration);
}

/// `Sleeper` backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait::async_trait]
impl Sleeper for TokioSleeper {
	async fn sleep(&self, duration: Duration) {
		tokio::time::sleep(duration).await;
	}
}

type DelayFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Bounded retry schedule.
///
/// `max_attempts` counts every attempt, including the first one. The delay
/// function receives the number of attempts that have failed so far (starting at 1).
#[derive(Clone)]
pub struct RetryPolicy {
	max_attempts: u32,
	delay: DelayFn,
	failed_attempts: u32,
}

impl RetryPolicy {
	/// Same delay between every attempt.
	pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
		Self::with_delay_fn(max_attempts, move |_| delay)
	}

	/// Delay computed from the number of failed attempts.
	pub fn with_delay_fn<F>(max_attempts: u32, delay: F) -> Self
	where
		F: Fn(u32) -> Duration + Send + Sync + 'static,
	{
		Self {
			max_attempts: max_attempts.max(1),
			delay: Arc::new(delay),
			failed_attempts: 0,
		}
	}

	pub fn max_attempts(&self) -> u32 {
		self.max_attempts
	}
}

impl fmt::Debug for RetryPolicy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RetryPolicy")
			.field("max_attempts", &self.max_attempts)
			.field("failed_attempts", &self.failed_attempts)
			.finish()
	}
}

impl Backoff for RetryPolicy {
	fn reset(&mut self) {
		self.failed_attempts = 0;
	}

	fn next_backoff(&mut self) -> Option<Duration> {
		self.failed_attempts = self.failed_attempts.saturating_add(1);
		if self.failed_attempts >= self.max_attempts {
			None
		} else {
			Some((self.delay)(self.failed_attempts))
		}
	}
}

/// Why `execute_with_retry` gave up.
#[derive(Debug)]
pub enum RetryError<E> {
	/// The operation reported a non-retryable failure.
	Permanent(E),
	/// Every allowed attempt failed with a transient error.
	Exhausted { attempts: u32, last: E },
}

/// Run `operation` until it succeeds, fails permanently, or the backoff gives up.
///
/// The operation receives the 1-based attempt number.
pub async fn execute_with_retry<T, E, B, F, Fut>(
	backoff: &mut B,
	sleeper: &dyn Sleeper,
	mut operation: F,
) -> Result<T, RetryError<E>>
where
	B: Backoff,
	F: FnMut(u32) -> Fut,
	Fut: Future<Output = Result<T, backoff::Error<E>>>,
{
	backoff.reset();
	let mut attempt = 0u32;

	loop {
		attempt += 1;
		match operation(attempt).await {
			Ok(value) => return Ok(value),
			Err(backoff::Error::Permanent(err)) => return Err(RetryError::Permanent(err)),
			Err(backoff::Error::Transient { err, .. }) => match backoff.next_backoff() {
				Some(delay) => {
					debug!("Attempt {} failed, retrying in {:?}", attempt, delay);
					sleeper.sleep(delay).await;
				}
				None => {
					return Err(RetryError::Exhausted {
						attempts: attempt,
						last: err,
					});
				}
			},
		}
	}
}
