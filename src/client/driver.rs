//! Async driver for the controller state machine.
//!
//! One task owns the state. Commands from the handle, completed requests and the poll
//! timer are turned into `ControllerEvent`s, fed through `on_event`, and the resulting
//! actions are executed here. `Teardown` drops the timer and every in-flight request, so
//! nothing started for a previous wallet can run after an address change or unmount.

use super::api::{ActivityApi, AddressResolver};
use super::controller::{ControllerAction, ControllerEvent, ControllerState, FIRST_PAGE};
use crate::wallet::{SyncStatus, WalletAddress};
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tracing::{debug, warn};

type PendingEvent = BoxFuture<'static, ControllerEvent>;
type PollTimer = Option<(WalletAddress, Pin<Box<Sleep>>)>;

#[derive(Debug)]
enum Command {
	SetAddress(Option<String>),
	Navigate(u32),
	Unmount,
}

/// Client sync controller
pub struct SyncController<A, R> {
	api: Arc<A>,
	resolver: Arc<R>,
	poll_interval: Duration,
	page_size: u32,
}

impl<A: ActivityApi, R: AddressResolver> SyncController<A, R> {
	pub fn new(api: Arc<A>, resolver: Arc<R>, poll_interval: Duration, page_size: u32) -> Self {
		Self {
			api,
			resolver,
			poll_interval,
			page_size,
		}
	}

	/// Start the controller task.
	pub fn spawn(self) -> ControllerHandle {
		let (commands_tx, commands_rx) = mpsc::unbounded_channel();
		let (state_tx, state_rx) = watch::channel(ControllerState::Idle);
		let task = tokio::spawn(self.run(commands_rx, state_tx));

		ControllerHandle {
			commands: commands_tx,
			state: state_rx,
			task,
		}
	}

	async fn run(
		self,
		mut commands: mpsc::UnboundedReceiver<Command>,
		state_tx: watch::Sender<ControllerState>,
	) {
		let mut state = ControllerState::Idle;
		let mut in_flight: FuturesUnordered<PendingEvent> = FuturesUnordered::new();
		let mut timer: PollTimer = None;

		loop {
			let event = tokio::select! {
				command = commands.recv() => match command {
					Some(Command::SetAddress(input)) => ControllerEvent::AddressChanged { input },
					Some(Command::Navigate(page)) => ControllerEvent::NavigateRequested { page },
					Some(Command::Unmount) | None => ControllerEvent::Unmounted,
				},
				Some(event) = in_flight.next(), if !in_flight.is_empty() => event,
				wallet = wait_timer(&mut timer), if timer.is_some() => {
					ControllerEvent::PollTimerFired { wallet }
				}
			};

			let (next, actions) = state.on_event(event);
			state = next;
			state_tx.send_replace(state.clone());

			let mut stop = false;
			for action in actions {
				match action {
					ControllerAction::Teardown => {
						timer = None;
						in_flight.clear();
					}
					ControllerAction::StartPollTimer { wallet } => {
						timer = Some((wallet, Box::pin(tokio::time::sleep(self.poll_interval))));
					}
					ControllerAction::TriggerSync { wallet } => self.trigger_sync(wallet),
					ControllerAction::Stop => stop = true,
					other => {
						if let Some(request) = self.request(other) {
							in_flight.push(request);
						}
					}
				}
			}

			if stop {
				debug!("Sync controller stopped");
				break;
			}
		}
	}

	/// Fire-and-forget. The poll loop, not this call, decides when the sync is over.
	fn trigger_sync(&self, wallet: WalletAddress) {
		let api = self.api.clone();
		tokio::spawn(async move {
			if let Err(e) = api.trigger_sync(&wallet).await {
				warn!("Failed to trigger sync for {}: {}", wallet, e);
			}
		});
	}

	fn request(&self, action: ControllerAction) -> Option<PendingEvent> {
		let api = self.api.clone();
		let page_size = self.page_size;

		let request = match action {
			ControllerAction::Resolve { input } => {
				let resolver = self.resolver.clone();
				async move {
					match resolver.resolve(&input).await {
						Ok(wallet) => ControllerEvent::Resolved { input, wallet },
						Err(e) => ControllerEvent::ResolutionFailed {
							input,
							message: e.to_string(),
						},
					}
				}
				.boxed()
			}
			ControllerAction::LoadInitial { wallet } => async move {
				let (page, status) = tokio::join!(
					api.cached_page(&wallet, FIRST_PAGE, page_size),
					fetch_status(api.as_ref(), &wallet),
				);
				ControllerEvent::InitialLoaded {
					page: page.map_err(|e| e.to_string()),
					status,
					wallet,
				}
			}
			.boxed(),
			ControllerAction::CheckStatus { wallet } => async move {
				let status = fetch_status(api.as_ref(), &wallet).await;
				ControllerEvent::StatusChecked { wallet, status }
			}
			.boxed(),
			ControllerAction::ReadPage { wallet, page } => async move {
				match api.cached_page(&wallet, page, page_size).await {
					Ok(loaded) => ControllerEvent::PageLoaded {
						wallet,
						requested: page,
						page: loaded,
					},
					Err(e) => {
						warn!("Failed to read cached page {} for {}: {}", page, wallet, e);
						ControllerEvent::CacheReadFailed {
							wallet,
							requested: page,
							message: e.to_string(),
						}
					}
				}
			}
			.boxed(),
			// Handled inline by the loop.
			ControllerAction::Teardown
			| ControllerAction::TriggerSync { .. }
			| ControllerAction::StartPollTimer { .. }
			| ControllerAction::Stop => return None,
		};
		Some(request)
	}
}

/// Status check that never fails; a transport error reads as idle so polling cannot hang.
async fn fetch_status<A: ActivityApi>(api: &A, wallet: &WalletAddress) -> SyncStatus {
	match api.sync_status(wallet).await {
		Ok(status) => status,
		Err(e) => {
			warn!("Sync status check failed for {}, assuming idle: {}", wallet, e);
			SyncStatus::Idle
		}
	}
}

async fn wait_timer(timer: &mut PollTimer) -> WalletAddress {
	if let Some((_, sleep)) = timer.as_mut() {
		sleep.as_mut().await;
	}
	match timer.take() {
		Some((wallet, _)) => wallet,
		None => std::future::pending().await,
	}
}

/// Handle to a running controller.
pub struct ControllerHandle {
	commands: mpsc::UnboundedSender<Command>,
	state: watch::Receiver<ControllerState>,
	task: JoinHandle<()>,
}

impl ControllerHandle {
	pub fn set_address(&self, input: impl Into<String>) {
		self.send(Command::SetAddress(Some(input.into())));
	}

	pub fn clear_address(&self) {
		self.send(Command::SetAddress(None));
	}

	pub fn navigate(&self, page: u32) {
		self.send(Command::Navigate(page));
	}

	/// Current state.
	pub fn state(&self) -> ControllerState {
		self.state.borrow().clone()
	}

	pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
		self.state.clone()
	}

	/// Tear everything down and wait for the task to exit.
	pub async fn unmount(self) {
		self.send(Command::Unmount);
		if let Err(e) = self.task.await {
			warn!("Sync controller task failed: {}", e);
		}
	}

	fn send(&self, command: Command) {
		if self.commands.send(command).is_err() {
			debug!("Sync controller already stopped");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::client::api::{ClientError, HexAddressResolver};
	use crate::test_utils::{normalized_event, other_wallet, wallet};
	use crate::wallet::{EventPage, Pagination};
	use std::collections::VecDeque;
	use std::sync::Mutex;
	use tokio::time::Instant;

	const POLL: Duration = Duration::from_secs(7);

	/// Scripted service. Each status step also sets how many events the cache holds from
	/// that call on; once the script runs out, `fallback` is returned.
	struct FakeApi {
		started: Instant,
		items: Mutex<u64>,
		script: Mutex<VecDeque<(SyncStatus, u64)>>,
		fallback: SyncStatus,
		status_calls: Mutex<Vec<(WalletAddress, u64)>>,
		page_reads: Mutex<Vec<(u32, u64)>>,
		triggers: Mutex<Vec<WalletAddress>>,
	}

	impl FakeApi {
		fn new(items: u64, script: Vec<(SyncStatus, u64)>, fallback: SyncStatus) -> Arc<Self> {
			Arc::new(Self {
				started: Instant::now(),
				items: Mutex::new(items),
				script: Mutex::new(script.into()),
				fallback,
				status_calls: Mutex::new(Vec::new()),
				page_reads: Mutex::new(Vec::new()),
				triggers: Mutex::new(Vec::new()),
			})
		}

		fn now_secs(&self) -> u64 {
			self.started.elapsed().as_secs()
		}

		fn status_calls(&self) -> Vec<(WalletAddress, u64)> {
			self.status_calls.lock().unwrap().clone()
		}

		fn page_reads(&self) -> Vec<(u32, u64)> {
			self.page_reads.lock().unwrap().clone()
		}

		fn triggers(&self) -> Vec<WalletAddress> {
			self.triggers.lock().unwrap().clone()
		}
	}

	#[async_trait::async_trait]
	impl ActivityApi for FakeApi {
		async fn cached_page(
			&self,
			wallet: &WalletAddress,
			page: u32,
			limit: u32,
		) -> Result<EventPage, ClientError> {
			self.page_reads.lock().unwrap().push((page, self.now_secs()));
			let total = *self.items.lock().unwrap();
			let offset = (page.saturating_sub(1) as u64) * limit as u64;
			let shown = total.saturating_sub(offset).min(limit as u64);
			Ok(EventPage {
				events: (0..shown)
					.map(|i| normalized_event(wallet, &format!("e{}", offset + i), i as i64))
					.collect(),
				pagination: Pagination::new(page, limit, total),
			})
		}

		async fn sync_status(&self, wallet: &WalletAddress) -> Result<SyncStatus, ClientError> {
			self.status_calls
				.lock()
				.unwrap()
				.push((wallet.clone(), self.now_secs()));
			let step = self.script.lock().unwrap().pop_front();
			Ok(match step {
				Some((status, items)) => {
					*self.items.lock().unwrap() = items;
					status
				}
				None => self.fallback,
			})
		}

		async fn trigger_sync(&self, wallet: &WalletAddress) -> Result<(), ClientError> {
			self.triggers.lock().unwrap().push(wallet.clone());
			Ok(())
		}
	}

	fn start(api: &Arc<FakeApi>) -> ControllerHandle {
		SyncController::new(api.clone(), Arc::new(HexAddressResolver), POLL, 20).spawn()
	}

	async fn wait_until(handle: &ControllerHandle, check: impl FnMut(&ControllerState) -> bool) {
		let mut rx = handle.subscribe();
		tokio::time::timeout(Duration::from_secs(600), rx.wait_for(check))
			.await
			.expect("controller did not reach the expected state")
			.unwrap();
	}

	fn ready_total(state: &ControllerState) -> Option<u64> {
		match state {
			ControllerState::Ready { page, .. } => Some(page.pagination.total_items),
			_ => None,
		}
	}

	/// Every state the controller publishes, with the number of status calls made so far.
	fn record_states(
		handle: &ControllerHandle,
		api: &Arc<FakeApi>,
	) -> JoinHandle<Vec<(ControllerState, usize)>> {
		let mut rx = handle.subscribe();
		let api = api.clone();
		tokio::spawn(async move {
			let mut seen = Vec::new();
			while rx.changed().await.is_ok() {
				let state = rx.borrow_and_update().clone();
				seen.push((state, api.status_calls().len()));
			}
			seen
		})
	}

	#[tokio::test(start_paused = true)]
	async fn polling_converges_on_idle_then_reloads() {
		let api = FakeApi::new(
			5,
			vec![
				(SyncStatus::Syncing, 5),
				(SyncStatus::Syncing, 5),
				(SyncStatus::Idle, 42),
			],
			SyncStatus::Idle,
		);
		let handle = start(&api);
		let recorder = record_states(&handle, &api);

		handle.set_address(wallet().as_str());
		wait_until(&handle, |s| s.is_ready()).await;

		assert_eq!(ready_total(&handle.state()), Some(42));
		let times: Vec<u64> = api.status_calls().into_iter().map(|(_, t)| t).collect();
		assert_eq!(times, vec![0, 7, 14]);
		// Initial read, then the reload after idle was observed.
		assert_eq!(api.page_reads(), vec![(1, 0), (1, 14)]);
		assert!(api.triggers().is_empty());

		tokio::time::sleep(Duration::from_secs(60)).await;
		assert_eq!(api.status_calls().len(), 3);
		handle.unmount().await;

		let seen = recorder.await.unwrap();
		let mut entered_ready = Vec::new();
		let mut was_ready = false;
		for (state, calls) in &seen {
			if state.is_ready() && !was_ready {
				entered_ready.push((ready_total(state), *calls));
			}
			was_ready = state.is_ready();
		}
		assert_eq!(entered_ready, vec![(Some(42), 3)], "states: {:?}", seen);
		assert!(seen.iter().any(|(s, _)| matches!(s, ControllerState::Polling { .. })));
	}

	#[tokio::test(start_paused = true)]
	async fn empty_cache_triggers_sync_and_polls() {
		let api = FakeApi::new(
			0,
			vec![
				(SyncStatus::Idle, 0),
				(SyncStatus::Syncing, 0),
				(SyncStatus::Idle, 12),
			],
			SyncStatus::Idle,
		);
		let handle = start(&api);

		handle.set_address(wallet().as_str());
		wait_until(&handle, |s| s.is_ready()).await;

		assert_eq!(ready_total(&handle.state()), Some(12));
		assert_eq!(api.triggers(), vec![wallet()]);
		assert_eq!(api.status_calls().len(), 3);
		handle.unmount().await;
	}

	#[tokio::test(start_paused = true)]
	async fn cached_wallet_is_ready_without_polling() {
		let api = FakeApi::new(5, vec![(SyncStatus::Idle, 5)], SyncStatus::Idle);
		let handle = start(&api);

		handle.set_address(wallet().as_str());
		wait_until(&handle, |s| s.is_ready()).await;
		assert_eq!(ready_total(&handle.state()), Some(5));

		tokio::time::sleep(Duration::from_secs(60)).await;
		assert_eq!(api.status_calls().len(), 1);
		assert_eq!(api.triggers(), vec![wallet()]);
		handle.unmount().await;
	}

	#[tokio::test(start_paused = true)]
	async fn navigation_reads_requested_page() {
		let api = FakeApi::new(45, vec![(SyncStatus::Idle, 45)], SyncStatus::Idle);
		let handle = start(&api);

		handle.set_address(wallet().as_str());
		wait_until(&handle, |s| s.is_ready()).await;

		handle.navigate(9);
		wait_until(&handle, |s| {
			matches!(s, ControllerState::Ready { page, .. } if page.pagination.current_page == 3)
		})
		.await;

		match handle.state() {
			ControllerState::Ready { page, .. } => assert_eq!(page.events.len(), 5),
			other => panic!("unexpected state {:?}", other),
		}
		handle.unmount().await;
	}

	#[tokio::test(start_paused = true)]
	async fn address_change_cancels_previous_polling() {
		let api = FakeApi::new(0, vec![], SyncStatus::Syncing);
		let handle = start(&api);

		handle.set_address(wallet().as_str());
		wait_until(&handle, |s| matches!(s, ControllerState::Polling { .. })).await;
		tokio::time::sleep(Duration::from_secs(10)).await;

		handle.set_address(other_wallet().as_str());
		wait_until(&handle, |s| s.wallet() == Some(&other_wallet())).await;
		wait_until(&handle, |s| matches!(s, ControllerState::Polling { .. })).await;
		tokio::time::sleep(Duration::from_secs(30)).await;

		let calls = api.status_calls();
		let first: Vec<u64> = calls
			.iter()
			.filter(|(w, _)| *w == wallet())
			.map(|(_, t)| *t)
			.collect();
		assert_eq!(first, vec![0, 7]);
		assert!(calls.iter().filter(|(w, _)| *w == other_wallet()).count() >= 4);
		handle.unmount().await;
	}

	#[tokio::test(start_paused = true)]
	async fn clearing_address_stops_polling() {
		let api = FakeApi::new(0, vec![], SyncStatus::Syncing);
		let handle = start(&api);

		handle.set_address(wallet().as_str());
		wait_until(&handle, |s| matches!(s, ControllerState::Polling { .. })).await;

		handle.clear_address();
		wait_until(&handle, |s| *s == ControllerState::Idle).await;
		tokio::time::sleep(Duration::from_secs(60)).await;

		assert_eq!(api.status_calls().len(), 1);
		handle.unmount().await;
	}

	#[tokio::test(start_paused = true)]
	async fn unmount_stops_polling() {
		let api = FakeApi::new(0, vec![], SyncStatus::Syncing);
		let handle = start(&api);

		handle.set_address(wallet().as_str());
		wait_until(&handle, |s| matches!(s, ControllerState::Polling { .. })).await;
		handle.unmount().await;

		tokio::time::sleep(Duration::from_secs(60)).await;
		assert_eq!(api.status_calls().len(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn invalid_address_is_reported() {
		let api = FakeApi::new(0, vec![], SyncStatus::Idle);
		let handle = start(&api);

		handle.set_address("not-a-wallet");
		wait_until(&handle, |s| matches!(s, ControllerState::InvalidAddress { .. })).await;

		assert!(api.status_calls().is_empty());
		assert!(api.page_reads().is_empty());
		handle.unmount().await;
	}
}
