//! Client sync controller state machine.
//!
//! Pure transition function: `on_event(self, event) -> (Self, Vec<ControllerAction>)`.
//! No I/O happens here; the driver executes the returned actions and feeds their results
//! back as events. Every event produced by I/O names the wallet it was issued for, and is
//! ignored unless that wallet is still the one being shown.

use crate::wallet::{EventPage, SyncStatus, WalletAddress};

/// Page read when a wallet is first shown or reloaded.
pub const FIRST_PAGE: u32 = 1;

/// Controller states
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerState {
	/// No address entered.
	Idle,
	/// Waiting for the resolver.
	Resolving { input: String },
	/// The resolver rejected the input. Terminal until the address changes.
	InvalidAddress { input: String, message: String },
	/// Cached page 1 and the sync status are being read.
	Loading { wallet: WalletAddress },
	/// A sync is running; the status is rechecked on a fixed interval.
	Polling { wallet: WalletAddress },
	/// The sync finished; page 1 is being re-read.
	Reloading { wallet: WalletAddress },
	/// A cached page is displayed. `requested` is the page most recently asked for; it
	/// differs from the displayed page while a navigation read is outstanding.
	Ready {
		wallet: WalletAddress,
		page: EventPage,
		requested: u32,
	},
	/// The cache could not be read.
	Failed { wallet: WalletAddress, message: String },
}

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
	/// The user entered (or cleared) an address.
	AddressChanged { input: Option<String> },
	Resolved { input: String, wallet: WalletAddress },
	ResolutionFailed { input: String, message: String },
	/// Result of the concurrent cache and status reads.
	InitialLoaded {
		wallet: WalletAddress,
		page: Result<EventPage, String>,
		status: SyncStatus,
	},
	PollTimerFired { wallet: WalletAddress },
	StatusChecked { wallet: WalletAddress, status: SyncStatus },
	PageLoaded {
		wallet: WalletAddress,
		requested: u32,
		page: EventPage,
	},
	CacheReadFailed {
		wallet: WalletAddress,
		requested: u32,
		message: String,
	},
	NavigateRequested { page: u32 },
	Unmounted,
}

/// Side effects requested by a transition
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerAction {
	/// Cancel the poll timer and drop every in-flight request.
	Teardown,
	Resolve { input: String },
	/// Read cached page 1 and the sync status concurrently.
	LoadInitial { wallet: WalletAddress },
	/// Fire-and-forget sync trigger.
	TriggerSync { wallet: WalletAddress },
	/// Arm the one-shot poll timer.
	StartPollTimer { wallet: WalletAddress },
	CheckStatus { wallet: WalletAddress },
	ReadPage { wallet: WalletAddress, page: u32 },
	/// Shut the driver down.
	Stop,
}

impl ControllerState {
	/// Wallet the state belongs to, if any.
	pub fn wallet(&self) -> Option<&WalletAddress> {
		match self {
			ControllerState::Loading { wallet }
			| ControllerState::Polling { wallet }
			| ControllerState::Reloading { wallet }
			| ControllerState::Ready { wallet, .. }
			| ControllerState::Failed { wallet, .. } => Some(wallet),
			_ => None,
		}
	}

	pub fn is_ready(&self) -> bool {
		matches!(self, ControllerState::Ready { .. })
	}

	pub fn on_event(self, event: ControllerEvent) -> (Self, Vec<ControllerAction>) {
		use ControllerAction as A;
		use ControllerEvent as E;
		use ControllerState as S;

		match (self, event) {
			(_, E::Unmounted) => (S::Idle, vec![A::Teardown, A::Stop]),

			(_, E::AddressChanged { input }) => {
				match input.map(|i| i.trim().to_string()).filter(|i| !i.is_empty()) {
					Some(input) => (
						S::Resolving {
							input: input.clone(),
						},
						vec![A::Teardown, A::Resolve { input }],
					),
					None => (S::Idle, vec![A::Teardown]),
				}
			}

			(S::Resolving { input }, E::Resolved { input: resolved, wallet }) if input == resolved => (
				S::Loading {
					wallet: wallet.clone(),
				},
				vec![A::LoadInitial { wallet }],
			),

			(S::Resolving { input }, E::ResolutionFailed { input: failed, message })
				if input == failed =>
			{
				(S::InvalidAddress { input, message }, vec![])
			}

			(
				S::Loading { wallet },
				E::InitialLoaded {
					wallet: loaded,
					page,
					status,
				},
			) if wallet == loaded => Self::after_initial_load(wallet, page, status),

			(S::Polling { wallet }, E::PollTimerFired { wallet: fired }) if wallet == fired => (
				S::Polling {
					wallet: wallet.clone(),
				},
				vec![A::CheckStatus { wallet }],
			),

			(S::Polling { wallet }, E::StatusChecked { wallet: checked, status })
				if wallet == checked =>
			{
				match status {
					SyncStatus::Syncing => (
						S::Polling {
							wallet: wallet.clone(),
						},
						vec![A::StartPollTimer { wallet }],
					),
					SyncStatus::Idle => (
						S::Reloading {
							wallet: wallet.clone(),
						},
						vec![A::ReadPage {
							wallet,
							page: FIRST_PAGE,
						}],
					),
				}
			}

			(
				S::Reloading { wallet },
				E::PageLoaded {
					wallet: loaded,
					requested: FIRST_PAGE,
					page,
				},
			) if wallet == loaded => (
				S::Ready {
					wallet,
					page,
					requested: FIRST_PAGE,
				},
				vec![],
			),

			(
				S::Ready {
					wallet, requested, ..
				},
				E::PageLoaded {
					wallet: loaded,
					requested: answered,
					page,
				},
			) if wallet == loaded && requested == answered => (
				S::Ready {
					wallet,
					page,
					requested,
				},
				vec![],
			),

			(
				S::Reloading { wallet },
				E::CacheReadFailed {
					wallet: failed,
					requested: FIRST_PAGE,
					message,
				},
			) if wallet == failed => (S::Failed { wallet, message }, vec![]),

			// The displayed page stays; a later navigation may retry.
			(
				S::Ready {
					wallet,
					page,
					requested,
				},
				E::CacheReadFailed {
					wallet: failed,
					requested: answered,
					..
				},
			) if wallet == failed && requested == answered => {
				let requested = page.pagination.current_page;
				(
					S::Ready {
						wallet,
						page,
						requested,
					},
					vec![],
				)
			}

			(
				S::Ready {
					wallet,
					page,
					requested,
				},
				E::NavigateRequested { page: asked },
			) => {
				let target = asked.clamp(FIRST_PAGE, page.pagination.total_pages.max(FIRST_PAGE));
				let actions = if target == requested || target == page.pagination.current_page {
					vec![]
				} else {
					vec![A::ReadPage {
						wallet: wallet.clone(),
						page: target,
					}]
				};
				(
					S::Ready {
						wallet,
						page,
						requested: target,
					},
					actions,
				)
			}

			// Stale results, superseded reads, and events that do not apply.
			(state, _) => (state, vec![]),
		}
	}

	fn after_initial_load(
		wallet: WalletAddress,
		page: Result<EventPage, String>,
		status: SyncStatus,
	) -> (Self, Vec<ControllerAction>) {
		if status == SyncStatus::Syncing {
			return (
				ControllerState::Polling {
					wallet: wallet.clone(),
				},
				vec![ControllerAction::StartPollTimer { wallet }],
			);
		}

		match page {
			Ok(page) if page.events.is_empty() => (
				ControllerState::Polling {
					wallet: wallet.clone(),
				},
				vec![
					ControllerAction::TriggerSync {
						wallet: wallet.clone(),
					},
					ControllerAction::StartPollTimer { wallet },
				],
			),
			Ok(page) => (
				ControllerState::Ready {
					wallet: wallet.clone(),
					page,
					requested: FIRST_PAGE,
				},
				vec![ControllerAction::TriggerSync { wallet }],
			),
			Err(message) => (ControllerState::Failed { wallet, message }, vec![]),
		}
	}
}
