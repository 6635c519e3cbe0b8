//! # activity-sync
//!
//! Wallet activity sync service and client.
//!
//! ```bash
//! # Run the HTTP service
//! activity-sync --config activity-sync.toml serve
//!
//! # Stream a sync from a running service
//! activity-sync sync 0x1111111111111111111111111111111111111111 --refresh
//!
//! # Drive the client controller until the wallet's cache is ready
//! activity-sync watch 0x1111111111111111111111111111111111111111
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use wallet_activity_sync::client::{
	ControllerState, HexAddressResolver, HttpActivityApi, SyncController,
};
use wallet_activity_sync::config::Config;
use wallet_activity_sync::indexer::ActivityIndexerClient;
use wallet_activity_sync::retry::TokioSleeper;
use wallet_activity_sync::server::{AppState, build_router};
use wallet_activity_sync::wallet::WalletAddress;
use wallet_activity_sync::wallet::sync::SyncOrchestrator;
use wallet_activity_sync::wallet::sync::background::SyncWorker;
use wallet_activity_sync::wallet::sync::event_store::SqliteEventStore;
use wallet_activity_sync::wallet::sync::events::ProgressFrame;
use wallet_activity_sync::wallet::sync::status::SyncStatusRegistry;

/// Wallet marketplace activity sync.
#[derive(Parser, Debug)]
#[command(name = "activity-sync")]
#[command(version, about, long_about = None)]
struct Cli {
	/// Path to the TOML configuration file
	#[arg(long, global = true, default_value = "activity-sync.toml")]
	config: PathBuf,

	#[command(subcommand)]
	command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Run the HTTP service (default)
	Serve,

	/// Stream a sync for one wallet from a running service
	Sync {
		address: String,

		/// Purge cached events and fetch from scratch
		#[arg(long)]
		refresh: bool,

		/// Page cap for this run
		#[arg(long)]
		max_pages: Option<u32>,
	},

	/// Run the client controller for one wallet until its cache is ready
	Watch { address: String },
}

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive("wallet_activity_sync=debug".parse()?)
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	let cli = Cli::parse();
	let config = Config::load(&cli.config)
		.with_context(|| format!("loading {}", cli.config.display()))?;

	match cli.command.unwrap_or(Commands::Serve) {
		Commands::Serve => serve(config).await,
		Commands::Sync {
			address,
			refresh,
			max_pages,
		} => stream_sync(config, &address, max_pages, refresh).await,
		Commands::Watch { address } => watch(config, &address).await,
	}
}

async fn serve(config: Config) -> Result<()> {
	info!("Starting activity sync service");

	let store = Arc::new(
		SqliteEventStore::new(&config.storage.database)
			.await
			.context("opening event store")?,
	);
	info!("Opened event store at {}", config.storage.database.display());

	let indexer = Arc::new(ActivityIndexerClient::new(&config.upstream)?);
	info!("Created indexer client for {}", config.upstream.base_url);

	let orchestrator = Arc::new(SyncOrchestrator::new(
		indexer,
		store,
		Arc::new(SyncStatusRegistry::new()),
		Arc::new(TokioSleeper),
		config.sync.sync_config(),
	));
	let worker = SyncWorker::start(orchestrator.clone());

	let router = build_router(AppState {
		orchestrator,
		worker: worker.handle(),
		sync: config.sync.clone(),
	});

	let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
		.await
		.with_context(|| format!("binding {}", config.server.bind_address))?;
	info!("Listening on {}", config.server.bind_address);

	axum::serve(listener, router)
		.with_graceful_shutdown(shutdown_signal())
		.await?;

	info!("Draining background syncs");
	worker.stop().await;
	info!("Activity sync service stopped");
	Ok(())
}

async fn shutdown_signal() {
	if let Err(e) = tokio::signal::ctrl_c().await {
		error!("Failed to listen for shutdown signal: {}", e);
	}
}

async fn stream_sync(
	config: Config,
	address: &str,
	max_pages: Option<u32>,
	refresh: bool,
) -> Result<()> {
	let wallet = WalletAddress::parse(address)?;
	let api = HttpActivityApi::new(&config.client.service_url, Duration::from_secs(30))?;

	let mut frames = api.stream_events(&wallet, max_pages, refresh).await?;
	while let Some(frame) = frames.next().await {
		match frame? {
			ProgressFrame::Progress {
				message, percent, ..
			} => info!("[{:>3}%] {}", percent, message),
			ProgressFrame::Chunk {
				events,
				page_index,
				total_events_so_far,
			} => info!(
				"Page {}: {} events ({} so far)",
				page_index,
				events.len(),
				total_events_so_far
			),
			ProgressFrame::Complete {
				total_pages,
				total_events,
				has_more,
				from_cache,
			} => info!(
				"Complete: {} events over {} pages (more: {}, cached: {})",
				total_events, total_pages, has_more, from_cache
			),
			ProgressFrame::Error { message, status } => {
				error!("Sync failed ({:?}): {}", status, message)
			}
		}
	}
	Ok(())
}

async fn watch(config: Config, address: &str) -> Result<()> {
	let api = Arc::new(HttpActivityApi::new(
		&config.client.service_url,
		Duration::from_secs(30),
	)?);
	let handle = SyncController::new(
		api,
		Arc::new(HexAddressResolver),
		config.client.poll_interval(),
		config.client.page_size,
	)
	.spawn();

	let mut states = handle.subscribe();
	handle.set_address(address);

	loop {
		states.changed().await?;
		let state = states.borrow_and_update().clone();
		match state {
			ControllerState::Ready { wallet, page, .. } => {
				info!(
					"{}: page {}/{} ({} events total)",
					wallet,
					page.pagination.current_page,
					page.pagination.total_pages,
					page.pagination.total_items
				);
				for event in &page.events {
					info!(
						"  {} {} {} -> {}",
						event.created_at,
						event.event_type,
						event.from_address.as_deref().unwrap_or("-"),
						event.to_address.as_deref().unwrap_or("-")
					);
				}
				break;
			}
			ControllerState::InvalidAddress { input, message } => {
				warn!("Cannot watch {}: {}", input, message);
				break;
			}
			ControllerState::Failed { wallet, message } => {
				error!("Reading cached events for {} failed: {}", wallet, message);
				break;
			}
			other => info!("{:?}", other),
		}
	}

	handle.unmount().await;
	Ok(())
}
