use crate::agent::AgentError;
use crate::chain::ChainClient;
use crate::config::Timings;
use crate::store::CommitmentRepository;
use crate::sync::events::{EventDispatcher, ScanMode};
use crate::sync::progress_tracker::SyncProgressTracker;
use backoff::ExponentialBackoffBuilder;
use ethers::types::{Log, TxHash};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Inclusive block range fetched in one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
	pub from: u64,
	pub to: u64,
	pub mode: ScanMode,
}

/// Picks the next window from the distance between `head` and `cursor`.
///
/// Gaps of 1000 or more blocks are read 1000 at a time and gaps of 100 or more 100 at a time;
/// both count as backfill. Smaller gaps are followed live with windows of 10 or 1.
pub fn select_window(head: u64, cursor: u64) -> Option<ScanWindow> {
	if head <= cursor {
		return None;
	}
	let gap = head - cursor;
	let (size, mode) = match gap {
		g if g >= 1000 => (1000, ScanMode::Backfill),
		g if g >= 100 => (100, ScanMode::Backfill),
		g if g >= 10 => (10, ScanMode::Live),
		_ => (1, ScanMode::Live),
	};
	Some(ScanWindow {
		from: cursor,
		to: cursor + size,
		mode,
	})
}

/// Where a fresh database starts scanning
#[derive(Debug, Clone, Default)]
pub struct CursorBootstrap {
	pub deploy_tx: Option<TxHash>,
	pub start_block: Option<u64>,
}

/// Persisted cursor, else the oracle's deployment block, else the configured start block, else 0.
pub async fn resolve_start_cursor(
	chain: &dyn ChainClient,
	repo: &CommitmentRepository,
	bootstrap: &CursorBootstrap,
) -> Result<u64, AgentError> {
	if let Some(cursor) = repo.cursor()? {
		info!("Resuming scan at block {}", cursor);
		return Ok(cursor);
	}
	if let Some(tx) = bootstrap.deploy_tx {
		match chain.block_of_transaction(tx).await? {
			Some(block) => {
				info!("Starting scan at oracle deployment block {}", block);
				return Ok(block);
			}
			None => warn!("Deployment transaction {:?} not found", tx),
		}
	}
	let start = bootstrap.start_block.unwrap_or_default();
	info!("Starting scan at block {}", start);
	Ok(start)
}

/// Outcome of a single scan step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
	/// Nothing to scan, or the head could not be read
	Idle,
	Scanned { window: ScanWindow, logs: usize },
	Cancelled,
}

/// Sync engine settings
#[derive(Debug, Clone)]
pub struct SyncConfig {
	/// Blocks kept between the head and the last scanned block
	pub confirmations: u64,
	pub head_poll: Duration,
	pub backoff_initial: Duration,
	pub backoff_max: Duration,
}

impl SyncConfig {
	pub fn new(confirmations: u64, timings: &Timings) -> Self {
		Self {
			confirmations,
			head_poll: timings.head_poll,
			backoff_initial: timings.backoff_initial,
			backoff_max: timings.backoff_max,
		}
	}
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self::new(0, &Timings::default())
	}
}

/// Scans oracle logs from the cursor towards the head and dispatches them in chain order.
///
/// The cursor moves past a window only after every log in it has been dispatched.
pub struct EventSyncEngine {
	chain: Arc<dyn ChainClient>,
	repo: CommitmentRepository,
	dispatcher: EventDispatcher,
	tracker: SyncProgressTracker,
	config: SyncConfig,
	cursor: u64,
	cancel: CancellationToken,
}

impl EventSyncEngine {
	pub fn new(
		chain: Arc<dyn ChainClient>,
		repo: CommitmentRepository,
		dispatcher: EventDispatcher,
		config: SyncConfig,
		start_cursor: u64,
		cancel: CancellationToken,
	) -> Self {
		Self {
			chain,
			repo,
			dispatcher,
			tracker: SyncProgressTracker::new(start_cursor),
			config,
			cursor: start_cursor,
			cancel,
		}
	}

	/// Next block to scan
	pub fn cursor(&self) -> u64 {
		self.cursor
	}

	pub async fn run(mut self) {
		info!("Starting oracle log sync at block {}", self.cursor);
		while !self.cancel.is_cancelled() {
			if self.step().await == StepOutcome::Cancelled {
				break;
			}
		}
		self.tracker.log_progress(true);
		info!("{}", self.tracker.get_stats().summary());
	}

	/// Scans at most one window.
	pub async fn step(&mut self) -> StepOutcome {
		let head = match self.chain.block_number().await {
			Ok(head) => head.saturating_sub(self.config.confirmations),
			Err(e) => {
				warn!("Failed to read block head: {}", e);
				return self.idle().await;
			}
		};

		let Some(window) = select_window(head, self.cursor) else {
			return self.idle().await;
		};

		let Some(mut logs) = self.fetch_logs(&window).await else {
			return StepOutcome::Cancelled;
		};
		logs.sort_by_key(|log| (log.block_number, log.log_index));
		debug!(
			"Scanning [{}, {}] ({:?}): {} logs",
			window.from,
			window.to,
			window.mode,
			logs.len()
		);

		for log in &logs {
			let outcome = self.dispatcher.dispatch(log, window.mode).await;
			self.tracker.record_dispatch(outcome);
		}

		self.cursor = window.to + 1;
		if let Err(e) = self.repo.set_cursor(self.cursor) {
			error!("Failed to persist sync cursor {}: {}", self.cursor, e);
		} else if window.mode == ScanMode::Backfill || !logs.is_empty() {
			info!("Sync cursor advanced to {}", self.cursor);
		}
		self.tracker.record_window(&window);
		self.tracker.log_progress(false);

		StepOutcome::Scanned {
			window,
			logs: logs.len(),
		}
	}

	async fn idle(&self) -> StepOutcome {
		tokio::select! {
			_ = self.cancel.cancelled() => StepOutcome::Cancelled,
			_ = tokio::time::sleep(self.config.head_poll) => StepOutcome::Idle,
		}
	}

	/// Fetches the window's logs, retrying with exponential backoff until success or cancellation.
	async fn fetch_logs(&self, window: &ScanWindow) -> Option<Vec<Log>> {
		let policy = ExponentialBackoffBuilder::new()
			.with_initial_interval(self.config.backoff_initial)
			.with_max_interval(self.config.backoff_max)
			.with_max_elapsed_time(None)
			.build();

		let fetch = backoff::future::retry_notify(
			policy,
			|| async {
				self.chain
					.filter_logs(window.from, window.to)
					.await
					.map_err(backoff::Error::transient)
			},
			|e, wait: Duration| {
				warn!(
					"Fetching logs for [{}, {}] failed, retrying in {:?}: {}",
					window.from, window.to, wait, e
				)
			},
		);

		tokio::select! {
			_ = self.cancel.cancelled() => None,
			result = fetch => result.ok(),
		}
	}
}
