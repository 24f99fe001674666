//! Orchestrates wallet initialization for a batch of agents.
//!
//! All uncached agents are resolved concurrently. Each settlement updates the
//! tracker and publishes a new snapshot on a watch channel, so observers can
//! poll `progress()` or await changes through `subscribe()`.

use super::progress_tracker::{InitializationProgress, InitializationTracker};
use crate::ledger::LedgerConnection;
use crate::wallet::provisioner::WalletProvisioner;
use crate::wallet::types::AgentIdentity;

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::{error, info, warn};

pub struct WalletInitializationCoordinator {
	provisioner: WalletProvisioner,
	connection: LedgerConnection,
	running: AtomicBool,
	progress: watch::Sender<InitializationProgress>,
}

/// Clears the running flag however the batch ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
	fn drop(&mut self) {
		self.0.store(false, Ordering::SeqCst);
	}
}

impl WalletInitializationCoordinator {
	pub fn new(provisioner: WalletProvisioner, connection: LedgerConnection) -> Self {
		let (progress, _) = watch::channel(InitializationTracker::new(Vec::new()).snapshot());
		Self {
			provisioner,
			connection,
			running: AtomicBool::new(false),
			progress,
		}
	}

	/// Initialize wallets for `agents` and return the final snapshot.
	///
	/// If a batch is already running, returns its current snapshot instead.
	pub async fn initialize_batch(&self, agents: &[AgentIdentity]) -> InitializationProgress {
		if self.running.swap(true, Ordering::SeqCst) {
			info!("Wallet initialization already in progress");
			return self.progress();
		}
		let _running = RunningGuard(&self.running);

		let mut seen = HashSet::new();
		let agent_ids: Vec<String> = agents
			.iter()
			.filter(|agent| seen.insert(agent.id.as_str()))
			.map(|agent| agent.id.clone())
			.collect();

		info!("Initializing wallets for {} agents", agent_ids.len());
		let mut tracker = InitializationTracker::new(agent_ids.clone());
		for agent_id in &agent_ids {
			if self.provisioner.is_cached(agent_id) {
				tracker.record_cached(agent_id);
			}
		}
		self.publish(&tracker);

		if let Err(e) = self.connection.initialize().await {
			warn!("Ledger connection unavailable before wallet initialization: {}", e);
		}

		let mut resolutions: FuturesUnordered<_> = tracker
			.snapshot()
			.pending
			.into_iter()
			.map(|agent_id| {
				let provisioner = self.provisioner.clone();
				async move {
					let result = provisioner.resolve(&agent_id).await;
					(agent_id, result)
				}
			})
			.collect();

		while let Some((agent_id, result)) = resolutions.next().await {
			match result {
				Ok(handle) => {
					info!(
						"Wallet for {} ready: {} ({})",
						agent_id, handle.address, handle.provenance
					);
					tracker.record_initialized(&agent_id);
				}
				Err(e) => {
					error!("Wallet initialization failed for {}: {}", agent_id, e);
					tracker.record_failed(&agent_id);
				}
			}
			self.publish(&tracker);
		}

		tracker.log_progress();
		tracker.snapshot()
	}

	fn publish(&self, tracker: &InitializationTracker) {
		self.progress.send_replace(tracker.snapshot());
	}

	/// Latest snapshot
	pub fn progress(&self) -> InitializationProgress {
		self.progress.borrow().clone()
	}

	pub fn subscribe(&self) -> watch::Receiver<InitializationProgress> {
		self.progress.subscribe()
	}

	pub fn is_running(&self) -> bool {
		self.running.load(Ordering::SeqCst)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::{MockLedger, test_connection};
	use crate::wallet::NoKeys;
	use crate::wallet::types::default_agents;
	use std::sync::Arc;
	use std::time::Duration;

	fn coordinator(mock: Arc<MockLedger>) -> (WalletInitializationCoordinator, WalletProvisioner) {
		let connection = test_connection(mock);
		let provisioner =
			WalletProvisioner::with_default_strategies(connection.clone(), Arc::new(NoKeys));
		(
			WalletInitializationCoordinator::new(provisioner.clone(), connection),
			provisioner,
		)
	}

	#[tokio::test]
	async fn batch_with_cached_agents_completes() {
		let mock = Arc::new(MockLedger::new());
		let (coordinator, provisioner) = coordinator(mock.clone());
		let agents = default_agents();

		provisioner.resolve(&agents[0].id).await.unwrap();
		provisioner.resolve(&agents[1].id).await.unwrap();

		let progress = coordinator.initialize_batch(&agents).await;

		assert_eq!(progress.total, 8);
		assert_eq!(progress.cached.len(), 2);
		assert_eq!(progress.initialized.len(), 8);
		assert!(progress.pending.is_empty());
		assert!(progress.failed.is_empty());
		assert_eq!(progress.percent, 100);
		assert_eq!(mock.fund_calls(), 8);
		assert_eq!(coordinator.progress(), progress);
		assert!(!coordinator.is_running());
	}

	#[tokio::test]
	async fn every_published_snapshot_is_consistent() {
		let mock = Arc::new(MockLedger::new().with_fund_delay(Duration::from_millis(10)));
		let (coordinator, _) = coordinator(mock);
		let coordinator = Arc::new(coordinator);
		let mut updates = coordinator.subscribe();

		let batch = tokio::spawn({
			let coordinator = coordinator.clone();
			async move { coordinator.initialize_batch(&default_agents()).await }
		});

		let mut observed = 0;
		while updates.changed().await.is_ok() {
			let snapshot = updates.borrow_and_update().clone();
			assert!(snapshot.is_consistent());
			observed += 1;
			if snapshot.total == 8 && snapshot.is_complete() {
				break;
			}
		}

		let progress = batch.await.unwrap();
		assert!(observed >= 1);
		assert!(progress.is_consistent());
		assert_eq!(progress.initialized.len(), 8);
	}

	#[tokio::test]
	async fn concurrent_batch_returns_current_snapshot() {
		let mock = Arc::new(MockLedger::new().with_fund_delay(Duration::from_millis(50)));
		let (coordinator, _) = coordinator(mock.clone());
		let agents = default_agents();

		let (first, second) = tokio::join!(
			coordinator.initialize_batch(&agents),
			coordinator.initialize_batch(&agents),
		);

		assert_eq!(first.initialized.len(), 8);
		assert!(second.is_consistent());
		assert_eq!(second.total, 8);
		assert_eq!(second.pending.len(), 8);
		assert_eq!(mock.fund_calls(), 8);
	}

	#[tokio::test]
	async fn duplicate_ids_are_collapsed() {
		let mock = Arc::new(MockLedger::new());
		let (coordinator, _) = coordinator(mock);
		let agents = vec![
			AgentIdentity::new("translator", "Language Translator", 0.0),
			AgentIdentity::new("translator", "Language Translator", 0.0),
		];

		let progress = coordinator.initialize_batch(&agents).await;
		assert_eq!(progress.total, 1);
		assert_eq!(progress.initialized, vec!["translator".to_string()]);
	}

	#[tokio::test]
	async fn connection_failure_still_initializes_mock_wallets() {
		let mock = Arc::new(MockLedger::new());
		mock.set_fail_connect(true);
		let (coordinator, provisioner) = coordinator(mock);

		let progress = coordinator.initialize_batch(&default_agents()).await;
		assert_eq!(progress.initialized.len(), 8);
		assert!(
			provisioner
				.cached("summarizer")
				.is_some_and(|handle| handle.is_mock())
		);
	}
}
