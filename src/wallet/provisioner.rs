//!
//! Per-agent wallet resolution with request coalescing.
//!
//! `resolve` checks the cache, then joins any resolution already in flight
//! for the same agent, and only then starts a new one. A new resolution runs
//! the strategy chain on its own task, so a caller that stops waiting does
//! not cancel it; the task caches the handle and retires the in-flight entry
//! in one step when it settles.

use super::key_provider::KeyProvider;
use super::strategies::{
	FaucetStrategy, KeyProviderStrategy, MockWalletStrategy, ProvisioningStrategy, StrategyOutcome,
};
use super::types::{ProvisioningError, WalletHandle};
use crate::ledger::LedgerConnection;

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

type Resolution = Shared<BoxFuture<'static, Result<WalletHandle, ProvisioningError>>>;

#[derive(Default)]
struct ProvisionerState {
	cache: HashMap<String, WalletHandle>,
	in_flight: HashMap<String, Resolution>,
}

struct Inner {
	strategies: Vec<Arc<dyn ProvisioningStrategy>>,
	state: Mutex<ProvisionerState>,
}

impl Inner {
	fn state(&self) -> MutexGuard<'_, ProvisionerState> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	async fn run_strategies(&self, agent_id: &str, fresh: bool) -> Result<WalletHandle, ProvisioningError> {
		for strategy in &self.strategies {
			if !strategy.applies_to(agent_id) || (fresh && strategy.reuses_keys()) {
				continue;
			}
			match strategy.provision(agent_id).await {
				StrategyOutcome::Resolved(handle) => {
					debug!(
						"Strategy {} resolved {} as {}",
						strategy.name(),
						agent_id,
						handle.provenance
					);
					return Ok(handle);
				}
				StrategyOutcome::Skipped => {}
				StrategyOutcome::Failed(reason) => {
					warn!("Strategy {} failed for {}: {}", strategy.name(), agent_id, reason)
				}
			}
		}
		Err(ProvisioningError::Unresolved(agent_id.to_string()))
	}

	/// Run the chain and settle: cache on success, then retire the
	/// in-flight entry under the same lock.
	async fn settle(&self, agent_id: String, fresh: bool) -> Result<WalletHandle, ProvisioningError> {
		let result = self.run_strategies(&agent_id, fresh).await;

		let mut state = self.state();
		if let Ok(handle) = &result {
			state.cache.insert(agent_id.clone(), handle.clone());
		}
		state.in_flight.remove(&agent_id);
		result
	}
}

/// Resolves and caches one wallet per agent id.
#[derive(Clone)]
pub struct WalletProvisioner {
	inner: Arc<Inner>,
}

impl WalletProvisioner {
	/// Provisioner trying `strategies` in order.
	pub fn new(strategies: Vec<Arc<dyn ProvisioningStrategy>>) -> Self {
		Self {
			inner: Arc::new(Inner {
				strategies,
				state: Mutex::new(ProvisionerState::default()),
			}),
		}
	}

	/// Pre-registered keys, then a funded fresh wallet, then a mock wallet.
	pub fn with_default_strategies(connection: LedgerConnection, keys: Arc<dyn KeyProvider>) -> Self {
		Self::new(vec![
			Arc::new(KeyProviderStrategy::new(keys)),
			Arc::new(FaucetStrategy::new(connection)),
			Arc::new(MockWalletStrategy),
		])
	}

	/// Resolve the wallet for `agent_id`.
	///
	/// Concurrent calls for the same id share one resolution and observe the
	/// same wallet.
	pub async fn resolve(&self, agent_id: &str) -> Result<WalletHandle, ProvisioningError> {
		let resolution = {
			let mut state = self.inner.state();
			if let Some(handle) = state.cache.get(agent_id) {
				debug!("Wallet cache hit for {}", agent_id);
				return Ok(handle.as_cached());
			}
			self.join_or_start(&mut state, agent_id, false)
		};
		resolution.await
	}

	/// Create a new wallet for `agent_id`, replacing any cached one.
	///
	/// Pre-registered keys are not consulted. A resolution already in flight
	/// for the id is joined instead.
	pub async fn create_fresh(&self, agent_id: &str) -> Result<WalletHandle, ProvisioningError> {
		let resolution = {
			let mut state = self.inner.state();
			if state.cache.remove(agent_id).is_some() {
				info!("Replacing cached wallet for {}", agent_id);
			}
			self.join_or_start(&mut state, agent_id, true)
		};
		resolution.await
	}

	fn join_or_start(
		&self,
		state: &mut ProvisionerState,
		agent_id: &str,
		fresh: bool,
	) -> Resolution {
		if let Some(resolution) = state.in_flight.get(agent_id) {
			debug!("Joining in-flight wallet resolution for {}", agent_id);
			return resolution.clone();
		}

		// The task cannot retire the entry before it is inserted below: it
		// needs the state lock, which the caller holds.
		let inner = self.inner.clone();
		let id = agent_id.to_string();
		let task = tokio::spawn(async move { inner.settle(id, fresh).await });

		let inner = self.inner.clone();
		let id = agent_id.to_string();
		let resolution = async move {
			match task.await {
				Ok(result) => result,
				Err(e) => {
					inner.state().in_flight.remove(&id);
					Err(ProvisioningError::ResolutionAborted {
						agent_id: id,
						reason: e.to_string(),
					})
				}
			}
		}
		.boxed()
		.shared();

		state
			.in_flight
			.insert(agent_id.to_string(), resolution.clone());
		resolution
	}

	pub fn is_cached(&self, agent_id: &str) -> bool {
		self.inner.state().cache.contains_key(agent_id)
	}

	/// Cached handle for `agent_id` without starting a resolution.
	pub fn cached(&self, agent_id: &str) -> Option<WalletHandle> {
		self.inner.state().cache.get(agent_id).map(WalletHandle::as_cached)
	}

	/// Sorted ids with a cached wallet.
	pub fn cached_ids(&self) -> Vec<String> {
		let mut ids: Vec<String> = self.inner.state().cache.keys().cloned().collect();
		ids.sort();
		ids
	}

	pub fn clear(&self, agent_id: &str) -> bool {
		self.inner.state().cache.remove(agent_id).is_some()
	}

	pub fn clear_all(&self) {
		self.inner.state().cache.clear();
	}
}
