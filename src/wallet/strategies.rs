use super::key_provider::KeyProvider;
use super::keys::Keypair;
use super::types::{EXTERNAL_USER_ID, Provenance, WalletHandle};
use crate::ledger::LedgerConnection;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of one step in the wallet fallback chain
#[derive(Debug)]
pub enum StrategyOutcome {
	/// A wallet was produced; the chain stops here.
	Resolved(WalletHandle),
	/// Nothing to offer for this agent; try the next strategy.
	Skipped,
	/// The strategy could not produce a wallet; try the next strategy.
	Failed(String),
}

/// Trait for the ways a wallet can be obtained for an agent
#[async_trait]
pub trait ProvisioningStrategy: Send + Sync {
	/// Whether this strategy is consulted for `agent_id` at all.
	fn applies_to(&self, _agent_id: &str) -> bool {
		true
	}

	/// Whether the strategy hands out existing keys rather than new ones.
	/// Such strategies are skipped when a fresh wallet is requested.
	fn reuses_keys(&self) -> bool {
		false
	}

	/// Try to produce a wallet
	async fn provision(&self, agent_id: &str) -> StrategyOutcome;

	/// Get the name of this strategy
	fn name(&self) -> &'static str;
}

/// Pre-registered keypairs from the injected key provider
pub struct KeyProviderStrategy {
	keys: Arc<dyn KeyProvider>,
}

impl KeyProviderStrategy {
	pub fn new(keys: Arc<dyn KeyProvider>) -> Self {
		Self { keys }
	}
}

#[async_trait]
impl ProvisioningStrategy for KeyProviderStrategy {
	fn applies_to(&self, agent_id: &str) -> bool {
		agent_id != EXTERNAL_USER_ID
	}

	fn reuses_keys(&self) -> bool {
		true
	}

	async fn provision(&self, agent_id: &str) -> StrategyOutcome {
		match self.keys.keypair(agent_id) {
			Some(keypair) => {
				let handle = WalletHandle::new(agent_id, keypair, Provenance::Demo);
				info!("Using pre-registered wallet {} for {}", handle.address, agent_id);
				StrategyOutcome::Resolved(handle)
			}
			None => StrategyOutcome::Skipped,
		}
	}

	fn name(&self) -> &'static str {
		"key-provider"
	}
}

/// Fresh keypair funded from the test faucet
pub struct FaucetStrategy {
	connection: LedgerConnection,
}

impl FaucetStrategy {
	pub fn new(connection: LedgerConnection) -> Self {
		Self { connection }
	}
}

#[async_trait]
impl ProvisioningStrategy for FaucetStrategy {
	async fn provision(&self, agent_id: &str) -> StrategyOutcome {
		if let Err(e) = self.connection.initialize().await {
			return StrategyOutcome::Failed(e.to_string());
		}

		let keypair = Keypair::generate();
		let address = keypair.address();
		debug!("Generated wallet {} for {}", address, agent_id);

		match self.connection.fund(&address).await {
			Ok(drops) => {
				info!("Funded new wallet {} for {} ({} drops)", address, agent_id, drops);
				StrategyOutcome::Resolved(WalletHandle::new(agent_id, keypair, Provenance::Generated))
			}
			Err(e) => {
				warn!("Funding wallet {} for {} failed: {}", address, agent_id, e);
				StrategyOutcome::Resolved(WalletHandle::new(
					agent_id,
					keypair,
					Provenance::GeneratedUnfunded,
				))
			}
		}
	}

	fn name(&self) -> &'static str {
		"faucet"
	}
}

/// Deterministic pseudo-wallet; same agent id, same address
pub struct MockWalletStrategy;

impl MockWalletStrategy {
	pub fn keypair_for(agent_id: &str) -> Keypair {
		Keypair::derive(&format!("mock-wallet:{}", agent_id))
	}
}

#[async_trait]
impl ProvisioningStrategy for MockWalletStrategy {
	async fn provision(&self, agent_id: &str) -> StrategyOutcome {
		let handle = WalletHandle::new(agent_id, Self::keypair_for(agent_id), Provenance::Mock);
		warn!("Using mock wallet {} for {}", handle.address, agent_id);
		StrategyOutcome::Resolved(handle)
	}

	fn name(&self) -> &'static str {
		"mock"
	}
}
