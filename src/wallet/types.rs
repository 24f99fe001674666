use super::keys::Keypair;
use crate::ledger::address::AddressError;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identity of the external user's wallet. It never has a pre-registered key.
pub const EXTERNAL_USER_ID: &str = "user-wallet";

/// Id of the orchestrating agent in the default roster.
pub const MAIN_AGENT_ID: &str = "main-agent";

/// An agent that owns a wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentIdentity {
	pub id: String,
	pub name: String,
	/// Starting balance in the local account.
	pub balance: f64,
}

impl AgentIdentity {
	pub fn new(id: impl Into<String>, name: impl Into<String>, balance: f64) -> Self {
		Self {
			id: id.into(),
			name: name.into(),
			balance,
		}
	}
}

/// The orchestrator plus the seven service agents.
pub fn default_agents() -> Vec<AgentIdentity> {
	vec![
		AgentIdentity::new(MAIN_AGENT_ID, "Orchestrator Agent", 100.0),
		AgentIdentity::new("text-gen-1", "Text Generator", 0.0),
		AgentIdentity::new("image-gen-1", "Image Creator", 0.0),
		AgentIdentity::new("data-analyzer", "Data Analyzer", 0.0),
		AgentIdentity::new("research-assistant", "Research Assistant", 0.0),
		AgentIdentity::new("code-generator", "Code Generator", 0.0),
		AgentIdentity::new("translator", "Language Translator", 0.0),
		AgentIdentity::new("summarizer", "Content Summarizer", 0.0),
	]
}

/// How a wallet handle came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
	/// Returned from the provisioner cache.
	Cached,
	/// Pre-registered keypair from the key provider.
	Demo,
	/// Freshly generated and funded from the faucet.
	Generated,
	/// Freshly generated; faucet funding failed.
	GeneratedUnfunded,
	/// Deterministic pseudo-wallet used when the ledger is unreachable.
	Mock,
}

impl fmt::Display for Provenance {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let tag = match self {
			Provenance::Cached => "cached",
			Provenance::Demo => "demo",
			Provenance::Generated => "generated",
			Provenance::GeneratedUnfunded => "generated-unfunded",
			Provenance::Mock => "mock",
		};
		f.write_str(tag)
	}
}

/// A resolved wallet for one agent.
///
/// Clones share the signing key.
#[derive(Clone)]
pub struct WalletHandle {
	pub agent_id: String,
	/// Classic address.
	pub address: String,
	/// Provenance reported to this caller.
	pub provenance: Provenance,
	/// Provenance the wallet was created with.
	pub origin: Provenance,
	keypair: Arc<Keypair>,
}

impl WalletHandle {
	pub(crate) fn new(agent_id: impl Into<String>, keypair: Keypair, provenance: Provenance) -> Self {
		Self {
			agent_id: agent_id.into(),
			address: keypair.address(),
			provenance,
			origin: provenance,
			keypair: Arc::new(keypair),
		}
	}

	/// The same wallet, as reported on a cache hit.
	pub(crate) fn as_cached(&self) -> Self {
		Self {
			provenance: Provenance::Cached,
			..self.clone()
		}
	}

	/// 33-byte public key, `0xED` prefixed.
	pub fn public_key(&self) -> Vec<u8> {
		self.keypair.public_key()
	}

	pub fn sign(&self, message: &[u8]) -> Vec<u8> {
		self.keypair.sign(message)
	}

	/// Family seed of the wallet, for handing a fresh wallet to its owner.
	pub fn seed(&self) -> String {
		self.keypair.seed()
	}

	pub fn is_mock(&self) -> bool {
		self.origin == Provenance::Mock
	}
}

impl fmt::Debug for WalletHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WalletHandle")
			.field("agent_id", &self.agent_id)
			.field("address", &self.address)
			.field("provenance", &self.provenance)
			.field("origin", &self.origin)
			.finish_non_exhaustive()
	}
}

/// Errors loading or decoding key material
#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
	#[error("Invalid seed for {agent_id}: {source}")]
	SeedError {
		agent_id: String,
		#[source]
		source: AddressError,
	},

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),

	#[error("JSON parse error: {0}")]
	JsonError(#[from] serde_json::Error),
}

/// Errors resolving a wallet.
///
/// The strategy chain ends in a mock wallet, so this only surfaces when the
/// resolution task itself did not complete.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProvisioningError {
	#[error("Wallet resolution for {agent_id} did not complete: {reason}")]
	ResolutionAborted { agent_id: String, reason: String },

	#[error("No provisioning strategy resolved a wallet for {0}")]
	Unresolved(String),
}
