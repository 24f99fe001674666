//! Sources of pre-registered demo keypairs.

use super::keys::Keypair;
use super::types::KeyError;

use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Supplies pre-registered keypairs by agent id.
pub trait KeyProvider: Send + Sync {
	fn keypair(&self, agent_id: &str) -> Option<Keypair>;
}

/// Provider with no keys; every agent gets a generated wallet.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoKeys;

impl KeyProvider for NoKeys {
	fn keypair(&self, _agent_id: &str) -> Option<Keypair> {
		None
	}
}

/// Keys read from a JSON object mapping agent id to family seed.
///
/// ```json
/// { "main-agent": "sEd...", "text-gen-1": "sEd..." }
/// ```
#[derive(Debug, Default)]
pub struct SeedFileKeyProvider {
	keys: HashMap<String, Keypair>,
}

impl SeedFileKeyProvider {
	pub fn load(path: &Path) -> Result<Self, KeyError> {
		let contents = std::fs::read_to_string(path)?;
		let seeds: HashMap<String, String> = serde_json::from_str(&contents)?;
		let provider = Self::from_seeds(seeds)?;
		info!(
			"Loaded {} pre-registered keypairs from {}",
			provider.len(),
			path.display()
		);
		Ok(provider)
	}

	pub fn from_seeds(seeds: HashMap<String, String>) -> Result<Self, KeyError> {
		let keys = seeds
			.into_iter()
			.map(|(agent_id, seed)| match Keypair::from_seed(&seed) {
				Ok(keypair) => Ok((agent_id, keypair)),
				Err(source) => Err(KeyError::SeedError { agent_id, source }),
			})
			.collect::<Result<HashMap<_, _>, _>>()?;
		Ok(Self { keys })
	}

	pub fn len(&self) -> usize {
		self.keys.len()
	}

	pub fn is_empty(&self) -> bool {
		self.keys.is_empty()
	}
}

impl KeyProvider for SeedFileKeyProvider {
	fn keypair(&self, agent_id: &str) -> Option<Keypair> {
		self.keys.get(agent_id).cloned()
	}
}
