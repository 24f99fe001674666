use super::account::LocalBalanceState;

use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File name of the persisted balances inside the data directory.
const BALANCE_FILE: &str = "balances.json";

#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum BalanceStoreError {
	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	JsonError(#[from] serde_json::Error),
}

/// Repository for local balance persistence
///
/// Calls are synchronous: the account persists while holding its lock.
pub trait BalanceStore: Send + Sync {
	fn load(&self) -> Result<Option<LocalBalanceState>, BalanceStoreError>;
	fn save(&self, state: &LocalBalanceState) -> Result<(), BalanceStoreError>;
}

/// File-based implementation of BalanceStore
pub struct FileBalanceStore {
	path: PathBuf,
}

impl FileBalanceStore {
	pub fn new(data_dir: &Path) -> Self {
		Self {
			path: data_dir.join(BALANCE_FILE),
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}

impl BalanceStore for FileBalanceStore {
	fn load(&self) -> Result<Option<LocalBalanceState>, BalanceStoreError> {
		if !self.path.exists() {
			info!("No saved balances at {}", self.path.display());
			return Ok(None);
		}

		let contents = std::fs::read_to_string(&self.path)?;
		let state = serde_json::from_str(&contents)?;
		info!("Restored balances from {}", self.path.display());
		Ok(Some(state))
	}

	fn save(&self, state: &LocalBalanceState) -> Result<(), BalanceStoreError> {
		if let Some(parent) = self.path.parent() {
			std::fs::create_dir_all(parent)?;
		}

		// Write then rename so a crash never leaves a truncated file.
		let temp_path = self.path.with_extension("json.tmp");
		std::fs::write(&temp_path, serde_json::to_vec_pretty(state)?)?;
		std::fs::rename(&temp_path, &self.path)?;

		debug!("Saved balances to {}", self.path.display());
		Ok(())
	}
}
