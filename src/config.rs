//! Command line and environment configuration.

use crate::ledger::LedgerSettings;
use crate::ledger::address::{AddressError, ClassicAddress};
use crate::transaction::DEFAULT_RLUSD_ISSUER;
use crate::wallet::{KeyError, KeyProvider, NoKeys, SeedFileKeyProvider};

use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8080";
pub const DEFAULT_LEDGER_URL: &str = "wss://s.altnet.rippletest.net:51233";
pub const DEFAULT_FAUCET_URL: &str = "https://faucet.altnet.rippletest.net";

#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("Invalid {field} address: {source}")]
	AddressError {
		field: &'static str,
		#[source]
		source: AddressError,
	},

	#[error("Failed to load keys: {0}")]
	KeyError(#[from] KeyError),
}

/// Wallet and payment orchestration for agent networks on the XRP Ledger
#[derive(Parser, Debug, Clone)]
#[command(name = "synapse-ledger", version)]
pub struct Config {
	/// Simulate every payment instead of submitting it
	#[arg(long, action = ArgAction::SetTrue, env = "SYNAPSE_SIMULATION")]
	pub simulation: bool,

	/// Submit payments to the ledger; ignored while simulation is on
	#[arg(long, action = ArgAction::SetTrue, env = "SYNAPSE_REAL_TRANSACTIONS")]
	pub real_transactions: bool,

	/// Base URL of the task backend
	#[arg(long, value_name = "URL", env = "SYNAPSE_BACKEND_URL", default_value = DEFAULT_BACKEND_URL)]
	pub backend_url: String,

	/// WebSocket endpoint of the rippled node
	#[arg(long, value_name = "URL", env = "SYNAPSE_LEDGER_URL", default_value = DEFAULT_LEDGER_URL)]
	pub ledger_url: String,

	/// Test network faucet
	#[arg(long, value_name = "URL", env = "SYNAPSE_FAUCET_URL", default_value = DEFAULT_FAUCET_URL)]
	pub faucet_url: String,

	/// Ledger address that receives user deposits; defaults to the main agent's wallet
	#[arg(long, value_name = "ADDRESS", env = "SYNAPSE_MAIN_AGENT_ADDRESS")]
	pub main_agent_address: Option<String>,

	/// Issuer of RLUSD
	#[arg(long, value_name = "ADDRESS", env = "SYNAPSE_RLUSD_ISSUER", default_value = DEFAULT_RLUSD_ISSUER)]
	pub rlusd_issuer: String,

	/// JSON file mapping agent ids to pre-registered family seeds
	#[arg(long, value_name = "PATH", env = "SYNAPSE_KEYS_FILE")]
	pub keys_file: Option<PathBuf>,

	/// Directory holding the persisted local balances
	#[arg(long, value_name = "PATH", env = "SYNAPSE_DATA_DIR", default_value = "./data")]
	pub data_dir: PathBuf,

	/// Seconds to wait for a task run to complete
	#[arg(long, value_name = "SECS", env = "SYNAPSE_RUN_TIMEOUT_SECS", default_value_t = 60)]
	pub run_timeout_secs: u64,

	/// Task to hand to the backend after the wallets are ready
	#[arg(long, value_name = "DESCRIPTION")]
	pub task: Option<String>,
}

impl Config {
	/// Simulation is used unless real transactions are enabled and simulation is off.
	pub fn simulate_transactions(&self) -> bool {
		self.simulation || !self.real_transactions
	}

	pub fn run_timeout(&self) -> Duration {
		Duration::from_secs(self.run_timeout_secs)
	}

	pub fn ledger_settings(&self) -> LedgerSettings {
		LedgerSettings {
			url: self.ledger_url.clone(),
			..LedgerSettings::default()
		}
	}

	/// Reject malformed addresses before anything is built from them.
	pub fn validate(&self) -> Result<(), ConfigError> {
		ClassicAddress::decode(&self.rlusd_issuer).map_err(|source| ConfigError::AddressError {
			field: "RLUSD issuer",
			source,
		})?;
		if let Some(address) = &self.main_agent_address {
			ClassicAddress::decode(address).map_err(|source| ConfigError::AddressError {
				field: "main agent",
				source,
			})?;
		}
		Ok(())
	}

	pub fn key_provider(&self) -> Result<Arc<dyn KeyProvider>, ConfigError> {
		Ok(match &self.keys_file {
			Some(path) => Arc::new(SeedFileKeyProvider::load(path)?),
			None => Arc::new(NoKeys),
		})
	}
}
