//! RLUSD trustlines for agent wallets.

use super::builder::{LedgerTransactionBuilder, issued_amount};
use super::executor::SubmissionError;
use super::types::RLUSD_CURRENCY_CODE;
use crate::ledger::{LedgerConnection, codec};
use crate::wallet::WalletProvisioner;

use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info, warn};

/// Trust limit used when the caller does not choose one.
pub const DEFAULT_TRUST_LIMIT: f64 = 1_000_000.0;

#[derive(Clone)]
pub struct TrustlineManager {
	connection: LedgerConnection,
	provisioner: WalletProvisioner,
	rlusd_issuer: String,
	/// Agents whose trustline succeeded in this process.
	trusted: Arc<Mutex<HashSet<String>>>,
}

impl TrustlineManager {
	pub fn new(connection: LedgerConnection, provisioner: WalletProvisioner, rlusd_issuer: String) -> Self {
		Self {
			connection,
			provisioner,
			rlusd_issuer,
			trusted: Arc::new(Mutex::new(HashSet::new())),
		}
	}

	/// Establish RLUSD trust for each agent concurrently.
	///
	/// # Returns
	/// Per agent, whether the ledger accepted the TrustSet with `tesSUCCESS`.
	pub async fn establish_batch(&self, agent_ids: &[String], limit: f64) -> HashMap<String, bool> {
		info!("Establishing RLUSD trustlines for {} agents", agent_ids.len());

		let results = join_all(agent_ids.iter().map(|agent_id| async move {
			(agent_id.clone(), self.establish(agent_id, limit).await)
		}))
		.await;

		results.into_iter().collect()
	}

	/// Establish RLUSD trust for one agent. Errors count as failure.
	pub async fn establish(&self, agent_id: &str, limit: f64) -> bool {
		match self.submit_trust_set(agent_id, limit).await {
			Ok(true) => {
				info!("Trustline created for {} to trust RLUSD", agent_id);
				self.trusted
					.lock()
					.unwrap_or_else(PoisonError::into_inner)
					.insert(agent_id.to_string());
				true
			}
			Ok(false) => false,
			Err(e) => {
				error!("Error creating trustline for {}: {}", agent_id, e);
				false
			}
		}
	}

	async fn submit_trust_set(&self, agent_id: &str, limit: f64) -> Result<bool, SubmissionError> {
		let wallet = self.provisioner.resolve(agent_id).await?;

		let tx = LedgerTransactionBuilder::trust_set(&wallet.address)
			.with_limit(issued_amount(limit, RLUSD_CURRENCY_CODE, &self.rlusd_issuer)?)
			.build()?;
		let tx = self.connection.autofill(tx).await?;
		let signed = codec::sign(tx, &wallet.public_key(), |payload| wallet.sign(payload))?;

		let outcome = self.connection.submit_and_wait(&signed).await?;
		if !outcome.is_success() {
			warn!(
				"Failed to create trustline for {}: {} ({})",
				agent_id, outcome.result_code, outcome.hash
			);
		}
		Ok(outcome.is_success())
	}

	/// Whether a trustline for `agent_id` succeeded in this process.
	pub fn is_trusted(&self, agent_id: &str) -> bool {
		self.trusted
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.contains(agent_id)
	}
}
