//!
//! Application root.
//!
//! `LedgerSession` owns one of each service and wires them together: a single
//! ledger connection and wallet cache shared by the coordinator, trustline
//! manager and payment path, plus the local account that confirmed payments
//! are booked into.

use crate::balance::{BalanceError, BalanceStore, FileBalanceStore, LocalLedgerAccount, MAIN_ACCOUNT_ID};
use crate::config::{Config, ConfigError};
use crate::ledger::{FaucetClient, LedgerConnection, LedgerError, RippledClient};
use crate::task::{ChannelEvent, RunChannel, RunComplete, RunResult, TaskBackendClient, TaskError};
use crate::transaction::types::{record_id, timestamp_now};
use crate::transaction::{
	Currency, PaymentExecutor, SubmissionError, TransactionRecord, TransactionRequest,
	TransactionRouter, TransactionStatus, TransactionType, TrustlineManager,
};
use crate::wallet::{
	AgentIdentity, EXTERNAL_USER_ID, InitializationProgress, KeyProvider, MAIN_AGENT_ID,
	ProvisioningError, WalletInitializationCoordinator, WalletProvisioner,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
	#[error(transparent)]
	ConfigError(#[from] ConfigError),

	#[error(transparent)]
	LedgerError(#[from] LedgerError),

	#[error(transparent)]
	WalletError(#[from] ProvisioningError),

	#[error(transparent)]
	SubmissionError(#[from] SubmissionError),

	#[error(transparent)]
	BalanceError(#[from] BalanceError),

	#[error(transparent)]
	TaskError(#[from] TaskError),
}

/// Session-wide switches that are not owned by any one service.
#[derive(Debug, Clone)]
pub struct SessionOptions {
	pub simulate: bool,
	pub rlusd_issuer: String,
	/// Where user deposits are expected; the main agent's wallet when unset.
	pub deposit_address: Option<String>,
	pub run_timeout: Duration,
}

/// A finished task run.
#[derive(Debug, Clone)]
pub struct TaskRun {
	pub run_id: String,
	pub completion: RunComplete,
	/// Stored result, when the backend has one.
	pub result: Option<RunResult>,
}

pub struct LedgerSession {
	connection: LedgerConnection,
	provisioner: WalletProvisioner,
	coordinator: WalletInitializationCoordinator,
	trustlines: TrustlineManager,
	executor: PaymentExecutor,
	router: TransactionRouter,
	account: LocalLedgerAccount,
	tasks: TaskBackendClient,
	options: SessionOptions,
}

impl LedgerSession {
	pub fn new(
		connection: LedgerConnection,
		keys: Arc<dyn KeyProvider>,
		store: Box<dyn BalanceStore>,
		tasks: TaskBackendClient,
		options: SessionOptions,
	) -> Self {
		let provisioner = WalletProvisioner::with_default_strategies(connection.clone(), keys);
		let coordinator = WalletInitializationCoordinator::new(provisioner.clone(), connection.clone());
		let trustlines = TrustlineManager::new(
			connection.clone(),
			provisioner.clone(),
			options.rlusd_issuer.clone(),
		);
		let executor = PaymentExecutor::new(
			connection.clone(),
			provisioner.clone(),
			options.rlusd_issuer.clone(),
		);
		let router = TransactionRouter::new(executor.clone(), options.simulate);

		Self {
			connection,
			provisioner,
			coordinator,
			trustlines,
			executor,
			router,
			account: LocalLedgerAccount::open(store),
			tasks,
			options,
		}
	}

	/// Build every service from the command line and environment.
	pub fn from_config(config: &Config) -> Result<Self, SessionError> {
		config.validate()?;

		let faucet = FaucetClient::new(config.faucet_url.clone())?;
		let api = Arc::new(RippledClient::new(config.ledger_url.clone(), faucet));
		let connection = LedgerConnection::new(api, config.ledger_settings());
		let tasks = TaskBackendClient::new(config.backend_url.clone())?;

		info!(
			"Session ready: ledger {}, backend {}, {} payments",
			config.ledger_url,
			config.backend_url,
			if config.simulate_transactions() { "simulated" } else { "real" }
		);

		Ok(Self::new(
			connection,
			config.key_provider()?,
			Box::new(FileBalanceStore::new(&config.data_dir)),
			tasks,
			SessionOptions {
				simulate: config.simulate_transactions(),
				rlusd_issuer: config.rlusd_issuer.clone(),
				deposit_address: config.main_agent_address.clone(),
				run_timeout: config.run_timeout(),
			},
		))
	}

	pub fn connection(&self) -> &LedgerConnection {
		&self.connection
	}

	pub fn provisioner(&self) -> &WalletProvisioner {
		&self.provisioner
	}

	pub fn coordinator(&self) -> &WalletInitializationCoordinator {
		&self.coordinator
	}

	pub fn trustlines(&self) -> &TrustlineManager {
		&self.trustlines
	}

	pub fn executor(&self) -> &PaymentExecutor {
		&self.executor
	}

	pub fn router(&self) -> &TransactionRouter {
		&self.router
	}

	pub fn account(&self) -> &LocalLedgerAccount {
		&self.account
	}

	pub fn tasks(&self) -> &TaskBackendClient {
		&self.tasks
	}

	/// Seed local balances for the roster and provision their wallets.
	pub async fn initialize_agents(&self, agents: &[AgentIdentity]) -> InitializationProgress {
		self.account.initialize_agent_balances(agents);
		self.coordinator.initialize_batch(agents).await
	}

	/// Establish RLUSD trust for every agent of the roster.
	pub async fn establish_trustlines(&self, agents: &[AgentIdentity], limit: f64) -> HashMap<String, bool> {
		let ids: Vec<String> = agents
			.iter()
			.filter(|agent| agent.id != EXTERNAL_USER_ID)
			.map(|agent| agent.id.clone())
			.collect();
		self.trustlines.establish_batch(&ids, limit).await
	}

	/// Route a payment and book it locally when it was confirmed.
	pub async fn execute_and_record(&self, request: &TransactionRequest) -> Result<TransactionRecord, SessionError> {
		let record = self.router.execute(request).await?;

		if record.is_confirmed() {
			self.account.apply(&local_record(&record))?;
		} else {
			warn!(
				"Not booking failed payment {} from {} to {}",
				record.id, record.from, record.to
			);
		}
		Ok(record)
	}

	/// Ledger address user deposits must be paid to.
	pub async fn deposit_address(&self) -> Result<String, SessionError> {
		match &self.options.deposit_address {
			Some(address) => Ok(address.clone()),
			None => Ok(self.provisioner.resolve(MAIN_AGENT_ID).await?.address),
		}
	}

	/// Credit a user deposit to the main balance once the ledger shows it.
	///
	/// The amount booked is what the ledger delivered; `amount` is the
	/// caller's expectation and only logged when it differs.
	///
	/// # Returns
	/// The booked record, or `None` if `hash` is not a successful payment to
	/// the deposit address or was booked before.
	pub async fn record_deposit(&self, hash: &str, amount: f64) -> Result<Option<TransactionRecord>, SessionError> {
		if self.account.is_deposit_booked(hash) {
			info!("Deposit {} was already booked", hash);
			return Ok(None);
		}

		let destination = self.deposit_address().await?;
		let Some(deposit) = self.executor.verified_deposit(hash, &destination).await else {
			warn!("Deposit {} to {} could not be verified", hash, destination);
			return Ok(None);
		};
		if (deposit.amount - amount).abs() > f64::EPSILON {
			warn!(
				"Deposit {} delivered {} {} but {} was expected",
				hash, deposit.amount, deposit.currency, amount
			);
		}

		let record = TransactionRecord {
			id: record_id("deposit"),
			from: EXTERNAL_USER_ID.to_string(),
			to: MAIN_ACCOUNT_ID.to_string(),
			amount: deposit.amount,
			currency: deposit.currency,
			timestamp: timestamp_now(),
			status: TransactionStatus::Confirmed,
			kind: TransactionType::Payment,
			ledger_hash: Some(hash.to_string()),
			ledger_index: None,
			fee: None,
			memo: Some("User deposit".to_string()),
		};
		if !self.account.apply_deposit(hash, &record)? {
			return Ok(None);
		}
		info!("Booked deposit {} of {} {}", hash, record.amount, record.currency);
		Ok(Some(record))
	}

	/// Start a task on the backend and wait for it to finish.
	///
	/// The channel is open and subscribed before the run is started.
	pub async fn run_task(&self, task_description: &str) -> Result<TaskRun, SessionError> {
		let channel = RunChannel::connect(self.tasks.backend_url()).await?;
		let events = channel.subscribe();
		let run = self.drive_run(&channel, events, task_description).await;
		channel.close();
		run
	}

	async fn drive_run(
		&self,
		channel: &RunChannel,
		mut events: broadcast::Receiver<ChannelEvent>,
		task_description: &str,
	) -> Result<TaskRun, SessionError> {
		let run_id = self.tasks.start_run(task_description).await?;
		channel.join_room(&run_id)?;

		// A run that fails early completes before the join; its result is
		// stored before the completion is announced.
		let (completion, result) = match self.tasks.results(&run_id).await? {
			Some(result) => (result.completion(&run_id), Some(result)),
			None => match channel
				.await_completion(&mut events, &run_id, self.options.run_timeout)
				.await
			{
				Ok(completion) => (completion, self.tasks.results(&run_id).await?),
				Err(timeout @ TaskError::Timeout { .. }) => match self.tasks.results(&run_id).await? {
					Some(result) => {
						warn!("No completion event for run {}; using its stored result", run_id);
						(result.completion(&run_id), Some(result))
					}
					None => return Err(timeout.into()),
				},
				Err(e) => return Err(e.into()),
			},
		};

		if let Err(e) = channel.leave_room(&run_id) {
			warn!("Failed to leave room for run {}: {}", run_id, e);
		}
		Ok(TaskRun {
			run_id,
			completion,
			result,
		})
	}

	pub async fn shutdown(&self) -> Result<(), SessionError> {
		self.connection.disconnect().await?;
		info!("Session closed");
		Ok(())
	}
}

/// The record as the local account sees it: the main agent's wallet is the
/// main balance.
fn local_record(record: &TransactionRecord) -> TransactionRecord {
	let local_id = |id: &str| {
		if id == MAIN_AGENT_ID {
			MAIN_ACCOUNT_ID.to_string()
		} else {
			id.to_string()
		}
	};

	TransactionRecord {
		from: local_id(&record.from),
		to: local_id(&record.to),
		..record.clone()
	}
}
