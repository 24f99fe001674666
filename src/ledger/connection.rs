//!
//! Lazily established, shared connection to the ledger network.
//!
//! `initialize` may be called from any number of tasks at once: the first
//! caller starts the connect and everyone else awaits the same in-flight
//! attempt. Every composite operation below initializes on first use.

use super::client::LedgerApi;
use super::types::*;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

type ConnectFuture = Shared<BoxFuture<'static, Result<(), ConnectionError>>>;

enum ConnectionState {
	Disconnected,
	Connecting(ConnectFuture),
	Connected,
}

/// Tunables for the composite ledger operations.
#[derive(Debug, Clone)]
pub struct LedgerSettings {
	/// Endpoint, used for error reporting and logs.
	pub url: String,
	/// Delay between finality and funding polls.
	pub poll_interval: Duration,
	/// Number of balance polls after a faucet request before giving up.
	pub fund_attempts: u32,
}

impl Default for LedgerSettings {
	fn default() -> Self {
		Self {
			url: "wss://s.altnet.rippletest.net:51233".to_string(),
			poll_interval: Duration::from_secs(1),
			fund_attempts: 20,
		}
	}
}

struct Inner {
	api: Arc<dyn LedgerApi>,
	settings: LedgerSettings,
	state: Mutex<ConnectionState>,
}

/// Handle to the process-wide ledger connection. Cloning is cheap and every
/// clone shares the same connection state.
#[derive(Clone)]
pub struct LedgerConnection {
	inner: Arc<Inner>,
}

impl LedgerConnection {
	pub fn new(api: Arc<dyn LedgerApi>, settings: LedgerSettings) -> Self {
		Self {
			inner: Arc::new(Inner {
				api,
				settings,
				state: Mutex::new(ConnectionState::Disconnected),
			}),
		}
	}

	pub fn settings(&self) -> &LedgerSettings {
		&self.inner.settings
	}

	pub fn is_connected(&self) -> bool {
		matches!(
			*self.inner.state.lock().unwrap_or_else(PoisonError::into_inner),
			ConnectionState::Connected
		)
	}

	/// Connect if not already connected.
	///
	/// Concurrent first callers share one attempt and all observe its result.
	/// A failed attempt is not retried; the next call starts a new one.
	pub async fn initialize(&self) -> Result<(), LedgerError> {
		let attempt = {
			let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
			match &*state {
				ConnectionState::Connected => return Ok(()),
				ConnectionState::Connecting(attempt) => attempt.clone(),
				ConnectionState::Disconnected => {
					let api = self.inner.api.clone();
					let url = self.inner.settings.url.clone();
					let attempt = async move {
						info!("Connecting to ledger at {}", url);
						api.connect().await.map_err(|e| ConnectionError {
							url,
							reason: e.to_string(),
						})
					}
					.boxed()
					.shared();
					*state = ConnectionState::Connecting(attempt.clone());
					attempt
				}
			}
		};

		let result = attempt.clone().await;

		let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
		// A disconnect or a newer attempt may have replaced ours meanwhile.
		if let ConnectionState::Connecting(current) = &*state {
			if current.ptr_eq(&attempt) {
				*state = match &result {
					Ok(()) => ConnectionState::Connected,
					Err(e) => {
						warn!("{}", e);
						ConnectionState::Disconnected
					}
				};
			}
		}

		result.map_err(LedgerError::from)
	}

	/// Forget a connection the client reports as gone, so the next
	/// `initialize` reconnects.
	fn observe(&self, error: LedgerError) -> LedgerError {
		if matches!(error, LedgerError::NotConnected) {
			let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
			if matches!(*state, ConnectionState::Connected) {
				warn!("Lost connection to ledger at {}", self.inner.settings.url);
				*state = ConnectionState::Disconnected;
			}
		}
		error
	}

	/// Drop the connection; a later `initialize` reconnects.
	pub async fn disconnect(&self) -> Result<(), LedgerError> {
		*self.inner.state.lock().unwrap_or_else(PoisonError::into_inner) =
			ConnectionState::Disconnected;
		self.inner.api.disconnect().await
	}

	/// Fill `Sequence`, `Fee` and `LastLedgerSequence` where the builder left
	/// them empty.
	pub async fn autofill(&self, mut tx: LedgerTransaction) -> Result<LedgerTransaction, LedgerError> {
		self.initialize().await?;
		let api = &self.inner.api;

		let (account, fee_drops, current_index) = tokio::try_join!(
			api.account_info(&tx.account, LedgerIndex::Current),
			api.fee_drops(),
			api.current_ledger_index(),
		)
		.map_err(|e| self.observe(e))?;

		tx.sequence.get_or_insert(account.sequence);
		tx.fee_drops.get_or_insert(fee_drops);
		tx.last_ledger_sequence
			.get_or_insert(current_index + LEDGER_OFFSET);

		debug!(
			"Autofilled {:?} from {}: sequence {:?}, fee {:?} drops, last ledger {:?}",
			tx.kind, tx.account, tx.sequence, tx.fee_drops, tx.last_ledger_sequence
		);
		Ok(tx)
	}

	/// Submit a signed transaction and wait until its result is final.
	///
	/// # Returns
	/// The validated outcome, an immediate local rejection, or an `expired`
	/// outcome once the validated ledger passes `LastLedgerSequence`.
	pub async fn submit_and_wait(
		&self,
		signed: &SignedTransaction,
	) -> Result<LedgerOutcome, LedgerError> {
		self.initialize().await?;
		let api = &self.inner.api;

		let response = api
			.submit(&signed.tx_blob)
			.await
			.map_err(|e| self.observe(e))?;
		debug!(
			"Submitted {}: preliminary result {}",
			signed.hash, response.engine_result
		);

		if response.is_final_rejection() {
			return Ok(LedgerOutcome {
				hash: response.hash.unwrap_or_else(|| signed.hash.clone()),
				result_code: response.engine_result,
				ledger_index: None,
				fee: None,
			});
		}

		loop {
			// Read the validated index before the lookup so a transaction that
			// lands in the last allowed ledger is never reported as expired.
			let validated_index = api
				.validated_ledger_index()
				.await
				.map_err(|e| self.observe(e))?;

			if let Some(lookup) = api
				.transaction(&signed.hash)
				.await
				.map_err(|e| self.observe(e))?
			{
				if lookup.validated {
					let outcome = LedgerOutcome {
						hash: lookup.hash,
						result_code: lookup
							.result_code
							.unwrap_or_else(|| "unknown".to_string()),
						ledger_index: lookup.ledger_index,
						fee: lookup.fee,
					};
					info!(
						"Transaction {} validated with {} in ledger {:?}",
						outcome.hash, outcome.result_code, outcome.ledger_index
					);
					return Ok(outcome);
				}
			}

			if validated_index > signed.last_ledger_sequence {
				warn!(
					"Transaction {} expired: validated ledger {} passed {}",
					signed.hash, validated_index, signed.last_ledger_sequence
				);
				return Ok(LedgerOutcome {
					hash: signed.hash.clone(),
					result_code: EXPIRED_RESULT.to_string(),
					ledger_index: None,
					fee: None,
				});
			}

			tokio::time::sleep(self.inner.settings.poll_interval).await;
		}
	}

	/// Native balance of an account on the validated ledger, in drops.
	pub async fn balance_drops(&self, address: &str) -> Result<u64, LedgerError> {
		self.initialize().await?;
		let info = self
			.inner
			.api
			.account_info(address, LedgerIndex::Validated)
			.await
			.map_err(|e| self.observe(e))?;
		Ok(info.balance_drops)
	}

	/// Fund an account from the faucet and wait until it exists.
	///
	/// # Returns
	/// The funded balance in drops.
	pub async fn fund(&self, address: &str) -> Result<u64, LedgerError> {
		self.initialize().await?;
		self.inner
			.api
			.fund(address)
			.await
			.map_err(|e| self.observe(e))?;

		let attempts = self.inner.settings.fund_attempts.max(1);
		for attempt in 1..=attempts {
			match self
				.inner
				.api
				.account_info(address, LedgerIndex::Validated)
				.await
			{
				Ok(info) if info.balance_drops > 0 => {
					info!("Funded {} with {} drops", address, info.balance_drops);
					return Ok(info.balance_drops);
				}
				Ok(_) => debug!("{} exists but has no balance yet", address),
				Err(LedgerError::RpcError { code, .. }) if code == "actNotFound" => {
					debug!("{} not yet on ledger (attempt {}/{})", address, attempt, attempts)
				}
				Err(e) => return Err(self.observe(e)),
			}
			tokio::time::sleep(self.inner.settings.poll_interval).await;
		}

		Err(LedgerError::FaucetError(format!(
			"{} not funded after {} attempts",
			address, attempts
		)))
	}

	/// Look up a transaction by hash.
	pub async fn transaction(&self, hash: &str) -> Result<Option<TransactionLookup>, LedgerError> {
		self.initialize().await?;
		self.inner
			.api
			.transaction(hash)
			.await
			.map_err(|e| self.observe(e))
	}
}
