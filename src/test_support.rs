//! In-memory ledger for unit tests.

use crate::ledger::{
	AccountInfo, LedgerApi, LedgerConnection, LedgerError, LedgerIndex, LedgerSettings,
	SubmitResponse, SUCCESS_RESULT, TransactionLookup, codec,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct MockState {
	fail_connect: bool,
	fail_fund: bool,
	fail_submit: bool,
	engine_result: String,
	validated_index: u32,
	accounts: HashMap<String, u64>,
	transactions: HashMap<String, TransactionLookup>,
}

/// Ledger double: accounts and transactions live in maps, submissions are
/// validated immediately unless the configured engine result says otherwise.
pub struct MockLedger {
	connect_delay: Duration,
	fund_delay: Duration,
	state: Mutex<MockState>,
	connect_calls: AtomicUsize,
	fund_calls: AtomicUsize,
	submit_calls: AtomicUsize,
	lookup_calls: AtomicUsize,
}

impl MockLedger {
	pub const CURRENT_LEDGER: u32 = 100;
	pub const VALIDATED_LEDGER: u32 = 99;
	pub const FAUCET_DROPS: u64 = 1_000_000_000;
	pub const FEE_DROPS: u64 = 12;

	pub fn new() -> Self {
		Self {
			connect_delay: Duration::ZERO,
			fund_delay: Duration::ZERO,
			state: Mutex::new(MockState {
				fail_connect: false,
				fail_fund: false,
				fail_submit: false,
				engine_result: SUCCESS_RESULT.to_string(),
				validated_index: Self::VALIDATED_LEDGER,
				accounts: HashMap::new(),
				transactions: HashMap::new(),
			}),
			connect_calls: AtomicUsize::new(0),
			fund_calls: AtomicUsize::new(0),
			submit_calls: AtomicUsize::new(0),
			lookup_calls: AtomicUsize::new(0),
		}
	}

	pub fn with_connect_delay(mut self, delay: Duration) -> Self {
		self.connect_delay = delay;
		self
	}

	pub fn with_fund_delay(mut self, delay: Duration) -> Self {
		self.fund_delay = delay;
		self
	}

	fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
		self.state.lock().unwrap()
	}

	pub fn set_fail_connect(&self, fail: bool) {
		self.state().fail_connect = fail;
	}

	pub fn set_fail_fund(&self, fail: bool) {
		self.state().fail_fund = fail;
	}

	pub fn set_fail_submit(&self, fail: bool) {
		self.state().fail_submit = fail;
	}

	pub fn set_engine_result(&self, result: &str) {
		self.state().engine_result = result.to_string();
	}

	pub fn set_validated_index(&self, index: u32) {
		self.state().validated_index = index;
	}

	pub fn credit(&self, address: &str, drops: u64) {
		*self.state().accounts.entry(address.to_string()).or_insert(0) += drops;
	}

	pub fn insert_transaction(&self, lookup: TransactionLookup) {
		self.state().transactions.insert(lookup.hash.clone(), lookup);
	}

	pub fn connect_calls(&self) -> usize {
		self.connect_calls.load(Ordering::SeqCst)
	}

	pub fn fund_calls(&self) -> usize {
		self.fund_calls.load(Ordering::SeqCst)
	}

	pub fn submit_calls(&self) -> usize {
		self.submit_calls.load(Ordering::SeqCst)
	}

	pub fn lookup_calls(&self) -> usize {
		self.lookup_calls.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl LedgerApi for MockLedger {
	async fn connect(&self) -> Result<(), LedgerError> {
		self.connect_calls.fetch_add(1, Ordering::SeqCst);
		if !self.connect_delay.is_zero() {
			tokio::time::sleep(self.connect_delay).await;
		}
		if self.state().fail_connect {
			return Err(LedgerError::UnexpectedResponse("connection refused".to_string()));
		}
		Ok(())
	}

	async fn disconnect(&self) -> Result<(), LedgerError> {
		Ok(())
	}

	async fn account_info(
		&self,
		address: &str,
		_ledger_index: LedgerIndex,
	) -> Result<AccountInfo, LedgerError> {
		match self.state().accounts.get(address) {
			Some(&balance_drops) => Ok(AccountInfo {
				balance_drops,
				sequence: 1,
			}),
			None => Err(LedgerError::RpcError {
				code: "actNotFound".to_string(),
				message: "Account not found.".to_string(),
			}),
		}
	}

	async fn fee_drops(&self) -> Result<u64, LedgerError> {
		Ok(Self::FEE_DROPS)
	}

	async fn current_ledger_index(&self) -> Result<u32, LedgerError> {
		Ok(Self::CURRENT_LEDGER)
	}

	async fn validated_ledger_index(&self) -> Result<u32, LedgerError> {
		Ok(self.state().validated_index)
	}

	async fn submit(&self, tx_blob: &str) -> Result<SubmitResponse, LedgerError> {
		self.submit_calls.fetch_add(1, Ordering::SeqCst);
		let blob = hex::decode(tx_blob).map_err(|e| LedgerError::CodecError(e.to_string()))?;
		let hash = codec::transaction_hash(&blob);

		let mut state = self.state();
		if state.fail_submit {
			return Err(LedgerError::NotConnected);
		}

		let response = SubmitResponse {
			engine_result: state.engine_result.clone(),
			hash: Some(hash.clone()),
		};
		if !response.is_final_rejection() && !response.engine_result.starts_with("ter") {
			let lookup = TransactionLookup {
				hash: hash.clone(),
				validated: true,
				result_code: Some(response.engine_result.clone()),
				ledger_index: Some(Self::VALIDATED_LEDGER),
				fee: Some(Self::FEE_DROPS.to_string()),
				transaction_type: Some("Payment".to_string()),
				destination: None,
				delivered_amount: None,
			};
			state.transactions.insert(hash, lookup);
		}
		Ok(response)
	}

	async fn transaction(&self, hash: &str) -> Result<Option<TransactionLookup>, LedgerError> {
		self.lookup_calls.fetch_add(1, Ordering::SeqCst);
		Ok(self.state().transactions.get(hash).cloned())
	}

	async fn fund(&self, address: &str) -> Result<(), LedgerError> {
		self.fund_calls.fetch_add(1, Ordering::SeqCst);
		if !self.fund_delay.is_zero() {
			tokio::time::sleep(self.fund_delay).await;
		}
		if self.state().fail_fund {
			return Err(LedgerError::FaucetError("faucet unavailable".to_string()));
		}
		self.credit(address, Self::FAUCET_DROPS);
		Ok(())
	}
}

/// Connection over `mock` with short polling.
pub fn test_connection(mock: Arc<MockLedger>) -> LedgerConnection {
	LedgerConnection::new(
		mock,
		LedgerSettings {
			url: "ws://mock-ledger".to_string(),
			poll_interval: Duration::from_millis(100),
			fund_attempts: 3,
		},
	)
}
