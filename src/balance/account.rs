//! Local balance ledger.
//!
//! This module provides `LocalLedgerAccount`, the in-process accounting model the application
//! treats as ground truth for displayed balances. It is independent of the on-chain ledger and
//! applies a fixed, asymmetric rule table to each transaction record:
//!
//! | from          | to       | effect                                   |
//! |---------------|----------|------------------------------------------|
//! | `user-wallet` | `main`   | credit main (no other rule applies)      |
//! | `main`        | any      | debit main                               |
//! | any           | not main | credit the receiving agent               |
//!
//! The last two rules are independent and may both fire. A transfer between two agents credits
//! the receiver without debiting the sender. Every applied record adds its amount to the total
//! volume. User deposits are booked at most once per ledger hash. Each mutation is persisted and then announced to subscribers while the state lock is
//! held, so subscribers must not call back into the account.

use super::store::BalanceStore;
use crate::transaction::TransactionRecord;
use crate::wallet::{AgentIdentity, EXTERNAL_USER_ID, MAIN_AGENT_ID};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// Local account id of the main balance.
pub const MAIN_ACCOUNT_ID: &str = "main";

/// Main balance of a fresh installation.
pub const DEFAULT_MAIN_BALANCE: f64 = 100.0;

/// Balances as persisted and as handed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalBalanceState {
	#[serde(default = "default_main_balance")]
	pub main_balance: f64,
	#[serde(default)]
	pub agent_balances: BTreeMap<String, f64>,
	/// Sum of all applied amounts; never decreases.
	#[serde(default)]
	pub total_volume: f64,
	/// Ledger hashes of deposits already credited.
	#[serde(default)]
	pub booked_deposits: BTreeSet<String>,
}

fn default_main_balance() -> f64 {
	DEFAULT_MAIN_BALANCE
}

impl Default for LocalBalanceState {
	fn default() -> Self {
		Self {
			main_balance: DEFAULT_MAIN_BALANCE,
			agent_balances: BTreeMap::new(),
			total_volume: 0.0,
			booked_deposits: BTreeSet::new(),
		}
	}
}

/// A single balance change produced by the rule table.
#[derive(Debug, Clone, PartialEq)]
pub enum BalanceEffect {
	CreditMain,
	DebitMain,
	CreditAgent(String),
}

/// Effects of a transfer from `from` to `to`, in application order.
pub fn balance_effects(from: &str, to: &str) -> Vec<BalanceEffect> {
	if from == EXTERNAL_USER_ID && to == MAIN_ACCOUNT_ID {
		return vec![BalanceEffect::CreditMain];
	}

	let mut effects = Vec::new();
	if from == MAIN_ACCOUNT_ID {
		effects.push(BalanceEffect::DebitMain);
	}
	if to != MAIN_ACCOUNT_ID {
		effects.push(BalanceEffect::CreditAgent(to.to_string()));
	}
	effects
}

#[derive(Debug, thiserror::Error)]
pub enum BalanceError {
	#[error("Invalid amount {amount} in record {record_id}")]
	AmountError { record_id: String, amount: f64 },
}

/// Handle returned by [`LocalLedgerAccount::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Box<dyn Fn(&LocalBalanceState) + Send + Sync>;

struct AccountState {
	balances: LocalBalanceState,
	subscribers: Vec<(SubscriptionId, Subscriber)>,
	next_subscription: u64,
}

pub struct LocalLedgerAccount {
	store: Box<dyn BalanceStore>,
	state: Mutex<AccountState>,
}

impl LocalLedgerAccount {
	/// Open the account, restoring persisted balances or starting from defaults.
	pub fn open(store: Box<dyn BalanceStore>) -> Self {
		let balances = match store.load() {
			Ok(Some(balances)) => {
				info!(
					"Restored local balances: main {}, {} agents, volume {}",
					balances.main_balance,
					balances.agent_balances.len(),
					balances.total_volume
				);
				balances
			}
			Ok(None) => LocalBalanceState::default(),
			Err(e) => {
				warn!("Failed to load local balances, starting from defaults: {}", e);
				LocalBalanceState::default()
			}
		};

		Self {
			store,
			state: Mutex::new(AccountState {
				balances,
				subscribers: Vec::new(),
				next_subscription: 1,
			}),
		}
	}

	fn lock(&self) -> MutexGuard<'_, AccountState> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Update, persist and notify under one lock. Nothing is persisted or
	/// announced when `update` reports no change.
	fn mutate(&self, update: impl FnOnce(&mut LocalBalanceState) -> bool) -> bool {
		let mut state = self.lock();
		if !update(&mut state.balances) {
			return false;
		}

		if let Err(e) = self.store.save(&state.balances) {
			error!("Failed to persist local balances: {}", e);
		}
		for (_, subscriber) in &state.subscribers {
			subscriber(&state.balances);
		}
		true
	}

	/// Apply one transaction record to the balances.
	///
	/// Status is not inspected; callers apply the records they consider settled.
	pub fn apply(&self, record: &TransactionRecord) -> Result<(), BalanceError> {
		let effects = checked_effects(record)?;
		self.mutate(|balances| {
			apply_effects(balances, record.amount, effects);
			true
		});
		Ok(())
	}

	/// Apply a user deposit identified by its ledger hash.
	///
	/// # Returns
	/// `false`, with nothing changed, if that hash was already booked.
	pub fn apply_deposit(&self, hash: &str, record: &TransactionRecord) -> Result<bool, BalanceError> {
		let effects = checked_effects(record)?;
		let booked = self.mutate(|balances| {
			if !balances.booked_deposits.insert(hash.to_string()) {
				return false;
			}
			apply_effects(balances, record.amount, effects);
			true
		});
		if !booked {
			info!("Deposit {} was already booked", hash);
		}
		Ok(booked)
	}

	pub fn is_deposit_booked(&self, hash: &str) -> bool {
		self.lock().balances.booked_deposits.contains(hash)
	}

	/// Seed balances for agents that have none yet. The main agent is skipped.
	pub fn initialize_agent_balances(&self, agents: &[AgentIdentity]) {
		self.mutate(|balances| {
			for agent in agents {
				if agent.id == MAIN_AGENT_ID || agent.id == MAIN_ACCOUNT_ID {
					continue;
				}
				balances
					.agent_balances
					.entry(agent.id.clone())
					.or_insert(agent.balance);
			}
			true
		});
	}

	pub fn main_balance(&self) -> f64 {
		self.lock().balances.main_balance
	}

	pub fn agent_balance(&self, agent_id: &str) -> Option<f64> {
		self.lock().balances.agent_balances.get(agent_id).copied()
	}

	pub fn all_agent_balances(&self) -> BTreeMap<String, f64> {
		self.lock().balances.agent_balances.clone()
	}

	pub fn total_volume(&self) -> f64 {
		self.lock().balances.total_volume
	}

	pub fn snapshot(&self) -> LocalBalanceState {
		self.lock().balances.clone()
	}

	/// Register a callback run after every mutation.
	///
	/// The callback runs with the account locked and must not call back into it.
	pub fn subscribe(&self, callback: impl Fn(&LocalBalanceState) + Send + Sync + 'static) -> SubscriptionId {
		let mut state = self.lock();
		let id = SubscriptionId(state.next_subscription);
		state.next_subscription += 1;
		state.subscribers.push((id, Box::new(callback)));
		id
	}

	pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
		let mut state = self.lock();
		let before = state.subscribers.len();
		state.subscribers.retain(|(existing, _)| *existing != id);
		state.subscribers.len() != before
	}
}

fn checked_effects(record: &TransactionRecord) -> Result<Vec<BalanceEffect>, BalanceError> {
	if !record.amount.is_finite() || record.amount < 0.0 {
		return Err(BalanceError::AmountError {
			record_id: record.id.clone(),
			amount: record.amount,
		});
	}

	let effects = balance_effects(&record.from, &record.to);
	debug!(
		"Applying {} ({} -> {}, {}): {:?}",
		record.id, record.from, record.to, record.amount, effects
	);
	Ok(effects)
}

fn apply_effects(balances: &mut LocalBalanceState, amount: f64, effects: Vec<BalanceEffect>) {
	for effect in effects {
		match effect {
			BalanceEffect::CreditMain => balances.main_balance += amount,
			BalanceEffect::DebitMain => balances.main_balance -= amount,
			BalanceEffect::CreditAgent(agent_id) => {
				*balances.agent_balances.entry(agent_id).or_insert(0.0) += amount
			}
		}
	}
	balances.total_volume += amount;
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::balance::store::{BalanceStoreError, FileBalanceStore};
	use crate::transaction::{Currency, TransactionStatus, TransactionType};
	use std::sync::Arc;
	use std::sync::atomic::{AtomicUsize, Ordering};

	/// Store that keeps nothing.
	struct NullStore;

	impl BalanceStore for NullStore {
		fn load(&self) -> Result<Option<LocalBalanceState>, BalanceStoreError> {
			Ok(None)
		}

		fn save(&self, _state: &LocalBalanceState) -> Result<(), BalanceStoreError> {
			Ok(())
		}
	}

	fn record(from: &str, to: &str, amount: f64) -> TransactionRecord {
		TransactionRecord {
			id: format!("tx-{}-{}", from, to),
			from: from.to_string(),
			to: to.to_string(),
			amount,
			currency: Currency::Rlusd,
			timestamp: "2024-01-01T00:00:00.000Z".to_string(),
			status: TransactionStatus::Confirmed,
			kind: TransactionType::Payment,
			ledger_hash: None,
			ledger_index: None,
			fee: None,
			memo: None,
		}
	}

	#[test]
	fn user_deposit_credits_main_only() {
		let account = LocalLedgerAccount::open(Box::new(NullStore));
		account.apply(&record(EXTERNAL_USER_ID, MAIN_ACCOUNT_ID, 5.0)).unwrap();

		assert_eq!(account.main_balance(), 105.0);
		assert_eq!(account.total_volume(), 5.0);
		assert!(account.all_agent_balances().is_empty());
	}

	#[test]
	fn main_payment_debits_main_and_credits_agent() {
		let account = LocalLedgerAccount::open(Box::new(NullStore));
		account.apply(&record(MAIN_ACCOUNT_ID, "text-gen-1", 5.0)).unwrap();

		assert_eq!(account.main_balance(), 95.0);
		assert_eq!(account.agent_balance("text-gen-1"), Some(5.0));
		assert_eq!(account.total_volume(), 5.0);
	}

	#[test]
	fn agent_transfer_does_not_debit_sender() {
		let account = LocalLedgerAccount::open(Box::new(NullStore));
		account.apply(&record(MAIN_ACCOUNT_ID, "text-gen-1", 5.0)).unwrap();
		account.apply(&record("text-gen-1", "summarizer", 2.0)).unwrap();

		assert_eq!(account.main_balance(), 95.0);
		assert_eq!(account.agent_balance("summarizer"), Some(2.0));
		assert_eq!(account.agent_balance("text-gen-1"), Some(5.0));
		assert_eq!(account.total_volume(), 7.0);
	}

	#[test]
	fn rule_table() {
		assert_eq!(
			balance_effects(EXTERNAL_USER_ID, MAIN_ACCOUNT_ID),
			vec![BalanceEffect::CreditMain]
		);
		assert_eq!(
			balance_effects(MAIN_ACCOUNT_ID, MAIN_ACCOUNT_ID),
			vec![BalanceEffect::DebitMain]
		);
		assert_eq!(
			balance_effects(EXTERNAL_USER_ID, "translator"),
			vec![BalanceEffect::CreditAgent("translator".to_string())]
		);
	}

	#[test]
	fn rejects_negative_amounts_without_side_effects() {
		let account = LocalLedgerAccount::open(Box::new(NullStore));
		assert!(account.apply(&record(MAIN_ACCOUNT_ID, "translator", -1.0)).is_err());
		assert!(account.apply(&record(MAIN_ACCOUNT_ID, "translator", f64::NAN)).is_err());
		assert_eq!(account.snapshot(), LocalBalanceState::default());
	}

	#[test]
	fn seeds_missing_agents_only() {
		let account = LocalLedgerAccount::open(Box::new(NullStore));
		account.apply(&record(MAIN_ACCOUNT_ID, "translator", 4.0)).unwrap();

		account.initialize_agent_balances(&[
			AgentIdentity::new(MAIN_AGENT_ID, "Orchestrator Agent", 100.0),
			AgentIdentity::new("translator", "Language Translator", 0.0),
			AgentIdentity::new("summarizer", "Content Summarizer", 1.5),
		]);

		assert_eq!(account.agent_balance("translator"), Some(4.0));
		assert_eq!(account.agent_balance("summarizer"), Some(1.5));
		assert_eq!(account.agent_balance(MAIN_AGENT_ID), None);
		assert_eq!(account.main_balance(), 96.0);
	}

	#[test]
	fn subscribers_see_each_mutation_until_unsubscribed() {
		let account = LocalLedgerAccount::open(Box::new(NullStore));
		let calls = Arc::new(AtomicUsize::new(0));
		let seen = calls.clone();
		let id = account.subscribe(move |state| {
			assert!(state.total_volume >= 0.0);
			seen.fetch_add(1, Ordering::SeqCst);
		});

		account.apply(&record(MAIN_ACCOUNT_ID, "translator", 1.0)).unwrap();
		account.apply(&record(MAIN_ACCOUNT_ID, "translator", 1.0)).unwrap();
		assert_eq!(calls.load(Ordering::SeqCst), 2);

		assert!(account.unsubscribe(id));
		assert!(!account.unsubscribe(id));
		account.apply(&record(MAIN_ACCOUNT_ID, "translator", 1.0)).unwrap();
		assert_eq!(calls.load(Ordering::SeqCst), 2);
	}

	#[test]
	fn balances_survive_reopen() {
		let dir = tempfile::tempdir().unwrap();
		{
			let account = LocalLedgerAccount::open(Box::new(FileBalanceStore::new(dir.path())));
			account.apply(&record(MAIN_ACCOUNT_ID, "image-gen-1", 10.0)).unwrap();
		}

		let reopened = LocalLedgerAccount::open(Box::new(FileBalanceStore::new(dir.path())));
		assert_eq!(reopened.main_balance(), 90.0);
		assert_eq!(reopened.agent_balance("image-gen-1"), Some(10.0));
		assert_eq!(reopened.total_volume(), 10.0);
	}

	#[test]
	fn deposit_is_booked_once_per_hash() {
		let dir = tempfile::tempdir().unwrap();
		{
			let account = LocalLedgerAccount::open(Box::new(FileBalanceStore::new(dir.path())));
			let deposit = record(EXTERNAL_USER_ID, MAIN_ACCOUNT_ID, 5.0);
			assert!(account.apply_deposit("HASH", &deposit).unwrap());
			assert!(!account.apply_deposit("HASH", &deposit).unwrap());
			assert_eq!(account.main_balance(), 105.0);
		}

		let reopened = LocalLedgerAccount::open(Box::new(FileBalanceStore::new(dir.path())));
		assert!(reopened.is_deposit_booked("HASH"));
		assert!(
			!reopened
				.apply_deposit("HASH", &record(EXTERNAL_USER_ID, MAIN_ACCOUNT_ID, 5.0))
				.unwrap()
		);
		assert_eq!(reopened.main_balance(), 105.0);
		assert_eq!(reopened.total_volume(), 5.0);
	}

	#[test]
	fn missing_main_balance_keeps_the_other_keys() {
		let dir = tempfile::tempdir().unwrap();
		let store = FileBalanceStore::new(dir.path());
		std::fs::write(
			store.path(),
			r#"{"agentBalances":{"translator":3.0},"totalVolume":4.0}"#,
		)
		.unwrap();

		let account = LocalLedgerAccount::open(Box::new(store));
		assert_eq!(account.main_balance(), DEFAULT_MAIN_BALANCE);
		assert_eq!(account.agent_balance("translator"), Some(3.0));
		assert_eq!(account.total_volume(), 4.0);
	}

	#[test]
	fn corrupt_store_falls_back_to_defaults() {
		let dir = tempfile::tempdir().unwrap();
		let store = FileBalanceStore::new(dir.path());
		std::fs::write(store.path(), "not json").unwrap();

		let account = LocalLedgerAccount::open(Box::new(store));
		assert_eq!(account.snapshot(), LocalBalanceState::default());
	}
}
