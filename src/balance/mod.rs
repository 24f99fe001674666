pub mod account;
pub mod store;

pub use account::{
	BalanceEffect, BalanceError, DEFAULT_MAIN_BALANCE, LocalBalanceState, LocalLedgerAccount,
	MAIN_ACCOUNT_ID, SubscriptionId, balance_effects,
};
pub use store::{BalanceStore, BalanceStoreError, FileBalanceStore};
