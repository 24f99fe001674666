//! Wallet lifecycle and payment orchestration for agent networks on the XRP Ledger.

pub mod balance;
pub mod config;
pub mod ledger;
pub mod session;
pub mod task;
pub mod transaction;
pub mod utils;
pub mod wallet;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use session::{LedgerSession, SessionError, SessionOptions, TaskRun};
