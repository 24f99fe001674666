//! Ledger transaction builder
//!
//! This module provides a builder pattern for constructing the Payment and
//! TrustSet transactions this crate submits. The builder validates what it
//! can offline; sequence, fee and expiry are left for autofill.

use crate::ledger::address::{AddressError, ClassicAddress};
use crate::ledger::{LedgerAmount, LedgerTransaction, TransactionKind};
use crate::utils::{issued_value, xrp_to_drops};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransactionError {
	#[error("Transaction validation error: {0}")]
	ValidationError(String),

	#[error("Invalid amount: {0}")]
	AmountError(String),

	#[error("Invalid address: {0}")]
	AddressError(#[from] AddressError),
}

/// Native amount from an XRP value.
pub fn xrp_amount(amount: f64) -> Result<LedgerAmount, TransactionError> {
	xrp_to_drops(amount)
		.map(LedgerAmount::Drops)
		.ok_or_else(|| TransactionError::AmountError(format!("{} XRP", amount)))
}

/// Issued amount of `currency` from `issuer`.
pub fn issued_amount(amount: f64, currency: &str, issuer: &str) -> Result<LedgerAmount, TransactionError> {
	let value = issued_value(amount)
		.ok_or_else(|| TransactionError::AmountError(format!("{} {}", amount, currency)))?;
	Ok(LedgerAmount::Issued {
		value,
		currency: currency.to_string(),
		issuer: issuer.to_string(),
	})
}

/// Builder for constructing ledger transactions
#[derive(Debug, Default)]
pub struct LedgerTransactionBuilder {
	/// The transaction type
	kind: Option<TransactionKind>,
	/// Sending account
	account: Option<String>,
	destination: Option<String>,
	amount: Option<LedgerAmount>,
	limit_amount: Option<LedgerAmount>,
	memo: Option<String>,
}

impl LedgerTransactionBuilder {
	/// Creates a new transaction builder
	pub fn new() -> Self {
		Self::default()
	}

	/// Starts a Payment from `account`
	pub fn payment(account: impl Into<String>) -> Self {
		Self {
			kind: Some(TransactionKind::Payment),
			account: Some(account.into()),
			..Self::default()
		}
	}

	/// Starts a TrustSet for `account`
	pub fn trust_set(account: impl Into<String>) -> Self {
		Self {
			kind: Some(TransactionKind::TrustSet),
			account: Some(account.into()),
			..Self::default()
		}
	}

	pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
		self.destination = Some(destination.into());
		self
	}

	pub fn with_amount(mut self, amount: LedgerAmount) -> Self {
		self.amount = Some(amount);
		self
	}

	pub fn with_limit(mut self, limit: LedgerAmount) -> Self {
		self.limit_amount = Some(limit);
		self
	}

	/// Attach a memo; stored hex-encoded as `MemoData`
	pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
		self.memo = Some(memo.into());
		self
	}

	/// Builds the unsigned transaction
	pub fn build(self) -> Result<LedgerTransaction, TransactionError> {
		let kind = self
			.kind
			.ok_or_else(|| TransactionError::ValidationError("transaction type not set".to_string()))?;
		let account = self
			.account
			.ok_or_else(|| TransactionError::ValidationError("account not set".to_string()))?;
		ClassicAddress::decode(&account)?;

		let mut tx = LedgerTransaction::new(kind, account);

		match kind {
			TransactionKind::Payment => {
				let destination = self.destination.ok_or_else(|| {
					TransactionError::ValidationError("payment destination not set".to_string())
				})?;
				ClassicAddress::decode(&destination)?;
				if destination == tx.account {
					return Err(TransactionError::ValidationError(
						"payment to the sending account".to_string(),
					));
				}
				tx.amount = Some(self.amount.ok_or_else(|| {
					TransactionError::ValidationError("payment amount not set".to_string())
				})?);
				tx.destination = Some(destination);
			}
			TransactionKind::TrustSet => {
				match self.limit_amount {
					Some(limit @ LedgerAmount::Issued { .. }) => {
						if let LedgerAmount::Issued { issuer, .. } = &limit {
							ClassicAddress::decode(issuer)?;
						}
						tx.limit_amount = Some(limit);
					}
					Some(LedgerAmount::Drops(_)) => {
						return Err(TransactionError::ValidationError(
							"trustline limit must be an issued amount".to_string(),
						));
					}
					None => {
						return Err(TransactionError::ValidationError(
							"trustline limit not set".to_string(),
						));
					}
				}
			}
		}

		if let Some(memo) = self.memo {
			tx.memos.push(memo.into_bytes());
		}

		Ok(tx)
	}
}
