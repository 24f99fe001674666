//!
//! Payment execution against the ledger.
//!
//! A payment is built, autofilled and signed locally, then submitted and
//! awaited until final. Anything that goes wrong before submission is an
//! error; once the transaction has been handed to the ledger the outcome is
//! always a record, confirmed or failed.

use super::builder::{LedgerTransactionBuilder, TransactionError, issued_amount, xrp_amount};
use super::types::*;
use crate::ledger::{LedgerAmount, LedgerConnection, LedgerError, SUCCESS_RESULT, TransactionLookup, codec};
use crate::utils::{XRP_DECIMALS, drops_to_xrp};
use crate::wallet::{ProvisioningError, WalletProvisioner};

use tracing::{debug, error, info, warn};

/// Failures before a payment reaches the ledger
#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
	#[error("Wallet error: {0}")]
	WalletError(#[from] ProvisioningError),

	#[error("Transaction error: {0}")]
	TransactionError(#[from] TransactionError),

	#[error("Ledger error: {0}")]
	LedgerError(#[from] LedgerError),
}

/// What a verified deposit delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedDeposit {
	pub amount: f64,
	pub currency: Currency,
}

#[derive(Clone)]
pub struct PaymentExecutor {
	connection: LedgerConnection,
	provisioner: WalletProvisioner,
	/// Issuer of RLUSD amounts.
	rlusd_issuer: String,
}

impl PaymentExecutor {
	pub fn new(connection: LedgerConnection, provisioner: WalletProvisioner, rlusd_issuer: String) -> Self {
		Self {
			connection,
			provisioner,
			rlusd_issuer,
		}
	}

	pub fn rlusd_issuer(&self) -> &str {
		&self.rlusd_issuer
	}

	/// Pay `amount` of `currency` from one agent's wallet to another's.
	/// `kind` is stamped on the record and never reaches the ledger.
	///
	/// # Returns
	/// A confirmed record when the ledger validated the payment with
	/// `tesSUCCESS`, a failed record for any other outcome after submission.
	pub async fn pay(
		&self,
		from_agent_id: &str,
		to_agent_id: &str,
		amount: f64,
		currency: Currency,
		kind: TransactionType,
		memo: Option<&str>,
	) -> Result<TransactionRecord, SubmissionError> {
		let (sender, receiver) = tokio::try_join!(
			self.provisioner.resolve(from_agent_id),
			self.provisioner.resolve(to_agent_id),
		)?;
		debug!(
			"Paying {} {} from {} ({}) to {} ({})",
			amount, currency, from_agent_id, sender.address, to_agent_id, receiver.address
		);

		let ledger_amount = match currency {
			Currency::Xrp => xrp_amount(amount)?,
			Currency::Rlusd => issued_amount(amount, RLUSD_CURRENCY_CODE, &self.rlusd_issuer)?,
		};

		let mut builder = LedgerTransactionBuilder::payment(&sender.address)
			.with_destination(&receiver.address)
			.with_amount(ledger_amount);
		if let Some(memo) = memo {
			builder = builder.with_memo(memo);
		}
		let tx = self.connection.autofill(builder.build()?).await?;
		let signed = codec::sign(tx, &sender.public_key(), |payload| sender.sign(payload))?;

		let mut record = TransactionRecord {
			id: record_id("tx"),
			from: from_agent_id.to_string(),
			to: to_agent_id.to_string(),
			amount,
			currency,
			timestamp: timestamp_now(),
			status: TransactionStatus::Failed,
			kind,
			ledger_hash: None,
			ledger_index: None,
			fee: None,
			memo: memo.map(str::to_string),
		};

		match self.connection.submit_and_wait(&signed).await {
			Ok(outcome) if outcome.is_success() => {
				info!(
					"Payment {} confirmed: {} {} from {} to {}",
					outcome.hash, amount, currency, from_agent_id, to_agent_id
				);
				record.status = TransactionStatus::Confirmed;
				record.ledger_hash = Some(outcome.hash);
				record.ledger_index = outcome.ledger_index;
				record.fee = outcome.fee.as_deref().and_then(drops_to_xrp);
			}
			Ok(outcome) => {
				warn!(
					"Payment {} from {} to {} failed with {}",
					outcome.hash, from_agent_id, to_agent_id, outcome.result_code
				);
			}
			Err(e) => {
				error!(
					"Payment {} from {} to {} could not be completed: {}",
					signed.hash, from_agent_id, to_agent_id, e
				);
			}
		}

		Ok(record)
	}

	/// Native balance of an agent's wallet in XRP; 0 when it cannot be read.
	pub async fn balance(&self, agent_id: &str) -> f64 {
		let wallet = match self.provisioner.resolve(agent_id).await {
			Ok(wallet) => wallet,
			Err(e) => {
				warn!("No wallet for {}: {}", agent_id, e);
				return 0.0;
			}
		};

		match self.connection.balance_drops(&wallet.address).await {
			Ok(drops) => drops as f64 / 10f64.powi(XRP_DECIMALS as i32),
			Err(e) => {
				warn!("Failed to read balance of {} ({}): {}", agent_id, wallet.address, e);
				0.0
			}
		}
	}

	/// Whether `hash` is a validated, successful payment to `destination`.
	pub async fn verify_deposit(&self, hash: &str, destination: &str) -> bool {
		self.deposit_lookup(hash)
			.await
			.is_some_and(|lookup| is_successful_payment_to(&lookup, destination))
	}

	/// The amount a verified deposit actually delivered.
	///
	/// `None` unless `hash` is a validated, successful payment to
	/// `destination` whose delivered amount is XRP or RLUSD.
	pub async fn verified_deposit(&self, hash: &str, destination: &str) -> Option<VerifiedDeposit> {
		let lookup = self.deposit_lookup(hash).await?;
		if !is_successful_payment_to(&lookup, destination) {
			return None;
		}

		let deposit = match lookup.delivered_amount {
			Some(LedgerAmount::Drops(drops)) => VerifiedDeposit {
				amount: drops as f64 / 10f64.powi(XRP_DECIMALS as i32),
				currency: Currency::Xrp,
			},
			Some(LedgerAmount::Issued {
				value,
				currency,
				issuer,
			}) if currency == RLUSD_CURRENCY_CODE && issuer == self.rlusd_issuer => VerifiedDeposit {
				amount: value.parse().ok()?,
				currency: Currency::Rlusd,
			},
			other => {
				warn!("Deposit {} delivered an unsupported amount: {:?}", hash, other);
				return None;
			}
		};
		Some(deposit)
	}

	async fn deposit_lookup(&self, hash: &str) -> Option<TransactionLookup> {
		match self.connection.transaction(hash).await {
			Ok(Some(lookup)) => Some(lookup),
			Ok(None) => {
				debug!("Deposit {} not found", hash);
				None
			}
			Err(e) => {
				warn!("Failed to verify deposit {}: {}", hash, e);
				None
			}
		}
	}
}

fn is_successful_payment_to(lookup: &TransactionLookup, destination: &str) -> bool {
	lookup.validated
		&& lookup.result_code.as_deref() == Some(SUCCESS_RESULT)
		&& lookup.transaction_type.as_deref() == Some("Payment")
		&& lookup.destination.as_deref() == Some(destination)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::{MockLedger, test_connection};
	use crate::wallet::NoKeys;
	use std::sync::Arc;

	fn executor(mock: Arc<MockLedger>) -> PaymentExecutor {
		let connection = test_connection(mock);
		let provisioner =
			WalletProvisioner::with_default_strategies(connection.clone(), Arc::new(NoKeys));
		PaymentExecutor::new(connection, provisioner, DEFAULT_RLUSD_ISSUER.to_string())
	}

	#[tokio::test]
	async fn successful_payment_is_confirmed_with_ledger_details() {
		let mock = Arc::new(MockLedger::new());
		let executor = executor(mock.clone());

		let record = executor
			.pay(
				"main-agent",
				"text-gen-1",
				5.0,
				Currency::Rlusd,
				TransactionType::Payment,
				Some("for services"),
			)
			.await
			.unwrap();

		assert_eq!(record.status, TransactionStatus::Confirmed);
		assert!(record.id.starts_with("tx-"));
		assert!(record.ledger_hash.is_some());
		assert_eq!(record.ledger_index, Some(MockLedger::VALIDATED_LEDGER));
		assert_eq!(record.fee, Some(0.000012));
		assert_eq!(record.memo.as_deref(), Some("for services"));
		assert_eq!(mock.submit_calls(), 1);
	}

	#[tokio::test]
	async fn ledger_rejection_is_a_failed_record() {
		let mock = Arc::new(MockLedger::new());
		mock.set_engine_result("tecPATH_DRY");
		let executor = executor(mock);

		let record = executor
			.pay("main-agent", "summarizer", 2.0, Currency::Rlusd, TransactionType::Refund, None)
			.await
			.unwrap();

		assert_eq!(record.status, TransactionStatus::Failed);
		assert_eq!(record.kind, TransactionType::Refund);
		assert!(record.ledger_hash.is_none());
		assert!(record.fee.is_none());
	}

	#[tokio::test]
	async fn transport_failure_after_signing_is_a_failed_record() {
		let mock = Arc::new(MockLedger::new());
		mock.set_fail_submit(true);
		let executor = executor(mock);

		let record = executor
			.pay("main-agent", "translator", 1.0, Currency::Xrp, TransactionType::Payment, None)
			.await
			.unwrap();
		assert_eq!(record.status, TransactionStatus::Failed);
	}

	#[tokio::test]
	async fn invalid_amount_is_rejected_before_submission() {
		let mock = Arc::new(MockLedger::new());
		let executor = executor(mock.clone());

		let result = executor
			.pay("main-agent", "translator", -3.0, Currency::Xrp, TransactionType::Payment, None)
			.await;
		assert!(matches!(result, Err(SubmissionError::TransactionError(_))));
		assert_eq!(mock.submit_calls(), 0);
	}

	#[tokio::test]
	async fn balance_and_deposit_verification() {
		let mock = Arc::new(MockLedger::new());
		let executor = executor(mock.clone());

		assert_eq!(
			executor.balance("data-analyzer").await,
			MockLedger::FAUCET_DROPS as f64 / 1_000_000.0
		);

		mock.insert_transaction(TransactionLookup {
			hash: "DEPOSIT".to_string(),
			validated: true,
			result_code: Some(SUCCESS_RESULT.to_string()),
			ledger_index: Some(10),
			fee: Some("12".to_string()),
			transaction_type: Some("Payment".to_string()),
			destination: Some("rMainAgent".to_string()),
			delivered_amount: Some(LedgerAmount::Drops(2_500_000)),
		});
		assert!(executor.verify_deposit("DEPOSIT", "rMainAgent").await);
		assert!(!executor.verify_deposit("DEPOSIT", "rSomeoneElse").await);
		assert!(!executor.verify_deposit("MISSING", "rMainAgent").await);

		assert_eq!(
			executor.verified_deposit("DEPOSIT", "rMainAgent").await,
			Some(VerifiedDeposit {
				amount: 2.5,
				currency: Currency::Xrp,
			})
		);
		assert_eq!(executor.verified_deposit("DEPOSIT", "rSomeoneElse").await, None);
	}

	#[tokio::test]
	async fn deposit_of_a_foreign_token_is_not_verified() {
		let mock = Arc::new(MockLedger::new());
		let executor = executor(mock.clone());

		let lookup = |hash: &str, issuer: &str| TransactionLookup {
			hash: hash.to_string(),
			validated: true,
			result_code: Some(SUCCESS_RESULT.to_string()),
			transaction_type: Some("Payment".to_string()),
			destination: Some("rMainAgent".to_string()),
			delivered_amount: Some(LedgerAmount::Issued {
				value: "3".to_string(),
				currency: RLUSD_CURRENCY_CODE.to_string(),
				issuer: issuer.to_string(),
			}),
			..TransactionLookup::default()
		};
		mock.insert_transaction(lookup("RLUSD", DEFAULT_RLUSD_ISSUER));
		mock.insert_transaction(lookup("FAKE", "rSomeOtherIssuer"));

		assert_eq!(
			executor.verified_deposit("RLUSD", "rMainAgent").await,
			Some(VerifiedDeposit {
				amount: 3.0,
				currency: Currency::Rlusd,
			})
		);
		assert_eq!(executor.verified_deposit("FAKE", "rMainAgent").await, None);
	}
}
