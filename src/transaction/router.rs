//! Routes payment requests to the simulated or the real ledger path.

use super::executor::{PaymentExecutor, SubmissionError};
use super::types::*;

use chrono::Utc;
use rand::Rng;
use rand::distr::Alphanumeric;
use std::time::Duration;
use tracing::{debug, error, info};

/// Delay before a simulated payment confirms.
const SIMULATION_DELAY: Duration = Duration::from_secs(1);

/// Spacing between consecutive payments of a batch.
const PAYMENT_PACING: Duration = Duration::from_millis(300);

#[derive(Clone)]
pub struct TransactionRouter {
	executor: PaymentExecutor,
	simulate: bool,
}

impl TransactionRouter {
	pub fn new(executor: PaymentExecutor, simulate: bool) -> Self {
		Self { executor, simulate }
	}

	pub fn is_simulating(&self) -> bool {
		self.simulate
	}

	/// Execute one payment request.
	pub async fn execute(&self, request: &TransactionRequest) -> Result<TransactionRecord, SubmissionError> {
		if self.simulate {
			debug!("Using simulated transaction");
			return Ok(self.simulate(request).await);
		}

		let currency = request.currency();
		let memo = request.memo_or_default();
		info!(
			"Sending {} {} from {} to {}",
			request.amount, currency, request.from_agent_id, request.to_agent_id
		);
		self.executor
			.pay(
				&request.from_agent_id,
				&request.to_agent_id,
				request.amount,
				currency,
				request.kind.unwrap_or_default(),
				Some(&memo),
			)
			.await
	}

	/// Confirm a payment without touching the ledger.
	pub async fn simulate(&self, request: &TransactionRequest) -> TransactionRecord {
		tokio::time::sleep(SIMULATION_DELAY).await;

		let mut rng = rand::rng();
		let suffix: String = (&mut rng)
			.sample_iter(Alphanumeric)
			.take(13)
			.map(|c| char::from(c).to_ascii_lowercase())
			.collect();

		TransactionRecord {
			id: record_id("sim-tx"),
			from: request.from_agent_id.clone(),
			to: request.to_agent_id.clone(),
			amount: request.amount,
			currency: request.currency(),
			timestamp: timestamp_now(),
			status: TransactionStatus::Confirmed,
			kind: request.kind.unwrap_or_default(),
			ledger_hash: Some(format!("simulated-hash-{}", suffix)),
			ledger_index: Some(rng.random_range(0..1_000_000)),
			fee: Some(SIMULATED_FEE),
			memo: request.memo.clone(),
		}
	}

	/// Pay each of `to_agent_ids` the matching amount, one after another.
	///
	/// A payment that cannot be submitted yields a failed record in its place.
	pub async fn execute_many(
		&self,
		from_agent_id: &str,
		to_agent_ids: &[String],
		amounts: &[f64],
	) -> Vec<TransactionRecord> {
		let mut records = Vec::with_capacity(to_agent_ids.len());

		for (index, (to_agent_id, amount)) in to_agent_ids.iter().zip(amounts).enumerate() {
			tokio::time::sleep(PAYMENT_PACING).await;

			let request = TransactionRequest::new(from_agent_id, to_agent_id.as_str(), *amount)
				.with_memo(format!(
					"Payment for agent services at {}",
					Utc::now().to_rfc3339()
				));

			match self.execute(&request).await {
				Ok(record) => records.push(record),
				Err(e) => {
					error!("Transaction failed for agent {}: {}", to_agent_id, e);
					records.push(TransactionRecord {
						id: format!("failed-tx-{}-{}", Utc::now().timestamp_millis(), index),
						from: from_agent_id.to_string(),
						to: to_agent_id.clone(),
						amount: *amount,
						currency: request.currency(),
						timestamp: timestamp_now(),
						status: TransactionStatus::Failed,
						kind: TransactionType::Payment,
						ledger_hash: None,
						ledger_index: None,
						fee: None,
						memo: Some(format!("Failed payment: {}", e)),
					});
				}
			}
		}

		records
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::{MockLedger, test_connection};
	use crate::wallet::{NoKeys, WalletProvisioner};
	use std::sync::Arc;

	fn router(mock: Arc<MockLedger>, simulate: bool) -> TransactionRouter {
		let connection = test_connection(mock);
		let provisioner =
			WalletProvisioner::with_default_strategies(connection.clone(), Arc::new(NoKeys));
		let executor = PaymentExecutor::new(connection, provisioner, DEFAULT_RLUSD_ISSUER.to_string());
		TransactionRouter::new(executor, simulate)
	}

	#[tokio::test(start_paused = true)]
	async fn simulation_always_confirms_with_standard_fee() {
		let mock = Arc::new(MockLedger::new());
		let router = router(mock.clone(), true);

		for amount in [0.0, 5.0, 1e9] {
			let started = tokio::time::Instant::now();
			let record = router
				.execute(&TransactionRequest::new("main-agent", "text-gen-1", amount))
				.await
				.unwrap();

			assert!(started.elapsed() >= Duration::from_secs(1));
			assert_eq!(record.status, TransactionStatus::Confirmed);
			assert_eq!(record.fee, Some(SIMULATED_FEE));
			assert_eq!(record.amount, amount);
			assert!(record.id.starts_with("sim-tx-"));
			assert!(
				record
					.ledger_hash
					.as_deref()
					.is_some_and(|h| h.starts_with("simulated-hash-"))
			);
		}
		assert_eq!(mock.connect_calls(), 0);
	}

	#[tokio::test]
	async fn real_path_uses_default_memo_and_request_type() {
		let mock = Arc::new(MockLedger::new());
		let router = router(mock.clone(), false);

		let mut request =
			TransactionRequest::new("main-agent", "code-generator", 6.0).with_currency(Currency::Xrp);
		request.kind = Some(TransactionType::Setup);
		let record = router.execute(&request).await.unwrap();

		assert_eq!(record.status, TransactionStatus::Confirmed);
		assert_eq!(record.currency, Currency::Xrp);
		assert_eq!(record.kind, TransactionType::Setup);
		assert_eq!(
			record.memo.as_deref(),
			Some("Payment from main-agent to code-generator for services")
		);
		assert_eq!(mock.submit_calls(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn execute_many_records_failures_in_place() {
		let mock = Arc::new(MockLedger::new());
		let router = router(mock, false);

		let to = vec!["translator".to_string(), "summarizer".to_string()];
		let records = router.execute_many("main-agent", &to, &[4.0, -1.0]).await;

		assert_eq!(records.len(), 2);
		assert_eq!(records[0].status, TransactionStatus::Confirmed);
		assert_eq!(records[1].status, TransactionStatus::Failed);
		assert!(records[1].id.starts_with("failed-tx-"));
		assert!(
			records[1]
				.memo
				.as_deref()
				.is_some_and(|m| m.starts_with("Failed payment: "))
		);
	}
}
