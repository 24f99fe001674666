use chrono::{SecondsFormat, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hex currency code of RLUSD on the ledger.
pub const RLUSD_CURRENCY_CODE: &str = "524C555344000000000000000000000000000000";

/// Default RLUSD issuer on the test network.
pub const DEFAULT_RLUSD_ISSUER: &str = "rQhWct2fv4Vc4KRjRgMrxa8xPN9Zx9iLKV";

/// Standard fee reported for simulated payments, in XRP.
pub const SIMULATED_FEE: f64 = 0.000012;

/// Assets a payment can be made in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
	/// Native asset, counted in drops on the ledger.
	Xrp,
	/// Issued stablecoin; requires a trustline to the issuer.
	#[default]
	Rlusd,
}

impl fmt::Display for Currency {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Currency::Xrp => f.write_str("XRP"),
			Currency::Rlusd => f.write_str("RLUSD"),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
	Pending,
	Confirmed,
	Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
	#[default]
	Payment,
	Subscription,
	Refund,
	Setup,
}

/// Outcome of one payment attempt.
///
/// Records are values: a retry produces a new record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
	pub id: String,
	/// Agent id of the sender.
	pub from: String,
	/// Agent id of the receiver.
	pub to: String,
	pub amount: f64,
	pub currency: Currency,
	/// RFC 3339 UTC.
	pub timestamp: String,
	pub status: TransactionStatus,
	#[serde(rename = "type")]
	pub kind: TransactionType,
	#[serde(rename = "xrpTxHash", skip_serializing_if = "Option::is_none", default)]
	pub ledger_hash: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none", default)]
	pub ledger_index: Option<u32>,
	/// Fee in XRP.
	#[serde(skip_serializing_if = "Option::is_none", default)]
	pub fee: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none", default)]
	pub memo: Option<String>,
}

impl TransactionRecord {
	pub fn is_confirmed(&self) -> bool {
		self.status == TransactionStatus::Confirmed
	}
}

/// A payment between two agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
	pub from_agent_id: String,
	pub to_agent_id: String,
	pub amount: f64,
	#[serde(default)]
	pub currency: Option<Currency>,
	#[serde(rename = "type", default)]
	pub kind: Option<TransactionType>,
	#[serde(default)]
	pub memo: Option<String>,
}

impl TransactionRequest {
	pub fn new(from_agent_id: impl Into<String>, to_agent_id: impl Into<String>, amount: f64) -> Self {
		Self {
			from_agent_id: from_agent_id.into(),
			to_agent_id: to_agent_id.into(),
			amount,
			currency: None,
			kind: None,
			memo: None,
		}
	}

	pub fn with_currency(mut self, currency: Currency) -> Self {
		self.currency = Some(currency);
		self
	}

	pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
		self.memo = Some(memo.into());
		self
	}

	pub fn currency(&self) -> Currency {
		self.currency.unwrap_or_default()
	}

	/// The caller's memo, or the standard description of the payment.
	pub fn memo_or_default(&self) -> String {
		self.memo.clone().unwrap_or_else(|| {
			format!(
				"Payment from {} to {} for services",
				self.from_agent_id, self.to_agent_id
			)
		})
	}
}

/// `{prefix}-{unix millis}-{0..10000}`
pub(crate) fn record_id(prefix: &str) -> String {
	format!(
		"{}-{}-{}",
		prefix,
		Utc::now().timestamp_millis(),
		rand::rng().random_range(0..10_000)
	)
}

pub(crate) fn timestamp_now() -> String {
	Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn record_serializes_with_wire_names() {
		let record = TransactionRecord {
			id: "tx-1-2".to_string(),
			from: "main-agent".to_string(),
			to: "text-gen-1".to_string(),
			amount: 5.0,
			currency: Currency::Rlusd,
			timestamp: "2024-01-01T00:00:00.000Z".to_string(),
			status: TransactionStatus::Confirmed,
			kind: TransactionType::Payment,
			ledger_hash: Some("ABC".to_string()),
			ledger_index: Some(7),
			fee: Some(0.000012),
			memo: None,
		};

		let value = serde_json::to_value(&record).unwrap();
		assert_eq!(value["xrpTxHash"], json!("ABC"));
		assert_eq!(value["ledgerIndex"], json!(7));
		assert_eq!(value["type"], json!("payment"));
		assert_eq!(value["currency"], json!("RLUSD"));
		assert_eq!(value["status"], json!("confirmed"));
		assert!(value.get("memo").is_none());
	}

	#[test]
	fn request_defaults() {
		let request = TransactionRequest::new("main-agent", "translator", 4.0);
		assert_eq!(request.currency(), Currency::Rlusd);
		assert_eq!(
			request.memo_or_default(),
			"Payment from main-agent to translator for services"
		);
	}

	#[test]
	fn record_ids_carry_prefix() {
		let id = record_id("sim-tx");
		let parts: Vec<&str> = id.rsplitn(3, '-').collect();
		assert!(id.starts_with("sim-tx-"));
		assert!(parts[0].parse::<u32>().unwrap() < 10_000);
		assert!(parts[1].parse::<i64>().is_ok());
	}
}
