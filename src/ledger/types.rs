//! Types for the rippled API, transactions and submission outcomes

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The ledger's canonical success result code.
pub const SUCCESS_RESULT: &str = "tesSUCCESS";

/// Result code recorded when a transaction misses its `LastLedgerSequence`.
pub const EXPIRED_RESULT: &str = "expired";

/// Number of ledgers a prepared transaction stays valid for.
pub const LEDGER_OFFSET: u32 = 20;

/// Ledger version to query against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerIndex {
	/// The open ledger, used when preparing transactions
	Current,
	/// The latest validated ledger, used for balances
	Validated,
}

impl LedgerIndex {
	pub fn as_str(&self) -> &'static str {
		match self {
			LedgerIndex::Current => "current",
			LedgerIndex::Validated => "validated",
		}
	}
}

/// Subset of `account_info` the core relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
	/// Native balance in drops.
	pub balance_drops: u64,
	/// Next sequence number for the account.
	pub sequence: u32,
}

/// Preliminary result returned by `submit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResponse {
	pub engine_result: String,
	pub hash: Option<String>,
}

impl SubmitResponse {
	/// Malformed, failed-locally and retry-later-locally results never reach a
	/// validated ledger, so waiting on them is pointless.
	pub fn is_final_rejection(&self) -> bool {
		["tem", "tef", "tel"]
			.iter()
			.any(|prefix| self.engine_result.starts_with(prefix))
	}
}

/// A transaction looked up by hash via the `tx` command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionLookup {
	pub hash: String,
	pub validated: bool,
	/// `meta.TransactionResult`, absent when metadata is missing or binary.
	pub result_code: Option<String>,
	pub ledger_index: Option<u32>,
	/// Fee in drops as reported by the ledger, unparsed.
	pub fee: Option<String>,
	pub transaction_type: Option<String>,
	pub destination: Option<String>,
	/// `meta.delivered_amount`, absent for partial metadata or `unavailable`.
	pub delivered_amount: Option<LedgerAmount>,
}

/// Final outcome of a submission that reached the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerOutcome {
	pub hash: String,
	pub result_code: String,
	pub ledger_index: Option<u32>,
	/// Fee in drops as reported by the ledger, unparsed.
	pub fee: Option<String>,
}

impl LedgerOutcome {
	/// Success is exact equality with the canonical success code.
	pub fn is_success(&self) -> bool {
		self.result_code == SUCCESS_RESULT
	}
}

/// Transaction types this core builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
	Payment,
	TrustSet,
}

impl TransactionKind {
	/// Numeric code used in the binary format.
	pub fn code(&self) -> u16 {
		match self {
			TransactionKind::Payment => 0,
			TransactionKind::TrustSet => 20,
		}
	}
}

/// An amount field in ledger form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LedgerAmount {
	/// Native amount in drops.
	Drops(u64),
	/// Issued-currency amount.
	Issued {
		/// Decimal value string.
		value: String,
		/// Three-letter code or 40-character hex code.
		currency: String,
		/// Classic address of the issuer.
		issuer: String,
	},
}

/// An unsigned or signed transaction in ledger form.
///
/// Optional fields left empty by the builder are filled in by
/// [`LedgerConnection::autofill`](super::LedgerConnection::autofill).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTransaction {
	pub kind: TransactionKind,
	pub account: String,
	pub flags: u32,
	pub destination: Option<String>,
	pub amount: Option<LedgerAmount>,
	pub limit_amount: Option<LedgerAmount>,
	pub sequence: Option<u32>,
	pub fee_drops: Option<u64>,
	pub last_ledger_sequence: Option<u32>,
	/// Raw `MemoData` payloads.
	pub memos: Vec<Vec<u8>>,
	pub signing_pub_key: Option<Vec<u8>>,
	pub txn_signature: Option<Vec<u8>>,
}

impl LedgerTransaction {
	pub fn new(kind: TransactionKind, account: impl Into<String>) -> Self {
		Self {
			kind,
			account: account.into(),
			flags: 0,
			destination: None,
			amount: None,
			limit_amount: None,
			sequence: None,
			fee_drops: None,
			last_ledger_sequence: None,
			memos: Vec::new(),
			signing_pub_key: None,
			txn_signature: None,
		}
	}
}

/// A signed transaction ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
	/// Uppercase hex of the serialized, signed transaction.
	pub tx_blob: String,
	/// Uppercase hex transaction hash.
	pub hash: String,
	pub last_ledger_sequence: u32,
}

/// Error raised when the shared connection cannot be established.
///
/// Cloneable so every caller awaiting the same attempt receives it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Failed to connect to {url}: {reason}")]
pub struct ConnectionError {
	pub url: String,
	pub reason: String,
}

/// Error types for ledger operations
#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
	#[error("Not connected to the ledger")]
	NotConnected,

	#[error(transparent)]
	ConnectionError(#[from] ConnectionError),

	#[error("WebSocket error: {0}")]
	WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

	#[error("HTTP error: {0}")]
	HttpError(#[from] reqwest::Error),

	#[error("JSON parse error: {0}")]
	JsonError(#[from] serde_json::Error),

	#[error("RPC error {code}: {message}")]
	RpcError { code: String, message: String },

	#[error("Unexpected response: {0}")]
	UnexpectedResponse(String),

	#[error("Codec error: {0}")]
	CodecError(String),

	#[error("Address error: {0}")]
	AddressError(#[from] super::address::AddressError),

	#[error("Faucet error: {0}")]
	FaucetError(String),

	#[error("Ledger request {id} timed out after {timeout:?}")]
	Timeout { id: u64, timeout: Duration },
}
