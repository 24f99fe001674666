//!
//! WebSocket client for a rippled node.
//!
//! Requests are JSON commands tagged with an `id`; a background reader task
//! routes each response to the caller waiting on that id, so any number of
//! requests can be outstanding on the one socket. All methods are async and
//! designed for use with Tokio.

use super::faucet::FaucetClient;
use super::types::*;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Primitive ledger operations consumed by the core.
///
/// [`RippledClient`] talks to a real node; tests substitute an in-memory ledger.
#[async_trait]
pub trait LedgerApi: Send + Sync {
	/// Open the connection.
	async fn connect(&self) -> Result<(), LedgerError>;

	/// Close the connection. Outstanding requests fail.
	async fn disconnect(&self) -> Result<(), LedgerError>;

	/// Balance and sequence of an account.
	async fn account_info(
		&self,
		address: &str,
		ledger_index: LedgerIndex,
	) -> Result<AccountInfo, LedgerError>;

	/// Transaction cost to use for the next submission, in drops.
	async fn fee_drops(&self) -> Result<u64, LedgerError>;

	/// Index of the current open ledger.
	async fn current_ledger_index(&self) -> Result<u32, LedgerError>;

	/// Index of the latest validated ledger.
	async fn validated_ledger_index(&self) -> Result<u32, LedgerError>;

	/// Submit a signed blob and return the preliminary result.
	async fn submit(&self, tx_blob: &str) -> Result<SubmitResponse, LedgerError>;

	/// Look up a transaction by hash; `None` if the node does not know it yet.
	async fn transaction(&self, hash: &str) -> Result<Option<TransactionLookup>, LedgerError>;

	/// Request test network funding for an address.
	async fn fund(&self, address: &str) -> Result<(), LedgerError>;
}

/// How long a request waits for its response before it is abandoned.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

type PendingRequests = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// One open WebSocket session.
struct WsSession {
	outgoing: mpsc::UnboundedSender<Message>,
	pending: PendingRequests,
	/// Set by the reader once the socket is gone.
	closed: Arc<AtomicBool>,
	reader: JoinHandle<()>,
}

impl WsSession {
	fn is_open(&self) -> bool {
		!self.closed.load(Ordering::SeqCst) && !self.reader.is_finished()
	}
}

/// rippled WebSocket client
pub struct RippledClient {
	/// WebSocket URL of the node.
	ws_url: String,
	faucet: FaucetClient,
	session: Mutex<Option<Arc<WsSession>>>,
	next_id: AtomicU64,
	request_timeout: Duration,
}

impl RippledClient {
	/// Create a new client. No connection is made until [`LedgerApi::connect`].
	///
	/// # Arguments
	/// * `ws_url` - The WebSocket endpoint of the rippled node.
	/// * `faucet` - Faucet used to fund freshly generated accounts.
	pub fn new(ws_url: String, faucet: FaucetClient) -> Self {
		Self {
			ws_url,
			faucet,
			session: Mutex::new(None),
			next_id: AtomicU64::new(1),
			request_timeout: REQUEST_TIMEOUT,
		}
	}

	pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = timeout;
		self
	}

	/// The open session, or `NotConnected` once its socket has dropped.
	fn current_session(&self) -> Result<Arc<WsSession>, LedgerError> {
		self.session
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.clone()
			.filter(|session| session.is_open())
			.ok_or(LedgerError::NotConnected)
	}

	/// Send a command and wait for its response.
	///
	/// # Returns
	/// The `result` object of a successful response, `LedgerError::RpcError`
	/// carrying the node's error code, `NotConnected` if the socket drops
	/// first, or `Timeout` after the request timeout.
	pub async fn request(&self, mut command: Value) -> Result<Value, LedgerError> {
		let session = self.current_session()?;
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		command["id"] = json!(id);

		let (tx, rx) = oneshot::channel();
		session
			.pending
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(id, tx);
		let forget = || {
			session
				.pending
				.lock()
				.unwrap_or_else(PoisonError::into_inner)
				.remove(&id);
		};

		// The reader marks the session closed before it drains the map, so an
		// entry inserted after the drain is caught here.
		if session.closed.load(Ordering::SeqCst) {
			forget();
			return Err(LedgerError::NotConnected);
		}

		debug!("Sending ledger request {}: {}", id, command);
		if session.outgoing.send(Message::Text(command.to_string())).is_err() {
			forget();
			return Err(LedgerError::NotConnected);
		}

		let response = match tokio::time::timeout(self.request_timeout, rx).await {
			Ok(Ok(response)) => response,
			Ok(Err(_)) => return Err(LedgerError::NotConnected),
			Err(_) => {
				forget();
				warn!("Ledger request {} timed out after {:?}", id, self.request_timeout);
				return Err(LedgerError::Timeout {
					id,
					timeout: self.request_timeout,
				});
			}
		};

		if response.get("status").and_then(|s| s.as_str()) == Some("error") {
			let code = response
				.get("error")
				.and_then(|e| e.as_str())
				.unwrap_or("unknown")
				.to_string();
			let message = response
				.get("error_message")
				.and_then(|m| m.as_str())
				.unwrap_or(&code)
				.to_string();
			return Err(LedgerError::RpcError { code, message });
		}

		response
			.get("result")
			.cloned()
			.ok_or_else(|| LedgerError::UnexpectedResponse(format!("Missing result: {}", response)))
	}
}

/// Route a response from the node to the request waiting on its id.
fn route_response(pending: &PendingRequests, text: &str) {
	let parsed: Value = match serde_json::from_str(text) {
		Ok(parsed) => parsed,
		Err(e) => {
			warn!("Ignoring unparseable ledger message: {}", e);
			return;
		}
	};

	if parsed.get("type").and_then(|t| t.as_str()) != Some("response") {
		debug!("Ignoring ledger stream message: {}", text);
		return;
	}

	let Some(id) = parsed.get("id").and_then(|id| id.as_u64()) else {
		warn!("Ledger response without id: {}", text);
		return;
	};

	let waiter = pending
		.lock()
		.unwrap_or_else(PoisonError::into_inner)
		.remove(&id);
	match waiter {
		// The caller may have stopped waiting; nothing to do then.
		Some(waiter) => {
			let _ = waiter.send(parsed);
		}
		None => debug!("No caller waiting for ledger response {}", id),
	}
}

/// Read a numeric field that the node may render as a number or a string.
fn lenient_u32(value: Option<&Value>) -> Option<u32> {
	match value? {
		Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
		Value::String(s) => s.parse().ok(),
		_ => None,
	}
}

fn lenient_u64(value: Option<&Value>) -> Option<u64> {
	match value? {
		Value::Number(n) => n.as_u64(),
		Value::String(s) => s.parse().ok(),
		_ => None,
	}
}

/// Read a transaction field from either the API v1 (top-level) or v2
/// (`tx_json`) layout.
fn transaction_field<'a>(result: &'a Value, field: &str) -> Option<&'a Value> {
	result
		.get(field)
		.or_else(|| result.get("tx_json").and_then(|tx| tx.get(field)))
}

/// Native amounts arrive as a drops string, issued amounts as an object.
fn parse_amount(value: &Value) -> Option<LedgerAmount> {
	match value {
		Value::String(drops) => drops.parse().ok().map(LedgerAmount::Drops),
		Value::Object(_) => serde_json::from_value(value.clone()).ok(),
		_ => None,
	}
}

fn parse_transaction_lookup(hash: &str, result: &Value) -> TransactionLookup {
	let as_string = |value: Option<&Value>| value.and_then(|v| v.as_str()).map(str::to_string);

	TransactionLookup {
		hash: as_string(result.get("hash")).unwrap_or_else(|| hash.to_string()),
		validated: result
			.get("validated")
			.and_then(|v| v.as_bool())
			.unwrap_or(false),
		result_code: as_string(
			result
				.get("meta")
				.filter(|meta| meta.is_object())
				.and_then(|meta| meta.get("TransactionResult")),
		),
		ledger_index: lenient_u32(result.get("ledger_index")),
		fee: as_string(transaction_field(result, "Fee")),
		transaction_type: as_string(transaction_field(result, "TransactionType")),
		destination: as_string(transaction_field(result, "Destination")),
		delivered_amount: result
			.get("meta")
			.and_then(|meta| meta.get("delivered_amount"))
			.and_then(parse_amount),
	}
}

#[async_trait]
impl LedgerApi for RippledClient {
	async fn connect(&self) -> Result<(), LedgerError> {
		if self.current_session().is_ok() {
			return Ok(());
		}

		debug!("Attempting WebSocket connection to: {}", self.ws_url);
		let (ws_stream, response) = connect_async(self.ws_url.as_str()).await?;
		debug!(
			"WebSocket connection established, response status: {}",
			response.status()
		);
		let (mut ws_sender, mut ws_receiver) = ws_stream.split();

		let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
		tokio::spawn(async move {
			while let Some(message) = outgoing_rx.recv().await {
				let closing = matches!(message, Message::Close(_));
				if let Err(e) = ws_sender.send(message).await {
					error!("Failed to write to ledger socket: {}", e);
					break;
				}
				if closing {
					return;
				}
			}
			let _ = ws_sender.close().await;
		});

		let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));
		let closed = Arc::new(AtomicBool::new(false));
		let reader_pending = pending.clone();
		let reader_closed = closed.clone();
		let reader = tokio::spawn(async move {
			while let Some(message) = ws_receiver.next().await {
				match message {
					Ok(Message::Text(text)) => route_response(&reader_pending, &text),
					Ok(Message::Close(frame)) => {
						info!("Ledger socket closed: {:?}", frame);
						break;
					}
					Ok(_) => {}
					Err(e) => {
						error!("Ledger socket error: {}", e);
						break;
					}
				}
			}
			reader_closed.store(true, Ordering::SeqCst);
			warn!("Ledger socket is gone; the next connect opens a new one");
			// Dropping the senders fails every request still waiting.
			reader_pending
				.lock()
				.unwrap_or_else(PoisonError::into_inner)
				.clear();
		});

		*self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(WsSession {
			outgoing,
			pending,
			closed,
			reader,
		}));

		info!("Connected to ledger at {}", self.ws_url);
		Ok(())
	}

	async fn disconnect(&self) -> Result<(), LedgerError> {
		let session = self
			.session
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.take();
		if let Some(session) = session {
			session.closed.store(true, Ordering::SeqCst);
			// The writer exits after flushing the close frame.
			let _ = session.outgoing.send(Message::Close(None));
			session.reader.abort();
			session
				.pending
				.lock()
				.unwrap_or_else(PoisonError::into_inner)
				.clear();
			info!("Disconnected from ledger at {}", self.ws_url);
		}
		Ok(())
	}

	async fn account_info(
		&self,
		address: &str,
		ledger_index: LedgerIndex,
	) -> Result<AccountInfo, LedgerError> {
		let result = self
			.request(json!({
				"command": "account_info",
				"account": address,
				"ledger_index": ledger_index.as_str(),
			}))
			.await?;

		let account_data = result
			.get("account_data")
			.ok_or_else(|| LedgerError::UnexpectedResponse("Missing account_data".to_string()))?;

		Ok(AccountInfo {
			balance_drops: lenient_u64(account_data.get("Balance")).ok_or_else(|| {
				LedgerError::UnexpectedResponse("Missing or malformed Balance".to_string())
			})?,
			sequence: lenient_u32(account_data.get("Sequence")).ok_or_else(|| {
				LedgerError::UnexpectedResponse("Missing or malformed Sequence".to_string())
			})?,
		})
	}

	async fn fee_drops(&self) -> Result<u64, LedgerError> {
		let result = self.request(json!({ "command": "fee" })).await?;
		let drops = result
			.get("drops")
			.ok_or_else(|| LedgerError::UnexpectedResponse("Missing drops".to_string()))?;

		let base_fee = lenient_u64(drops.get("base_fee")).unwrap_or(10);
		let open_ledger_fee = lenient_u64(drops.get("open_ledger_fee")).unwrap_or(base_fee);

		// 20% cushion over the open ledger cost, capped at 2 XRP.
		let cushioned = (open_ledger_fee as f64 * 1.2).ceil() as u64;
		Ok(cushioned.max(base_fee).min(2_000_000))
	}

	async fn current_ledger_index(&self) -> Result<u32, LedgerError> {
		let result = self
			.request(json!({ "command": "ledger_current" }))
			.await?;
		lenient_u32(result.get("ledger_current_index")).ok_or_else(|| {
			LedgerError::UnexpectedResponse("Missing ledger_current_index".to_string())
		})
	}

	async fn validated_ledger_index(&self) -> Result<u32, LedgerError> {
		let result = self
			.request(json!({ "command": "ledger", "ledger_index": "validated" }))
			.await?;
		lenient_u32(result.get("ledger_index"))
			.or_else(|| lenient_u32(result.get("ledger").and_then(|l| l.get("ledger_index"))))
			.ok_or_else(|| LedgerError::UnexpectedResponse("Missing ledger_index".to_string()))
	}

	async fn submit(&self, tx_blob: &str) -> Result<SubmitResponse, LedgerError> {
		let result = self
			.request(json!({ "command": "submit", "tx_blob": tx_blob }))
			.await?;

		let engine_result = result
			.get("engine_result")
			.and_then(|r| r.as_str())
			.ok_or_else(|| LedgerError::UnexpectedResponse("Missing engine_result".to_string()))?
			.to_string();
		let hash = result
			.get("tx_json")
			.and_then(|tx| tx.get("hash"))
			.and_then(|h| h.as_str())
			.map(str::to_string);

		Ok(SubmitResponse {
			engine_result,
			hash,
		})
	}

	async fn transaction(&self, hash: &str) -> Result<Option<TransactionLookup>, LedgerError> {
		match self
			.request(json!({ "command": "tx", "transaction": hash }))
			.await
		{
			Ok(result) => Ok(Some(parse_transaction_lookup(hash, &result))),
			Err(LedgerError::RpcError { code, .. }) if code == "txnNotFound" => Ok(None),
			Err(e) => Err(e),
		}
	}

	async fn fund(&self, address: &str) -> Result<(), LedgerError> {
		self.faucet.fund(address).await
	}
}
