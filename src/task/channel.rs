//!
//! Real-time run channel over Socket.IO.
//!
//! The backend speaks Socket.IO v5 on top of Engine.IO v4. Only the
//! WebSocket transport is used: the client waits for the Engine.IO open
//! packet, connects to the default namespace and then exchanges event
//! packets of the form `42["name",{...}]`. Server pings are answered by the
//! reader task.

use super::types::*;
use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
	connect_async,
	tungstenite::{self, Message, client::IntoClientRequest},
};
use tracing::{debug, error, info, warn};

/// Default wait for a run to complete.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(60);

const EVENT_BUFFER: usize = 256;
const NAMESPACE_CONNECT: &str = "40";
const NAMESPACE_DISCONNECT: &str = "41";
const PONG: &str = "3";

/// A decoded Engine.IO / Socket.IO frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
	/// Engine.IO handshake carrying `sid`, `pingInterval`, ...
	Open(Value),
	Close,
	Ping,
	Pong,
	/// Namespace connection acknowledged.
	Connected,
	Disconnected,
	ConnectError(String),
	Event { name: String, payload: Value },
	/// Packets this client has no use for (acks, binary, noop).
	Ignored,
}

/// Backend WebSocket URL for a backend HTTP base URL.
pub fn socket_url(backend_url: &str) -> String {
	let base = backend_url.trim_end_matches('/');
	let base = if let Some(rest) = base.strip_prefix("https://") {
		format!("wss://{}", rest)
	} else if let Some(rest) = base.strip_prefix("http://") {
		format!("ws://{}", rest)
	} else {
		base.to_string()
	};
	format!("{}/socket.io/?EIO=4&transport=websocket", base)
}

/// Encode a client event for the default namespace.
pub fn encode_event(name: &str, payload: &Value) -> String {
	format!("42{}", json!([name, payload]))
}

/// Decode one text frame.
pub fn decode_frame(text: &str) -> Result<Frame, TaskError> {
	let mut chars = text.chars();
	let engine_type = chars
		.next()
		.ok_or_else(|| TaskError::ProtocolError("Empty frame".to_string()))?;
	let rest = chars.as_str();

	match engine_type {
		'0' => Ok(Frame::Open(serde_json::from_str(rest)?)),
		'1' => Ok(Frame::Close),
		'2' => Ok(Frame::Ping),
		'3' => Ok(Frame::Pong),
		'4' => decode_socket_packet(rest),
		'6' => Ok(Frame::Ignored),
		other => Err(TaskError::ProtocolError(format!(
			"Unknown Engine.IO packet type '{}'",
			other
		))),
	}
}

fn decode_socket_packet(packet: &str) -> Result<Frame, TaskError> {
	let mut chars = packet.chars();
	let socket_type = chars
		.next()
		.ok_or_else(|| TaskError::ProtocolError("Empty Socket.IO packet".to_string()))?;
	let body = chars.as_str();

	match socket_type {
		'0' => Ok(Frame::Connected),
		'1' => Ok(Frame::Disconnected),
		'2' => {
			// Skip an optional ack id before the JSON array.
			let json_start = body
				.find('[')
				.ok_or_else(|| TaskError::ProtocolError(format!("Malformed event: {}", packet)))?;
			let mut items = match serde_json::from_str::<Value>(&body[json_start..])? {
				Value::Array(items) => items.into_iter(),
				_ => {
					return Err(TaskError::ProtocolError(format!(
						"Event is not an array: {}",
						packet
					)));
				}
			};
			let name = match items.next() {
				Some(Value::String(name)) => name,
				_ => {
					return Err(TaskError::ProtocolError(format!(
						"Event without a name: {}",
						packet
					)));
				}
			};
			Ok(Frame::Event {
				name,
				payload: items.next().unwrap_or(Value::Null),
			})
		}
		'4' => {
			let message = serde_json::from_str::<Value>(body)
				.ok()
				.and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
				.unwrap_or_else(|| body.to_string());
			Ok(Frame::ConnectError(message))
		}
		_ => Ok(Frame::Ignored),
	}
}

/// Map a server event to a typed [`ChannelEvent`]; `None` for unknown names.
pub fn channel_event(name: &str, payload: Value) -> Result<Option<ChannelEvent>, TaskError> {
	let event = match name {
		"log_update" => ChannelEvent::LogUpdate(serde_json::from_value(payload)?),
		"run_complete" => ChannelEvent::RunComplete(serde_json::from_value(payload)?),
		"joined_room" => ChannelEvent::JoinedRoom(payload),
		"left_room" => ChannelEvent::LeftRoom(payload),
		"error" => ChannelEvent::ServerError(payload),
		_ => return Ok(None),
	};
	Ok(Some(event))
}

/// Subscription to run progress on the task backend.
pub struct RunChannel {
	outgoing: mpsc::UnboundedSender<Message>,
	events: broadcast::Sender<ChannelEvent>,
	reader: Option<JoinHandle<()>>,
}

impl RunChannel {
	/// Open the socket and complete the Socket.IO handshake.
	pub async fn connect(backend_url: &str) -> Result<Self, TaskError> {
		let url = socket_url(backend_url);
		debug!("Attempting Socket.IO connection to: {}", url);

		let request = url.as_str().into_client_request()?;
		let (ws_stream, response) = connect_async(request).await?;
		debug!(
			"WebSocket connection established, response status: {}",
			response.status()
		);
		let (mut ws_sender, mut ws_receiver) = ws_stream.split();

		match decode_frame(&next_text(&mut ws_receiver).await?)? {
			Frame::Open(handshake) => debug!("Engine.IO handshake: {}", handshake),
			other => {
				return Err(TaskError::ProtocolError(format!(
					"Expected open packet, got {:?}",
					other
				)));
			}
		}

		ws_sender
			.send(Message::Text(NAMESPACE_CONNECT.to_string()))
			.await?;

		loop {
			match decode_frame(&next_text(&mut ws_receiver).await?)? {
				Frame::Connected => break,
				Frame::Ping => ws_sender.send(Message::Text(PONG.to_string())).await?,
				Frame::ConnectError(message) => {
					return Err(TaskError::ProtocolError(format!(
						"Namespace connection refused: {}",
						message
					)));
				}
				other => debug!("Ignoring frame during handshake: {:?}", other),
			}
		}

		let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
		tokio::spawn(async move {
			while let Some(message) = outgoing_rx.recv().await {
				let closing = matches!(message, Message::Close(_));
				if let Err(e) = ws_sender.send(message).await {
					error!("Failed to write to task socket: {}", e);
					break;
				}
				if closing {
					return;
				}
			}
			let _ = ws_sender.close().await;
		});

		let (events, _) = broadcast::channel(EVENT_BUFFER);
		let reader_events = events.clone();
		let reader_outgoing = outgoing.clone();
		let reader = tokio::spawn(async move {
			while let Some(message) = ws_receiver.next().await {
				match message {
					Ok(Message::Text(text)) => {
						if !dispatch_frame(&text, &reader_outgoing, &reader_events) {
							break;
						}
					}
					Ok(Message::Close(frame)) => {
						info!("Task socket closed: {:?}", frame);
						break;
					}
					Ok(_) => {}
					Err(e) => {
						error!("Task socket error: {}", e);
						break;
					}
				}
			}
		});

		info!("Connected to task backend channel at {}", backend_url);
		Ok(Self {
			outgoing,
			events,
			reader: Some(reader),
		})
	}

	/// Channel over already established writer and event streams.
	pub fn from_parts(
		outgoing: mpsc::UnboundedSender<Message>,
		events: broadcast::Sender<ChannelEvent>,
	) -> Self {
		Self {
			outgoing,
			events,
			reader: None,
		}
	}

	pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
		self.events.subscribe()
	}

	/// Emit a client event.
	pub fn emit(&self, name: &str, payload: Value) -> Result<(), TaskError> {
		self.outgoing
			.send(Message::Text(encode_event(name, &payload)))
			.map_err(|_| TaskError::ChannelClosed)
	}

	pub fn join_room(&self, run_id: &str) -> Result<(), TaskError> {
		debug!("Joining room for run {}", run_id);
		self.emit("join_room", json!({ "run_id": run_id }))
	}

	pub fn leave_room(&self, run_id: &str) -> Result<(), TaskError> {
		debug!("Leaving room for run {}", run_id);
		self.emit("leave_room", json!({ "run_id": run_id }))
	}

	/// Join the run's room and wait for its `run_complete` event.
	///
	/// # Errors
	/// `TaskError::Timeout` if nothing arrives within `timeout`;
	/// `TaskError::ChannelClosed` if the room cannot be joined.
	pub async fn wait_for_run_completion(
		&self,
		run_id: &str,
		timeout: Duration,
	) -> Result<RunComplete, TaskError> {
		// Subscribe before joining so an immediate completion is not missed.
		let mut events = self.subscribe();
		self.join_room(run_id)?;
		self.await_completion(&mut events, run_id, timeout).await
	}

	/// Wait on an existing subscription for the run's `run_complete` event.
	/// The room must already be joined.
	pub async fn await_completion(
		&self,
		events: &mut broadcast::Receiver<ChannelEvent>,
		run_id: &str,
		timeout: Duration,
	) -> Result<RunComplete, TaskError> {
		let wait = async {
			loop {
				match events.recv().await {
					Ok(ChannelEvent::RunComplete(complete)) if complete.run_id == run_id => {
						return Ok(complete);
					}
					Ok(ChannelEvent::LogUpdate(update)) if update.run_id == run_id => {
						debug!("[{}] {}: {}", run_id, update.kind, update.data);
					}
					Ok(_) => {}
					Err(broadcast::error::RecvError::Lagged(skipped)) => {
						warn!("Run channel lagged, skipped {} events", skipped);
					}
					Err(broadcast::error::RecvError::Closed) => return Err(TaskError::ChannelClosed),
				}
			}
		};

		match tokio::time::timeout(timeout, wait).await {
			Ok(result) => result,
			Err(_) => Err(TaskError::Timeout {
				run_id: run_id.to_string(),
				timeout,
			}),
		}
	}

	/// Leave the namespace and close the socket.
	pub fn close(&self) {
		let _ = self
			.outgoing
			.send(Message::Text(NAMESPACE_DISCONNECT.to_string()));
		let _ = self.outgoing.send(Message::Close(None));
		if let Some(reader) = &self.reader {
			reader.abort();
		}
	}
}

impl Drop for RunChannel {
	fn drop(&mut self) {
		if let Some(reader) = &self.reader {
			reader.abort();
		}
	}
}

/// Handle one frame from the server. Returns `false` once the session ends.
fn dispatch_frame(
	text: &str,
	outgoing: &mpsc::UnboundedSender<Message>,
	events: &broadcast::Sender<ChannelEvent>,
) -> bool {
	let frame = match decode_frame(text) {
		Ok(frame) => frame,
		Err(e) => {
			warn!("Ignoring malformed task frame: {}", e);
			return true;
		}
	};

	match frame {
		Frame::Ping => outgoing.send(Message::Text(PONG.to_string())).is_ok(),
		Frame::Close | Frame::Disconnected => {
			info!("Task backend ended the session");
			false
		}
		Frame::Event { name, payload } => {
			match channel_event(&name, payload) {
				// No subscribers is fine.
				Ok(Some(event)) => {
					let _ = events.send(event);
				}
				Ok(None) => debug!("Ignoring unknown event '{}'", name),
				Err(e) => warn!("Malformed '{}' event: {}", name, e),
			}
			true
		}
		_ => true,
	}
}

async fn next_text<S>(stream: &mut S) -> Result<String, TaskError>
where
	S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
	while let Some(message) = stream.next().await {
		match message? {
			Message::Text(text) => return Ok(text),
			Message::Close(_) => return Err(TaskError::ChannelClosed),
			_ => {}
		}
	}
	Err(TaskError::ChannelClosed)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn channel() -> (
		RunChannel,
		mpsc::UnboundedReceiver<Message>,
		broadcast::Sender<ChannelEvent>,
	) {
		let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
		let (events, _) = broadcast::channel(16);
		(
			RunChannel::from_parts(outgoing, events.clone()),
			outgoing_rx,
			events,
		)
	}

	fn completion(run_id: &str) -> ChannelEvent {
		ChannelEvent::RunComplete(RunComplete {
			run_id: run_id.to_string(),
			status: RunStatus::Success,
			error: None,
			final_result: json!({ "final_output": "done" }),
		})
	}

	#[test]
	fn builds_socket_url_from_backend_url() {
		assert_eq!(
			socket_url("http://localhost:8080/"),
			"ws://localhost:8080/socket.io/?EIO=4&transport=websocket"
		);
		assert_eq!(
			socket_url("https://tasks.example.com"),
			"wss://tasks.example.com/socket.io/?EIO=4&transport=websocket"
		);
	}

	#[test]
	fn decodes_handshake_and_control_frames() {
		assert!(matches!(
			decode_frame(r#"0{"sid":"abc","pingInterval":25000}"#).unwrap(),
			Frame::Open(v) if v["sid"] == "abc"
		));
		assert_eq!(decode_frame("2").unwrap(), Frame::Ping);
		assert_eq!(decode_frame(r#"40{"sid":"xyz"}"#).unwrap(), Frame::Connected);
		assert_eq!(decode_frame("41").unwrap(), Frame::Disconnected);
		assert_eq!(
			decode_frame(r#"44{"message":"Not authorized"}"#).unwrap(),
			Frame::ConnectError("Not authorized".to_string())
		);
		assert!(decode_frame("").is_err());
		assert!(decode_frame("9").is_err());
	}

	#[test]
	fn decodes_events_with_and_without_ack_id() {
		let frame = decode_frame(r#"42["run_complete",{"run_id":"r1","status":"success"}]"#).unwrap();
		let Frame::Event { name, payload } = frame else {
			panic!("expected event");
		};
		assert_eq!(name, "run_complete");
		let event = channel_event(&name, payload).unwrap().unwrap();
		assert!(matches!(event, ChannelEvent::RunComplete(c) if c.run_id == "r1" && c.status == RunStatus::Success));

		assert!(matches!(
			decode_frame(r#"4212["joined_room",{"run_id":"r1"}]"#).unwrap(),
			Frame::Event { name, .. } if name == "joined_room"
		));
	}

	#[test]
	fn maps_log_updates_and_ignores_unknown_events() {
		let event = channel_event(
			"log_update",
			json!({ "type": "status", "run_id": "r1", "data": { "message": "Planning" } }),
		)
		.unwrap()
		.unwrap();
		assert!(matches!(event, ChannelEvent::LogUpdate(u) if u.kind == "status" && u.log_prefix.is_none()));

		assert!(channel_event("something_else", json!({})).unwrap().is_none());
		assert!(channel_event("run_complete", json!({ "status": "success" })).is_err());
	}

	#[test]
	fn encodes_room_events() {
		assert_eq!(
			encode_event("join_room", &json!({ "run_id": "r1" })),
			r#"42["join_room",{"run_id":"r1"}]"#
		);
	}

	#[test]
	fn dispatch_answers_pings_and_publishes_events() {
		let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel();
		let (events, mut events_rx) = broadcast::channel(4);

		assert!(dispatch_frame("2", &outgoing, &events));
		assert_eq!(outgoing_rx.try_recv().unwrap(), Message::Text("3".to_string()));

		assert!(dispatch_frame(
			r#"42["error",{"message":"bad room"}]"#,
			&outgoing,
			&events
		));
		assert!(matches!(
			events_rx.try_recv().unwrap(),
			ChannelEvent::ServerError(v) if v["message"] == "bad room"
		));

		assert!(dispatch_frame("not a frame", &outgoing, &events));
		assert!(!dispatch_frame("1", &outgoing, &events));
	}

	#[tokio::test]
	async fn waits_for_matching_completion() {
		let (channel, mut outgoing_rx, events) = channel();

		let publisher = tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(20)).await;
			let _ = events.send(completion("other-run"));
			let _ = events.send(completion("run-1"));
			events
		});

		let complete = channel
			.wait_for_run_completion("run-1", Duration::from_secs(5))
			.await
			.unwrap();
		assert_eq!(complete.run_id, "run-1");
		assert_eq!(complete.final_result["final_output"], "done");

		assert_eq!(
			outgoing_rx.try_recv().unwrap(),
			Message::Text(r#"42["join_room",{"run_id":"run-1"}]"#.to_string())
		);
		publisher.await.unwrap();
	}

	#[tokio::test(start_paused = true)]
	async fn times_out_without_completion() {
		let (channel, _outgoing_rx, _events) = channel();

		let err = channel
			.wait_for_run_completion("run-1", DEFAULT_RUN_TIMEOUT)
			.await
			.unwrap_err();
		assert!(matches!(err, TaskError::Timeout { ref run_id, timeout } if run_id == "run-1" && timeout == DEFAULT_RUN_TIMEOUT));
		assert_eq!(
			err.to_string(),
			"Timed out waiting for run run-1 to complete after 60s"
		);
	}

	#[test]
	fn emitting_after_close_fails() {
		let (channel, outgoing_rx, _events) = channel();
		drop(outgoing_rx);
		assert!(matches!(channel.join_room("r1"), Err(TaskError::ChannelClosed)));
	}
}
