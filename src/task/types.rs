use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Response of `POST /run`.
#[derive(Debug, Clone, Deserialize)]
pub struct RunStarted {
	pub run_id: Option<String>,
}

/// One agent of the hierarchy the backend generated for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentHierarchyEntry {
	pub agent_name: String,
	pub description: String,
	pub level: u32,
	pub cost_per_million: f64,
	pub tokens: u64,
}

/// Runs that fail early store `null` for the fields they never reached.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
	D: Deserializer<'de>,
	T: Default + Deserialize<'de>,
{
	Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Stored result of a run, from `GET /results/{run_id}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunResult {
	pub run_id: Option<String>,
	pub task_description: Option<String>,
	#[serde(deserialize_with = "null_as_default")]
	pub final_output: String,
	#[serde(deserialize_with = "null_as_default")]
	pub agent_hierarchy: Vec<AgentHierarchyEntry>,
	#[serde(deserialize_with = "null_as_default")]
	pub agent_token_usage: HashMap<String, Value>,
	pub error: Option<String>,
}

impl RunResult {
	/// The completion event a finished run with this result announces.
	pub fn completion(&self, run_id: &str) -> RunComplete {
		RunComplete {
			run_id: run_id.to_string(),
			status: if self.error.is_some() {
				RunStatus::Error
			} else {
				RunStatus::Success
			},
			error: self.error.clone(),
			final_result: serde_json::to_value(self).unwrap_or(Value::Null),
		}
	}
}

/// `log_update` event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogUpdate {
	/// `status`, `error`, `warning`, `llm_start`, `task_end`, ...
	#[serde(rename = "type")]
	pub kind: String,
	pub run_id: String,
	#[serde(default)]
	pub log_prefix: Option<String>,
	#[serde(default)]
	pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
	Success,
	Error,
}

/// `run_complete` event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunComplete {
	pub run_id: String,
	pub status: RunStatus,
	#[serde(default)]
	pub error: Option<String>,
	#[serde(default)]
	pub final_result: Value,
}

/// Server events delivered on the real-time channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
	LogUpdate(LogUpdate),
	RunComplete(RunComplete),
	JoinedRoom(Value),
	LeftRoom(Value),
	ServerError(Value),
}

/// Error types for the task backend
#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
	#[error("HTTP error: {0}")]
	HttpError(#[from] reqwest::Error),

	#[error("WebSocket error: {0}")]
	WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

	#[error("JSON parse error: {0}")]
	JsonError(#[from] serde_json::Error),

	#[error("Server error ({status}): {message}")]
	ServerError { status: u16, message: String },

	#[error("Protocol error: {0}")]
	ProtocolError(String),

	#[error("Real-time channel closed")]
	ChannelClosed,

	#[error("Timed out waiting for run {run_id} to complete after {timeout:?}")]
	Timeout { run_id: String, timeout: Duration },
}
