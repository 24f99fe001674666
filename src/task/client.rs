//!
//! HTTP client for the task backend.
//!
//! Runs are started with `POST /run` and complete asynchronously; their
//! results are fetched with `GET /results/{run_id}` once the real-time
//! channel reports completion.

use super::types::*;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Clone)]
pub struct TaskBackendClient {
	http_client: Client,
	/// Base URL of the backend, e.g. `http://localhost:8080`.
	backend_url: String,
}

impl TaskBackendClient {
	pub fn new(backend_url: String) -> Result<Self, TaskError> {
		let http_client = Client::builder().timeout(Duration::from_secs(30)).build()?;

		Ok(Self {
			http_client,
			backend_url: backend_url.trim_end_matches('/').to_string(),
		})
	}

	pub fn backend_url(&self) -> &str {
		&self.backend_url
	}

	/// Start a run for `task_description`.
	///
	/// # Returns
	/// The run id assigned by the backend.
	pub async fn start_run(&self, task_description: &str) -> Result<String, TaskError> {
		let url = format!("{}/run", self.backend_url);
		debug!("Starting run at {}", url);

		let response = self
			.http_client
			.post(&url)
			.header("Accept", "application/json")
			.json(&json!({ "task_description": task_description }))
			.send()
			.await?;

		let status = response.status();
		if !status.is_success() {
			return Err(server_error(status, response.text().await.unwrap_or_default()));
		}

		let started: RunStarted = response.json().await?;
		let run_id = started
			.run_id
			.ok_or_else(|| TaskError::ProtocolError("Server did not return a run_id".to_string()))?;

		info!("Run initiated with ID: {}", run_id);
		Ok(run_id)
	}

	/// Fetch the stored result of a run; `None` while it is unavailable.
	pub async fn results(&self, run_id: &str) -> Result<Option<RunResult>, TaskError> {
		let url = format!("{}/results/{}", self.backend_url, run_id);

		let response = self.http_client.get(&url).send().await?;
		let status = response.status();
		if status == StatusCode::NOT_FOUND {
			debug!("No results yet for run {}", run_id);
			return Ok(None);
		}
		if !status.is_success() {
			return Err(server_error(status, response.text().await.unwrap_or_default()));
		}

		Ok(Some(response.json().await?))
	}
}

/// Prefer the backend's `{"error": ...}` message over the raw body.
fn server_error(status: StatusCode, body: String) -> TaskError {
	let message = serde_json::from_str::<serde_json::Value>(&body)
		.ok()
		.and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
		.unwrap_or(body);

	TaskError::ServerError {
		status: status.as_u16(),
		message,
	}
}
