//!
//! Client for the test network faucet.
//!
//! The faucet credits a new account with test XRP, which is what activates an
//! account on the ledger. Only the request is made here; waiting for the
//! credit to land is done by [`LedgerConnection::fund`](super::LedgerConnection::fund).

use super::types::LedgerError;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Clone)]
pub struct FaucetClient {
	http_client: Client,
	/// Base URL of the faucet, e.g. `https://faucet.altnet.rippletest.net`.
	faucet_url: String,
}

impl FaucetClient {
	pub fn new(faucet_url: String) -> Result<Self, LedgerError> {
		let http_client = Client::builder().timeout(Duration::from_secs(30)).build()?;

		Ok(Self {
			http_client,
			faucet_url: faucet_url.trim_end_matches('/').to_string(),
		})
	}

	/// Ask the faucet to fund `address`.
	pub async fn fund(&self, address: &str) -> Result<(), LedgerError> {
		let url = format!("{}/accounts", self.faucet_url);
		debug!("Requesting faucet funding for {} from {}", address, url);

		let response = self
			.http_client
			.post(&url)
			.header("Content-Type", "application/json")
			.json(&json!({ "destination": address }))
			.send()
			.await?;

		if !response.status().is_success() {
			return Err(LedgerError::FaucetError(format!(
				"HTTP error: {}",
				response.status()
			)));
		}

		let body: serde_json::Value = response.json().await?;
		let funded = body
			.get("account")
			.and_then(|account| account.get("classicAddress").or_else(|| account.get("address")))
			.and_then(|address| address.as_str());
		if let Some(funded) = funded {
			if funded != address {
				return Err(LedgerError::FaucetError(format!(
					"Faucet funded {} instead of {}",
					funded, address
				)));
			}
		}

		info!("Faucet accepted funding request for {}", address);
		Ok(())
	}
}
