use clap::Parser;
use synapse_ledger::transaction::{DEFAULT_TRUST_LIMIT, TransactionRequest};
use synapse_ledger::utils::{XRP_DECIMALS, format_token_amount};
use synapse_ledger::wallet::{MAIN_AGENT_ID, default_agents};
use synapse_ledger::{Config, LedgerSession};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
	let config = Config::parse();

	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive("synapse_ledger=debug".parse().unwrap())
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	let session = match LedgerSession::from_config(&config) {
		Ok(session) => session,
		Err(e) => {
			error!("Failed to start session: {}", e);
			return;
		}
	};

	let agents = default_agents();
	let progress = session.initialize_agents(&agents).await;
	info!(
		"Wallets ready: {}/{} initialized, {} cached, {} failed",
		progress.initialized.len(),
		progress.total,
		progress.cached.len(),
		progress.failed.len()
	);
	for agent_id in session.provisioner().cached_ids() {
		if let Some(wallet) = session.provisioner().cached(&agent_id) {
			info!("   - {}: {} ({})", agent_id, wallet.address, wallet.origin);
		}
	}

	if !session.router().is_simulating() {
		let trusted = session.establish_trustlines(&agents, DEFAULT_TRUST_LIMIT).await;
		let failed: Vec<&String> = trusted
			.iter()
			.filter(|(_, ok)| !**ok)
			.map(|(id, _)| id)
			.collect();
		if failed.is_empty() {
			info!("RLUSD trustlines established for {} agents", trusted.len());
		} else {
			warn!("RLUSD trustlines failed for {:?}", failed);
		}

		match session.deposit_address().await {
			Ok(address) => match session.connection().balance_drops(&address).await {
				Ok(drops) => info!(
					"Main agent {} holds {} XRP",
					address,
					format_token_amount(drops as u128, XRP_DECIMALS)
				),
				Err(e) => warn!("Failed to read main agent balance: {}", e),
			},
			Err(e) => warn!("No main agent address: {}", e),
		}
	}

	if let Some(task) = &config.task {
		match session.run_task(task).await {
			Ok(run) => {
				info!("Run {} finished with {:?}", run.run_id, run.completion.status);
				if let Some(result) = run.result {
					for agent in &result.agent_hierarchy {
						info!(
							"   - {} (level {}): {} tokens",
							agent.agent_name, agent.level, agent.tokens
						);
					}
					info!("{}", result.final_output);
				}
			}
			Err(e) => error!("Task run failed: {}", e),
		}
	}

	let request = TransactionRequest::new(MAIN_AGENT_ID, "text-gen-1", 5.0);
	match session.execute_and_record(&request).await {
		Ok(record) => {
			info!("{:#?}", record);
			info!(
				"Local balances: main {}, text-gen-1 {:?}, volume {}",
				session.account().main_balance(),
				session.account().agent_balance("text-gen-1"),
				session.account().total_volume()
			);
		}
		Err(e) => error!("Payment failed: {}", e),
	}

	if let Err(e) = session.shutdown().await {
		error!("Failed to close session: {}", e);
	}
}
