mod agent;
mod api;
mod chain;
mod config;
mod coordinator;
mod store;
mod sync;
mod utils;

use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::agent::{Agent, AgentError, AgentSettings};
use crate::chain::{ChainClient, EthChainClient};
use crate::config::{AgentConfig, Args};
use crate::store::{CommitmentRepository, SqliteStore};
use crate::sync::CursorBootstrap;

#[tokio::main(flavor = "current_thread")]
async fn main() {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
		tracing_subscriber::EnvFilter::new("info,ethers_providers=warn,hyper=warn")
	});
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	if let Err(e) = run(Args::parse()).await {
		error!("Agent failed: {}", e);
		std::process::exit(1);
	}
}

async fn run(args: Args) -> Result<(), AgentError> {
	let config = AgentConfig::load(&args)?;
	info!("Loaded configuration from {}", args.config.display());

	let store = Arc::new(SqliteStore::open(&config.db_path)?);
	info!("Opened store at {}", config.db_path.display());
	let repo = CommitmentRepository::new(store);

	let chain: Arc<dyn ChainClient> = Arc::new(EthChainClient::connect(&config)?);
	info!(
		"Signing as {:?} against oracle {:?}",
		chain.address(),
		chain.oracle_address()
	);

	let settings = AgentSettings {
		bootstrap: CursorBootstrap {
			deploy_tx: config.deploy_tx_hash()?,
			start_block: config.start_block,
		},
		confirmations: config.confirmations,
		allowance: config.allowance_amount(),
		timings: config.timings(),
	};

	let agent = Agent::new(chain, repo.clone(), settings).await?;
	let handle = agent.start().await?;

	let listener = TcpListener::bind(config.listen_addr()?).await?;
	let server = tokio::spawn(api::serve(
		listener,
		api::router(repo),
		handle.cancel_token(),
	));

	tokio::signal::ctrl_c().await?;
	info!("Interrupt received");
	handle.shutdown().await;

	match server.await {
		Ok(Ok(())) => {}
		Ok(Err(e)) => error!("HTTP API failed: {}", e),
		Err(e) => error!("HTTP API task panicked: {}", e),
	}
	Ok(())
}
