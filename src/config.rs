//! Runtime configuration.
//!
//! Settings are read from a JSON file and may be overridden from the command line or the
//! environment. Loop periods and queue sizes are not part of the file: they are fixed in
//! [`Timings`] and [`CoordinatorConfig`].

use crate::agent::AgentError;
use crate::chain::parse_address;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command line of the agent binary
#[derive(Debug, Parser)]
#[command(name = "srng-agent", about = "Commit-reveal randomness agent for the SRNG oracle")]
pub struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Node JSON-RPC endpoint
    #[arg(long, env = "SRNG_RPC_URL")]
    pub rpc_url: Option<String>,

    /// Hex encoded signing key
    #[arg(long, env = "SRNG_PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// SQLite database file
    #[arg(long, env = "SRNG_DB_PATH")]
    pub db_path: Option<PathBuf>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/agent.db")
}

fn default_http_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_gas_limit() -> u64 {
    1_000_000
}

fn default_gas_price_wei() -> u64 {
    5_000_000_000
}

fn default_allowance_tokens() -> u64 {
    10_000_000_000
}

fn default_rpc_timeout_secs() -> u64 {
    10
}

fn default_live_reveal_grace_secs() -> u64 {
    10
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub oracle_address: String,
    pub token_address: String,
    #[serde(default)]
    pub private_key: String,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_http_listen")]
    pub http_listen: String,
    /// First block to scan when neither a cursor nor a deploy transaction is known
    #[serde(default)]
    pub start_block: Option<u64>,
    /// Oracle deployment transaction, used to find the first block to scan
    #[serde(default)]
    pub deploy_tx: Option<String>,
    /// Blocks kept behind the head before logs are read
    #[serde(default)]
    pub confirmations: u64,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    #[serde(default = "default_gas_price_wei")]
    pub gas_price_wei: u64,
    /// Whole tokens (18 decimals) approved to the oracle at startup
    #[serde(default = "default_allowance_tokens")]
    pub allowance_tokens: u64,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    #[serde(default = "default_live_reveal_grace_secs")]
    pub live_reveal_grace_secs: u64,
}

impl fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConfig")
            .field("rpc_url", &self.rpc_url)
            .field("chain_id", &self.chain_id)
            .field("oracle_address", &self.oracle_address)
            .field("token_address", &self.token_address)
            .field("private_key", &"<redacted>")
            .field("db_path", &self.db_path)
            .field("http_listen", &self.http_listen)
            .field("start_block", &self.start_block)
            .field("deploy_tx", &self.deploy_tx)
            .field("confirmations", &self.confirmations)
            .finish_non_exhaustive()
    }
}

impl AgentConfig {
    /// Loads the file named by `args` and applies command line overrides.
    pub fn load(args: &Args) -> Result<Self, AgentError> {
        let mut config = Self::from_file(&args.config)?;
        if let Some(rpc_url) = &args.rpc_url {
            config.rpc_url = rpc_url.clone();
        }
        if let Some(private_key) = &args.private_key {
            config.private_key = private_key.clone();
        }
        if let Some(db_path) = &args.db_path {
            config.db_path = db_path.clone();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, AgentError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AgentError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, AgentError> {
        serde_json::from_str(raw)
            .map_err(|e| AgentError::Config(format!("Invalid configuration: {}", e)))
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.rpc_url.trim().is_empty() {
            return Err(AgentError::Config("rpc_url is required".to_string()));
        }
        if self.chain_id == 0 {
            return Err(AgentError::Config("chain_id must be set".to_string()));
        }
        if self.private_key.trim().is_empty() {
            return Err(AgentError::Config("private_key is required".to_string()));
        }
        let key = self.private_key.trim_start_matches("0x");
        if key.len() != 64 || hex::decode(key).is_err() {
            return Err(AgentError::Config(
                "private_key must be 32 hex encoded bytes".to_string(),
            ));
        }
        parse_address(&self.oracle_address)?;
        parse_address(&self.token_address)?;
        if let Some(tx) = &self.deploy_tx {
            parse_tx_hash(tx)?;
        }
        self.listen_addr()?;
        if self.gas_limit == 0 {
            return Err(AgentError::Config("gas_limit must be positive".to_string()));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, AgentError> {
        self.http_listen.parse().map_err(|e| {
            AgentError::Config(format!("Invalid http_listen {}: {}", self.http_listen, e))
        })
    }

    pub fn deploy_tx_hash(&self) -> Result<Option<ethers::types::TxHash>, AgentError> {
        self.deploy_tx.as_deref().map(parse_tx_hash).transpose()
    }

    /// Allowance in base units
    pub fn allowance_amount(&self) -> ethers::types::U256 {
        ethers::types::U256::from(self.allowance_tokens)
            * ethers::types::U256::exp10(crate::utils::TOKEN_DECIMALS as usize)
    }

    pub fn timings(&self) -> Timings {
        Timings {
            live_reveal_grace: Duration::from_secs(self.live_reveal_grace_secs),
            ..Timings::default()
        }
    }
}

fn parse_tx_hash(value: &str) -> Result<ethers::types::TxHash, AgentError> {
    value
        .parse()
        .map_err(|e| AgentError::Config(format!("Invalid transaction hash {}: {}", value, e)))
}

/// Periods of the agent's loops
#[derive(Debug, Clone)]
pub struct Timings {
    pub commit_interval: Duration,
    pub reconcile_interval: Duration,
    pub receipt_poll: Duration,
    pub receipt_timeout: Duration,
    /// Wait when the sync cursor has caught up with the head
    pub head_poll: Duration,
    /// Wait before revealing a commitment first seen by the live scan
    pub live_reveal_grace: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            commit_interval: Duration::from_secs(15),
            reconcile_interval: Duration::from_secs(20),
            receipt_poll: Duration::from_secs(2),
            receipt_timeout: Duration::from_secs(30),
            head_poll: Duration::from_secs(1),
            live_reveal_grace: Duration::from_secs(10),
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
        }
    }
}

/// Limits of the commit-reveal coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Capacity of the reveal queue
    pub reveal_queue_capacity: usize,
    /// New commits are skipped while the reveal queue holds this many entries or more
    pub backpressure_threshold: usize,
    /// Blocks after its commit in which a seed may still be revealed
    pub max_unverified_blocks: u64,
    pub timings: Timings,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            reveal_queue_capacity: 1000,
            backpressure_threshold: 10,
            max_unverified_blocks: 400,
            timings: Timings::default(),
        }
    }
}
