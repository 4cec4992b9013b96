//! Event system for oracle log processing.
//!
//! Raw logs returned by the node are decoded once into [`OracleEvent`], a closed set of the
//! oracle's events. The [`EventDispatcher`] drops events that belong to other agents and hands the
//! rest to every registered [`OracleEventHandler`] in registration order.

use crate::agent::AgentError;
use crate::chain::ChainError;
use crate::chain::contracts::OracleContractEvents;
use ethers::abi::RawLog;
use ethers::contract::EthLogDecode;
use ethers::types::{Address, H256, Log};
use tracing::{debug, error};

/// Which kind of scan produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Catching up on history, windows of 100 or 1000 blocks
    Backfill,
    /// Following the head, windows of 1 or 10 blocks
    Live,
}

/// Events emitted by the oracle contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleEvent {
    /// A consumer subscribed to a committed hash
    Subscribed {
        committer: Address,
        consumer: Address,
        hash: H256,
    },
    /// A commitment landed on chain
    CommitRegistered {
        sender: Address,
        hash: H256,
        block: u64,
    },
    /// A seed was published
    SeedRevealed {
        committer: Address,
        hash: H256,
        seed: H256,
    },
    Unsubscribed { consumer: Address, hash: H256 },
    RandomConsumed { consumer: Address, hash: H256 },
}

impl OracleEvent {
    /// Decodes a raw oracle log.
    pub fn decode(log: &Log) -> Result<Self, ChainError> {
        let raw = RawLog {
            topics: log.topics.clone(),
            data: log.data.to_vec(),
        };
        let event = OracleContractEvents::decode_log(&raw)
            .map_err(|e| ChainError::Decode(e.to_string()))?;

        Ok(match event {
            OracleContractEvents::SubscribeFilter(e) => Self::Subscribed {
                committer: e.commiter,
                consumer: e.consumer,
                hash: H256::from(e.hash),
            },
            OracleContractEvents::CommitHashFilter(e) => Self::CommitRegistered {
                sender: e.sender,
                hash: H256::from(e.hash),
                block: e.block.low_u64(),
            },
            OracleContractEvents::RevealSeedFilter(e) => Self::SeedRevealed {
                committer: e.commiter,
                hash: H256::from(e.hash),
                seed: H256::from(e.seed),
            },
            OracleContractEvents::UnSubscribeFilter(e) => Self::Unsubscribed {
                consumer: e.consumer,
                hash: H256::from(e.hash),
            },
            OracleContractEvents::RandomConsumedFilter(e) => Self::RandomConsumed {
                consumer: e.consumer,
                hash: H256::from(e.hash),
            },
        })
    }

    /// Agent the event belongs to, for events that name one
    pub fn owner(&self) -> Option<Address> {
        match self {
            Self::Subscribed { committer, .. } => Some(*committer),
            Self::CommitRegistered { sender, .. } => Some(*sender),
            Self::SeedRevealed { committer, .. } => Some(*committer),
            Self::Unsubscribed { .. } | Self::RandomConsumed { .. } => None,
        }
    }

    pub fn hash(&self) -> H256 {
        match self {
            Self::Subscribed { hash, .. }
            | Self::CommitRegistered { hash, .. }
            | Self::SeedRevealed { hash, .. }
            | Self::Unsubscribed { hash, .. }
            | Self::RandomConsumed { hash, .. } => *hash,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Subscribed { .. } => "Subscribe",
            Self::CommitRegistered { .. } => "CommitHash",
            Self::SeedRevealed { .. } => "RevealSeed",
            Self::Unsubscribed { .. } => "UnSubscribe",
            Self::RandomConsumed { .. } => "RandomConsumed",
        }
    }
}

/// Trait for handling oracle events.
#[async_trait::async_trait]
pub trait OracleEventHandler: Send + Sync {
    /// Handle an event addressed to this agent.
    async fn handle(&mut self, event: &OracleEvent, mode: ScanMode) -> Result<(), AgentError>;

    /// Get the name of this handler for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// What the dispatcher did with a log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dispatched,
    /// Event of another agent
    Foreign,
    Undecodable,
}

/// Routes decoded events to the registered handlers.
pub struct EventDispatcher {
    agent: Address,
    handlers: Vec<Box<dyn OracleEventHandler>>,
}

impl EventDispatcher {
    /// Create a dispatcher for the agent signing as `agent`.
    pub fn new(agent: Address) -> Self {
        Self {
            agent,
            handlers: Vec::new(),
        }
    }

    /// Handlers are called in the order they are registered.
    pub fn register_handler(&mut self, handler: Box<dyn OracleEventHandler>) {
        self.handlers.push(handler);
    }

    /// Decode `log` and hand it to every handler.
    ///
    /// Errors from handlers are logged, but do not stop other handlers from running.
    pub async fn dispatch(&mut self, log: &Log, mode: ScanMode) -> DispatchOutcome {
        let event = match OracleEvent::decode(log) {
            Ok(event) => event,
            Err(e) => {
                debug!(
                    "Skipping undecodable log in block {:?}: {}",
                    log.block_number, e
                );
                return DispatchOutcome::Undecodable;
            }
        };

        if let Some(owner) = event.owner() {
            if owner != self.agent {
                return DispatchOutcome::Foreign;
            }
        }

        for handler in &mut self.handlers {
            if let Err(e) = handler.handle(&event, mode).await {
                error!(
                    "Handler {} failed to process {} event: {}",
                    handler.name(),
                    event.name(),
                    e
                );
            }
        }
        DispatchOutcome::Dispatched
    }
}
