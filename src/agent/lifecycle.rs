use crate::agent::AgentError;
use crate::chain::ChainClient;
use crate::config::{CoordinatorConfig, Timings};
use crate::coordinator::Coordinator;
use crate::store::CommitmentRepository;
use crate::sync::{
    CursorBootstrap, EventDispatcher, EventSyncEngine, RevealTrigger, SyncConfig,
    resolve_start_cursor,
};
use ethers::types::U256;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Settings the agent is started with
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub bootstrap: CursorBootstrap,
    pub confirmations: u64,
    /// Token amount approved to the oracle at startup
    pub allowance: U256,
    pub timings: Timings,
}

/// The randomness agent: sync engine, reveal worker and the commit and reconcile timers
/// sharing one chain client, one store and one cancellation token.
pub struct Agent {
    chain: Arc<dyn ChainClient>,
    repo: CommitmentRepository,
    coordinator: Arc<Coordinator>,
    settings: AgentSettings,
    cancel: CancellationToken,
}

impl Agent {
    /// Builds the agent and grants the token allowance. A failed approval aborts startup.
    pub async fn new(
        chain: Arc<dyn ChainClient>,
        repo: CommitmentRepository,
        settings: AgentSettings,
    ) -> Result<Self, AgentError> {
        let cancel = CancellationToken::new();
        let coordinator = Arc::new(Coordinator::new(
            chain.clone(),
            repo.clone(),
            CoordinatorConfig {
                timings: settings.timings.clone(),
                ..CoordinatorConfig::default()
            },
            cancel.clone(),
        ));

        coordinator
            .approve_allowance(settings.allowance)
            .await
            .map_err(|e| AgentError::Startup(format!("Token approval failed: {}", e)))?;

        Ok(Self {
            chain,
            repo,
            coordinator,
            settings,
            cancel,
        })
    }

    pub fn coordinator(&self) -> Arc<Coordinator> {
        self.coordinator.clone()
    }

    /// Resolves the scan cursor, reconciles leftovers from a previous run and spawns the loops.
    pub async fn start(self) -> Result<AgentHandle, AgentError> {
        let start_cursor =
            resolve_start_cursor(self.chain.as_ref(), &self.repo, &self.settings.bootstrap)
                .await?;

        let mut dispatcher = EventDispatcher::new(self.chain.address());
        dispatcher.register_handler(Box::new(RevealTrigger::new(
            self.coordinator.clone(),
            self.settings.timings.live_reveal_grace,
            self.cancel.clone(),
        )));
        let engine = EventSyncEngine::new(
            self.chain.clone(),
            self.repo.clone(),
            dispatcher,
            SyncConfig::new(self.settings.confirmations, &self.settings.timings),
            start_cursor,
            self.cancel.clone(),
        );

        // Reveals owed from a previous run are queued before any new commit.
        self.coordinator.reconcile_tick().await;

        let handles = vec![
            tokio::spawn(engine.run()),
            tokio::spawn(self.coordinator.clone().run_reveal_worker()),
            tokio::spawn(self.coordinator.clone().run_commit_timer()),
            tokio::spawn(self.coordinator.clone().run_reconcile_timer()),
        ];
        info!(
            "Agent {:?} started, scanning from block {}",
            self.chain.address(),
            start_cursor
        );

        Ok(AgentHandle {
            cancel: self.cancel,
            handles,
        })
    }
}

/// Handle to a running agent
pub struct AgentHandle {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl AgentHandle {
    /// Token cancelled on shutdown, for tasks that live alongside the agent
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops every loop and waits for them to finish.
    pub async fn shutdown(self) {
        info!("Shutting down agent");
        self.cancel.cancel();
        for result in futures::future::join_all(self.handles).await {
            if let Err(e) = result {
                tracing::error!("Agent task ended abnormally: {}", e);
            }
        }
        info!("Agent stopped");
    }
}
