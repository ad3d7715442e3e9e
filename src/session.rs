//! Session ownership and the conversation manager.
//!
//! All session mutation funnels through one logical owner: `submit` spawns a
//! driver task that exclusively owns the active turn, and history/approvals
//! are only touched at turn boundaries under the session lock.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::approval::{ApprovalEngine, ApprovalGate, SessionApprovals, StaticGate};
use crate::compact::Compactor;
use crate::config::RuntimeConfig;
use crate::events::{EventSink, NullSink};
use crate::model::ModelClient;
use crate::orchestrator::ToolOrchestrator;
use crate::sandbox::{PolicyBackend, SandboxBackend};
use crate::tools::ToolRegistry;
use crate::turn::TurnRunner;
use crate::types::{RuntimeEvent, Turn, TurnState};

/// Optional persistence collaborator, called at turn boundaries. The
/// runtime defines no file format.
#[async_trait]
pub trait TurnStore: Send + Sync {
    async fn save(&self, turn: &Turn) -> crate::Result<()>;
    async fn load(&self) -> crate::Result<Vec<Turn>>;
}

/// Root aggregate: ordered completed turns plus session-scoped approvals.
#[derive(Debug, Default)]
pub struct Session {
    pub id: String,
    turns: Vec<Turn>,
    approvals: SessionApprovals,
}

impl Session {
    fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            turns: Vec::new(),
            approvals: SessionApprovals::default(),
        }
    }
}

struct ActiveTurn {
    cancel: CancellationToken,
}

struct Shared {
    session: Session,
    active: Option<ActiveTurn>,
}

/// Handle to a running turn: cancel it, or wait for its terminal state.
pub struct TurnHandle {
    turn_id: String,
    cancel: CancellationToken,
    join: tokio::task::JoinHandle<Turn>,
}

impl TurnHandle {
    pub fn id(&self) -> &str {
        &self.turn_id
    }

    /// Request cooperative cancellation of the turn and its in-flight tools.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the turn to reach a terminal state.
    pub async fn wait(self) -> crate::Result<Turn> {
        self.join
            .await
            .map_err(|e| crate::Error::Invariant(format!("turn driver panicked: {}", e)))
    }
}

enum DriveOutcome {
    Completed,
    Cancelled,
    Failed(crate::Error),
}

/// Owns the session and drives turns through the runtime.
pub struct ConversationManager {
    shared: Arc<Mutex<Shared>>,
    model: Arc<dyn ModelClient>,
    registry: Arc<ToolRegistry>,
    orchestrator: Arc<ToolOrchestrator>,
    compactor: Arc<Compactor>,
    sink: Arc<dyn EventSink>,
    store: Option<Arc<dyn TurnStore>>,
    config: Arc<RuntimeConfig>,
    system_prompt: String,
}

impl ConversationManager {
    pub fn builder() -> ConversationManagerBuilder {
        ConversationManagerBuilder::default()
    }

    pub async fn session_id(&self) -> String {
        self.shared.lock().await.session.id.clone()
    }

    /// Read-only view of the completed history.
    pub async fn history(&self) -> Vec<Turn> {
        self.shared.lock().await.session.turns.clone()
    }

    /// Cancel the active turn, if any. No-op otherwise.
    pub async fn cancel_active(&self) {
        let shared = self.shared.lock().await;
        if let Some(active) = &shared.active {
            active.cancel.cancel();
        }
    }

    /// Load persisted turns into an idle session.
    pub async fn restore(&self) -> crate::Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let turns = store.load().await?;
        let mut shared = self.shared.lock().await;
        if shared.active.is_some() {
            return Err(crate::Error::TurnAlreadyActive);
        }
        let count = turns.len();
        shared.session.turns = turns;
        Ok(count)
    }

    /// Start a new turn.
    ///
    /// Rejects with [`crate::Error::TurnAlreadyActive`] while one is
    /// running; input is never queued, to avoid silent reordering.
    pub async fn submit(&self, message: impl Into<String>) -> crate::Result<TurnHandle> {
        let message = message.into();
        let mut shared = self.shared.lock().await;
        if shared.active.is_some() {
            return Err(crate::Error::TurnAlreadyActive);
        }

        let turn = Turn::new(message);
        let turn_id = turn.id.clone();
        let cancel = CancellationToken::new();
        shared.active = Some(ActiveTurn {
            cancel: cancel.clone(),
        });
        let history = shared.session.turns.clone();
        // The driver task owns the approval log for the turn's duration.
        let approvals = std::mem::take(&mut shared.session.approvals);
        drop(shared);

        self.sink.emit(RuntimeEvent::TurnStarted {
            turn_id: turn_id.clone(),
        });

        let runner = TurnRunner::new(
            Arc::clone(&self.model),
            Arc::clone(&self.orchestrator),
            Arc::clone(&self.sink),
            Arc::clone(&self.config),
            self.system_prompt.clone(),
            self.registry.definitions(),
            cancel.clone(),
        );

        let shared_handle = Arc::clone(&self.shared);
        let sink = Arc::clone(&self.sink);
        let compactor = Arc::clone(&self.compactor);
        let store = self.store.clone();
        let config = Arc::clone(&self.config);
        let system_prompt = self.system_prompt.clone();
        let driver_cancel = cancel.clone();

        let join = tokio::spawn(async move {
            let mut turn = turn;
            let mut approvals = approvals;

            let drive = tokio::time::timeout(
                config.timeouts.turn,
                runner.run(&history, &mut turn, &mut approvals),
            )
            .await;

            let outcome = match drive {
                Ok(Ok(())) => DriveOutcome::Completed,
                Ok(Err(crate::Error::Cancelled)) => DriveOutcome::Cancelled,
                Ok(Err(e)) => DriveOutcome::Failed(e),
                Err(_) => {
                    driver_cancel.cancel();
                    DriveOutcome::Failed(crate::Error::TurnTimeout(config.timeouts.turn))
                }
            };

            let mut shared = shared_handle.lock().await;
            shared.session.approvals = approvals;
            shared.active = None;

            match outcome {
                DriveOutcome::Completed => {
                    shared.session.turns.push(turn.clone());
                    sink.emit(RuntimeEvent::TurnCompleted {
                        turn_id: turn.id.clone(),
                        usage: turn.usage,
                    });

                    if let Err(e) = compactor
                        .maybe_compact(&system_prompt, &mut shared.session.turns)
                        .await
                    {
                        // Never fatal; tried again after the next turn.
                        warn!(error = %e, "compaction failed");
                    }

                    if let Some(store) = &store
                        && let Err(e) = store.save(&turn).await
                    {
                        warn!(error = %e, "failed to persist turn");
                    }
                }
                DriveOutcome::Cancelled => {
                    // Partial state is discarded, nothing persisted.
                    turn.state = TurnState::Cancelled;
                    turn.text.clear();
                    turn.invocations.clear();
                    turn.ended_at = Some(chrono::Utc::now());
                }
                DriveOutcome::Failed(e) => {
                    turn.state = TurnState::Failed;
                    turn.error = Some(e.to_string());
                    turn.ended_at = Some(chrono::Utc::now());
                    shared.session.turns.push(turn.clone());
                    sink.emit(RuntimeEvent::TurnFailed {
                        turn_id: turn.id.clone(),
                        error: e.to_string(),
                    });

                    if let Some(store) = &store
                        && let Err(e) = store.save(&turn).await
                    {
                        warn!(error = %e, "failed to persist turn");
                    }
                }
            }

            turn
        });

        Ok(TurnHandle {
            turn_id,
            cancel,
            join,
        })
    }
}

/// Assembles a [`ConversationManager`] from its collaborators.
#[derive(Default)]
pub struct ConversationManagerBuilder {
    config: Option<RuntimeConfig>,
    model: Option<Arc<dyn ModelClient>>,
    registry: Option<ToolRegistry>,
    gate: Option<Arc<dyn ApprovalGate>>,
    sandbox: Option<Arc<dyn SandboxBackend>>,
    sink: Option<Arc<dyn EventSink>>,
    store: Option<Arc<dyn TurnStore>>,
    system_prompt: String,
    deny_list: Vec<String>,
}

impl ConversationManagerBuilder {
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn model(mut self, model: Arc<dyn ModelClient>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn approval_gate(mut self, gate: Arc<dyn ApprovalGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn sandbox_backend(mut self, sandbox: Arc<dyn SandboxBackend>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn store(mut self, store: Arc<dyn TurnStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Tools denied under every policy, never bypassed.
    pub fn deny_list(mut self, tools: Vec<String>) -> Self {
        self.deny_list = tools;
        self
    }

    pub fn build(self) -> crate::Result<ConversationManager> {
        let model = self
            .model
            .ok_or_else(|| crate::Error::Invariant("a model client is required".to_string()))?;
        let config = Arc::new(self.config.unwrap_or_default());
        let registry = Arc::new(self.registry.unwrap_or_default());
        let gate: Arc<dyn ApprovalGate> = self
            .gate
            .unwrap_or_else(|| Arc::new(StaticGate::deny_all()));
        let sandbox: Arc<dyn SandboxBackend> = self
            .sandbox
            .unwrap_or_else(|| Arc::new(PolicyBackend::new(config.sandbox.clone())));
        let sink: Arc<dyn EventSink> = self.sink.unwrap_or_else(|| Arc::new(NullSink));

        let engine =
            ApprovalEngine::new(config.approval_policy).with_deny_list(self.deny_list);
        let orchestrator = Arc::new(ToolOrchestrator::new(
            &config,
            Arc::clone(&registry),
            engine,
            Arc::clone(&gate),
            sandbox,
            Arc::clone(&sink),
        ));
        let compactor = Arc::new(Compactor::new(
            Arc::clone(&model),
            Arc::clone(&sink),
            Arc::clone(&config),
        ));

        Ok(ConversationManager {
            shared: Arc::new(Mutex::new(Shared {
                session: Session::new(),
                active: None,
            })),
            model,
            registry,
            orchestrator,
            compactor,
            sink,
            store: self.store,
            config,
            system_prompt: self.system_prompt,
        })
    }
}
