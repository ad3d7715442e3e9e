//! # agent-core
//!
//! Agent execution runtime: turns a user instruction into a sequence of
//! streamed model calls and sandboxed tool invocations, enforces approval
//! policy before any side-effecting action, and keeps the conversation
//! inside the model's context window via compaction.
//!
//! The runtime consumes a [`ModelClient`] stream and a [`ToolRegistry`] of
//! capability-classed handlers; rendering, persistence formats, and model
//! wire protocols live with the embedding application.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use agent_core::{
//!     ApprovalPolicy, CapabilityClass, ConversationManager, RuntimeConfig, ToolRegistry,
//! };
//!
//! # async fn run(model: Arc<dyn agent_core::ModelClient>, read_file: Arc<dyn agent_core::ToolHandler>) -> agent_core::Result<()> {
//! let registry = ToolRegistry::new().with_tool(read_file, CapabilityClass::ReadOnly);
//!
//! let manager = ConversationManager::builder()
//!     .config(RuntimeConfig::new().with_approval_policy(ApprovalPolicy::Untrusted))
//!     .model(model)
//!     .registry(registry)
//!     .system_prompt("You are a coding agent.")
//!     .build()?;
//!
//! let handle = manager.submit("Fix the failing test").await?;
//! let turn = handle.wait().await?;
//! println!("{}", turn.text);
//! # Ok(())
//! # }
//! ```

#![deny(rustdoc::broken_intra_doc_links)]

pub mod approval;
pub mod compact;
pub mod config;
pub mod events;
pub mod model;
pub mod orchestrator;
pub mod sandbox;
pub mod session;
pub mod testing;
pub mod tools;
mod turn;
pub mod types;

pub use approval::{
    ApprovalEngine, ApprovalGate, ApprovalPolicy, ApprovalRequest, ApprovalVerdict, GateResponse,
    SafeCommands, SessionApprovals, StaticGate,
};
pub use compact::{CompactionOutcome, Compactor};
pub use config::{
    CompactionConfig, ModelBinding, RetryConfig, RuntimeConfig, TimeoutConfig, TruncationConfig,
};
pub use events::{ChannelSink, EventSink, NullSink};
pub use model::{ExponentialBackoff, ModelClient, ModelEventStream, ModelRequest, PromptMessage};
pub use orchestrator::ToolOrchestrator;
pub use sandbox::{
    Confinement, ExecLimits, PolicyBackend, SandboxBackend, SandboxError, SandboxPolicy,
    SandboxResult,
};
pub use session::{ConversationManager, ConversationManagerBuilder, Session, TurnHandle, TurnStore};
pub use tools::{
    ExecutionContext, HandlerResult, ToolDefinition, ToolHandler, ToolRegistry, TypedToolHandler,
};
pub use types::{
    ApprovalDecision, CapabilityClass, ModelEvent, RuntimeEvent, StreamErrorKind, TokenUsage,
    ToolCallRequest, ToolErrorKind, ToolInvocation, Turn, TurnKind, TurnMetrics, TurnState,
};

use std::time::Duration;

/// Runtime-level error taxonomy.
///
/// Tool-level failures never appear here: they are recovered locally as
/// structured [`ToolErrorKind`] results fed back to the model. Only
/// transport exhaustion, invariant violations, and session misuse escalate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Model stream failed after exhausting the retry budget.
    #[error("model transport failed after {attempts} attempt(s): {message}")]
    Transport { message: String, attempts: u32 },

    /// A new turn was submitted while one is active. Input is rejected,
    /// never queued, to avoid silent reordering.
    #[error("a turn is already active for this session")]
    TurnAlreadyActive,

    /// The turn was cancelled cooperatively.
    #[error("turn cancelled")]
    Cancelled,

    /// Wall-clock bound across all of a turn's waves was exceeded.
    #[error("turn exceeded its {0:?} deadline")]
    TurnTimeout(Duration),

    /// Summarization failed; history is unchanged and compaction retries
    /// on the next trigger.
    #[error("compaction failed: {0}")]
    Compaction(String),

    /// Persistence collaborator failed at a turn boundary.
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// Internal invariant violation.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

pub type Result<T> = std::result::Result<T, Error>;
