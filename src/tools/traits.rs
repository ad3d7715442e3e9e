//! Tool handler traits and the per-call execution context.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::sandbox::Confinement;
use crate::types::ToolErrorKind;

/// Tool schema advertised to the model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// Everything one call runs under: cancellation, deadline, confinement.
///
/// Handlers must poll the token promptly and consult the confinement before
/// performing the matching side effect.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    cancel: CancellationToken,
    deadline: Instant,
    confinement: Confinement,
}

impl ExecutionContext {
    pub fn new(cancel: CancellationToken, deadline: Instant, confinement: Confinement) -> Self {
        Self {
            cancel,
            deadline,
            confinement,
        }
    }

    /// Unbounded context for direct handler invocation in tests.
    pub fn unbounded() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: Instant::now() + Duration::from_secs(3600),
            confinement: Confinement::unrestricted(),
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn confinement(&self) -> &Confinement {
        &self.confinement
    }
}

/// Result type every handler returns; errors become structured tool results
/// fed back to the model, never turn failures.
pub type HandlerResult = std::result::Result<String, ToolErrorKind>;

/// Core tool contract consumed by the orchestrator.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> serde_json::Value;

    async fn run(&self, args: serde_json::Value, ctx: &ExecutionContext) -> HandlerResult;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.input_schema())
    }
}

/// Schema-typed tool with automatic JSON schema derivation.
///
/// A higher-level layer over [`ToolHandler`] with typed input; the blanket
/// impl bridges it down, rejecting malformed arguments before the handler
/// sees them.
#[async_trait]
pub trait TypedToolHandler: Send + Sync {
    type Input: JsonSchema + DeserializeOwned + Send;
    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    async fn handle(&self, input: Self::Input, ctx: &ExecutionContext) -> HandlerResult;

    fn input_schema() -> serde_json::Value {
        let schema = schemars::schema_for!(Self::Input);
        serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
    }
}

#[async_trait]
impl<T: TypedToolHandler + 'static> ToolHandler for T {
    fn name(&self) -> &str {
        T::NAME
    }

    fn description(&self) -> &str {
        T::DESCRIPTION
    }

    fn input_schema(&self) -> serde_json::Value {
        T::input_schema()
    }

    async fn run(&self, args: serde_json::Value, ctx: &ExecutionContext) -> HandlerResult {
        match serde_json::from_value::<T::Input>(args) {
            Ok(typed) => TypedToolHandler::handle(self, typed, ctx).await,
            Err(e) => Err(ToolErrorKind::execution(format!("invalid input: {}", e))),
        }
    }
}
