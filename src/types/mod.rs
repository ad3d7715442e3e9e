//! Core data model: turns, tool invocations, events, token accounting.

mod event;
mod invocation;
mod turn;
mod usage;

pub use event::{ModelEvent, RuntimeEvent, StreamErrorKind, ToolCallRequest};
pub use invocation::{ApprovalDecision, CapabilityClass, ToolErrorKind, ToolInvocation};
pub use turn::{ToolStats, Turn, TurnKind, TurnMetrics, TurnState};
pub use usage::TokenUsage;
