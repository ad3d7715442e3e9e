//! Tool handler traits and the capability registry.

mod registry;
mod traits;

pub use registry::{RegisteredTool, ToolRegistry};
pub use traits::{
    ExecutionContext, HandlerResult, ToolDefinition, ToolHandler, TypedToolHandler,
};
