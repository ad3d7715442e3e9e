//! Capability registry: tool name to handler plus declared capability class.

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::CapabilityClass;

use super::traits::{ToolDefinition, ToolHandler};

/// A handler plus the capability class it was registered with.
#[derive(Clone)]
pub struct RegisteredTool {
    pub handler: Arc<dyn ToolHandler>,
    pub class: CapabilityClass,
}

/// Maps tool names to handlers. Populated before the session starts and
/// read-only afterwards; a tool's class never changes at runtime.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn ToolHandler>, class: CapabilityClass) {
        self.tools
            .insert(handler.name().to_string(), RegisteredTool { handler, class });
    }

    pub fn with_tool(mut self, handler: Arc<dyn ToolHandler>, class: CapabilityClass) -> Self {
        self.register(handler, class);
        self
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    pub fn class_of(&self, name: &str) -> Option<CapabilityClass> {
        self.tools.get(name).map(|tool| tool.class)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|tool| tool.handler.definition())
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::tools::{ExecutionContext, HandlerResult};

    struct Probe;

    #[async_trait]
    impl ToolHandler for Probe {
        fn name(&self) -> &str {
            "probe"
        }

        fn description(&self) -> &str {
            "probe tool"
        }

        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }

        async fn run(&self, _args: serde_json::Value, _ctx: &ExecutionContext) -> HandlerResult {
            Ok("ok".into())
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry =
            ToolRegistry::new().with_tool(Arc::new(Probe), CapabilityClass::ReadOnly);

        assert!(registry.contains("probe"));
        assert_eq!(registry.class_of("probe"), Some(CapabilityClass::ReadOnly));
        assert_eq!(registry.class_of("missing"), None);
        assert_eq!(registry.len(), 1);

        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "probe");
    }
}
