//! Model client seam.
//!
//! The runtime consumes a stream of [`ModelEvent`]s and never defines a wire
//! encoding; a provider adapter implements [`ModelClient`] on top of
//! whatever transport it speaks.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::tools::ToolDefinition;
use crate::types::{ModelEvent, Turn, TurnKind};

pub type ModelEventStream = Pin<Box<dyn Stream<Item = ModelEvent> + Send>>;

/// One entry of an assembled prompt. Adapters translate these into their
/// provider's message encoding.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum PromptMessage {
    User {
        content: String,
    },
    Assistant {
        content: String,
    },
    ToolCall {
        call_id: String,
        tool: String,
        args: serde_json::Value,
    },
    ToolResult {
        call_id: String,
        output: String,
        is_error: bool,
    },
}

/// Assembled request: system prompt, rendered history, tool schemas.
#[derive(Clone, Debug, Default)]
pub struct ModelRequest {
    pub system: String,
    pub messages: Vec<PromptMessage>,
    pub tools: Vec<ToolDefinition>,
}

impl ModelRequest {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            messages: Vec::new(),
            tools: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Render one turn into prompt messages, in conversation order.
    pub fn push_turn(&mut self, turn: &Turn) {
        match turn.kind {
            TurnKind::Summary => {
                self.messages.push(PromptMessage::User {
                    content: format!("[Previous conversation summary]\n{}", turn.text),
                });
            }
            TurnKind::User => {
                self.messages.push(PromptMessage::User {
                    content: turn.input.clone(),
                });
                if !turn.text.is_empty() {
                    self.messages.push(PromptMessage::Assistant {
                        content: turn.text.clone(),
                    });
                }
                for call in &turn.invocations {
                    self.messages.push(PromptMessage::ToolCall {
                        call_id: call.call_id.clone(),
                        tool: call.tool.clone(),
                        args: call.args.clone(),
                    });
                    self.messages.push(PromptMessage::ToolResult {
                        call_id: call.call_id.clone(),
                        output: call.result_text(),
                        is_error: call.is_error(),
                    });
                }
            }
        }
    }

    /// Assemble system + completed history + the in-progress turn.
    pub fn assemble(
        system: impl Into<String>,
        history: &[Turn],
        current: &Turn,
        tools: Vec<ToolDefinition>,
    ) -> Self {
        let mut request = Self::new(system).with_tools(tools);
        for turn in history {
            request.push_turn(turn);
        }
        request.push_turn(current);
        request
    }
}

/// Streaming model interface consumed by the turn state machine (and, in
/// degenerate non-tool form, by the compactor).
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Open a response stream. An `Err` here is a transport failure to
    /// connect; mid-stream failures arrive as [`ModelEvent::Error`].
    async fn send(&self, request: ModelRequest) -> crate::Result<ModelEventStream>;
}

/// Exponential backoff with jitter for transport retries.
#[derive(Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    jitter: f64,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        Self {
            initial,
            max,
            factor,
            jitter: 0.1,
        }
    }

    pub fn from_retry_config(retry: &crate::config::RetryConfig) -> Self {
        Self::new(retry.initial_delay, retry.max_delay, retry.factor)
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base =
            self.initial.as_millis() as f64 * self.factor.powi(attempt.saturating_sub(1) as i32);
        let clamped = base.min(self.max.as_millis() as f64);

        let jittered = if self.jitter > 0.0 {
            let jitter_range = clamped * self.jitter;
            let jitter_offset = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
            (clamped + jitter_offset).max(0.0)
        } else {
            clamped
        };

        Duration::from_millis(jittered as u64)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(200),
            max: Duration::from_secs(10),
            factor: 2.0,
            jitter: 0.1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolInvocation;

    #[test]
    fn test_backoff_progression() {
        let backoff =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(10), 2.0)
                .with_jitter(0.0);

        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_clamps_at_max() {
        let backoff =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_millis(500), 2.0)
                .with_jitter(0.0);
        assert_eq!(backoff.delay_for(10), Duration::from_millis(500));
    }

    #[test]
    fn test_assemble_renders_history_in_order() {
        let mut prior = Turn::new("first question");
        prior.text = "first answer".into();

        let mut call =
            ToolInvocation::requested("c1", "read_file", serde_json::json!({"path": "a.rs"}));
        call.outcome = Some(Ok("fn main() {}".into()));
        prior.invocations.push(call);

        let current = Turn::new("second question");

        let request = ModelRequest::assemble("system prompt", &[prior], &current, Vec::new());
        assert_eq!(request.system, "system prompt");
        assert_eq!(request.messages.len(), 5);
        assert!(matches!(
            request.messages[0],
            PromptMessage::User { ref content } if content == "first question"
        ));
        assert!(matches!(request.messages[2], PromptMessage::ToolCall { .. }));
        assert!(matches!(
            request.messages[3],
            PromptMessage::ToolResult { is_error: false, .. }
        ));
        assert!(matches!(
            request.messages[4],
            PromptMessage::User { ref content } if content == "second question"
        ));
    }

    #[test]
    fn test_summary_turn_rendered_as_context() {
        let summary = Turn::summary("we already fixed the parser");
        let current = Turn::new("next step?");
        let request = ModelRequest::assemble("sys", &[summary], &current, Vec::new());

        assert!(matches!(
            request.messages[0],
            PromptMessage::User { ref content }
                if content.contains("[Previous conversation summary]")
        ));
    }
}
