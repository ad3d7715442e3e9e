//! Stream and observability event contracts.

use serde::{Deserialize, Serialize};

use super::invocation::CapabilityClass;
use super::usage::TokenUsage;

/// One tool call requested by the model during a streamed response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub tool: String,
    pub args: serde_json::Value,
    /// Set when the model explicitly asked for elevated permissions
    /// (consulted by the `OnRequest` approval policy).
    #[serde(default)]
    pub escalated: bool,
}

impl ToolCallRequest {
    pub fn new(
        call_id: impl Into<String>,
        tool: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool: tool.into(),
            args,
            escalated: false,
        }
    }

    pub fn escalated(mut self) -> Self {
        self.escalated = true;
        self
    }
}

/// Classification of a mid-stream transport failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamErrorKind {
    /// The connection dropped before the stream completed.
    Disconnected { message: String },
    /// The provider shed load; retry after backoff.
    Throttled,
    /// The provider sent something the adapter could not interpret.
    Protocol { message: String },
}

impl StreamErrorKind {
    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::Disconnected {
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Disconnected { .. } | Self::Throttled)
    }
}

impl std::fmt::Display for StreamErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected { message } => write!(f, "stream disconnected: {}", message),
            Self::Throttled => write!(f, "stream throttled"),
            Self::Protocol { message } => write!(f, "protocol error: {}", message),
        }
    }
}

/// Events consumed from a model provider's response stream.
///
/// The runtime defines only this contract, never a wire encoding.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ModelEvent {
    TextDelta { delta: String },
    ToolCallRequested(ToolCallRequest),
    /// Terminal: the model finished its turn. Carries final usage so the
    /// runtime can account tokens without a separate call.
    Completed { usage: TokenUsage },
    /// Terminal: the stream failed.
    Error(StreamErrorKind),
}

/// Ordered observability events exposed to the surrounding collaborator
/// (UI, logging). Emission order follows call order within a turn.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RuntimeEvent {
    TurnStarted {
        turn_id: String,
    },
    TextDelta {
        turn_id: String,
        delta: String,
    },
    ToolInvocationStarted {
        turn_id: String,
        call_id: String,
        tool: String,
        class: Option<CapabilityClass>,
    },
    ToolInvocationCompleted {
        turn_id: String,
        call_id: String,
        tool: String,
        is_error: bool,
        duration_ms: u64,
    },
    TurnCompleted {
        turn_id: String,
        usage: TokenUsage,
    },
    TurnFailed {
        turn_id: String,
        error: String,
    },
    CompactionTriggered {
        estimated_tokens: u64,
        replaced_turns: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_error_retryability() {
        assert!(StreamErrorKind::disconnected("reset by peer").is_retryable());
        assert!(StreamErrorKind::Throttled.is_retryable());
        assert!(
            !StreamErrorKind::Protocol {
                message: "bad frame".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_model_event_serde() {
        let event = ModelEvent::ToolCallRequested(
            ToolCallRequest::new("c1", "read_file", serde_json::json!({"path": "x"})).escalated(),
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("tool_call_requested"));

        let parsed: ModelEvent = serde_json::from_str(&json).unwrap();
        match parsed {
            ModelEvent::ToolCallRequested(req) => {
                assert_eq!(req.tool, "read_file");
                assert!(req.escalated);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
