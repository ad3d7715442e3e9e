//! Tool invocation records and their outcomes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Category of side effect a tool may cause.
///
/// Declared once per tool at registration; a tool's class never changes
/// at runtime. `ReadOnly` calls within a batch may run concurrently, all
/// other classes are serialized in model-emitted order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityClass {
    ReadOnly,
    FileWrite,
    ProcessExecute,
    NetworkAccess,
}

impl CapabilityClass {
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::ReadOnly)
    }

    /// Whether calls of this class may be dispatched concurrently.
    pub fn is_parallelizable(&self) -> bool {
        self.is_read_only()
    }
}

impl std::fmt::Display for CapabilityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadOnly => write!(f, "read_only"),
            Self::FileWrite => write!(f, "file_write"),
            Self::ProcessExecute => write!(f, "process_execute"),
            Self::NetworkAccess => write!(f, "network_access"),
        }
    }
}

/// How a tool call cleared (or failed) the approval gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    AutoAllowed,
    UserApproved,
    UserApprovedForSession,
    UserDenied,
}

impl ApprovalDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::UserDenied)
    }
}

/// Tool-level failure taxonomy.
///
/// Every variant is recovered locally: it becomes a structured error result
/// fed back to the model on the next wave, never a turn failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolErrorKind {
    #[error("unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("approval denied: {reason}")]
    ApprovalDenied { reason: String },

    /// The sandbox backend blocked the action. Kept distinct from
    /// [`ToolErrorKind::Execution`] so `OnFailure` escalation can offer an
    /// unsandboxed retry.
    #[error("sandbox restriction violated: {message}")]
    SandboxViolation { message: String },

    #[error("tool execution failed: {message}")]
    Execution { message: String },

    #[error("tool timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("tool interrupted by cancellation")]
    Interrupted,
}

impl ToolErrorKind {
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }

    pub fn is_sandbox_violation(&self) -> bool {
        matches!(self, Self::SandboxViolation { .. })
    }
}

/// One requested tool call and its outcome.
///
/// Created when the model emits a call, completed by the orchestrator,
/// never mutated afterwards.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub call_id: String,
    pub tool: String,
    pub args: serde_json::Value,
    /// Model-signaled escalation flag, consulted by the `OnRequest` policy.
    #[serde(default)]
    pub escalated: bool,
    /// Resolved at orchestration time; `None` for unknown tools.
    pub class: Option<CapabilityClass>,
    pub approval: Option<ApprovalDecision>,
    pub outcome: Option<Result<String, ToolErrorKind>>,
    pub duration: Option<Duration>,
}

impl ToolInvocation {
    pub fn requested(
        call_id: impl Into<String>,
        tool: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool: tool.into(),
            args,
            escalated: false,
            class: None,
            approval: None,
            outcome: None,
            duration: None,
        }
    }

    pub fn with_escalation(mut self, escalated: bool) -> Self {
        self.escalated = escalated;
        self
    }

    pub fn is_completed(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Some(Err(_)))
    }

    /// The text surfaced to the model as the tool result.
    pub fn result_text(&self) -> String {
        match &self.outcome {
            Some(Ok(output)) => output.clone(),
            Some(Err(kind)) => format!("error: {}", kind),
            None => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_class() {
        assert!(CapabilityClass::ReadOnly.is_parallelizable());
        assert!(!CapabilityClass::FileWrite.is_parallelizable());
        assert!(!CapabilityClass::ProcessExecute.is_parallelizable());
        assert!(!CapabilityClass::NetworkAccess.is_parallelizable());
    }

    #[test]
    fn test_approval_decision() {
        assert!(ApprovalDecision::AutoAllowed.is_allowed());
        assert!(ApprovalDecision::UserApprovedForSession.is_allowed());
        assert!(!ApprovalDecision::UserDenied.is_allowed());
    }

    #[test]
    fn test_invocation_lifecycle() {
        let mut call =
            ToolInvocation::requested("call_1", "read_file", serde_json::json!({"path": "x"}));
        assert!(!call.is_completed());

        call.class = Some(CapabilityClass::ReadOnly);
        call.approval = Some(ApprovalDecision::AutoAllowed);
        call.outcome = Some(Ok("contents".into()));
        assert!(call.is_completed());
        assert!(!call.is_error());
        assert_eq!(call.result_text(), "contents");
    }

    #[test]
    fn test_error_result_text() {
        let mut call = ToolInvocation::requested("call_2", "nope", serde_json::json!({}));
        call.outcome = Some(Err(ToolErrorKind::UnknownTool {
            name: "nope".into(),
        }));
        assert!(call.is_error());
        assert!(call.result_text().contains("unknown tool"));
    }

    #[test]
    fn test_tool_error_serde_round_trip() {
        let kind = ToolErrorKind::Timeout {
            timeout: Duration::from_secs(30),
        };
        let json = serde_json::to_string(&kind).unwrap();
        let parsed: ToolErrorKind = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, kind);
    }
}
