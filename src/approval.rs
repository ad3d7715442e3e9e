//! Approval policy evaluation.
//!
//! The engine is a pure decision function over (policy, capability class,
//! session approvals, whitelist); the only mutable state it touches is the
//! session-scoped approval log, and only the conversation manager's single
//! owner ever updates that, between sequential orchestrator steps.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::CapabilityClass;

/// When a capability requires explicit user confirmation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalPolicy {
    /// Never ask. Everything is auto-allowed except deny-list entries.
    Never,
    /// Auto-allow only reads and whitelisted safe commands; ask for the rest.
    #[default]
    Untrusted,
    /// Auto-allow inside the sandbox; ask only when the sandboxed attempt
    /// fails on a restriction, offering an unsandboxed retry.
    OnFailure,
    /// The model's escalation flag decides ask vs auto-allow for
    /// side-effecting classes.
    OnRequest,
}

impl std::fmt::Display for ApprovalPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Never => write!(f, "never"),
            Self::Untrusted => write!(f, "untrusted"),
            Self::OnFailure => write!(f, "on-failure"),
            Self::OnRequest => write!(f, "on-request"),
        }
    }
}

impl std::str::FromStr for ApprovalPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "never" => Ok(Self::Never),
            "untrusted" => Ok(Self::Untrusted),
            "on-failure" | "on_failure" | "onfailure" => Ok(Self::OnFailure),
            "on-request" | "on_request" | "onrequest" => Ok(Self::OnRequest),
            _ => Err(format!("unknown approval policy: {}", s)),
        }
    }
}

/// Outcome of evaluating one call against the policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalVerdict {
    AutoAllow,
    Ask,
    Deny,
}

/// What the approval UI callback answered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateResponse {
    Allow,
    AllowForSession,
    Deny,
}

/// One call presented to the engine (and, on Ask, to the gate).
#[derive(Clone, Debug)]
pub struct ApprovalRequest {
    pub tool: String,
    pub class: CapabilityClass,
    /// Command string for process-execute tools, used for whitelist matching.
    pub command: Option<String>,
    /// Model-signaled escalation flag (`OnRequest` policy).
    pub escalated: bool,
}

/// Collaborator that can put an Ask in front of the user.
///
/// Invoked only when [`ApprovalEngine::evaluate`] returns
/// [`ApprovalVerdict::Ask`].
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn request_approval(&self, request: ApprovalRequest) -> GateResponse;
}

/// Gate with a fixed answer, for headless embedding and tests.
pub struct StaticGate {
    response: GateResponse,
}

impl StaticGate {
    pub fn new(response: GateResponse) -> Self {
        Self { response }
    }

    pub fn deny_all() -> Self {
        Self::new(GateResponse::Deny)
    }
}

#[async_trait]
impl ApprovalGate for StaticGate {
    async fn request_approval(&self, _request: ApprovalRequest) -> GateResponse {
        self.response
    }
}

/// Append-only log of session-scoped approvals, keyed by
/// `(tool, capability class)`. Never persisted beyond the session.
#[derive(Clone, Debug, Default)]
pub struct SessionApprovals {
    entries: Vec<(String, CapabilityClass)>,
}

impl SessionApprovals {
    pub fn contains(&self, tool: &str, class: CapabilityClass) -> bool {
        self.entries
            .iter()
            .any(|(name, entry_class)| name == tool && *entry_class == class)
    }

    pub fn record(&mut self, tool: impl Into<String>, class: CapabilityClass) {
        let tool = tool.into();
        if !self.contains(&tool, class) {
            self.entries.push((tool, class));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Static whitelist of commands safe to auto-allow under `Untrusted`.
#[derive(Clone, Debug)]
pub struct SafeCommands {
    patterns: Vec<Regex>,
}

impl SafeCommands {
    /// Read-only inspection commands that cannot mutate the workspace.
    pub fn defaults() -> Self {
        let patterns = [
            r"^cat(\s|$)",
            r"^ls(\s|$)",
            r"^pwd$",
            r"^echo(\s|$)",
            r"^head(\s|$)",
            r"^tail(\s|$)",
            r"^wc(\s|$)",
            r"^grep(\s|$)",
            r"^rg(\s|$)",
            r"^find\s+\S+\s+-name(\s|$)",
            r"^git\s+(status|log|diff|show|branch)(\s|$)",
            r"^which(\s|$)",
        ];
        Self {
            patterns: patterns
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
        }
    }

    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    pub fn with_pattern(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.patterns.push(Regex::new(pattern)?);
        Ok(self)
    }

    pub fn matches(&self, command: &str) -> bool {
        let trimmed = command.trim();
        self.patterns.iter().any(|p| p.is_match(trimmed))
    }
}

impl Default for SafeCommands {
    fn default() -> Self {
        Self::defaults()
    }
}

/// Pure decision function for the approval flow.
#[derive(Clone, Debug)]
pub struct ApprovalEngine {
    policy: ApprovalPolicy,
    safe_commands: SafeCommands,
    /// Fatal deny-list, never bypassed by any policy.
    deny_list: Vec<String>,
}

impl ApprovalEngine {
    pub fn new(policy: ApprovalPolicy) -> Self {
        Self {
            policy,
            safe_commands: SafeCommands::defaults(),
            deny_list: Vec::new(),
        }
    }

    pub fn with_safe_commands(mut self, safe_commands: SafeCommands) -> Self {
        self.safe_commands = safe_commands;
        self
    }

    pub fn with_deny_list(mut self, tools: Vec<String>) -> Self {
        self.deny_list = tools;
        self
    }

    pub fn policy(&self) -> ApprovalPolicy {
        self.policy
    }

    fn is_deny_listed(&self, tool: &str) -> bool {
        self.deny_list.iter().any(|entry| entry == tool)
    }

    fn is_whitelisted(&self, request: &ApprovalRequest) -> bool {
        request
            .command
            .as_deref()
            .is_some_and(|command| self.safe_commands.matches(command))
    }

    /// Decide auto-allow / ask / deny for one call.
    pub fn evaluate(
        &self,
        request: &ApprovalRequest,
        approvals: &SessionApprovals,
    ) -> ApprovalVerdict {
        if self.is_deny_listed(&request.tool) {
            return ApprovalVerdict::Deny;
        }

        if approvals.contains(&request.tool, request.class) {
            return ApprovalVerdict::AutoAllow;
        }

        match self.policy {
            ApprovalPolicy::Never => ApprovalVerdict::AutoAllow,
            ApprovalPolicy::Untrusted => {
                if request.class.is_read_only() || self.is_whitelisted(request) {
                    ApprovalVerdict::AutoAllow
                } else {
                    ApprovalVerdict::Ask
                }
            }
            // The sandboxed attempt runs unprompted; escalation to Ask
            // happens at the orchestrator when the sandbox reports a
            // restriction violation.
            ApprovalPolicy::OnFailure => ApprovalVerdict::AutoAllow,
            ApprovalPolicy::OnRequest => {
                if request.class.is_read_only() || !request.escalated {
                    ApprovalVerdict::AutoAllow
                } else {
                    ApprovalVerdict::Ask
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(tool: &str, class: CapabilityClass) -> ApprovalRequest {
        ApprovalRequest {
            tool: tool.to_string(),
            class,
            command: None,
            escalated: false,
        }
    }

    #[test]
    fn test_never_policy_auto_allows() {
        let engine = ApprovalEngine::new(ApprovalPolicy::Never);
        let approvals = SessionApprovals::default();

        for class in [
            CapabilityClass::ReadOnly,
            CapabilityClass::FileWrite,
            CapabilityClass::ProcessExecute,
            CapabilityClass::NetworkAccess,
        ] {
            assert_eq!(
                engine.evaluate(&request("t", class), &approvals),
                ApprovalVerdict::AutoAllow
            );
        }
    }

    #[test]
    fn test_deny_list_is_never_bypassed() {
        let engine = ApprovalEngine::new(ApprovalPolicy::Never)
            .with_deny_list(vec!["rm_everything".into()]);
        let mut approvals = SessionApprovals::default();
        approvals.record("rm_everything", CapabilityClass::ProcessExecute);

        assert_eq!(
            engine.evaluate(
                &request("rm_everything", CapabilityClass::ProcessExecute),
                &approvals
            ),
            ApprovalVerdict::Deny
        );
    }

    #[test]
    fn test_untrusted_asks_for_writes() {
        let engine = ApprovalEngine::new(ApprovalPolicy::Untrusted);
        let approvals = SessionApprovals::default();

        assert_eq!(
            engine.evaluate(&request("read_file", CapabilityClass::ReadOnly), &approvals),
            ApprovalVerdict::AutoAllow
        );
        assert_eq!(
            engine.evaluate(
                &request("delete_file", CapabilityClass::FileWrite),
                &approvals
            ),
            ApprovalVerdict::Ask
        );
    }

    #[test]
    fn test_untrusted_whitelisted_command() {
        let engine = ApprovalEngine::new(ApprovalPolicy::Untrusted);
        let approvals = SessionApprovals::default();

        let mut req = request("run_command", CapabilityClass::ProcessExecute);
        req.command = Some("git status".into());
        assert_eq!(
            engine.evaluate(&req, &approvals),
            ApprovalVerdict::AutoAllow
        );

        req.command = Some("git push --force".into());
        assert_eq!(engine.evaluate(&req, &approvals), ApprovalVerdict::Ask);
    }

    #[test]
    fn test_on_request_honors_escalation_flag() {
        let engine = ApprovalEngine::new(ApprovalPolicy::OnRequest);
        let approvals = SessionApprovals::default();

        let plain = request("run_command", CapabilityClass::ProcessExecute);
        assert_eq!(
            engine.evaluate(&plain, &approvals),
            ApprovalVerdict::AutoAllow
        );

        let mut escalated = request("run_command", CapabilityClass::ProcessExecute);
        escalated.escalated = true;
        assert_eq!(engine.evaluate(&escalated, &approvals), ApprovalVerdict::Ask);

        let mut escalated_read = request("read_file", CapabilityClass::ReadOnly);
        escalated_read.escalated = true;
        assert_eq!(
            engine.evaluate(&escalated_read, &approvals),
            ApprovalVerdict::AutoAllow
        );
    }

    #[test]
    fn test_session_approval_short_circuits_ask() {
        let engine = ApprovalEngine::new(ApprovalPolicy::Untrusted);
        let mut approvals = SessionApprovals::default();
        let req = request("delete_file", CapabilityClass::FileWrite);

        assert_eq!(engine.evaluate(&req, &approvals), ApprovalVerdict::Ask);

        approvals.record("delete_file", CapabilityClass::FileWrite);
        assert_eq!(
            engine.evaluate(&req, &approvals),
            ApprovalVerdict::AutoAllow
        );
    }

    #[test]
    fn test_session_approvals_keyed_by_class() {
        let mut approvals = SessionApprovals::default();
        approvals.record("tool", CapabilityClass::FileWrite);

        assert!(approvals.contains("tool", CapabilityClass::FileWrite));
        assert!(!approvals.contains("tool", CapabilityClass::ProcessExecute));

        approvals.record("tool", CapabilityClass::FileWrite);
        assert_eq!(approvals.len(), 1);
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!(
            "on-failure".parse::<ApprovalPolicy>().unwrap(),
            ApprovalPolicy::OnFailure
        );
        assert_eq!(
            "never".parse::<ApprovalPolicy>().unwrap(),
            ApprovalPolicy::Never
        );
        assert!("sometimes".parse::<ApprovalPolicy>().is_err());
    }

    #[test]
    fn test_safe_commands_defaults() {
        let safe = SafeCommands::defaults();
        assert!(safe.matches("ls -la"));
        assert!(safe.matches("git log --oneline"));
        assert!(!safe.matches("rm -rf /"));
        assert!(!safe.matches("git push"));
    }
}
