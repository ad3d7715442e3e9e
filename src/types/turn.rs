//! Turn lifecycle types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::invocation::ToolInvocation;
use super::usage::TokenUsage;

/// State machine position of one user-message cycle.
///
/// `Created → Streaming → {ToolsPending → ToolsExecuting → Streaming}* →
/// Finalizing → {Completed | Failed | Cancelled}`. Once terminal, the turn
/// becomes immutable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    #[default]
    Created,
    Streaming,
    ToolsPending,
    ToolsExecuting,
    Finalizing,
    Completed,
    Failed,
    Cancelled,
}

impl TurnState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

/// What kind of history entry a turn is.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    /// A real user-message cycle.
    #[default]
    User,
    /// A synthetic turn holding a compaction summary of older turns.
    Summary,
}

/// Per-tool execution counters.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ToolStats {
    pub calls: usize,
    pub total_time_ms: u64,
    pub errors: usize,
}

/// Counters accumulated while a turn runs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TurnMetrics {
    /// Model round-trips within the turn (one per streamed response).
    pub waves: usize,
    pub tool_calls: usize,
    pub tool_errors: usize,
    /// Transport retries consumed across all waves.
    pub retries: u32,
    pub execution_time_ms: u64,
    pub tool_stats: HashMap<String, ToolStats>,
}

impl TurnMetrics {
    pub fn record_tool(&mut self, name: &str, duration_ms: u64, is_error: bool) {
        self.tool_calls += 1;
        let stats = self.tool_stats.entry(name.to_string()).or_default();
        stats.calls += 1;
        stats.total_time_ms += duration_ms;
        if is_error {
            stats.errors += 1;
            self.tool_errors += 1;
        }
    }
}

/// One user-message cycle: input, accumulated assistant text, the tool calls
/// it triggered, and token accounting.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub kind: TurnKind,
    pub input: String,
    pub text: String,
    pub invocations: Vec<ToolInvocation>,
    pub state: TurnState,
    pub usage: TokenUsage,
    pub metrics: TurnMetrics,
    /// Last error kind, surfaced only for `Failed` turns.
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Turn {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: TurnKind::User,
            input: input.into(),
            text: String::new(),
            invocations: Vec::new(),
            state: TurnState::Created,
            usage: TokenUsage::default(),
            metrics: TurnMetrics::default(),
            error: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// A synthetic turn carrying the summary that replaced a prefix of the
    /// history.
    pub fn summary(text: impl Into<String>) -> Self {
        let mut turn = Self::new("");
        turn.kind = TurnKind::Summary;
        turn.text = text.into();
        turn.state = TurnState::Completed;
        turn.ended_at = Some(Utc::now());
        turn
    }

    pub fn is_summary(&self) -> bool {
        self.kind == TurnKind::Summary
    }

    /// Approximate character weight of the turn, used for token estimation.
    pub fn char_weight(&self) -> usize {
        let invocation_chars: usize = self
            .invocations
            .iter()
            .map(|call| call.args.to_string().len() + call.result_text().len())
            .sum();
        self.input.len() + self.text.len() + invocation_chars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_state_terminal() {
        assert!(TurnState::Completed.is_terminal());
        assert!(TurnState::Failed.is_terminal());
        assert!(TurnState::Cancelled.is_terminal());
        assert!(!TurnState::Streaming.is_terminal());
        assert!(TurnState::ToolsExecuting.is_active());
    }

    #[test]
    fn test_summary_turn() {
        let turn = Turn::summary("earlier work: fixed the parser");
        assert!(turn.is_summary());
        assert_eq!(turn.state, TurnState::Completed);
        assert!(turn.input.is_empty());
    }

    #[test]
    fn test_metrics_tool_recording() {
        let mut metrics = TurnMetrics::default();
        metrics.record_tool("read_file", 50, false);
        metrics.record_tool("read_file", 30, false);
        metrics.record_tool("run_command", 100, true);

        assert_eq!(metrics.tool_calls, 3);
        assert_eq!(metrics.tool_errors, 1);
        assert_eq!(metrics.tool_stats.get("read_file").unwrap().calls, 2);
        assert_eq!(
            metrics.tool_stats.get("read_file").unwrap().total_time_ms,
            80
        );
        assert_eq!(metrics.tool_stats.get("run_command").unwrap().errors, 1);
    }

    #[test]
    fn test_char_weight_counts_invocations() {
        let mut turn = Turn::new("hello");
        assert_eq!(turn.char_weight(), 5);

        let mut call = crate::types::ToolInvocation::requested(
            "c1",
            "read_file",
            serde_json::json!({"path": "a"}),
        );
        call.outcome = Some(Ok("0123456789".into()));
        turn.invocations.push(call);
        assert!(turn.char_weight() > 15);
    }
}
