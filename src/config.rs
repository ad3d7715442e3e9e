//! Runtime configuration.
//!
//! Fully resolved before the runtime starts; configuration loading and CLI
//! parsing live with the embedding application.

use std::time::Duration;

use crate::approval::ApprovalPolicy;
use crate::sandbox::SandboxPolicy;

/// Which model the session is bound to.
#[derive(Debug, Clone)]
pub struct ModelBinding {
    pub model: String,
    /// Context window in tokens, used by the compaction threshold.
    pub context_window: u64,
}

impl Default for ModelBinding {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            context_window: 200_000,
        }
    }
}

impl ModelBinding {
    pub fn new(model: impl Into<String>, context_window: u64) -> Self {
        Self {
            model: model.into(),
            context_window,
        }
    }
}

/// Per-call and per-turn deadlines.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Deadline for a single read-only tool call.
    pub read_call: Duration,
    /// Deadline for a single side-effecting tool call (writes, execs, network).
    pub side_effect_call: Duration,
    /// Wall-clock bound across all waves of one turn.
    pub turn: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            read_call: Duration::from_secs(30),
            side_effect_call: Duration::from_secs(120),
            turn: Duration::from_secs(600),
        }
    }
}

impl TimeoutConfig {
    pub fn for_class(&self, read_only: bool) -> Duration {
        if read_only {
            self.read_call
        } else {
            self.side_effect_call
        }
    }
}

/// Transport retry budget for the model stream.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts per wave before the turn fails.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
        }
    }
}

/// Context compaction tuning.
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    pub enabled: bool,
    /// Fraction of the context window that triggers compaction.
    pub threshold: f32,
    /// Most recent turns never summarized away.
    pub keep_recent_turns: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.9,
            keep_recent_turns: 5,
        }
    }
}

/// Tool output capture bounds. Output beyond the bound is cut with an
/// explicit "...N more lines omitted" marker, never silently.
#[derive(Debug, Clone)]
pub struct TruncationConfig {
    pub max_lines: usize,
    pub max_bytes: usize,
}

impl Default for TruncationConfig {
    fn default() -> Self {
        Self {
            max_lines: 256,
            max_bytes: 64 * 1024,
        }
    }
}

/// Fully-resolved runtime configuration for one session.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub model: ModelBinding,
    pub approval_policy: ApprovalPolicy,
    pub sandbox: SandboxPolicy,
    pub timeouts: TimeoutConfig,
    pub retry: RetryConfig,
    pub compaction: CompactionConfig,
    pub truncation: TruncationConfig,
    /// Ceiling on model round-trips per turn; hitting it finalizes the turn
    /// with the text accumulated so far.
    pub max_waves: usize,
    /// When true, every Ask goes back to the gate even after a denial for
    /// the same (tool, class) pair earlier in the batch.
    pub reask_after_denial: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            model: ModelBinding::default(),
            approval_policy: ApprovalPolicy::default(),
            sandbox: SandboxPolicy::default(),
            timeouts: TimeoutConfig::default(),
            retry: RetryConfig::default(),
            compaction: CompactionConfig::default(),
            truncation: TruncationConfig::default(),
            max_waves: 32,
            reask_after_denial: false,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: ModelBinding) -> Self {
        self.model = model;
        self
    }

    pub fn with_approval_policy(mut self, policy: ApprovalPolicy) -> Self {
        self.approval_policy = policy;
        self
    }

    pub fn with_sandbox(mut self, sandbox: SandboxPolicy) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_compaction(mut self, compaction: CompactionConfig) -> Self {
        self.compaction = compaction;
        self
    }

    pub fn with_truncation(mut self, truncation: TruncationConfig) -> Self {
        self.truncation = truncation;
        self
    }

    pub fn with_max_waves(mut self, max_waves: usize) -> Self {
        self.max_waves = max_waves.max(1);
        self
    }

    pub fn with_reask_after_denial(mut self, reask: bool) -> Self {
        self.reask_after_denial = reask;
        self
    }

    /// Token count at which compaction triggers.
    pub fn compaction_trigger(&self) -> u64 {
        (self.model.context_window as f32 * self.compaction.threshold) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::new();
        assert_eq!(config.max_waves, 32);
        assert_eq!(config.compaction.keep_recent_turns, 5);
        assert!((config.compaction.threshold - 0.9).abs() < f32::EPSILON);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(!config.reask_after_denial);
    }

    #[test]
    fn test_compaction_trigger() {
        let config = RuntimeConfig::new().with_model(ModelBinding::new("m", 100_000));
        assert_eq!(config.compaction_trigger(), 90_000);
    }

    #[test]
    fn test_timeout_per_class() {
        let timeouts = TimeoutConfig::default();
        assert_eq!(timeouts.for_class(true), timeouts.read_call);
        assert_eq!(timeouts.for_class(false), timeouts.side_effect_call);
        assert!(timeouts.read_call < timeouts.side_effect_call);
    }

    #[test]
    fn test_builder_chaining() {
        let config = RuntimeConfig::new()
            .with_approval_policy(ApprovalPolicy::Never)
            .with_max_waves(0)
            .with_reask_after_denial(true);
        assert_eq!(config.approval_policy, ApprovalPolicy::Never);
        assert_eq!(config.max_waves, 1);
        assert!(config.reask_after_denial);
    }
}
