//! Tool orchestration: approval, confinement, scheduling, capture.
//!
//! One batch is every call the model emitted in a single turn wave. Reads
//! run concurrently; everything else runs strictly one at a time in the
//! order the model emitted it, so no write observes another's partial state.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::approval::{
    ApprovalEngine, ApprovalGate, ApprovalPolicy, ApprovalRequest, ApprovalVerdict, GateResponse,
    SessionApprovals,
};
use crate::config::{RuntimeConfig, TimeoutConfig, TruncationConfig};
use crate::events::EventSink;
use crate::sandbox::{Confinement, SandboxBackend, SandboxError};
use crate::tools::{ExecutionContext, ToolRegistry};
use crate::types::{
    ApprovalDecision, CapabilityClass, RuntimeEvent, ToolErrorKind, ToolInvocation,
};

/// Executes the pending calls of one model wave.
pub struct ToolOrchestrator {
    registry: Arc<ToolRegistry>,
    engine: ApprovalEngine,
    gate: Arc<dyn ApprovalGate>,
    sandbox: Arc<dyn SandboxBackend>,
    sink: Arc<dyn EventSink>,
    timeouts: TimeoutConfig,
    truncation: TruncationConfig,
    reask_after_denial: bool,
}

impl ToolOrchestrator {
    pub fn new(
        config: &RuntimeConfig,
        registry: Arc<ToolRegistry>,
        engine: ApprovalEngine,
        gate: Arc<dyn ApprovalGate>,
        sandbox: Arc<dyn SandboxBackend>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            registry,
            engine,
            gate,
            sandbox,
            sink,
            timeouts: config.timeouts.clone(),
            truncation: config.truncation.clone(),
            reask_after_denial: config.reask_after_denial,
        }
    }

    /// Execute a batch, returning it completed, same length and order.
    ///
    /// Every call gets a result or an error; tool-level failures never
    /// escape as turn failures.
    pub async fn execute(
        &self,
        turn_id: &str,
        calls: Vec<ToolInvocation>,
        approvals: &mut SessionApprovals,
        cancel: &CancellationToken,
    ) -> Vec<ToolInvocation> {
        for call in &calls {
            self.sink.emit(RuntimeEvent::ToolInvocationStarted {
                turn_id: turn_id.to_string(),
                call_id: call.call_id.clone(),
                tool: call.tool.clone(),
                class: self.registry.class_of(&call.tool),
            });
        }

        // Approval resolution is sequential in model order; it is the only
        // place the session approval log is consulted or extended.
        let mut denied_in_batch: Vec<(String, CapabilityClass)> = Vec::new();
        let mut slots: Vec<Option<ToolInvocation>> = Vec::with_capacity(calls.len());
        let mut runnable: Vec<(usize, ToolInvocation)> = Vec::new();

        for (index, mut call) in calls.into_iter().enumerate() {
            let Some(class) = self.registry.class_of(&call.tool) else {
                call.outcome = Some(Err(ToolErrorKind::UnknownTool {
                    name: call.tool.clone(),
                }));
                self.emit_completed(turn_id, &call, 0);
                slots.push(Some(call));
                continue;
            };
            call.class = Some(class);

            match self.resolve_approval(&call, class, approvals, &mut denied_in_batch).await {
                Ok(decision) => {
                    call.approval = Some(decision);
                    slots.push(None);
                    runnable.push((index, call));
                }
                Err(denied) => {
                    call.approval = Some(ApprovalDecision::UserDenied);
                    call.outcome = Some(Err(denied));
                    self.emit_completed(turn_id, &call, 0);
                    slots.push(Some(call));
                }
            }
        }

        let (reads, serial): (Vec<_>, Vec<_>) = runnable
            .into_iter()
            .partition(|(_, call)| call.class.is_some_and(|c| c.is_parallelizable()));

        // All reads in the batch run concurrently; wall clock tracks the
        // slowest call, not the sum.
        let read_results = join_all(reads.into_iter().map(|(index, call)| async move {
            let completed = self.run_one(turn_id, call, cancel).await;
            (index, completed)
        }))
        .await;
        for (index, completed) in read_results {
            slots[index] = Some(completed);
        }

        // Side-effecting calls execute one at a time, in model order.
        for (index, call) in serial {
            let completed = self
                .run_serial(turn_id, call, approvals, cancel)
                .await;
            slots[index] = Some(completed);
        }

        slots
            .into_iter()
            .map(|slot| slot.expect("every call slot is filled"))
            .collect()
    }

    async fn resolve_approval(
        &self,
        call: &ToolInvocation,
        class: CapabilityClass,
        approvals: &mut SessionApprovals,
        denied_in_batch: &mut Vec<(String, CapabilityClass)>,
    ) -> Result<ApprovalDecision, ToolErrorKind> {
        let request = self.approval_request(call, class);

        match self.engine.evaluate(&request, approvals) {
            ApprovalVerdict::AutoAllow => Ok(ApprovalDecision::AutoAllowed),
            ApprovalVerdict::Deny => Err(ToolErrorKind::ApprovalDenied {
                reason: format!("tool '{}' is deny-listed", call.tool),
            }),
            ApprovalVerdict::Ask => {
                let key = (call.tool.clone(), class);
                if !self.reask_after_denial && denied_in_batch.contains(&key) {
                    return Err(ToolErrorKind::ApprovalDenied {
                        reason: "denied earlier in this batch".to_string(),
                    });
                }

                match self.gate.request_approval(request).await {
                    GateResponse::Allow => Ok(ApprovalDecision::UserApproved),
                    GateResponse::AllowForSession => {
                        approvals.record(&call.tool, class);
                        Ok(ApprovalDecision::UserApprovedForSession)
                    }
                    GateResponse::Deny => {
                        denied_in_batch.push(key);
                        Err(ToolErrorKind::ApprovalDenied {
                            reason: "denied by user".to_string(),
                        })
                    }
                }
            }
        }
    }

    fn approval_request(&self, call: &ToolInvocation, class: CapabilityClass) -> ApprovalRequest {
        ApprovalRequest {
            tool: call.tool.clone(),
            class,
            command: call
                .args
                .get("command")
                .and_then(|v| v.as_str())
                .map(String::from),
            escalated: call.escalated,
        }
    }

    /// Run one serialized call, escalating a sandbox violation to the gate
    /// under the `OnFailure` policy with an unsandboxed retry on approval.
    async fn run_serial(
        &self,
        turn_id: &str,
        call: ToolInvocation,
        approvals: &mut SessionApprovals,
        cancel: &CancellationToken,
    ) -> ToolInvocation {
        let mut completed = self.run_one(turn_id, call, cancel).await;

        let violated = matches!(&completed.outcome, Some(Err(kind)) if kind.is_sandbox_violation());
        if !violated || self.engine.policy() != ApprovalPolicy::OnFailure {
            return completed;
        }

        let Some(class) = completed.class else {
            return completed;
        };

        debug!(tool = %completed.tool, "sandbox violation, offering unsandboxed retry");
        let request = self.approval_request(&completed, class);
        match self.gate.request_approval(request).await {
            GateResponse::Deny => completed,
            response => {
                if response == GateResponse::AllowForSession {
                    approvals.record(&completed.tool, class);
                    completed.approval = Some(ApprovalDecision::UserApprovedForSession);
                } else {
                    completed.approval = Some(ApprovalDecision::UserApproved);
                }
                let mut retry = completed.clone();
                retry.outcome = None;
                retry.duration = None;
                self.run_confined(turn_id, retry, cancel, Confinement::unrestricted())
                    .await
            }
        }
    }

    async fn run_one(
        &self,
        turn_id: &str,
        call: ToolInvocation,
        cancel: &CancellationToken,
    ) -> ToolInvocation {
        let confinement = match call.class {
            Some(class) => match self.sandbox.restrict(class) {
                Ok(confinement) => confinement,
                Err(SandboxError::Unavailable(reason)) => {
                    warn!(tool = %call.tool, %reason, "sandbox unavailable, running unrestricted");
                    Confinement::unrestricted()
                }
                Err(violation) => {
                    let mut call = call;
                    call.outcome = Some(Err(ToolErrorKind::SandboxViolation {
                        message: violation.to_string(),
                    }));
                    self.emit_completed(turn_id, &call, 0);
                    return call;
                }
            },
            None => Confinement::unrestricted(),
        };
        self.run_confined(turn_id, call, cancel, confinement).await
    }

    async fn run_confined(
        &self,
        turn_id: &str,
        mut call: ToolInvocation,
        cancel: &CancellationToken,
        confinement: Confinement,
    ) -> ToolInvocation {
        let Some(registered) = self.registry.get(&call.tool) else {
            call.outcome = Some(Err(ToolErrorKind::UnknownTool {
                name: call.tool.clone(),
            }));
            self.emit_completed(turn_id, &call, 0);
            return call;
        };
        let handler = Arc::clone(&registered.handler);

        let read_only = call.class.is_some_and(|c| c.is_read_only());
        let timeout = self.timeouts.for_class(read_only);
        let child = cancel.child_token();
        let ctx = ExecutionContext::new(child.clone(), Instant::now() + timeout, confinement);

        let start = Instant::now();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                child.cancel();
                Err(ToolErrorKind::Interrupted)
            }
            result = tokio::time::timeout(timeout, handler.run(call.args.clone(), &ctx)) => {
                match result {
                    Ok(Ok(output)) => Ok(truncate_output(output, &self.truncation)),
                    Ok(Err(kind)) => Err(kind),
                    Err(_) => {
                        // Deadline hit: ask the handler to stop and record
                        // the timeout as the call's result.
                        child.cancel();
                        Err(ToolErrorKind::Timeout { timeout })
                    }
                }
            }
        };
        let duration = start.elapsed();

        call.outcome = Some(outcome);
        call.duration = Some(duration);
        self.emit_completed(turn_id, &call, duration.as_millis() as u64);
        call
    }

    fn emit_completed(&self, turn_id: &str, call: &ToolInvocation, duration_ms: u64) {
        self.sink.emit(RuntimeEvent::ToolInvocationCompleted {
            turn_id: turn_id.to_string(),
            call_id: call.call_id.clone(),
            tool: call.tool.clone(),
            is_error: call.is_error(),
            duration_ms,
        });
    }
}

/// Bound captured output by lines and bytes, marking anything cut.
pub(crate) fn truncate_output(output: String, config: &TruncationConfig) -> String {
    let total_lines = output.lines().count();
    if total_lines <= config.max_lines && output.len() <= config.max_bytes {
        return output;
    }

    let mut kept = String::new();
    let mut kept_lines = 0;
    for line in output.lines() {
        if kept_lines >= config.max_lines || kept.len() + line.len() + 1 > config.max_bytes {
            break;
        }
        if kept_lines > 0 {
            kept.push('\n');
        }
        kept.push_str(line);
        kept_lines += 1;
    }

    let omitted = total_lines.saturating_sub(kept_lines);
    kept.push_str(&format!("\n...{} more lines omitted", omitted.max(1)));
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TruncationConfig;

    #[test]
    fn test_truncate_noop_under_limits() {
        let config = TruncationConfig::default();
        let output = "short output".to_string();
        assert_eq!(truncate_output(output.clone(), &config), output);
    }

    #[test]
    fn test_truncate_by_lines_marks_omission() {
        let config = TruncationConfig {
            max_lines: 3,
            max_bytes: 1024,
        };
        let output = (0..10)
            .map(|i| format!("line {}", i))
            .collect::<Vec<_>>()
            .join("\n");

        let truncated = truncate_output(output, &config);
        assert!(truncated.starts_with("line 0\nline 1\nline 2"));
        assert!(truncated.ends_with("...7 more lines omitted"));
    }

    #[test]
    fn test_truncate_by_bytes_marks_omission() {
        let config = TruncationConfig {
            max_lines: 100,
            max_bytes: 20,
        };
        let output = "aaaaaaaaaa\nbbbbbbbbbb\ncccccccccc".to_string();

        let truncated = truncate_output(output, &config);
        assert!(truncated.contains("more lines omitted"));
        assert!(truncated.starts_with("aaaaaaaaaa"));
    }
}
