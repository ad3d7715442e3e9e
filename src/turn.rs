//! Turn state machine.
//!
//! Drives one user-message cycle: stream the model, collect the wave's tool
//! calls, execute them through the orchestrator, resume the model with the
//! results, repeat until the model ends its turn without tool calls.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::approval::SessionApprovals;
use crate::config::RuntimeConfig;
use crate::events::EventSink;
use crate::model::{ExponentialBackoff, ModelClient, ModelRequest};
use crate::orchestrator::ToolOrchestrator;
use crate::tools::ToolDefinition;
use crate::types::{ModelEvent, RuntimeEvent, StreamErrorKind, ToolInvocation, Turn, TurnState};

enum StreamFailure {
    Retryable(StreamErrorKind),
    Fatal(StreamErrorKind),
    Cancelled,
}

/// Runs one turn to a terminal state. Owned by the turn driver task; the
/// only writer of the turn while it is active.
pub(crate) struct TurnRunner {
    model: Arc<dyn ModelClient>,
    orchestrator: Arc<ToolOrchestrator>,
    sink: Arc<dyn EventSink>,
    config: Arc<RuntimeConfig>,
    system_prompt: String,
    tools: Vec<ToolDefinition>,
    cancel: CancellationToken,
}

impl TurnRunner {
    pub(crate) fn new(
        model: Arc<dyn ModelClient>,
        orchestrator: Arc<ToolOrchestrator>,
        sink: Arc<dyn EventSink>,
        config: Arc<RuntimeConfig>,
        system_prompt: String,
        tools: Vec<ToolDefinition>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            model,
            orchestrator,
            sink,
            config,
            system_prompt,
            tools,
            cancel,
        }
    }

    /// Drive the turn until the model finishes without tool calls.
    ///
    /// `Ok(())` leaves the turn `Completed`; errors leave state handling to
    /// the caller (`Cancelled` discards, transport exhaustion fails).
    pub(crate) async fn run(
        &self,
        history: &[Turn],
        turn: &mut Turn,
        approvals: &mut SessionApprovals,
    ) -> crate::Result<()> {
        let started = Instant::now();
        let backoff = ExponentialBackoff::from_retry_config(&self.config.retry);

        turn.state = TurnState::Streaming;
        info!(turn_id = %turn.id, "turn started");

        loop {
            turn.metrics.waves += 1;
            if turn.metrics.waves > self.config.max_waves {
                warn!(turn_id = %turn.id, max = self.config.max_waves, "max waves reached");
                break;
            }

            let request = ModelRequest::assemble(
                self.system_prompt.clone(),
                history,
                turn,
                self.tools.clone(),
            );
            let pending = self.stream_wave(request, turn, &backoff).await?;

            if pending.is_empty() {
                debug!(turn_id = %turn.id, "no tool calls pending, finalizing");
                break;
            }

            // The whole pending set is handed over atomically; the
            // orchestrator owns scheduling within the wave.
            turn.state = TurnState::ToolsPending;
            debug!(turn_id = %turn.id, calls = pending.len(), "dispatching tool batch");
            turn.state = TurnState::ToolsExecuting;

            let completed = self
                .orchestrator
                .execute(&turn.id, pending, approvals, &self.cancel)
                .await;

            if self.cancel.is_cancelled() {
                return Err(crate::Error::Cancelled);
            }

            for call in &completed {
                let duration_ms = call.duration.map(|d| d.as_millis() as u64).unwrap_or(0);
                turn.metrics
                    .record_tool(&call.tool, duration_ms, call.is_error());
            }
            turn.invocations.extend(completed);
            turn.state = TurnState::Streaming;
        }

        turn.state = TurnState::Finalizing;
        turn.metrics.execution_time_ms = started.elapsed().as_millis() as u64;
        turn.ended_at = Some(chrono::Utc::now());
        turn.state = TurnState::Completed;

        info!(
            turn_id = %turn.id,
            waves = turn.metrics.waves,
            tool_calls = turn.metrics.tool_calls,
            total_tokens = turn.usage.total(),
            "turn completed"
        );
        Ok(())
    }

    /// Stream one wave, retrying transient transport failures with backoff.
    ///
    /// Text accumulated by a failed attempt is rolled back so a retry does
    /// not duplicate it; tool calls of a failed attempt are discarded with
    /// the attempt.
    async fn stream_wave(
        &self,
        request: ModelRequest,
        turn: &mut Turn,
        backoff: &ExponentialBackoff,
    ) -> crate::Result<Vec<ToolInvocation>> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let text_checkpoint = turn.text.len();

            match self.try_stream(&request, turn).await {
                Ok(pending) => {
                    turn.metrics.retries += attempt - 1;
                    return Ok(pending);
                }
                Err(StreamFailure::Cancelled) => return Err(crate::Error::Cancelled),
                Err(StreamFailure::Fatal(kind)) => {
                    return Err(crate::Error::Transport {
                        message: kind.to_string(),
                        attempts: attempt,
                    });
                }
                Err(StreamFailure::Retryable(kind)) => {
                    turn.text.truncate(text_checkpoint);
                    if attempt >= self.config.retry.max_attempts {
                        return Err(crate::Error::Transport {
                            message: kind.to_string(),
                            attempts: attempt,
                        });
                    }

                    let delay = backoff.delay_for(attempt);
                    warn!(
                        turn_id = %turn.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %kind,
                        "transient stream failure, retrying"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(crate::Error::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn try_stream(
        &self,
        request: &ModelRequest,
        turn: &mut Turn,
    ) -> std::result::Result<Vec<ToolInvocation>, StreamFailure> {
        let mut stream = match self.model.send(request.clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                return Err(StreamFailure::Retryable(StreamErrorKind::disconnected(
                    e.to_string(),
                )));
            }
        };

        let mut pending = Vec::new();
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => return Err(StreamFailure::Cancelled),
                event = stream.next() => event,
            };

            match event {
                Some(ModelEvent::TextDelta { delta }) => {
                    turn.text.push_str(&delta);
                    self.sink.emit(RuntimeEvent::TextDelta {
                        turn_id: turn.id.clone(),
                        delta,
                    });
                }
                Some(ModelEvent::ToolCallRequested(req)) => {
                    pending.push(
                        ToolInvocation::requested(req.call_id, req.tool, req.args)
                            .with_escalation(req.escalated),
                    );
                }
                Some(ModelEvent::Completed { usage }) => {
                    turn.usage.add(&usage);
                    return Ok(pending);
                }
                Some(ModelEvent::Error(kind)) => {
                    return Err(if kind.is_retryable() {
                        StreamFailure::Retryable(kind)
                    } else {
                        StreamFailure::Fatal(kind)
                    });
                }
                None => {
                    return Err(StreamFailure::Retryable(StreamErrorKind::disconnected(
                        "stream ended without completion",
                    )));
                }
            }
        }
    }
}
