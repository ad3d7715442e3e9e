//! Test doubles for embedding the runtime in tests: a scripted model
//! client, a recording approval gate, and a probe tool.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::approval::{ApprovalGate, ApprovalRequest, GateResponse};
use crate::model::{ModelClient, ModelEventStream, ModelRequest};
use crate::tools::{ExecutionContext, HandlerResult, ToolHandler};
use crate::types::{ModelEvent, StreamErrorKind, TokenUsage, ToolErrorKind};

/// Model client that replays scripted waves of events, one per `send`.
///
/// Once the script runs out, further calls complete immediately with no
/// content (so loops always terminate), unless built with [`erroring`],
/// which keeps failing instead.
///
/// [`erroring`]: ScriptedModel::erroring
pub struct ScriptedModel {
    waves: Mutex<VecDeque<Vec<ModelEvent>>>,
    fail_when_exhausted: bool,
}

impl ScriptedModel {
    pub fn new(waves: Vec<Vec<ModelEvent>>) -> Self {
        Self {
            waves: Mutex::new(waves.into_iter().collect()),
            fail_when_exhausted: false,
        }
    }

    /// One wave: emit `text` and complete.
    pub fn completing_with(text: impl Into<String>) -> Self {
        Self::new(vec![vec![
            ModelEvent::TextDelta { delta: text.into() },
            ModelEvent::Completed {
                usage: TokenUsage::new(10, 5),
            },
        ]])
    }

    /// Every call fails with a disconnect.
    pub fn erroring() -> Self {
        Self {
            waves: Mutex::new(VecDeque::new()),
            fail_when_exhausted: true,
        }
    }

    /// A wave ending in a mid-stream disconnect.
    pub fn disconnect_wave() -> Vec<ModelEvent> {
        vec![
            ModelEvent::TextDelta {
                delta: "partial ".into(),
            },
            ModelEvent::Error(StreamErrorKind::disconnected("connection reset")),
        ]
    }

    /// A wave emitting `text` then completing cleanly.
    pub fn text_wave(text: impl Into<String>) -> Vec<ModelEvent> {
        vec![
            ModelEvent::TextDelta { delta: text.into() },
            ModelEvent::Completed {
                usage: TokenUsage::new(10, 5),
            },
        ]
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn send(&self, _request: ModelRequest) -> crate::Result<ModelEventStream> {
        let wave = self.waves.lock().expect("script lock").pop_front();
        let events = match wave {
            Some(events) => events,
            None if self.fail_when_exhausted => vec![ModelEvent::Error(
                StreamErrorKind::disconnected("scripted failure"),
            )],
            None => vec![ModelEvent::Completed {
                usage: TokenUsage::default(),
            }],
        };
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

/// Gate that answers with a fixed response and records every request.
pub struct RecordingGate {
    response: GateResponse,
    requests: Mutex<Vec<ApprovalRequest>>,
}

impl RecordingGate {
    pub fn new(response: GateResponse) -> Self {
        Self {
            response,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("gate lock").len()
    }

    pub fn requests(&self) -> Vec<ApprovalRequest> {
        self.requests.lock().expect("gate lock").clone()
    }
}

#[async_trait]
impl ApprovalGate for RecordingGate {
    async fn request_approval(&self, request: ApprovalRequest) -> GateResponse {
        self.requests.lock().expect("gate lock").push(request);
        self.response
    }
}

/// Timing entry recorded by [`ProbeTool`].
#[derive(Clone, Debug)]
pub struct ProbeEntry {
    pub tool: String,
    pub started: Instant,
    pub finished: Instant,
}

pub type ProbeLog = Arc<Mutex<Vec<ProbeEntry>>>;

pub fn probe_log() -> ProbeLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Tool that sleeps for a configured delay and records when it ran.
/// Respects cancellation, so timeouts and turn cancellation interrupt it.
pub struct ProbeTool {
    name: String,
    delay: Duration,
    log: ProbeLog,
}

impl ProbeTool {
    pub fn new(name: impl Into<String>, delay: Duration, log: ProbeLog) -> Self {
        Self {
            name: name.into(),
            delay,
            log,
        }
    }
}

#[async_trait]
impl ToolHandler for ProbeTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "records execution timing"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn run(&self, _args: serde_json::Value, ctx: &ExecutionContext) -> HandlerResult {
        let started = Instant::now();
        tokio::select! {
            _ = ctx.cancellation().cancelled() => {
                return Err(ToolErrorKind::Interrupted);
            }
            _ = tokio::time::sleep(self.delay) => {}
        }
        self.log.lock().expect("probe lock").push(ProbeEntry {
            tool: self.name.clone(),
            started,
            finished: Instant::now(),
        });
        Ok(format!("{} done", self.name))
    }
}
