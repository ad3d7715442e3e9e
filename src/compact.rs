//! Context compaction.
//!
//! Replaces the oldest contiguous run of turns with a generated summary once
//! estimated token usage crosses the configured share of the context window.
//! The system prompt and the most recent turns are never summarized away,
//! and a tool result is only ever dropped together with its parent turn.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, info};

use crate::config::RuntimeConfig;
use crate::events::EventSink;
use crate::model::{ModelClient, ModelRequest};
use crate::types::{ModelEvent, RuntimeEvent, Turn};

/// What a compaction pass did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// Usage under threshold, or nothing old enough to fold.
    NotNeeded,
    /// A candidate existed but folding it would make no progress.
    Skipped { reason: String },
    Compacted {
        replaced_turns: usize,
        estimated_tokens_saved: u64,
    },
}

/// Rough chars-per-token divisor used for estimation.
const CHARS_PER_TOKEN: usize = 4;

pub(crate) fn estimate_tokens(system_prompt: &str, turns: &[Turn]) -> u64 {
    let chars: usize =
        system_prompt.len() + turns.iter().map(|turn| turn.char_weight()).sum::<usize>();
    (chars / CHARS_PER_TOKEN) as u64
}

/// Summarizes old turns through a degenerate (tool-less) model call.
pub struct Compactor {
    model: Arc<dyn ModelClient>,
    sink: Arc<dyn EventSink>,
    config: Arc<RuntimeConfig>,
}

impl Compactor {
    pub fn new(
        model: Arc<dyn ModelClient>,
        sink: Arc<dyn EventSink>,
        config: Arc<RuntimeConfig>,
    ) -> Self {
        Self {
            model,
            sink,
            config,
        }
    }

    /// Compact if over threshold. A failure leaves history unchanged; the
    /// caller logs it and tries again after the next turn.
    pub async fn maybe_compact(
        &self,
        system_prompt: &str,
        turns: &mut Vec<Turn>,
    ) -> crate::Result<CompactionOutcome> {
        if !self.config.compaction.enabled {
            return Ok(CompactionOutcome::NotNeeded);
        }

        let estimated = estimate_tokens(system_prompt, turns);
        if estimated < self.config.compaction_trigger() {
            return Ok(CompactionOutcome::NotNeeded);
        }

        let keep = self.config.compaction.keep_recent_turns;
        if turns.len() <= keep {
            return Ok(CompactionOutcome::NotNeeded);
        }

        let prefix_len = turns.len() - keep;
        let prefix = &turns[..prefix_len];

        // Re-summarizing a lone summary would loop forever at the same size.
        if prefix.iter().all(|turn| turn.is_summary()) {
            return Ok(CompactionOutcome::Skipped {
                reason: "prefix already compacted".to_string(),
            });
        }

        self.sink.emit(RuntimeEvent::CompactionTriggered {
            estimated_tokens: estimated,
            replaced_turns: prefix_len,
        });
        debug!(estimated, prefix_len, "compaction triggered");

        let summary = self.summarize(prefix).await?;

        let folded_chars: usize = prefix.iter().map(|turn| turn.char_weight()).sum();
        let estimated_tokens_saved =
            (folded_chars.saturating_sub(summary.len()) / CHARS_PER_TOKEN) as u64;

        turns.splice(0..prefix_len, [Turn::summary(summary)]);

        info!(
            replaced_turns = prefix_len,
            estimated_tokens_saved, "history compacted"
        );
        Ok(CompactionOutcome::Compacted {
            replaced_turns: prefix_len,
            estimated_tokens_saved,
        })
    }

    async fn summarize(&self, prefix: &[Turn]) -> crate::Result<String> {
        let mut request = ModelRequest::new(SUMMARY_PROMPT);
        for turn in prefix {
            request.push_turn(turn);
        }

        let mut stream = self
            .model
            .send(request)
            .await
            .map_err(|e| crate::Error::Compaction(e.to_string()))?;

        let mut summary = String::new();
        while let Some(event) = stream.next().await {
            match event {
                ModelEvent::TextDelta { delta } => summary.push_str(&delta),
                ModelEvent::Completed { .. } => {
                    if summary.trim().is_empty() {
                        return Err(crate::Error::Compaction("empty summary".to_string()));
                    }
                    return Ok(summary);
                }
                ModelEvent::Error(kind) => {
                    return Err(crate::Error::Compaction(kind.to_string()));
                }
                ModelEvent::ToolCallRequested(_) => {
                    // A summarization call advertises no tools; ignore.
                }
            }
        }
        Err(crate::Error::Compaction(
            "summary stream ended without completion".to_string(),
        ))
    }
}

const SUMMARY_PROMPT: &str = "Summarize the conversation so far so it can continue seamlessly. \
Preserve: the user's original request, key decisions made, files touched and why, \
current progress, errors encountered and their resolutions, and any constraints \
stated by the user. Be concise but complete enough that no earlier message needs \
to be re-read.";
