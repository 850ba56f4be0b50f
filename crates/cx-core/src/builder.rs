//! Memory retrieval and prompt assembly.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::ContextHandle;
use crate::error::{CoreError, Result};
use crate::history::ConversationHistory;
use crate::message::Message;
use crate::snapshot::SnapshotTracker;
use crate::telemetry::{RetrievalKind, TelemetryEvent, TelemetrySink};
use crate::tokenizer::extract_keywords;
use crate::traits::{Embedder, Resettable, VectorMemory};
use crate::transcript::{
    SpeakerRole, SpeakerUtterance, external_speakers, joined_text, render_full,
    render_latest_per_speaker,
};

/// Prompt assembly settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Speaker name treated as the assistant's user.
    pub primary_speaker: String,
    /// Send only the latest utterance per speaker when memory was retrieved.
    pub simplified_mode: bool,
    pub top_k: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            primary_speaker: "me".to_string(),
            simplified_mode: false,
            top_k: 5,
        }
    }
}

/// Memory retrieved for one prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetrievedMemory {
    pub ephemeral: String,
    pub primary: String,
    pub external: String,
}

impl RetrievedMemory {
    pub fn any(&self) -> bool {
        !self.ephemeral.is_empty() || !self.primary.is_empty() || !self.external.is_empty()
    }
}

/// Result of [`ContextBuilder::build`].
#[derive(Debug, Clone)]
pub struct BuiltContext {
    pub messages: Vec<Message>,
    pub memory: RetrievedMemory,
    /// Effective ephemeral context used for this prompt.
    pub ephemeral: String,
    /// Filtered new content appended as the final message; empty when all lines were duplicates.
    pub new_content: String,
}

/// Orchestrates retrieval and assembles the ordered prompt.
pub struct ContextBuilder {
    context: ContextHandle,
    tracker: SnapshotTracker,
    embedder: Arc<dyn Embedder>,
    memory: Arc<dyn VectorMemory>,
    telemetry: Arc<dyn TelemetrySink>,
    config: BuilderConfig,
}

impl ContextBuilder {
    pub fn new(
        context: ContextHandle,
        embedder: Arc<dyn Embedder>,
        memory: Arc<dyn VectorMemory>,
        telemetry: Arc<dyn TelemetrySink>,
        config: BuilderConfig,
    ) -> Self {
        Self {
            context,
            tracker: SnapshotTracker::new(),
            embedder,
            memory,
            telemetry,
            config,
        }
    }

    pub fn tracker(&self) -> &SnapshotTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut SnapshotTracker {
        &mut self.tracker
    }

    /// Retrieve memory and assemble the prompt.
    ///
    /// Order: system → ephemeral instruction + its memory → primary-speaker
    /// memory → external-speaker memory → emergent properties → prior history
    /// → new content. New content passes through the snapshot tracker and is
    /// committed only when something survives the filter. In simplified mode
    /// the lines left out of the projection are committed with it, so a
    /// resubmitted transcript is rejected before any retrieval.
    pub async fn build(
        &mut self,
        utterances: &[SpeakerUtterance],
        explicit_context: Option<&str>,
        history: &ConversationHistory,
        emergent: &[String],
    ) -> Result<BuiltContext> {
        let ephemeral = match explicit_context {
            Some(v) => v.to_string(),
            None => self.context.get_context(),
        };
        let ephemeral = ephemeral.trim().to_string();

        // Projection depends on retrieval, so compute the full-transcript
        // candidate first to reject empty submissions before any remote call.
        let full_transcript = render_full(utterances);
        if self.tracker.filter(&full_transcript).is_empty() && ephemeral.is_empty() {
            return Err(CoreError::NoContent);
        }

        let mut memory = RetrievedMemory {
            ephemeral: self.ephemeral_memory(&ephemeral).await,
            ..Default::default()
        };

        let primary = &self.config.primary_speaker;
        let primary_text = joined_text(utterances, primary, SpeakerRole::Primary);
        if !primary_text.is_empty() {
            memory.primary = self.retrieve(RetrievalKind::Primary, &primary_text).await;
        }

        let externals = external_speakers(utterances, primary);
        if !externals.is_empty() {
            let external_text = joined_text(utterances, primary, SpeakerRole::External);
            if !external_text.is_empty() {
                memory.external = self.retrieve(RetrievalKind::External, &external_text).await;
            }
        }

        let mut messages = vec![history.pinned().clone()];

        if !ephemeral.is_empty() {
            let mut content = format!("Temporary context: {ephemeral}");
            if !memory.ephemeral.is_empty() {
                content.push_str("\n\nRelevant memory:\n");
                content.push_str(&memory.ephemeral);
            }
            messages.push(Message::system(content));
        }

        if !memory.primary.is_empty() {
            messages.push(Message::system(format!(
                "Memory related to {primary}:\n{}",
                memory.primary
            )));
        }

        if !memory.external.is_empty() {
            messages.push(Message::system(format!(
                "Memory related to other speakers ({}):\n{}",
                externals.join(", "),
                memory.external
            )));
        }

        if !emergent.is_empty() {
            let lines: Vec<String> = emergent.iter().map(|p| format!("- {p}")).collect();
            messages.push(Message::system(format!(
                "Emergent properties from recent cycles:\n{}",
                lines.join("\n")
            )));
        }

        messages.extend(history.tail().iter().cloned());

        let simplified = self.config.simplified_mode && memory.any();
        let raw_new = if simplified {
            render_latest_per_speaker(utterances)
        } else {
            full_transcript.clone()
        };
        let new_content = self.tracker.filter(&raw_new);
        if !new_content.is_empty() {
            self.tracker.commit(&new_content);
            messages.push(Message::user(new_content.clone()));
        } else {
            debug!("all transcript lines already sent, no new-content message");
        }
        if simplified {
            self.tracker.commit(&full_transcript);
        }

        Ok(BuiltContext {
            messages,
            memory,
            ephemeral,
            new_content,
        })
    }

    /// Cached memory for the ephemeral context, refreshed only when it changed.
    /// The value is marked queried even when retrieval failed.
    async fn ephemeral_memory(&self, ephemeral: &str) -> String {
        if ephemeral.is_empty() {
            return String::new();
        }
        if !self.context.has_changed(ephemeral) {
            debug!("ephemeral context unchanged, reusing cached memory");
            return self.context.cached_memory();
        }
        let result = self.retrieve(RetrievalKind::Ephemeral, ephemeral).await;
        self.context.set_cached_memory(result.clone());
        self.context.record_queried(ephemeral);
        result
    }

    /// One embedding + vector-store query. Failures degrade to "".
    async fn retrieve(&self, kind: RetrievalKind, text: &str) -> String {
        if !self.memory.is_available() {
            debug!(?kind, "vector memory unavailable, skipping retrieval");
            return String::new();
        }
        let result = self.try_retrieve(text).await;
        let ok = result.is_ok();
        let memory = result.unwrap_or_else(|e| {
            warn!(?kind, "retrieval failed, continuing without memory: {e}");
            String::new()
        });
        self.telemetry.record(&TelemetryEvent::Retrieval {
            kind,
            query_chars: text.len(),
            result_chars: memory.len(),
            ok,
        });
        memory
    }

    async fn try_retrieve(&self, text: &str) -> Result<String> {
        let vector = self.embedder.embed(text).await?;
        if vector.is_empty() {
            return Ok(String::new());
        }
        let keywords = extract_keywords(text);
        let result = self
            .memory
            .query(&vector, self.config.top_k, &keywords, None)
            .await?;
        Ok(result.trim().to_string())
    }
}

impl Resettable for ContextBuilder {
    fn reset(&mut self) {
        self.tracker.reset();
    }
}
