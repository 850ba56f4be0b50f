//! The "process one prompt" pipeline with its single-flight guard.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::builder::{BuilderConfig, BuiltContext, ContextBuilder};
use crate::collapse::{
    CollapseDecision, CollapseEngine, CollapseOptions, StrategySource, strategy_input,
};
use crate::context::{ContextHandle, TemporaryContext};
use crate::error::{CoreError, Result};
use crate::history::ConversationHistory;
use crate::message::Message;
use crate::patterns::{AnalyzerState, CycleMetrics, EmergentPattern, PatternAnalyzer, PatternConfig};
use crate::superposition::{CandidateAnswer, SuperpositionRegistry};
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::traits::{
    CognitiveCore, CoreOutput, Embedder, Resettable, StrategyDecider, TokenCounter, VectorMemory,
};
use crate::transcript::SpeakerUtterance;
use crate::writer::{BufferConfig, BufferedMemoryWriter, FlushOutcome, WriterState};

/// Everything a session is configured with.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub system_prompt: String,
    pub history_max_pairs: usize,
    pub builder: BuilderConfig,
    pub buffer: BufferConfig,
    pub collapse: CollapseOptions,
    pub patterns: PatternConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            history_max_pairs: 6,
            builder: BuilderConfig::default(),
            buffer: BufferConfig::default(),
            collapse: CollapseOptions::default(),
            patterns: PatternConfig::default(),
        }
    }
}

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are an assistant listening to a live conversation. Answer the primary speaker concisely.";

/// Collaborators injected into a session.
#[derive(Clone)]
pub struct Collaborators {
    pub embedder: Arc<dyn Embedder>,
    pub memory: Arc<dyn VectorMemory>,
    pub token_counter: Arc<dyn TokenCounter>,
    pub strategy: Arc<dyn StrategyDecider>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub cores: Vec<Arc<dyn CognitiveCore>>,
}

/// Input of one cycle.
#[derive(Debug, Clone, Default)]
pub struct PromptRequest {
    pub utterances: Vec<SpeakerUtterance>,
    /// `None` keeps the session's current ephemeral context.
    pub ephemeral_context: Option<String>,
}

/// Result of one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleOutcome {
    pub answer: String,
    pub decision: CollapseDecision,
    pub patterns: Vec<EmergentPattern>,
    pub flush: Option<FlushOutcome>,
    pub persistence_error: Option<String>,
    pub messages: Vec<Message>,
}

/// Everything a later cycle depends on, in a form that outlives the process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSnapshot {
    pub sent_lines: Vec<String>,
    pub writer: WriterState,
    pub patterns: AnalyzerState,
    /// History after the pinned system message.
    pub history: Vec<Message>,
    pub context: TemporaryContext,
    pub emergent_properties: Vec<String>,
}

struct SessionState {
    builder: ContextBuilder,
    writer: BufferedMemoryWriter,
    engine: CollapseEngine,
    analyzer: PatternAnalyzer,
    history: ConversationHistory,
    /// Strategy and pattern properties fed into the next prompt.
    emergent: Vec<String>,
}

/// One conversation: owns the dedup, buffering, collapse and pattern state.
pub struct Session {
    busy: AtomicBool,
    context: ContextHandle,
    collaborators: Collaborators,
    state: Mutex<SessionState>,
}

/// Clears the busy flag when the cycle ends, however it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Session {
    pub fn new(config: SessionConfig, collaborators: Collaborators) -> Self {
        Self::with_engine(
            config.clone(),
            collaborators,
            CollapseEngine::new(config.collapse),
        )
    }

    /// Session with a caller-supplied collapse engine (e.g. a seeded one).
    pub fn with_engine(
        config: SessionConfig,
        collaborators: Collaborators,
        engine: CollapseEngine,
    ) -> Self {
        let context = ContextHandle::new();
        let builder = ContextBuilder::new(
            context.clone(),
            collaborators.embedder.clone(),
            collaborators.memory.clone(),
            collaborators.telemetry.clone(),
            config.builder.clone(),
        );
        let writer = BufferedMemoryWriter::new(
            config.builder.primary_speaker.clone(),
            collaborators.embedder.clone(),
            collaborators.memory.clone(),
            collaborators.token_counter.clone(),
            collaborators.telemetry.clone(),
            config.buffer.clone(),
        );
        let history = ConversationHistory::new(
            Message::system(config.system_prompt.clone()),
            config.history_max_pairs,
        );
        Self {
            busy: AtomicBool::new(false),
            context,
            collaborators,
            state: Mutex::new(SessionState {
                builder,
                writer,
                engine,
                analyzer: PatternAnalyzer::new(config.patterns),
                history,
                emergent: Vec::new(),
            }),
        }
    }

    /// Shared handle to this session's ephemeral context.
    pub fn context(&self) -> ContextHandle {
        self.context.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Run one full cycle. A second call while one is running fails fast with
    /// [`CoreError::AlreadyProcessing`]; nothing is queued.
    pub async fn process(&self, request: PromptRequest) -> Result<CycleOutcome> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CoreError::AlreadyProcessing);
        }
        let _guard = BusyGuard(&self.busy);

        let mut state = self.state.lock().await;
        let SessionState {
            builder,
            writer,
            engine,
            analyzer,
            history,
            emergent,
        } = &mut *state;

        self.context.set_context(request.ephemeral_context.as_deref());
        writer.ingest(&request.utterances);

        let built = builder
            .build(&request.utterances, None, history, emergent)
            .await?;
        self.record_prompt(&built);

        let registry = self.fan_out(&built.messages, emergent).await;

        let input = strategy_input(&registry, &built.new_content);
        let (strategy, source) = CollapseEngine::resolve_strategy(
            self.collaborators.strategy.as_ref(),
            &input,
            &analyzer.emergent_properties(),
        )
        .await;
        let decision = engine.collapse(&registry, &strategy)?;
        self.collaborators.telemetry.record(&TelemetryEvent::Collapse {
            deterministic: decision.deterministic,
            temperature: decision.temperature,
            selected_origin: decision.selected.origin.clone(),
            candidate_count: registry.len(),
            justification: decision.justification.clone(),
        });

        let selected = &decision.selected;
        let patterns = analyzer.record(
            &built.ephemeral,
            CycleMetrics {
                contradiction: selected.contradiction_score,
                coherence: selected.narrative_coherence,
                emotional_weight: selected.emotional_weight,
                phase: Some(selected.phase.theta),
            },
        );
        for pattern in &patterns {
            self.collaborators
                .telemetry
                .record(&TelemetryEvent::PatternDetected {
                    pattern: pattern.clone(),
                });
        }
        let from_strategy: &[String] = match source {
            StrategySource::Collaborator => {
                decision.emergent_properties.as_deref().unwrap_or_default()
            }
            StrategySource::Fallback => &[],
        };
        *emergent = merge_emergent(from_strategy, &analyzer.emergent_properties());

        let answer = selected.text.clone();
        if !built.new_content.is_empty() {
            history.push(Message::user(built.new_content.clone()));
        }
        history.push(Message::assistant(answer.clone()));

        let (flush, persistence_error) = match writer.persist(Some(&answer)).await {
            Ok(outcome) => (Some(outcome), None),
            Err(e) => {
                warn!("memory persistence failed, will retry next cycle: {e}");
                (None, Some(e.to_string()))
            }
        };

        Ok(CycleOutcome {
            answer,
            decision,
            patterns,
            flush,
            persistence_error,
            messages: built.messages,
        })
    }

    /// Assemble the prompt only, without running cores or persisting.
    pub async fn build_prompt(&self, request: PromptRequest) -> Result<BuiltContext> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CoreError::AlreadyProcessing);
        }
        let _guard = BusyGuard(&self.busy);

        let mut state = self.state.lock().await;
        let SessionState {
            builder,
            history,
            emergent,
            ..
        } = &mut *state;
        self.context.set_context(request.ephemeral_context.as_deref());
        let built = builder
            .build(&request.utterances, None, history, emergent)
            .await?;
        self.record_prompt(&built);
        Ok(built)
    }

    /// Wipe dedup, buffers, pattern history, conversation and ephemeral context.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        let mut context = self.context.clone();
        let SessionState {
            builder,
            writer,
            analyzer,
            history,
            emergent,
            ..
        } = &mut *state;
        let parts: [&mut dyn Resettable; 5] = [builder, writer, analyzer, history, &mut context];
        for part in parts {
            part.reset();
        }
        emergent.clear();
    }

    /// Capture the cross-cycle state for storage.
    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock().await;
        SessionSnapshot {
            sent_lines: state.builder.tracker().lines(),
            writer: state.writer.state(),
            patterns: state.analyzer.state(),
            history: state.history.tail().to_vec(),
            context: self.context.snapshot(),
            emergent_properties: state.emergent.clone(),
        }
    }

    /// Continue from a saved snapshot. The pinned system message and every
    /// threshold still come from this session's config.
    pub async fn restore(&self, snapshot: SessionSnapshot) {
        let mut state = self.state.lock().await;
        state.builder.tracker_mut().restore(snapshot.sent_lines);
        state.writer.restore(snapshot.writer);
        state.analyzer.restore(snapshot.patterns);
        state.history.restore(snapshot.history);
        state.emergent = snapshot.emergent_properties;
        self.context.restore(snapshot.context);
    }

    fn record_prompt(&self, built: &BuiltContext) {
        let prompt = built
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        self.collaborators.telemetry.record(&TelemetryEvent::RawPrompt {
            message_count: built.messages.len(),
            prompt,
        });
    }

    /// Run every core concurrently and register the enriched candidates.
    /// A failing core or embedding degrades to an empty result; empty answers
    /// are not registered.
    async fn fan_out(&self, messages: &[Message], emergent: &[String]) -> SuperpositionRegistry {
        let embedder = self.collaborators.embedder.as_ref();
        let tasks = self.collaborators.cores.iter().map(|core| async move {
            let output = core
                .generate(messages, emergent)
                .await
                .unwrap_or_else(|e| {
                    warn!(origin = core.origin(), "core failed, degrading to empty: {e}");
                    CoreOutput {
                        text: String::new(),
                        emotional_weight: 0.0,
                        narrative_coherence: 0.0,
                        contradiction_score: 0.0,
                    }
                });
            let embedding = if output.text.trim().is_empty() {
                Vec::new()
            } else {
                embedder.embed(&output.text).await.unwrap_or_else(|e| {
                    warn!(origin = core.origin(), "candidate embedding failed: {e}");
                    Vec::new()
                })
            };
            CandidateAnswer::new(
                core.origin(),
                output.text,
                embedding,
                output.emotional_weight,
                output.narrative_coherence,
                output.contradiction_score,
            )
        });

        let mut registry = SuperpositionRegistry::new();
        for candidate in join_all(tasks).await {
            if candidate.text.trim().is_empty() {
                debug!(origin = %candidate.origin, "skipping empty candidate");
                continue;
            }
            registry.register(candidate);
        }
        registry
    }
}

/// Order-preserving union; strategy properties first.
fn merge_emergent(from_strategy: &[String], from_patterns: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for property in from_strategy.iter().chain(from_patterns) {
        let property = property.trim();
        if !property.is_empty() && !merged.iter().any(|m| m == property) {
            merged.push(property.to_string());
        }
    }
    merged
}
