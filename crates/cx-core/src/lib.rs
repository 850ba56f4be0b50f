//! Cortex context engine.
//!
//! Turns a stream of speaker-tagged utterances into a bounded, deduplicated
//! prompt enriched with long-term memory, buffers utterances for batched
//! persistence, and collapses parallel candidate answers into one.
//!
//! No file or network I/O. Every remote service sits behind a trait in
//! [`traits`] and is treated as a black box.

pub mod builder;
pub mod collapse;
pub mod constants;
pub mod context;
pub mod embedding;
pub mod error;
pub mod history;
pub mod message;
pub mod patterns;
pub mod phase;
pub mod session;
pub mod similarity;
pub mod snapshot;
pub mod superposition;
pub mod telemetry;
pub mod time;
pub mod tokenizer;
pub mod traits;
pub mod transcript;
pub mod writer;

pub use builder::{BuilderConfig, BuiltContext, ContextBuilder, RetrievedMemory};
pub use collapse::{CollapseDecision, CollapseEngine, CollapseOptions, StrategySource};
pub use context::{ContextHandle, TemporaryContext};
pub use embedding::HashingEmbedder;
pub use error::{CoreError, Result};
pub use history::ConversationHistory;
pub use message::{Message, Role};
pub use patterns::{
    AnalyzerState, CycleEntry, CycleMetrics, EmergentPattern, PatternAnalyzer, PatternConfig,
    PatternKind,
};
pub use phase::Phase;
pub use session::{
    Collaborators, CycleOutcome, PromptRequest, Session, SessionConfig, SessionSnapshot,
};
pub use similarity::cosine_similarity;
pub use snapshot::SnapshotTracker;
pub use superposition::{CandidateAnswer, SuperpositionRegistry};
pub use telemetry::{NullTelemetry, TelemetryEvent, TelemetrySink, TracingTelemetry};
pub use traits::{
    CognitiveCore, CoreOutput, Embedder, HeuristicTokenCounter, MemoryRecord, MetadataValue,
    QueryFilters, Resettable, StrategyDecider, StrategyDecision, StrategyInput, TokenCounter,
    VectorMemory,
};
pub use transcript::{SpeakerRole, SpeakerUtterance};
pub use writer::{BufferConfig, BufferedMemoryWriter, FlushOutcome, WriterState};
