//! Collaborator seams: embedding, vector memory, token counting, strategy
//! decisions and cognitive cores. The engine treats every implementation as a
//! black box and owns only the recovery policy around each call.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::Message;
use crate::tokenizer::estimate_tokens;

/// Turns text into a dense vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Flat metadata value. Nested arrays or objects are unrepresentable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Text(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::Text(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Integer(v)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

/// One vector-store record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl MemoryRecord {
    /// Stored text, if the record carries a `text` field.
    pub fn text(&self) -> Option<&str> {
        match self.metadata.get("text") {
            Some(MetadataValue::Text(t)) => Some(t),
            _ => None,
        }
    }
}

/// Equality constraints on record metadata.
pub type QueryFilters = BTreeMap<String, MetadataValue>;

/// Long-term memory backed by vector similarity.
#[async_trait]
pub trait VectorMemory: Send + Sync {
    /// Top-K matching memory rendered as text; empty when nothing matches.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        keywords: &[String],
        filters: Option<&QueryFilters>,
    ) -> Result<String>;

    async fn upsert(&self, records: Vec<MemoryRecord>) -> Result<()>;

    fn is_available(&self) -> bool;
}

/// Counts model tokens for a text.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> Result<usize>;
}

/// chars/4 estimate, used directly or as the fallback for a failing counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenCounter;

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, text: &str) -> Result<usize> {
        Ok(estimate_tokens(text))
    }
}

/// Count with `counter`, falling back to the heuristic when it fails.
pub fn count_tokens(counter: &dyn TokenCounter, text: &str) -> usize {
    counter.count(text).unwrap_or_else(|e| {
        tracing::debug!("token counter failed, using estimate: {e}");
        estimate_tokens(text)
    })
}

/// Summary handed to the strategy collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyInput {
    pub cores: Vec<String>,
    pub avg_emotional_weight: f64,
    pub avg_contradiction: f64,
    pub original_text: String,
}

/// Collapse mode chosen outside the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDecision {
    pub deterministic: bool,
    pub temperature: f64,
    pub justification: String,
    #[serde(default)]
    pub user_intent: Option<HashMap<String, f64>>,
    #[serde(default)]
    pub emergent_properties: Option<Vec<String>>,
}

#[async_trait]
pub trait StrategyDecider: Send + Sync {
    async fn decide(&self, input: &StrategyInput) -> Result<StrategyDecision>;
}

/// Raw output of one cognitive core before enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreOutput {
    pub text: String,
    #[serde(default)]
    pub emotional_weight: f64,
    #[serde(default)]
    pub narrative_coherence: f64,
    #[serde(default)]
    pub contradiction_score: f64,
}

/// A named parallel partial-answer generator.
#[async_trait]
pub trait CognitiveCore: Send + Sync {
    fn origin(&self) -> &str;

    async fn generate(&self, messages: &[Message], emergent_properties: &[String]) -> Result<CoreOutput>;
}

/// Components whose session state can be wiped uniformly.
pub trait Resettable {
    fn reset(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;

    struct Broken;

    impl TokenCounter for Broken {
        fn count(&self, _text: &str) -> Result<usize> {
            Err(CoreError::TokenCounter("offline".into()))
        }
    }

    #[test]
    fn test_failing_counter_falls_back_to_estimate() {
        assert_eq!(count_tokens(&Broken, "abcdefgh"), 2);
        assert_eq!(count_tokens(&HeuristicTokenCounter, "abcdefghi"), 3);
    }

    #[test]
    fn test_metadata_serializes_flat() {
        let mut metadata = BTreeMap::new();
        metadata.insert("text".to_string(), MetadataValue::from("hello"));
        metadata.insert("count".to_string(), MetadataValue::from(3i64));
        metadata.insert("final".to_string(), MetadataValue::from(true));
        let record = MemoryRecord {
            id: "r1".into(),
            vector: vec![0.5],
            metadata,
        };
        let json = serde_json::to_value(&record.metadata).unwrap();
        assert_eq!(json["text"], "hello");
        assert_eq!(json["count"], 3);
        assert_eq!(json["final"], true);
        assert_eq!(record.text(), Some("hello"));
    }
}
