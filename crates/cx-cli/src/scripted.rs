//! File-backed collaborators: cores that replay prepared answers and a
//! strategy that is either fixed or absent.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use cx_core::{
    CognitiveCore, CoreError, CoreOutput, Message, SpeakerUtterance, StrategyDecider,
    StrategyDecision, StrategyInput,
};

/// One prepared candidate, as read from a candidates file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CandidateSpec {
    pub origin: String,
    pub text: String,
    #[serde(default)]
    pub emotional_weight: f64,
    #[serde(default)]
    pub narrative_coherence: f64,
    #[serde(default)]
    pub contradiction_score: f64,
}

impl CandidateSpec {
    fn output(&self) -> CoreOutput {
        CoreOutput {
            text: self.text.clone(),
            emotional_weight: self.emotional_weight,
            narrative_coherence: self.narrative_coherence,
            contradiction_score: self.contradiction_score,
        }
    }
}

/// Core that answers every prompt with the same prepared output.
pub struct ScriptedCore {
    spec: CandidateSpec,
}

impl ScriptedCore {
    pub fn new(spec: CandidateSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl CognitiveCore for ScriptedCore {
    fn origin(&self) -> &str {
        &self.spec.origin
    }

    async fn generate(&self, messages: &[Message], emergent: &[String]) -> cx_core::Result<CoreOutput> {
        tracing::debug!(
            origin = %self.spec.origin,
            messages = messages.len(),
            emergent = emergent.len(),
            "replaying scripted answer"
        );
        Ok(self.spec.output())
    }
}

/// Strategy collaborator returning a decision read from a file.
pub struct FixedStrategy {
    decision: StrategyDecision,
}

#[async_trait]
impl StrategyDecider for FixedStrategy {
    async fn decide(&self, _input: &StrategyInput) -> cx_core::Result<StrategyDecision> {
        Ok(self.decision.clone())
    }
}

/// Stand-in when no strategy service is configured; every call fails so the
/// engine takes its fallback rule.
pub struct UnavailableStrategy;

#[async_trait]
impl StrategyDecider for UnavailableStrategy {
    async fn decide(&self, _input: &StrategyInput) -> cx_core::Result<StrategyDecision> {
        Err(CoreError::Strategy("no strategy service configured".into()))
    }
}

pub fn strategy_from(path: Option<&Path>) -> Result<Arc<dyn StrategyDecider>> {
    match path {
        Some(path) => {
            let decision: StrategyDecision = read_json(path)?;
            Ok(Arc::new(FixedStrategy { decision }))
        }
        None => Ok(Arc::new(UnavailableStrategy)),
    }
}

pub fn load_candidates(path: &Path) -> Result<Vec<CandidateSpec>> {
    let specs: Vec<CandidateSpec> = read_json(path)?;
    if specs.is_empty() {
        anyhow::bail!("{} holds no candidates", path.display());
    }
    Ok(specs)
}

pub fn load_transcript(path: &Path) -> Result<Vec<SpeakerUtterance>> {
    read_json(path)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}
