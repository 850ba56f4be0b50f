//! Final-answer selection over registered candidates.
//!
//! Deterministic mode takes the arg-max of a weighted feature score,
//! optionally with a diversity bonus and a phase-interference term.
//! Probabilistic mode samples from a softmax over the same base score at the
//! temperature chosen by the strategy collaborator.

use std::collections::HashMap;
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::constants::{
    COHERENCE_WEIGHT, CONTRADICTION_WEIGHT, DIVERSITY_FACTOR, EMOTION_WEIGHT,
    FALLBACK_EMOTION_CUTOFF, FALLBACK_TEMPERATURE_HIGH, FALLBACK_TEMPERATURE_LOW, MIN_TEMPERATURE,
};
use crate::error::{CoreError, Result};
use crate::phase::Phase;
use crate::similarity::{cosine_distance, cosine_similarity};
use crate::superposition::{CandidateAnswer, SuperpositionRegistry};
use crate::traits::{StrategyDecider, StrategyDecision, StrategyInput};

/// Resonance strength per known origin; others use the default.
const ORIGIN_RESONANCE: &[(&str, f64)] = &[
    ("analytical", 0.6),
    ("narrative", 0.8),
    ("emotional", 1.0),
    ("intuitive", 0.9),
    ("critical", 0.7),
];
const DEFAULT_RESONANCE: f64 = 0.5;

/// Scoring switches for deterministic collapse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollapseOptions {
    pub diversity_bonus: bool,
    /// Pairs closer than this earn no diversity bonus.
    pub min_cosine_distance: f64,
    pub interference: bool,
    pub interference_weight: f64,
    /// Externally supplied phase driving origin resonance.
    pub bias_phase: f64,
}

impl Default for CollapseOptions {
    fn default() -> Self {
        Self {
            diversity_bonus: false,
            min_cosine_distance: 0.1,
            interference: false,
            interference_weight: 0.25,
            bias_phase: 0.0,
        }
    }
}

/// Outcome of one collapse.
#[derive(Debug, Clone, Serialize)]
pub struct CollapseDecision {
    pub deterministic: bool,
    pub temperature: f64,
    pub selected: CandidateAnswer,
    pub justification: String,
    pub user_intent: Option<HashMap<String, f64>>,
    pub emergent_properties: Option<Vec<String>>,
}

/// 1.5·e + 1.2·c − 1.7·x
pub fn base_score(c: &CandidateAnswer) -> f64 {
    EMOTION_WEIGHT * c.emotional_weight + COHERENCE_WEIGHT * c.narrative_coherence
        - CONTRADICTION_WEIGHT * c.contradiction_score
}

/// Σ over other candidates of distance·0.5, counting only distances ≥ `min_distance`.
pub fn diversity_bonus(candidates: &[CandidateAnswer], i: usize, min_distance: f64) -> f64 {
    candidates
        .iter()
        .enumerate()
        .filter(|(j, _)| *j != i)
        .map(|(_, other)| cosine_distance(&candidates[i].embedding, &other.embedding))
        .filter(|d| *d >= min_distance)
        .map(|d| d * DIVERSITY_FACTOR)
        .sum()
}

/// Pairwise interference matrix; the diagonal is zero.
///
/// I_ij = cos((1−s)·π/2 + Δφ + Δe·π/4 + Δx·π/4) · (1−s), s = cosine similarity.
pub fn interference_matrix(candidates: &[CandidateAnswer]) -> Vec<Vec<f64>> {
    let n = candidates.len();
    let mut matrix = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            let (a, b) = (&candidates[i], &candidates[j]);
            let s = cosine_similarity(&a.embedding, &b.embedding);
            let alignment = (1.0 - s) * FRAC_PI_2;
            let angle = alignment
                + (a.phase.theta - b.phase.theta)
                + (a.emotional_weight - b.emotional_weight) * FRAC_PI_4
                + (a.contradiction_score - b.contradiction_score) * FRAC_PI_4;
            matrix[i][j] = angle.cos() * (1.0 - s);
        }
    }
    matrix
}

/// R(origin) · cos(φ − bias)
pub fn resonance(candidate: &CandidateAnswer, bias_phase: f64) -> f64 {
    let key = candidate.origin.trim().to_lowercase();
    let strength = ORIGIN_RESONANCE
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, r)| *r)
        .unwrap_or(DEFAULT_RESONANCE);
    strength * candidate.phase.interference(Phase::new(bias_phase))
}

/// Total deterministic score per candidate.
pub fn deterministic_scores(candidates: &[CandidateAnswer], options: &CollapseOptions) -> Vec<f64> {
    let matrix = options
        .interference
        .then(|| interference_matrix(candidates));
    candidates
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let mut score = base_score(c);
            if options.diversity_bonus {
                score += diversity_bonus(candidates, i, options.min_cosine_distance);
            }
            if let Some(m) = &matrix {
                let interference: f64 = m[i].iter().sum();
                score += options.interference_weight
                    * (interference + resonance(c, options.bias_phase));
            }
            score
        })
        .collect()
}

/// Index of the highest score; the first one wins ties.
pub fn argmax(scores: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, s) in scores.iter().enumerate() {
        match best {
            Some((_, b)) if *s <= b => {}
            _ => best = Some((i, *s)),
        }
    }
    best.map(|(i, _)| i)
}

/// Max-subtracted softmax at temperature `tau`.
pub fn softmax(scores: &[f64], tau: f64) -> Vec<f64> {
    let tau = tau.max(MIN_TEMPERATURE);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|s| ((s - max) / tau).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.iter().map(|e| e / total).collect()
}

/// Roulette-wheel pick with a single uniform draw in [0, 1).
pub fn roulette(probabilities: &[f64], draw: f64) -> usize {
    let mut cumulative = 0.0;
    for (i, p) in probabilities.iter().enumerate() {
        cumulative += p;
        if draw < cumulative {
            return i;
        }
    }
    probabilities.len().saturating_sub(1)
}

/// Fixed fallback when the strategy collaborator fails: deterministic iff the
/// average emotional weight is below 0.5.
pub fn fallback_decision(input: &StrategyInput, emergent: &[String]) -> StrategyDecision {
    let deterministic = input.avg_emotional_weight < FALLBACK_EMOTION_CUTOFF;
    let mut intent = HashMap::new();
    intent.insert("emotional".to_string(), input.avg_emotional_weight);
    intent.insert("analytical".to_string(), 1.0 - input.avg_emotional_weight);
    StrategyDecision {
        deterministic,
        temperature: if deterministic {
            FALLBACK_TEMPERATURE_LOW
        } else {
            FALLBACK_TEMPERATURE_HIGH
        },
        justification: format!(
            "fallback: average emotional weight {:.2}",
            input.avg_emotional_weight
        ),
        user_intent: Some(intent),
        emergent_properties: (!emergent.is_empty()).then(|| emergent.to_vec()),
    }
}

/// Summarize the registry for the strategy collaborator.
pub fn strategy_input(registry: &SuperpositionRegistry, original_text: &str) -> StrategyInput {
    let candidates = registry.candidates();
    let n = candidates.len().max(1) as f64;
    StrategyInput {
        cores: candidates.iter().map(|c| c.origin.clone()).collect(),
        avg_emotional_weight: candidates.iter().map(|c| c.emotional_weight).sum::<f64>() / n,
        avg_contradiction: candidates.iter().map(|c| c.contradiction_score).sum::<f64>() / n,
        original_text: original_text.to_string(),
    }
}

/// Origin of the strategy a collapse ran with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategySource {
    Collaborator,
    Fallback,
}

/// Selects one candidate per cycle.
pub struct CollapseEngine {
    options: CollapseOptions,
    rng: SmallRng,
}

impl CollapseEngine {
    pub fn new(options: CollapseOptions) -> Self {
        Self {
            options,
            rng: SmallRng::from_os_rng(),
        }
    }

    /// Engine with a fixed seed, for reproducible sampling.
    pub fn with_seed(options: CollapseOptions, seed: u64) -> Self {
        Self {
            options,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Ask the collaborator for mode and temperature, falling back on failure.
    pub async fn resolve_strategy(
        decider: &dyn StrategyDecider,
        input: &StrategyInput,
        emergent: &[String],
    ) -> (StrategyDecision, StrategySource) {
        match decider.decide(input).await {
            Ok(decision) => (decision, StrategySource::Collaborator),
            Err(e) => {
                warn!("strategy decision failed, using fallback: {e}");
                (fallback_decision(input, emergent), StrategySource::Fallback)
            }
        }
    }

    /// Collapse the registry according to `strategy`.
    pub fn collapse(
        &mut self,
        registry: &SuperpositionRegistry,
        strategy: &StrategyDecision,
    ) -> Result<CollapseDecision> {
        let candidates = registry.candidates();
        let index = match candidates.len() {
            0 => return Err(CoreError::NoCandidates),
            1 => 0,
            _ if strategy.deterministic => self.select_deterministic(candidates),
            _ => self.select_probabilistic(candidates, strategy.temperature),
        };
        let selected = candidates[index].clone();
        info!(
            origin = %selected.origin,
            deterministic = strategy.deterministic,
            temperature = strategy.temperature,
            candidates = candidates.len(),
            "collapsed superposition"
        );
        Ok(CollapseDecision {
            deterministic: strategy.deterministic,
            temperature: strategy.temperature,
            selected,
            justification: strategy.justification.clone(),
            user_intent: strategy.user_intent.clone(),
            emergent_properties: strategy.emergent_properties.clone(),
        })
    }

    fn select_deterministic(&self, candidates: &[CandidateAnswer]) -> usize {
        let scores = deterministic_scores(candidates, &self.options);
        argmax(&scores).unwrap_or(0)
    }

    fn select_probabilistic(&mut self, candidates: &[CandidateAnswer], temperature: f64) -> usize {
        let scores: Vec<f64> = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let mut s = base_score(c);
                if self.options.diversity_bonus {
                    s += diversity_bonus(candidates, i, self.options.min_cosine_distance);
                }
                s
            })
            .collect();
        let probabilities = softmax(&scores, temperature);
        let draw: f64 = self.rng.random();
        roulette(&probabilities, draw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn candidate(origin: &str, e: f64, c: f64, x: f64, embedding: Vec<f32>) -> CandidateAnswer {
        CandidateAnswer::new(origin, format!("{origin} answer"), embedding, e, c, x)
    }

    fn scenario() -> SuperpositionRegistry {
        let mut reg = SuperpositionRegistry::new();
        reg.register(candidate("emotional", 0.9, 0.1, 0.0, vec![1.0, 0.0, 0.0]));
        reg.register(candidate("narrative", 0.1, 0.9, 0.0, vec![0.0, 1.0, 0.0]));
        reg.register(candidate("critical", 0.1, 0.1, 0.9, vec![0.0, 0.0, 1.0]));
        reg
    }

    fn strategy(deterministic: bool, temperature: f64) -> StrategyDecision {
        StrategyDecision {
            deterministic,
            temperature,
            justification: "test".into(),
            user_intent: None,
            emergent_properties: None,
        }
    }

    #[test]
    fn test_base_scores() {
        let reg = scenario();
        let scores: Vec<f64> = reg.candidates().iter().map(base_score).collect();
        assert_relative_eq!(scores[0], 1.35, epsilon = 1e-9);
        assert_relative_eq!(scores[1], 1.23, epsilon = 1e-9);
        assert_relative_eq!(scores[2], -1.26, epsilon = 1e-9);
    }

    #[test]
    fn test_deterministic_picks_highest() {
        let reg = scenario();
        let mut engine = CollapseEngine::with_seed(CollapseOptions::default(), 7);
        let d = engine.collapse(&reg, &strategy(true, 0.0)).unwrap();
        assert_eq!(d.selected.origin, "emotional");
        assert!(d.deterministic);
    }

    #[test]
    fn test_single_candidate_short_circuits() {
        let mut reg = SuperpositionRegistry::new();
        reg.register(candidate("critical", 0.0, 0.0, 1.0, vec![1.0]));
        let mut engine = CollapseEngine::with_seed(CollapseOptions::default(), 1);
        for tau in [0.0, 0.01, 1.0, 100.0] {
            assert_eq!(engine.collapse(&reg, &strategy(false, tau)).unwrap().selected.origin, "critical");
            assert_eq!(engine.collapse(&reg, &strategy(true, tau)).unwrap().selected.origin, "critical");
        }
    }

    #[test]
    fn test_empty_registry_errors() {
        let reg = SuperpositionRegistry::new();
        let mut engine = CollapseEngine::with_seed(CollapseOptions::default(), 1);
        assert!(matches!(
            engine.collapse(&reg, &strategy(true, 0.5)),
            Err(CoreError::NoCandidates)
        ));
    }

    #[test]
    fn test_ties_go_to_first() {
        assert_eq!(argmax(&[1.0, 2.0, 2.0]), Some(1));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_softmax_stable_and_normalized() {
        let p = softmax(&[1000.0, 999.0, -1000.0], 1.0);
        assert_relative_eq!(p.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
        assert!(p[0] > p[1] && p[1] > p[2]);
        assert!(p.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_low_temperature_is_near_greedy() {
        let reg = scenario();
        let mut engine = CollapseEngine::with_seed(CollapseOptions::default(), 42);
        for _ in 0..50 {
            let d = engine.collapse(&reg, &strategy(false, 0.01)).unwrap();
            assert_eq!(d.selected.origin, "emotional");
        }
    }

    #[test]
    fn test_high_temperature_explores() {
        let reg = scenario();
        let mut engine = CollapseEngine::with_seed(CollapseOptions::default(), 42);
        let picks: std::collections::HashSet<String> = (0..200)
            .map(|_| engine.collapse(&reg, &strategy(false, 50.0)).unwrap().selected.origin)
            .collect();
        assert_eq!(picks.len(), 3);
    }

    #[test]
    fn test_roulette_boundaries() {
        let p = [0.2, 0.5, 0.3];
        assert_eq!(roulette(&p, 0.0), 0);
        assert_eq!(roulette(&p, 0.2), 1);
        assert_eq!(roulette(&p, 0.69), 1);
        assert_eq!(roulette(&p, 0.999), 2);
    }

    #[test]
    fn test_diversity_bonus_respects_min_distance() {
        let reg = scenario();
        // Orthogonal embeddings: distance 1.0 to each of two others.
        assert_relative_eq!(diversity_bonus(reg.candidates(), 0, 0.1), 1.0, epsilon = 1e-9);
        assert_relative_eq!(diversity_bonus(reg.candidates(), 0, 1.5), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_interference_matrix_shape() {
        let reg = scenario();
        let m = interference_matrix(reg.candidates());
        assert_eq!(m.len(), 3);
        for (i, row) in m.iter().enumerate() {
            assert_eq!(row[i], 0.0);
            assert!(row.iter().all(|v| v.abs() <= 1.0 + 1e-9));
        }
    }

    #[test]
    fn test_identical_embeddings_do_not_interfere() {
        let a = candidate("emotional", 0.5, 0.5, 0.0, vec![1.0, 0.0]);
        let b = candidate("critical", 0.5, 0.5, 0.0, vec![1.0, 0.0]);
        let m = interference_matrix(&[a, b]);
        assert_relative_eq!(m[0][1], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_interference_changes_totals() {
        let reg = scenario();
        let plain = deterministic_scores(reg.candidates(), &CollapseOptions::default());
        let blended = deterministic_scores(
            reg.candidates(),
            &CollapseOptions {
                interference: true,
                interference_weight: 1.0,
                bias_phase: 1.0,
                ..Default::default()
            },
        );
        assert_ne!(plain, blended);
    }

    #[test]
    fn test_fallback_rule() {
        let input = StrategyInput {
            cores: vec!["a".into()],
            avg_emotional_weight: 0.3,
            avg_contradiction: 0.1,
            original_text: String::new(),
        };
        let d = fallback_decision(&input, &[]);
        assert!(d.deterministic);
        assert_eq!(d.temperature, FALLBACK_TEMPERATURE_LOW);
        assert!(d.emergent_properties.is_none());

        let hot = StrategyInput {
            avg_emotional_weight: 0.5,
            ..input
        };
        let d = fallback_decision(&hot, &["drift".to_string()]);
        assert!(!d.deterministic);
        assert_eq!(d.temperature, FALLBACK_TEMPERATURE_HIGH);
        assert_eq!(d.emergent_properties, Some(vec!["drift".to_string()]));
        assert_relative_eq!(d.user_intent.unwrap()["analytical"], 0.5);
    }

    struct Offline;

    #[async_trait::async_trait]
    impl StrategyDecider for Offline {
        async fn decide(&self, _input: &StrategyInput) -> Result<StrategyDecision> {
            Err(CoreError::Strategy("unreachable".into()))
        }
    }

    struct Fixed;

    #[async_trait::async_trait]
    impl StrategyDecider for Fixed {
        async fn decide(&self, _input: &StrategyInput) -> Result<StrategyDecision> {
            Ok(strategy(false, 0.4))
        }
    }

    #[tokio::test]
    async fn test_resolve_strategy_reports_source() {
        let input = strategy_input(&scenario(), "why");
        let (d, source) = CollapseEngine::resolve_strategy(&Fixed, &input, &[]).await;
        assert_eq!(source, StrategySource::Collaborator);
        assert_eq!(d.temperature, 0.4);

        let (d, source) =
            CollapseEngine::resolve_strategy(&Offline, &input, &["drift".to_string()]).await;
        assert_eq!(source, StrategySource::Fallback);
        assert_eq!(d.emergent_properties, Some(vec!["drift".to_string()]));
    }
}
