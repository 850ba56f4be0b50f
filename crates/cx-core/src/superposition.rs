//! Candidate answers from parallel cognitive cores, held until collapse.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::DUPLICATE_SIMILARITY;
use crate::embedding::fnv1a;
use crate::phase::Phase;
use crate::similarity::cosine_similarity;

/// Known core origins and their base phase offsets.
const ORIGIN_OFFSETS: &[(&str, f64)] = &[
    ("analytical", 0.0),
    ("narrative", FRAC_PI_4),
    ("emotional", FRAC_PI_2),
    ("intuitive", PI),
    ("critical", 3.0 * FRAC_PI_2),
];

/// Base phase offset for an origin. Unknown origins are spread by golden-angle
/// spacing from a stable hash of their name.
pub fn origin_offset(origin: &str) -> f64 {
    let key = origin.trim().to_lowercase();
    ORIGIN_OFFSETS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, offset)| *offset)
        .unwrap_or_else(|| Phase::from_index((fnv1a(key.as_bytes()) % 64) as usize, 0.0).theta)
}

/// offset + e·π/2 + x·π + (1−c)·π/4, wrapped into [0, 2π).
pub fn candidate_phase(origin: &str, emotional_weight: f64, coherence: f64, contradiction: f64) -> Phase {
    Phase::new(
        origin_offset(origin)
            + emotional_weight * FRAC_PI_2
            + contradiction * PI
            + (1.0 - coherence) * FRAC_PI_4,
    )
}

/// One core's answer with its scoring features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateAnswer {
    pub origin: String,
    pub text: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
    pub emotional_weight: f64,
    pub narrative_coherence: f64,
    /// Always within [0, 1].
    pub contradiction_score: f64,
    pub phase: Phase,
}

impl CandidateAnswer {
    /// Build a candidate; scores are clamped to [0, 1] and the phase derived.
    pub fn new(
        origin: impl Into<String>,
        text: impl Into<String>,
        embedding: Vec<f32>,
        emotional_weight: f64,
        narrative_coherence: f64,
        contradiction_score: f64,
    ) -> Self {
        let origin = origin.into();
        let emotional_weight = clamp_unit(emotional_weight);
        let narrative_coherence = clamp_unit(narrative_coherence);
        let contradiction_score = clamp_unit(contradiction_score);
        let phase = candidate_phase(
            &origin,
            emotional_weight,
            narrative_coherence,
            contradiction_score,
        );
        Self {
            origin,
            text: text.into(),
            embedding,
            emotional_weight,
            narrative_coherence,
            contradiction_score,
            phase,
        }
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 }
}

/// Per-cycle set of registered candidates.
#[derive(Debug, Default, Clone)]
pub struct SuperpositionRegistry {
    candidates: Vec<CandidateAnswer>,
}

impl SuperpositionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a candidate. Returns false, leaving the registry untouched,
    /// when it is a near-duplicate (cosine > 0.95) of one already held.
    pub fn register(&mut self, candidate: CandidateAnswer) -> bool {
        if let Some(existing) = self
            .candidates
            .iter()
            .find(|c| cosine_similarity(&c.embedding, &candidate.embedding) > DUPLICATE_SIMILARITY)
        {
            debug!(
                origin = %candidate.origin,
                duplicate_of = %existing.origin,
                "rejected near-duplicate candidate"
            );
            return false;
        }
        self.candidates.push(candidate);
        true
    }

    pub fn candidates(&self) -> &[CandidateAnswer] {
        &self.candidates
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn clear(&mut self) {
        self.candidates.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::TAU;

    #[test]
    fn test_near_duplicate_rejected() {
        let mut reg = SuperpositionRegistry::new();
        assert!(reg.register(CandidateAnswer::new("analytical", "a", vec![1.0, 0.0], 0.5, 0.5, 0.0)));
        let dup = CandidateAnswer::new("emotional", "b", vec![0.99, 0.01], 0.1, 0.1, 0.1);
        assert!(!reg.register(dup));
        assert_eq!(reg.len(), 1);
        assert!(reg.register(CandidateAnswer::new("critical", "c", vec![0.0, 1.0], 0.5, 0.5, 0.0)));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_empty_embeddings_never_duplicate() {
        let mut reg = SuperpositionRegistry::new();
        assert!(reg.register(CandidateAnswer::new("a", "x", vec![], 0.0, 0.0, 0.0)));
        assert!(reg.register(CandidateAnswer::new("b", "y", vec![], 0.0, 0.0, 0.0)));
    }

    #[test]
    fn test_phase_formula() {
        let c = CandidateAnswer::new("emotional", "t", vec![], 1.0, 0.0, 1.0);
        // π/2 + π/2 + π + π/4 = 2π + π/4 → π/4
        assert_relative_eq!(c.phase.theta, FRAC_PI_4, epsilon = 1e-9);
    }

    #[test]
    fn test_scores_clamped() {
        let c = CandidateAnswer::new("analytical", "t", vec![], 2.0, -1.0, 1.5);
        assert_eq!(c.emotional_weight, 1.0);
        assert_eq!(c.narrative_coherence, 0.0);
        assert_eq!(c.contradiction_score, 1.0);
        assert!((0.0..TAU).contains(&c.phase.theta));
    }

    #[test]
    fn test_unknown_origin_offset_is_stable() {
        let a = origin_offset("Skeptic");
        assert_eq!(a, origin_offset("skeptic"));
        assert!((0.0..TAU).contains(&a));
    }
}
