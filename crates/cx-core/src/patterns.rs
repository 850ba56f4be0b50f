//! Cross-cycle pattern detection over a bounded history of collapse metrics.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{
    CONTRADICTION_LOOP_CONFIDENCE, DRIFT_CONFIDENCE, NARRATIVE_BUILDUP_CONFIDENCE,
    PHASE_INTERFERENCE_CONFIDENCE,
};
use crate::phase::Phase;
use crate::traits::Resettable;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// Ring capacity; the oldest cycle is evicted first.
    pub history_size: usize,
    /// Cycles examined by the loop and buildup detectors (at least 3).
    pub window: usize,
    pub contradiction_threshold: f64,
    /// Largest difference between successive phase deltas still counted as equal.
    pub phase_tolerance: f64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            history_size: 10,
            window: 3,
            contradiction_threshold: 0.7,
            phase_tolerance: 0.1,
        }
    }
}

/// Metrics emitted by one collapse.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CycleMetrics {
    pub contradiction: f64,
    pub coherence: f64,
    pub emotional_weight: f64,
    pub phase: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    SymbolicDrift,
    ContradictionLoop,
    NarrativeBuildup,
    PhaseInterference,
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::SymbolicDrift => "symbolic_drift",
            PatternKind::ContradictionLoop => "contradiction_loop",
            PatternKind::NarrativeBuildup => "narrative_buildup",
            PatternKind::PhaseInterference => "phase_interference",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            PatternKind::SymbolicDrift => "Saussure (1916): sliding of the signifier",
            PatternKind::ContradictionLoop => "Festinger (1957): cognitive dissonance",
            PatternKind::NarrativeBuildup => "Bruner (1991): narrative construction of reality",
            PatternKind::PhaseInterference => "Kuramoto (1975): phase locking of coupled oscillators",
        }
    }

    fn confidence(&self) -> f64 {
        match self {
            PatternKind::SymbolicDrift => DRIFT_CONFIDENCE,
            PatternKind::ContradictionLoop => CONTRADICTION_LOOP_CONFIDENCE,
            PatternKind::NarrativeBuildup => NARRATIVE_BUILDUP_CONFIDENCE,
            PatternKind::PhaseInterference => PHASE_INTERFERENCE_CONFIDENCE,
        }
    }
}

/// One cross-cycle finding. The label is informational only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergentPattern {
    pub kind: PatternKind,
    pub confidence: f64,
    pub scientific_label: String,
    pub metrics_snapshot: CycleMetrics,
}

impl EmergentPattern {
    fn new(kind: PatternKind, metrics: CycleMetrics) -> Self {
        Self {
            kind,
            confidence: kind.confidence(),
            scientific_label: kind.label().to_string(),
            metrics_snapshot: metrics,
        }
    }
}

impl fmt::Display for EmergentPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, confidence {:.2})",
            self.kind.as_str(),
            self.scientific_label,
            self.confidence
        )
    }
}

/// One recorded cycle: its ephemeral context and collapse metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleEntry {
    pub context: String,
    pub metrics: CycleMetrics,
}

/// Ring contents and latest findings, carried between processes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerState {
    pub cycles: Vec<CycleEntry>,
    pub latest: Vec<EmergentPattern>,
}

/// Bounded ring of (context, metrics) with four independent detectors.
#[derive(Debug, Clone)]
pub struct PatternAnalyzer {
    history: VecDeque<CycleEntry>,
    config: PatternConfig,
    latest: Vec<EmergentPattern>,
}

impl PatternAnalyzer {
    pub fn new(config: PatternConfig) -> Self {
        let config = PatternConfig {
            history_size: config.history_size.max(config.window.max(3)),
            window: config.window.max(3),
            ..config
        };
        Self {
            history: VecDeque::with_capacity(config.history_size),
            config,
            latest: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Findings of the most recent pass.
    pub fn latest(&self) -> &[EmergentPattern] {
        &self.latest
    }

    /// Latest findings rendered as emergent-property strings for the next cycle.
    pub fn emergent_properties(&self) -> Vec<String> {
        self.latest.iter().map(ToString::to_string).collect()
    }

    pub fn state(&self) -> AnalyzerState {
        AnalyzerState {
            cycles: self.history.iter().cloned().collect(),
            latest: self.latest.clone(),
        }
    }

    /// Replace the ring with saved cycles, keeping only the newest that fit.
    pub fn restore(&mut self, state: AnalyzerState) {
        let skip = state.cycles.len().saturating_sub(self.config.history_size);
        self.history = state.cycles.into_iter().skip(skip).collect();
        self.latest = state.latest;
    }

    /// Append a cycle and run every detector once.
    pub fn record(&mut self, context: &str, metrics: CycleMetrics) -> Vec<EmergentPattern> {
        if self.history.len() == self.config.history_size {
            self.history.pop_front();
        }
        self.history.push_back(CycleEntry {
            context: context.to_string(),
            metrics,
        });

        let findings: Vec<EmergentPattern> = [
            self.symbolic_drift(),
            self.contradiction_loop(),
            self.narrative_buildup(),
            self.phase_interference(),
        ]
        .into_iter()
        .flatten()
        .map(|kind| EmergentPattern::new(kind, metrics))
        .collect();

        self.latest = findings.clone();
        findings
    }

    fn recent(&self, n: usize) -> Option<Vec<&CycleEntry>> {
        if self.history.len() < n {
            return None;
        }
        Some(self.history.iter().skip(self.history.len() - n).collect())
    }

    fn symbolic_drift(&self) -> Option<PatternKind> {
        let last = self.recent(2)?;
        (last[0].context != last[1].context).then_some(PatternKind::SymbolicDrift)
    }

    fn contradiction_loop(&self) -> Option<PatternKind> {
        let last = self.recent(self.config.window)?;
        last.iter()
            .all(|e| e.metrics.contradiction > self.config.contradiction_threshold)
            .then_some(PatternKind::ContradictionLoop)
    }

    fn narrative_buildup(&self) -> Option<PatternKind> {
        let last = self.recent(self.config.window)?;
        last.windows(2)
            .all(|w| w[1].metrics.coherence > w[0].metrics.coherence)
            .then_some(PatternKind::NarrativeBuildup)
    }

    fn phase_interference(&self) -> Option<PatternKind> {
        let last = self.recent(3)?;
        let phases: Vec<Phase> = last
            .iter()
            .map(|e| e.metrics.phase.map(Phase::new))
            .collect::<Option<_>>()?;
        let d1 = phases[0].delta_to(phases[1]);
        let d2 = phases[1].delta_to(phases[2]);
        ((d1 - d2).abs() < self.config.phase_tolerance).then_some(PatternKind::PhaseInterference)
    }
}

impl Default for PatternAnalyzer {
    fn default() -> Self {
        Self::new(PatternConfig::default())
    }
}

impl Resettable for PatternAnalyzer {
    fn reset(&mut self) {
        self.history.clear();
        self.latest.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(contradiction: f64, coherence: f64, phase: Option<f64>) -> CycleMetrics {
        CycleMetrics {
            contradiction,
            coherence,
            emotional_weight: 0.5,
            phase,
        }
    }

    fn kinds(found: &[EmergentPattern]) -> Vec<PatternKind> {
        found.iter().map(|p| p.kind).collect()
    }

    #[test]
    fn test_loop_and_buildup_together() {
        let mut a = PatternAnalyzer::default();
        a.record("ctx", metrics(0.8, 0.5, None));
        a.record("ctx", metrics(0.75, 0.6, None));
        let found = a.record("ctx", metrics(0.9, 0.7, None));
        let k = kinds(&found);
        assert!(k.contains(&PatternKind::ContradictionLoop));
        assert!(k.contains(&PatternKind::NarrativeBuildup));
        assert!(!k.contains(&PatternKind::SymbolicDrift));
    }

    #[test]
    fn test_needs_full_window() {
        let mut a = PatternAnalyzer::default();
        a.record("ctx", metrics(0.9, 0.1, None));
        let found = a.record("ctx", metrics(0.9, 0.2, None));
        assert!(found.is_empty());
    }

    #[test]
    fn test_loop_threshold_is_strict() {
        let mut a = PatternAnalyzer::default();
        for _ in 0..3 {
            a.record("ctx", metrics(0.7, 0.5, None));
        }
        assert!(!kinds(a.latest()).contains(&PatternKind::ContradictionLoop));
    }

    #[test]
    fn test_buildup_requires_strict_increase() {
        let mut a = PatternAnalyzer::default();
        a.record("ctx", metrics(0.0, 0.5, None));
        a.record("ctx", metrics(0.0, 0.5, None));
        let found = a.record("ctx", metrics(0.0, 0.7, None));
        assert!(!kinds(&found).contains(&PatternKind::NarrativeBuildup));
    }

    #[test]
    fn test_symbolic_drift() {
        let mut a = PatternAnalyzer::default();
        assert!(a.record("budget", metrics(0.0, 0.0, None)).is_empty());
        let found = a.record("hiring", metrics(0.0, 0.0, None));
        assert_eq!(kinds(&found), vec![PatternKind::SymbolicDrift]);
        assert_eq!(found[0].confidence, DRIFT_CONFIDENCE);
    }

    #[test]
    fn test_phase_interference_equal_steps() {
        let mut a = PatternAnalyzer::default();
        a.record("ctx", metrics(0.0, 0.0, Some(6.0)));
        a.record("ctx", metrics(0.0, 0.0, Some(0.5)));
        // Wraps past 2π: both steps are about +0.78 rad.
        let found = a.record("ctx", metrics(0.0, 0.0, Some(1.28)));
        assert!(kinds(&found).contains(&PatternKind::PhaseInterference));
    }

    #[test]
    fn test_phase_interference_requires_all_phases() {
        let mut a = PatternAnalyzer::default();
        a.record("ctx", metrics(0.0, 0.0, Some(1.0)));
        a.record("ctx", metrics(0.0, 0.0, None));
        let found = a.record("ctx", metrics(0.0, 0.0, Some(3.0)));
        assert!(!kinds(&found).contains(&PatternKind::PhaseInterference));
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let mut a = PatternAnalyzer::new(PatternConfig {
            history_size: 3,
            ..Default::default()
        });
        a.record("ctx", metrics(0.1, 0.9, None));
        for c in [0.8, 0.8, 0.8] {
            a.record("ctx", metrics(c, 0.1, None));
        }
        assert_eq!(a.len(), 3);
        assert!(kinds(a.latest()).contains(&PatternKind::ContradictionLoop));
    }

    #[test]
    fn test_emergent_strings_and_reset() {
        let mut a = PatternAnalyzer::default();
        a.record("a", metrics(0.0, 0.0, None));
        a.record("b", metrics(0.0, 0.0, None));
        let props = a.emergent_properties();
        assert_eq!(props.len(), 1);
        assert!(props[0].starts_with("symbolic_drift"));
        a.reset();
        assert!(a.is_empty());
        assert!(a.emergent_properties().is_empty());
    }

    #[test]
    fn test_restore_continues_detection() {
        let mut a = PatternAnalyzer::default();
        a.record("ctx", metrics(0.9, 0.1, None));
        a.record("ctx", metrics(0.9, 0.2, None));

        let mut b = PatternAnalyzer::default();
        b.restore(a.state());
        assert_eq!(b.len(), 2);
        let found = b.record("ctx", metrics(0.9, 0.3, None));
        assert!(kinds(&found).contains(&PatternKind::ContradictionLoop));
    }

    #[test]
    fn test_restore_truncates_to_capacity() {
        let cycles = (0..15)
            .map(|i| CycleEntry {
                context: format!("c{i}"),
                metrics: metrics(0.0, 0.0, None),
            })
            .collect();
        let mut a = PatternAnalyzer::default();
        a.restore(AnalyzerState {
            cycles,
            latest: Vec::new(),
        });
        assert_eq!(a.len(), 10);
        assert_eq!(a.state().cycles[0].context, "c5");
    }
}
