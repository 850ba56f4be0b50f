/// Golden angle in radians: 2π / φ²
pub const GOLDEN_ANGLE: f64 = 2.399_963_229_728_653_3;

/// Numerical epsilon for near-zero comparisons
pub const EPSILON: f64 = 1e-10;

/// Cosine similarity above which a new candidate is a near-duplicate.
pub const DUPLICATE_SIMILARITY: f64 = 0.95;

/// Base score weights: emotion and coherence reward, contradiction penalizes.
pub const EMOTION_WEIGHT: f64 = 1.5;
pub const COHERENCE_WEIGHT: f64 = 1.2;
pub const CONTRADICTION_WEIGHT: f64 = 1.7;

/// Multiplier on each qualifying pairwise cosine distance.
pub const DIVERSITY_FACTOR: f64 = 0.5;

/// Temperatures used when the strategy collaborator is unavailable.
pub const FALLBACK_TEMPERATURE_LOW: f64 = 0.2;
pub const FALLBACK_TEMPERATURE_HIGH: f64 = 0.8;

/// Average emotional weight at or above which the fallback goes probabilistic.
pub const FALLBACK_EMOTION_CUTOFF: f64 = 0.5;

/// Softmax never divides by a temperature smaller than this.
pub const MIN_TEMPERATURE: f64 = 1e-3;

/// Fixed confidences attached to each pattern finding.
pub const DRIFT_CONFIDENCE: f64 = 0.6;
pub const CONTRADICTION_LOOP_CONFIDENCE: f64 = 0.8;
pub const NARRATIVE_BUILDUP_CONFIDENCE: f64 = 0.7;
pub const PHASE_INTERFERENCE_CONFIDENCE: f64 = 0.65;

/// Retrieval: keyword bound and minimum keyword length.
pub const MAX_QUERY_KEYWORDS: usize = 8;
pub const MIN_KEYWORD_CHARS: usize = 4;
