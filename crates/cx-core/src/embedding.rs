use async_trait::async_trait;

use crate::error::Result;
use crate::tokenizer::tokenize;
use crate::traits::Embedder;

/// Deterministic local embedder using signed feature hashing over tokens.
///
/// Texts sharing vocabulary land close together, which is all the engine's
/// similarity checks need when no remote embedding service is configured.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Synchronous embedding; empty text yields an empty vector.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Vec::new();
        }
        let mut v = vec![0.0f32; self.dims];
        for token in &tokens {
            let h = fnv1a(token.as_bytes());
            let idx = (h % self.dims as u64) as usize;
            let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }
}

/// 64-bit FNV-1a.
pub(crate) fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::cosine_similarity;

    #[test]
    fn test_deterministic() {
        let e = HashingEmbedder::new(64);
        assert_eq!(e.embed_text("budget review"), e.embed_text("budget review"));
    }

    #[test]
    fn test_unit_norm_and_dims() {
        let v = HashingEmbedder::new(32).embed_text("the quick brown fox");
        assert_eq!(v.len(), 32);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_vocabulary_is_closer() {
        let e = HashingEmbedder::default();
        let a = e.embed_text("quarterly budget review meeting");
        let b = e.embed_text("budget review for the quarter");
        let c = e.embed_text("sourdough starter hydration");
        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
    }

    #[test]
    fn test_empty_text() {
        assert!(HashingEmbedder::default().embed_text("  ,, ").is_empty());
    }
}
