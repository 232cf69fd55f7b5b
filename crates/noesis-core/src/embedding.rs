//! Embedder seam and the deterministic hash-projected reference embedder.
//!
//! The Memory Manager only sees the `Embedder` trait, so a real embedding
//! model can be substituted without touching retrieval or consolidation
//! logic. `HashEmbedder` is the deterministic placeholder: token and bigram
//! FNV-1a buckets over a fixed-length vector, L2-normalized.

/// Default embedding dimensionality.
pub const EMBEDDING_DIM: usize = 128;

/// Produces a fixed-length vector for a piece of content. Implementations
/// must be deterministic per content so content-derived memory ids stay
/// meaningful across restarts.
pub trait Embedder: Send + Sync {
    /// Embeds content into a vector of `dimensions()` length. Empty content
    /// yields the zero vector.
    fn embed(&self, content: &str) -> Vec<f32>;

    /// Vector length produced by `embed`.
    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// FNV-1a 64-bit hash. Written out here so the core carries no crypto crate
/// for what is only a bucketing function.
pub(crate) fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Deterministic hash-projected embedder. Production systems substitute a
/// real model behind the same trait.
#[derive(Debug, Clone, Default)]
pub struct HashEmbedder;

impl HashEmbedder {
    pub fn new() -> Self {
        Self
    }

    fn tokens(content: &str) -> Vec<String> {
        content
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect()
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, content: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; EMBEDDING_DIM];
        let tokens = Self::tokens(content);
        if tokens.is_empty() {
            return vector;
        }

        for token in &tokens {
            let h = fnv1a64(token.as_bytes());
            let bucket = (h % EMBEDDING_DIM as u64) as usize;
            // Sign bit from a higher hash byte spreads tokens over both
            // half-spaces instead of piling mass in one direction.
            let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        // Ordered bigrams keep some phrase structure in the projection.
        for pair in tokens.windows(2) {
            let joined = format!("{} {}", pair[0], pair[1]);
            let h = fnv1a64(joined.as_bytes());
            let bucket = (h % EMBEDDING_DIM as u64) as usize;
            let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += 0.5 * sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

/// Cosine similarity with the zero-vector case defined as 0.0, so a memory
/// without usable content never divides by zero and never matches anything.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_is_deterministic() {
        let embedder = HashEmbedder::new();
        let a = embedder.embed("the quick brown fox");
        let b = embedder.embed("the quick brown fox");
        assert_eq!(a, b);
        assert_eq!(a.len(), EMBEDDING_DIM);
    }

    #[test]
    fn identical_content_has_similarity_one() {
        let embedder = HashEmbedder::new();
        let a = embedder.embed("memory consolidation requires three members");
        let sim = cosine_similarity(&a, &a);
        assert!((sim - 1.0).abs() < 1e-5);
    }

    #[test]
    fn different_content_below_one() {
        let embedder = HashEmbedder::new();
        let a = embedder.embed("rust ownership and borrowing");
        let b = embedder.embed("giraffes eat acacia leaves");
        assert!(cosine_similarity(&a, &b) < 0.99);
    }

    #[test]
    fn zero_vector_similarity_is_zero() {
        let embedder = HashEmbedder::new();
        let empty = embedder.embed("");
        let full = embedder.embed("something");
        assert_eq!(cosine_similarity(&empty, &full), 0.0);
        assert_eq!(cosine_similarity(&empty, &empty), 0.0);
    }

    #[test]
    fn case_and_punctuation_insensitive() {
        let embedder = HashEmbedder::new();
        let a = embedder.embed("Hello, World!");
        let b = embedder.embed("hello world");
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
    }
}
