//! Text embedding models.
//!
//! The [`Embedder`] trait is the seam between the index and whatever turns
//! text into vectors: the ColBERT model in [`crate::model_manager`] for real
//! use, or [`FeatureHashEmbedder`] when no model download is wanted.

use crate::error::{Error, Result};

/// Turns text into fixed-length vectors.
///
/// Implementations must be deterministic for a given model and return one
/// vector per input text, all of the same length.
pub trait Embedder: Send + Sync {
    /// Identifier recorded alongside stored vectors.
    fn model_id(&self) -> &str;

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a search query. Models that encode queries differently from
    /// documents override this.
    fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.embed(&[query.to_string()])?
            .pop()
            .ok_or_else(|| Error::EmbeddingModel("model returned no vector".into()))
    }
}

pub const FEATURE_HASH_MODEL_ID: &str = "feature-hash";

/// A model-free embedder: a signed, L2-normalized bag of hashed lowercase
/// word tokens.
///
/// Texts that share words land close together under cosine distance, which
/// is enough for offline use and for tests.
#[derive(Debug, Clone)]
pub struct FeatureHashEmbedder {
    model_id: String,
    dimension: usize,
}

impl FeatureHashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            model_id: format!("{FEATURE_HASH_MODEL_ID}-{dimension}"),
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokens(text) {
            let digest = blake3::hash(token.as_bytes());
            let bytes = digest.as_bytes();
            let mut slot = [0u8; 8];
            slot.copy_from_slice(&bytes[..8]);
            let bucket = (u64::from_le_bytes(slot) % self.dimension as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        normalize(&mut vector);
        vector
    }
}

impl Default for FeatureHashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Embedder for FeatureHashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Scale `vector` to unit length in place. Zero vectors are left alone.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}
