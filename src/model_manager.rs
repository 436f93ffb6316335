use std::sync::Mutex;

use candle_core::{D, Device, Tensor};
use pylate_rs::ColBERT;
use rayon::prelude::*;

use crate::{
    embedding::{Embedder, normalize},
    error::{Error, Result},
    reranker::{RelevanceScorer, map_candle_err, maxsim},
};

pub const DEFAULT_MODEL_ID: &str = "lightonai/GTE-ModernColBERT-v1";
pub const MODEL_ENV_VAR: &str = "DOCSIFT_MODEL";

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

fn model_err(e: impl std::fmt::Display) -> Error {
    Error::EmbeddingModel(e.to_string())
}

/// A ColBERT model shared by the embedding workers and the reranker.
///
/// The weights are loaded on first use. As an [`Embedder`] it mean-pools the
/// per-token vectors into one unit vector per text; as a
/// [`RelevanceScorer`] it keeps the token vectors and scores with MaxSim.
pub struct ColbertModel {
    model: Mutex<Option<ColBERT>>,
    model_id: String,
}

impl Default for ColbertModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ColbertModel {
    /// The model ID comes from `DOCSIFT_MODEL` if set, otherwise
    /// [`DEFAULT_MODEL_ID`].
    pub fn new() -> Self {
        let model_id = std::env::var(MODEL_ENV_VAR)
            .unwrap_or_else(|_| DEFAULT_MODEL_ID.to_string());
        Self::with_model_id(model_id)
    }

    pub fn with_model_id(model_id: impl Into<String>) -> Self {
        Self {
            model: Mutex::new(None),
            model_id: model_id.into(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.lock().is_ok_and(|m| m.is_some())
    }

    /// Encode `texts`, loading the model first if needed.
    ///
    /// Returns a `[batch, tokens, dim]` tensor.
    fn encode(&self, texts: &[String], is_query: bool) -> Result<Tensor> {
        let mut guard = self.model.lock()?;
        if guard.is_none() {
            tracing::info!(model = %self.model_id, "loading ColBERT model");
            let colbert: ColBERT = ColBERT::from(&self.model_id)
                .with_device(default_device())
                .try_into()
                .map_err(model_err)?;
            *guard = Some(colbert);
        }
        let model = guard
            .as_mut()
            .ok_or_else(|| Error::EmbeddingModel("model not loaded".into()))?;
        model.encode(texts, is_query).map_err(model_err)
    }
}

/// Mean over the token axis, then unit length.
fn pool(tokens: &Tensor) -> Result<Vec<f32>> {
    let mean = tokens.mean(D::Minus2).map_err(map_candle_err)?;
    let mut vector = mean.to_vec1::<f32>().map_err(map_candle_err)?;
    normalize(&mut vector);
    Ok(vector)
}

impl Embedder for ColbertModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let batch = self.encode(texts, false)?;
        (0..texts.len())
            .map(|i| pool(&batch.get(i).map_err(map_candle_err)?))
            .collect()
    }

    fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let batch = self.encode(&[query.to_string()], true)?;
        pool(&batch.squeeze(0).map_err(map_candle_err)?)
    }
}

impl RelevanceScorer for ColbertModel {
    fn score(&self, query: &str, document: &str) -> Result<f32> {
        self.score_batch(query, &[document])
            .pop()
            .unwrap_or_else(|| Err(Error::EmbeddingModel("no score".into())))
    }

    fn score_batch(&self, query: &str, documents: &[&str]) -> Vec<Result<f32>> {
        let encoded = self
            .encode(&[query.to_string()], true)
            .and_then(|q| q.squeeze(0).map_err(map_candle_err))
            .and_then(|q| {
                let texts: Vec<String> =
                    documents.iter().map(|d| d.to_string()).collect();
                Ok((q, self.encode(&texts, false)?))
            });

        match encoded {
            Ok((query_emb, docs)) => (0..documents.len())
                .into_par_iter()
                .map(|i| {
                    let doc_emb = docs.get(i).map_err(map_candle_err)?;
                    maxsim(&query_emb, &doc_emb)
                })
                .collect(),
            Err(err) => {
                let reason = err.to_string();
                documents
                    .iter()
                    .map(|_| Err(Error::EmbeddingModel(reason.clone())))
                    .collect()
            }
        }
    }
}

impl std::fmt::Debug for ColbertModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColbertModel")
            .field("model_id", &self.model_id)
            .finish_non_exhaustive()
    }
}
