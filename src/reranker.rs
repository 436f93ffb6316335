use candle_core::Tensor;
use rayon::prelude::*;
use tracing::debug;

use crate::error::{Error, Result};

/// Scores how well a document answers a query. Higher is more relevant.
pub trait RelevanceScorer: Send + Sync {
    fn score(&self, query: &str, document: &str) -> Result<f32>;

    /// Score many documents against one query. Each pair fails on its own.
    fn score_batch(&self, query: &str, documents: &[&str]) -> Vec<Result<f32>> {
        documents
            .par_iter()
            .map(|doc| self.score(query, doc))
            .collect()
    }
}

impl<F> RelevanceScorer for F
where
    F: Fn(&str, &str) -> Result<f32> + Send + Sync,
{
    fn score(&self, query: &str, document: &str) -> Result<f32> {
        self(query, document)
    }
}

/// A reranked candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedDocument {
    pub doc_num_id: u64,
    /// `None` when scoring failed and the document kept its prior slot.
    pub score: Option<f32>,
    /// Position in the input ranking.
    pub original_rank: usize,
}

/// Reorder `candidates` by relevance to `query`.
///
/// Candidates without text, or whose pair fails to score, stay at their
/// input position; the scored ones fill the remaining positions by
/// descending score (input order breaks ties). At most `limit` documents are
/// returned, all drawn from the input.
pub fn rerank(
    scorer: &dyn RelevanceScorer,
    query: &str,
    candidates: &[(u64, Option<String>)],
    limit: usize,
) -> Vec<RankedDocument> {
    let texts: Vec<&str> = candidates.iter().filter_map(|(_, t)| t.as_deref()).collect();
    let mut outcomes = scorer.score_batch(query, &texts);
    // A scorer returning the wrong number of results fails the missing pairs.
    outcomes.resize_with(texts.len(), || {
        Err(Error::EmbeddingModel("scorer returned too few scores".into()))
    });
    let mut outcomes = outcomes.into_iter();

    let mut slots: Vec<Option<RankedDocument>> = vec![None; candidates.len()];
    let mut scored = Vec::new();
    for (rank, (id, text)) in candidates.iter().enumerate() {
        let outcome = if text.is_some() { outcomes.next() } else { None };
        match outcome {
            Some(Ok(score)) if score.is_finite() => scored.push(RankedDocument {
                doc_num_id: *id,
                score: Some(score),
                original_rank: rank,
            }),
            Some(Ok(score)) => {
                debug!(doc = id, score, "non-finite rerank score, keeping rank");
                slots[rank] = Some(unscored(*id, rank));
            }
            Some(Err(err)) => {
                debug!(doc = id, error = %err, "rerank scoring failed, keeping rank");
                slots[rank] = Some(unscored(*id, rank));
            }
            None => {
                debug!(doc = id, "no text to rerank, keeping rank");
                slots[rank] = Some(unscored(*id, rank));
            }
        }
    }

    scored.sort_by(|a, b| {
        b.score
            .unwrap_or(f32::MIN)
            .total_cmp(&a.score.unwrap_or(f32::MIN))
            .then(a.original_rank.cmp(&b.original_rank))
    });

    let mut scored = scored.into_iter();
    let mut ranked: Vec<RankedDocument> = slots
        .into_iter()
        .filter_map(|slot| slot.or_else(|| scored.next()))
        .collect();
    ranked.truncate(limit);
    ranked
}

fn unscored(id: u64, rank: usize) -> RankedDocument {
    RankedDocument {
        doc_num_id: id,
        score: None,
        original_rank: rank,
    }
}

/// Compute the MaxSim score between a query embedding and a document embedding.
///
/// query_embedding: [Q, D] where Q = query tokens, D = embedding dimension
/// doc_embedding: [T, D] where T = document tokens, D = embedding dimension
///
/// MaxSim = sum over query tokens of max(query_token . doc_token for all doc tokens)
pub fn maxsim(query_embedding: &Tensor, doc_embedding: &Tensor) -> Result<f32> {
    let sim_matrix = query_embedding
        .matmul(&doc_embedding.t().map_err(map_candle_err)?)
        .map_err(map_candle_err)?;

    // Best document token per query token.
    let row_maxes = sim_matrix.max(1).map_err(map_candle_err)?;

    let score = row_maxes
        .sum_all()
        .map_err(map_candle_err)?
        .to_scalar::<f32>()
        .map_err(map_candle_err)?;

    Ok(score)
}

pub(crate) fn map_candle_err(e: candle_core::Error) -> Error {
    Error::EmbeddingModel(format!("tensor computation error: {e}"))
}
