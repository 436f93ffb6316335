use std::{collections::HashMap, path::Path, str::FromStr, sync::RwLock};

use rayon::prelude::*;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const HEADER: TableDefinition<&str, &str> = TableDefinition::new("header");
const VECTORS: TableDefinition<u64, &[u8]> = TableDefinition::new("vectors");

const KEY_MODEL: &str = "model_id";
const KEY_DIMENSION: &str = "dimension";
const KEY_METRIC: &str = "metric";

/// Distance metric used for nearest-neighbor ranking.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
    L2,
}

impl Metric {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::L2 => "l2",
        }
    }

    /// Distance between two equal-length vectors. Smaller is closer.
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Cosine => {
                let mut dot = 0.0f32;
                let mut na = 0.0f32;
                let mut nb = 0.0f32;
                for (x, y) in a.iter().zip(b) {
                    dot += x * y;
                    na += x * x;
                    nb += y * y;
                }
                if na == 0.0 || nb == 0.0 {
                    return 1.0;
                }
                1.0 - dot / (na.sqrt() * nb.sqrt())
            }
            Self::L2 => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
        }
    }

    /// Map a distance onto a higher-is-better similarity.
    pub fn similarity(self, distance: f32) -> f32 {
        match self {
            Self::Cosine => 1.0 - distance,
            Self::L2 => 1.0 / (1.0 + distance),
        }
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "l2" | "euclidean" => Ok(Self::L2),
            other => Err(Error::Config(format!("unknown metric '{other}'"))),
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A nearest-neighbor match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorHit {
    pub id: u64,
    pub distance: f32,
    /// Similarity derived from `distance`; higher is better.
    pub score: f32,
}

/// Exact nearest-neighbor index over one embedding vector per document.
///
/// Vectors are persisted in a per-model redb file as raw `f32` bytes and
/// mirrored in memory for scanning. The dimension is fixed by the first
/// vector stored.
pub struct VectorIndex {
    db: Database,
    model_id: String,
    metric: Metric,
    dimension: RwLock<Option<usize>>,
    vectors: RwLock<HashMap<u64, Vec<f32>>>,
}

fn corrupt(reason: impl Into<String>) -> Error {
    Error::IndexCorruption {
        index: "vector",
        reason: reason.into(),
    }
}

fn encode(vector: &[f32]) -> &[u8] {
    bytemuck::cast_slice(vector)
}

fn decode(bytes: &[u8]) -> Vec<f32> {
    // redb does not guarantee f32 alignment for stored values.
    bytemuck::pod_collect_to_vec(bytes)
}

impl VectorIndex {
    /// Open or create the vector file for `model_id`.
    ///
    /// Fails with [`Error::IndexCorruption`] if the file belongs to another
    /// model or any stored vector disagrees with the recorded dimension.
    pub fn open(path: &Path, model_id: &str, metric: Metric) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        {
            let mut header = txn.open_table(HEADER)?;
            let stored_model =
                header.get(KEY_MODEL)?.map(|v| v.value().to_string());
            match stored_model {
                Some(stored) if stored != model_id => {
                    return Err(corrupt(format!(
                        "file was built by model '{stored}', not '{model_id}'"
                    )));
                }
                Some(_) => {}
                None => {
                    header.insert(KEY_MODEL, model_id)?;
                }
            }
            header.insert(KEY_METRIC, metric.as_str())?;
            txn.open_table(VECTORS)?;
        }
        txn.commit()?;

        let (dimension, vectors) = Self::load(&db)?;
        tracing::debug!(
            model = model_id,
            vectors = vectors.len(),
            ?dimension,
            "opened vector index"
        );

        Ok(Self {
            db,
            model_id: model_id.to_string(),
            metric,
            dimension: RwLock::new(dimension),
            vectors: RwLock::new(vectors),
        })
    }

    fn load(db: &Database) -> Result<(Option<usize>, HashMap<u64, Vec<f32>>)> {
        let txn = db.begin_read()?;
        let header = txn.open_table(HEADER)?;
        let dimension = match header.get(KEY_DIMENSION)? {
            Some(v) => Some(v.value().parse::<usize>().map_err(|e| {
                corrupt(format!("unreadable dimension header: {e}"))
            })?),
            None => None,
        };

        let table = txn.open_table(VECTORS)?;
        let mut vectors = HashMap::new();
        for entry in table.iter()? {
            let (id, bytes) = entry?;
            let bytes = bytes.value();
            let Some(dim) = dimension else {
                return Err(corrupt("vectors present without a dimension"));
            };
            if bytes.len() != dim * std::mem::size_of::<f32>() {
                return Err(corrupt(format!(
                    "vector {} has {} bytes, expected {}",
                    id.value(),
                    bytes.len(),
                    dim * std::mem::size_of::<f32>()
                )));
            }
            vectors.insert(id.value(), decode(bytes));
        }
        Ok((dimension, vectors))
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn dimension(&self) -> Result<Option<usize>> {
        Ok(*self.dimension.read()?)
    }

    fn check_dimension(&self, actual: usize) -> Result<()> {
        match *self.dimension.read()? {
            Some(expected) if expected != actual => {
                Err(Error::DimensionMismatch { expected, actual })
            }
            _ => Ok(()),
        }
    }

    /// Store `vector` for `id`, returning the vector it replaced.
    pub fn insert(&self, id: u64, vector: &[f32]) -> Result<Option<Vec<f32>>> {
        if vector.is_empty() {
            return Err(Error::EmbeddingModel("empty embedding vector".into()));
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(Error::EmbeddingModel(
                "embedding contains non-finite values".into(),
            ));
        }
        let mut dimension = self.dimension.write()?;
        if let Some(expected) = *dimension
            && expected != vector.len()
        {
            return Err(Error::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }

        let txn = self.db.begin_write()?;
        {
            if dimension.is_none() {
                let mut header = txn.open_table(HEADER)?;
                header.insert(KEY_DIMENSION, vector.len().to_string().as_str())?;
            }
            let mut table = txn.open_table(VECTORS)?;
            table.insert(id, encode(vector))?;
        }
        txn.commit()?;
        *dimension = Some(vector.len());

        Ok(self.vectors.write()?.insert(id, vector.to_vec()))
    }

    /// Remove the vector for `id`, returning it if present.
    pub fn remove(&self, id: u64) -> Result<Option<Vec<f32>>> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(VECTORS)?;
            table.remove(id)?;
        }
        txn.commit()?;
        Ok(self.vectors.write()?.remove(&id))
    }

    pub fn get(&self, id: u64) -> Result<Option<Vec<f32>>> {
        Ok(self.vectors.read()?.get(&id).cloned())
    }

    pub fn contains(&self, id: u64) -> Result<bool> {
        Ok(self.vectors.read()?.contains_key(&id))
    }

    pub fn ids(&self) -> Result<Vec<u64>> {
        let mut ids: Vec<u64> = self.vectors.read()?.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.vectors.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Drop every vector and forget the dimension.
    pub fn clear(&self) -> Result<()> {
        let mut dimension = self.dimension.write()?;
        let txn = self.db.begin_write()?;
        {
            txn.delete_table(VECTORS)?;
            txn.open_table(VECTORS)?;
            let mut header = txn.open_table(HEADER)?;
            header.remove(KEY_DIMENSION)?;
        }
        txn.commit()?;
        *dimension = None;
        self.vectors.write()?.clear();
        Ok(())
    }

    /// The `k` nearest vectors to `query`, closest first.
    ///
    /// Equal distances are ordered by document id so results are stable.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let vectors = self.vectors.read()?;
        if vectors.is_empty() {
            return Ok(Vec::new());
        }
        self.check_dimension(query.len())?;

        let metric = self.metric;
        let mut hits: Vec<VectorHit> = vectors
            .par_iter()
            .map(|(&id, v)| {
                let distance = metric.distance(query, v);
                VectorHit {
                    id,
                    distance,
                    score: metric.similarity(distance),
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("model_id", &self.model_id)
            .field("metric", &self.metric)
            .finish_non_exhaustive()
    }
}
