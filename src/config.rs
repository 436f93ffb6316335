use std::str::FromStr;

use serde::Serialize;

use crate::{
    error::{Error, Result},
    fusion,
    metadata_store::MetadataStore,
    model_manager::{DEFAULT_MODEL_ID, MODEL_ENV_VAR},
    pool::Backpressure,
    vector_index::Metric,
};

/// Keys understood in the settings table.
pub mod keys {
    pub const MODEL_ID: &str = "model_id";
    pub const METRIC: &str = "metric";
    pub const RRF_K: &str = "rrf_k";
    pub const CANDIDATES_K: &str = "candidates_k";
    pub const WORKERS: &str = "workers";
    pub const QUEUE_DEPTH: &str = "queue_depth";
    pub const BACKPRESSURE: &str = "backpressure";
    pub const QUERY_DEADLINE_MS: &str = "query_deadline_ms";
    pub const FUZZY_MIN_SCORE: &str = "fuzzy_min_score";
    pub const INCLUDE: &str = "include";
    pub const WRITER_MEMORY: &str = "writer_memory";

    pub const ALL: [&str; 11] = [
        MODEL_ID,
        METRIC,
        RRF_K,
        CANDIDATES_K,
        WORKERS,
        QUEUE_DEPTH,
        BACKPRESSURE,
        QUERY_DEADLINE_MS,
        FUZZY_MIN_SCORE,
        INCLUDE,
        WRITER_MEMORY,
    ];
}

/// Default tantivy writer budget.
pub const DEFAULT_WRITER_MEMORY: usize = 50_000_000;

/// Runtime knobs of an [`Engine`](crate::engine::Engine).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineConfig {
    pub model_id: String,
    pub metric: Metric,
    pub rrf_k: u32,
    /// How many candidates each method contributes to hybrid search and
    /// the reranker.
    pub candidates_k: usize,
    pub workers: usize,
    pub queue_depth: usize,
    pub backpressure: Backpressure,
    pub query_deadline_ms: Option<u64>,
    pub fuzzy_min_score: u32,
    /// Glob patterns a file must match to be picked up by directory sync.
    pub include: Vec<String>,
    pub writer_memory: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            metric: Metric::Cosine,
            rrf_k: fusion::DEFAULT_K,
            candidates_k: 50,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            queue_depth: 64,
            backpressure: Backpressure::Block,
            query_deadline_ms: None,
            fuzzy_min_score: 0,
            include: vec!["**/*.md".to_string(), "**/*.txt".to_string()],
            writer_memory: DEFAULT_WRITER_MEMORY,
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid value '{value}' for {key}")))
}

impl EngineConfig {
    /// Defaults, overridden by the persisted settings, overridden by the
    /// model environment variable.
    pub fn load(store: &MetadataStore) -> Result<Self> {
        let mut config = Self::default();
        for key in keys::ALL {
            if let Some(value) = store.get_setting(key)? {
                config.set(key, &value)?;
            }
        }
        if let Ok(model) = std::env::var(MODEL_ENV_VAR)
            && !model.trim().is_empty()
        {
            config.model_id = model;
        }
        Ok(config)
    }

    /// Apply one `key = value` setting.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            keys::MODEL_ID => self.model_id = value.trim().to_string(),
            keys::METRIC => self.metric = value.parse()?,
            keys::RRF_K => self.rrf_k = parse(key, value)?,
            keys::CANDIDATES_K => self.candidates_k = parse(key, value)?,
            keys::WORKERS => self.workers = parse(key, value)?,
            keys::QUEUE_DEPTH => self.queue_depth = parse(key, value)?,
            keys::BACKPRESSURE => self.backpressure = value.parse()?,
            keys::QUERY_DEADLINE_MS => {
                self.query_deadline_ms = match value.trim() {
                    "" | "none" => None,
                    ms => Some(parse(key, ms)?),
                }
            }
            keys::FUZZY_MIN_SCORE => self.fuzzy_min_score = parse(key, value)?,
            keys::INCLUDE => {
                self.include = value
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect()
            }
            keys::WRITER_MEMORY => self.writer_memory = parse(key, value)?,
            other => {
                return Err(Error::Config(format!("unknown setting '{other}'")));
            }
        }
        Ok(())
    }

    /// Validate and persist one setting.
    pub fn save(store: &MetadataStore, key: &str, value: &str) -> Result<()> {
        Self::default().set(key, value)?;
        store.set_setting(key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.rrf_k, 60);
        assert_eq!(config.metric, Metric::Cosine);
        assert_eq!(config.backpressure, Backpressure::Block);
        assert!(config.workers >= 1);
        assert_eq!(config.writer_memory, DEFAULT_WRITER_MEMORY);
    }

    #[test]
    fn persisted_settings_override_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(&tmp.path().join("m.redb")).unwrap();
        EngineConfig::save(&store, keys::RRF_K, "10").unwrap();
        EngineConfig::save(&store, keys::METRIC, "l2").unwrap();
        EngineConfig::save(&store, keys::BACKPRESSURE, "reject").unwrap();
        EngineConfig::save(&store, keys::INCLUDE, "*.rs, *.toml").unwrap();
        EngineConfig::save(&store, keys::QUERY_DEADLINE_MS, "250").unwrap();

        let config = EngineConfig::load(&store).unwrap();
        assert_eq!(config.rrf_k, 10);
        assert_eq!(config.metric, Metric::L2);
        assert_eq!(config.backpressure, Backpressure::Reject);
        assert_eq!(config.include, vec!["*.rs", "*.toml"]);
        assert_eq!(config.query_deadline_ms, Some(250));
    }

    #[test]
    fn invalid_values_are_not_persisted() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(&tmp.path().join("m.redb")).unwrap();

        assert!(EngineConfig::save(&store, keys::RRF_K, "many").is_err());
        assert!(EngineConfig::save(&store, "colour", "blue").is_err());
        assert_eq!(store.get_setting(keys::RRF_K).unwrap(), None);
    }
}
