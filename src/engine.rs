//! The operations a delivery layer (CLI, server) calls: ingest, remove,
//! search, hybrid search, tags and stats.

use std::{
    collections::{BTreeSet, HashMap},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::Serialize;
use tokio::{task::JoinSet, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    config::EngineConfig,
    coordinator::{
        BatchEntry,
        BatchReport,
        ContentSource,
        Coordinator,
        FsContentSource,
        Health,
        IndexHealth,
        IndexOutcome,
        IngestReport,
        PurgeReport,
        Stores,
    },
    data_dir::DataDir,
    doc_id::{DocumentId, normalize_path},
    document::{Document, IngestMetadata},
    embedding::Embedder,
    error::{Error, Result},
    fusion,
    lexical_index::LexicalIndex,
    metadata_store::{MetadataStore, TagUsage},
    model_manager::ColbertModel,
    pool::EmbeddingPool,
    reranker::{self, RelevanceScorer},
    search::{Candidate, QueryDispatcher, SearchMethod, SearchParams},
    vector_index::VectorIndex,
    walker,
};

/// Post-ranking filters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SearchFilters {
    /// Drop results scoring below this.
    pub min_score: Option<f32>,
    /// Keep at most this many results.
    pub max_results: Option<usize>,
}

/// A combined query over several retrieval methods.
#[derive(Debug, Clone, PartialEq)]
pub struct HybridQuery {
    pub query: String,
    /// Methods to run. Empty means semantic and lexical.
    pub methods: BTreeSet<SearchMethod>,
    /// Merge with reciprocal rank fusion instead of concatenating.
    pub fuse: bool,
    pub rerank: bool,
    /// Per-method candidate budget. Defaults to the configured value.
    pub candidates_k: Option<usize>,
    pub top_k: usize,
    pub filters: SearchFilters,
}

impl HybridQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            methods: BTreeSet::new(),
            fuse: true,
            rerank: false,
            candidates_k: None,
            top_k: 10,
            filters: SearchFilters::default(),
        }
    }

    pub fn methods(mut self, methods: impl IntoIterator<Item = SearchMethod>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    pub fn fuse(mut self, fuse: bool) -> Self {
        self.fuse = fuse;
        self
    }

    pub fn rerank(mut self, rerank: bool) -> Self {
        self.rerank = rerank;
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    /// Display form, e.g. `#a1b2c3`.
    pub id: String,
    #[serde(skip)]
    pub doc_num_id: u64,
    pub path: String,
    pub score: f32,
    /// Methods that returned this document.
    pub sources: Vec<SearchMethod>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    /// Methods that failed or were skipped; their results are missing.
    pub warnings: Vec<String>,
    /// An index is corrupt and results may be incomplete.
    pub degraded: bool,
    /// The deadline expired; results are what was gathered before it.
    pub timed_out: bool,
}

impl SearchResponse {
    pub fn paths(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.path.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexFreshness {
    pub indexed: u64,
    pub stale: u64,
    pub last_indexed_at: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    pub total_documents: u64,
    pub total_tags: u64,
    pub total_associations: u64,
    pub index_freshness: IndexFreshness,
    pub vectors: usize,
    pub lexical_entries: u64,
    pub model_id: String,
    pub health: IndexHealth,
}

/// Progress of a directory sync.
#[derive(Debug)]
pub enum SyncProgress<'a> {
    Discovered(usize),
    Processed(&'a BatchEntry),
}

/// Assembles an [`Engine`].
pub struct EngineBuilder {
    config: Option<EngineConfig>,
    model_id: Option<String>,
    embedder: Option<Arc<dyn Embedder>>,
    scorer: Option<Arc<dyn RelevanceScorer>>,
    content: Arc<dyn ContentSource>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            config: None,
            model_id: None,
            embedder: None,
            scorer: None,
            content: Arc::new(FsContentSource),
        }
    }
}

impl EngineBuilder {
    /// Use this configuration instead of the persisted settings.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Load this ColBERT model instead of the configured one.
    pub fn model_id(mut self, model_id: Option<String>) -> Self {
        self.model_id = model_id;
        self
    }

    /// Embed with this model instead of the configured ColBERT model.
    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn reranker(mut self, scorer: Arc<dyn RelevanceScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Where text is re-extracted from during reindex and rebuild.
    pub fn content_source(mut self, content: Arc<dyn ContentSource>) -> Self {
        self.content = content;
        self
    }

    /// Open every store under `data_dir`, start the embedding pool and
    /// sweep orphaned index entries.
    ///
    /// A vector file or lexical directory that fails to load is moved aside
    /// and replaced with an empty one; the engine then runs degraded until
    /// [`Engine::rebuild_indexes`] succeeds.
    pub async fn open(self, data_dir: &DataDir) -> Result<Engine> {
        let metadata = MetadataStore::open(&data_dir.metadata_db())?;
        let mut config = match self.config {
            Some(config) => config,
            None => EngineConfig::load(&metadata)?,
        };
        if let Some(model_id) = self.model_id {
            config.model_id = model_id;
        }

        let mut scorer = self.scorer;
        let embedder = match self.embedder {
            Some(embedder) => embedder,
            None => {
                let model = Arc::new(ColbertModel::with_model_id(&config.model_id));
                if scorer.is_none() {
                    scorer = Some(Arc::clone(&model) as Arc<dyn RelevanceScorer>);
                }
                model as Arc<dyn Embedder>
            }
        };

        let mut health = IndexHealth::healthy();
        let vectors = open_vectors(data_dir, embedder.model_id(), &config, &mut health)?;
        let lexical = open_lexical(data_dir, &config, &mut health)?;
        if health.is_degraded() {
            warn!(?health, "running degraded; rebuild the indexes to recover");
        }

        let stores = Arc::new(Stores::new(metadata, vectors, lexical, health));
        let pool = Arc::new(EmbeddingPool::new(
            embedder,
            config.workers,
            config.queue_depth,
            config.backpressure,
        ));
        let coordinator = Arc::new(Coordinator::new(
            Arc::clone(&stores),
            Arc::clone(&pool),
            self.content,
        ));
        let dispatcher = Arc::new(QueryDispatcher::new(
            Arc::clone(&stores),
            Arc::clone(&pool),
            config.fuzzy_min_score,
        ));

        let engine = Engine {
            root: data_dir.root().to_path_buf(),
            config,
            stores,
            pool,
            coordinator,
            dispatcher,
            scorer,
        };
        engine.coordinator.purge_orphans().await?;
        Ok(engine)
    }
}

fn open_vectors(
    data_dir: &DataDir,
    model_id: &str,
    config: &EngineConfig,
    health: &mut IndexHealth,
) -> Result<VectorIndex> {
    let path = data_dir.vectors_db(model_id)?;
    match VectorIndex::open(&path, model_id, config.metric) {
        Ok(index) => Ok(index),
        Err(err) => {
            let moved = data_dir.quarantine(&path)?;
            warn!(error = %err, moved = %moved.display(), "vector index failed to load");
            health.vector = Health::Corrupt(err.to_string());
            VectorIndex::open(&path, model_id, config.metric)
        }
    }
}

fn open_lexical(
    data_dir: &DataDir,
    config: &EngineConfig,
    health: &mut IndexHealth,
) -> Result<LexicalIndex> {
    let dir = data_dir.lexical_dir()?;
    match LexicalIndex::open(&dir, config.writer_memory) {
        Ok(index) => Ok(index),
        Err(err) => {
            let moved = data_dir.quarantine(&dir)?;
            warn!(error = %err, moved = %moved.display(), "lexical index failed to load");
            health.lexical = Health::Corrupt(err.to_string());
            LexicalIndex::open(&data_dir.lexical_dir()?, config.writer_memory)
        }
    }
}

/// A document collection with its stores, embedding pool and query
/// machinery.
pub struct Engine {
    root: PathBuf,
    config: EngineConfig,
    stores: Arc<Stores>,
    pool: Arc<EmbeddingPool>,
    coordinator: Arc<Coordinator>,
    dispatcher: Arc<QueryDispatcher>,
    scorer: Option<Arc<dyn RelevanceScorer>>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stores(&self) -> &Arc<Stores> {
        &self.stores
    }

    pub fn health(&self) -> Result<IndexHealth> {
        self.stores.health()
    }

    /// Persist a setting. Takes effect the next time the engine is opened.
    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        EngineConfig::save(&self.stores.metadata, key, value)
    }

    // -- Documents --

    /// Index `text` as the content of `path`.
    pub async fn ingest(
        &self,
        path: &str,
        text: &str,
        meta: IngestMetadata,
    ) -> IngestReport {
        let result = self.coordinator.index_document(path, text, meta).await;
        if let Err(err) = &result {
            warn!(path, error = %err, "ingest failed");
        }
        IngestReport::from_result(&result)
    }

    /// Remove a document by path or id.
    pub async fn remove(&self, reference: &str) -> IngestReport {
        let result = match self.resolve(reference) {
            Ok(doc) => self.coordinator.remove_document(doc.id).await,
            Err(err) => Err(err),
        };
        IngestReport::from_result(&result)
    }

    /// Re-extract a document through the content source and rewrite it.
    pub async fn reindex(&self, reference: &str) -> IngestReport {
        let result = match self.resolve(reference) {
            Ok(doc) => self.coordinator.reindex(doc.id).await,
            Err(err) => Err(err),
        };
        IngestReport::from_result(&result)
    }

    /// Look a document up by path, `#short` id or full hex id.
    pub fn resolve(&self, reference: &str) -> Result<Document> {
        let metadata = &self.stores.metadata;
        if let Some(doc) = metadata.get_by_path(&normalize_path(reference))? {
            return Ok(doc);
        }

        let not_found = || Error::NotFound {
            kind: "document",
            name: reference.to_string(),
        };

        if let Some(id) = DocumentId::parse_full(reference) {
            return metadata.get(id.numeric)?.ok_or_else(not_found);
        }

        let prefix = reference.strip_prefix('#').unwrap_or(reference).to_ascii_lowercase();
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(not_found());
        }
        let matches: Vec<u64> = metadata
            .list_ids()?
            .into_iter()
            .filter(|id| DocumentId::from_numeric(*id).full_hex().starts_with(&prefix))
            .collect();
        match matches.as_slice() {
            [id] => metadata.get(*id)?.ok_or_else(not_found),
            [] => Err(not_found()),
            _ => Err(Error::Config(format!(
                "id '{reference}' is ambiguous; use more digits"
            ))),
        }
    }

    pub fn documents(&self) -> Result<Vec<Document>> {
        self.stores.metadata.list_documents()
    }

    // -- Tags --

    pub async fn add_tags(&self, reference: &str, tags: &BTreeSet<String>) -> Result<Document> {
        let doc = self.resolve(reference)?;
        self.coordinator.add_tags(doc.id, tags).await
    }

    pub async fn remove_tags(
        &self,
        reference: &str,
        tags: &BTreeSet<String>,
    ) -> Result<Document> {
        let doc = self.resolve(reference)?;
        self.coordinator.remove_tags(doc.id, tags).await
    }

    pub fn tags_of(&self, reference: &str) -> Result<BTreeSet<String>> {
        Ok(self.resolve(reference)?.tags)
    }

    pub fn list_tags(&self) -> Result<Vec<TagUsage>> {
        self.stores.metadata.list_tags()
    }

    // -- Queries --

    /// Run one retrieval method.
    ///
    /// Failures other than a malformed pattern come back as an empty result
    /// with a warning.
    pub async fn search(
        &self,
        params: &SearchParams,
        k: usize,
        filters: SearchFilters,
    ) -> Result<SearchResponse> {
        let mut response = self.empty_response()?;
        let method = params.method();

        let run = self.dispatcher.dispatch(params, k);
        let outcome = match self.deadline() {
            Some(deadline) => match tokio::time::timeout(deadline, run).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout),
            },
            None => run.await,
        };

        match outcome {
            Ok(candidates) => {
                response.results = candidates.into_iter().map(single).collect();
            }
            Err(err) => self.degrade(method, err, &mut response)?,
        }

        apply_filters(&mut response.results, filters);
        Ok(response)
    }

    /// Run several methods concurrently and merge their rankings.
    ///
    /// With a deadline configured, methods still running when it expires
    /// are dropped and the candidates gathered so far are used; if none
    /// were gathered the query fails with [`Error::Timeout`].
    pub async fn hybrid_search(&self, query: &HybridQuery) -> Result<SearchResponse> {
        let mut response = self.empty_response()?;
        let methods: Vec<SearchMethod> = if query.methods.is_empty() {
            vec![SearchMethod::Semantic, SearchMethod::Lexical]
        } else {
            query.methods.iter().copied().collect()
        };
        let candidates_k = query.candidates_k.unwrap_or(self.config.candidates_k).max(query.top_k);

        let mut tasks = JoinSet::new();
        for method in &methods {
            let dispatcher = Arc::clone(&self.dispatcher);
            let params = SearchParams::from_query(*method, &query.query);
            tasks.spawn(async move {
                let result = dispatcher.dispatch(&params, candidates_k).await;
                (params.method(), result)
            });
        }

        let deadline = self.deadline().map(|d| Instant::now() + d);
        let mut lists: Vec<(SearchMethod, Vec<Candidate>)> = Vec::new();
        loop {
            let next = match deadline {
                Some(at) => match tokio::time::timeout_at(at, tasks.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        response.timed_out = true;
                        tasks.abort_all();
                        break;
                    }
                },
                None => tasks.join_next().await,
            };
            let Some(joined) = next else { break };
            let (method, result) = joined.map_err(|e| {
                Error::EmbeddingModel(format!("search task failed: {e}"))
            })?;
            match result {
                Ok(candidates) => lists.push((method, candidates)),
                Err(err) => self.degrade(method, err, &mut response)?,
            }
        }

        if response.timed_out {
            if lists.iter().all(|(_, c)| c.is_empty()) {
                return Err(Error::Timeout);
            }
            for method in &methods {
                if !lists.iter().any(|(m, _)| m == method) {
                    response.warnings.push(format!("{method}: deadline expired"));
                }
            }
        }
        lists.sort_by_key(|(method, _)| *method);

        let mut results = if query.fuse {
            self.fused(&lists)
        } else {
            concatenated(&lists)
        };
        results.truncate(candidates_k);

        if query.rerank {
            match &self.scorer {
                Some(scorer) => {
                    let (reranked, unscorable) = self
                        .reranked(Arc::clone(scorer), &query.query, results, query.top_k)
                        .await?;
                    if unscorable > 0 {
                        response.warnings.push(format!(
                            "rerank: {unscorable} candidates have no stored text and kept their rank"
                        ));
                    }
                    results = reranked;
                }
                None => response.warnings.push("rerank: no relevance scorer configured".into()),
            }
        }

        results.truncate(query.top_k);
        apply_filters(&mut results, query.filters);
        response.results = results;
        Ok(response)
    }

    fn fused(&self, lists: &[(SearchMethod, Vec<Candidate>)]) -> Vec<SearchResult> {
        let ids: Vec<Vec<u64>> = lists
            .iter()
            .map(|(_, c)| c.iter().map(|c| c.doc_num_id).collect())
            .collect();
        let mut by_id: HashMap<u64, (String, Vec<SearchMethod>)> = HashMap::new();
        for (method, candidates) in lists {
            for c in candidates {
                by_id
                    .entry(c.doc_num_id)
                    .or_insert_with(|| (c.path.clone(), Vec::new()))
                    .1
                    .push(*method);
            }
        }

        fusion::fuse(&ids, self.config.rrf_k)
            .into_iter()
            .filter_map(|fused| {
                let (path, mut sources) = by_id.remove(&fused.doc_num_id)?;
                sources.dedup();
                Some(SearchResult {
                    id: DocumentId::from_numeric(fused.doc_num_id).to_string(),
                    doc_num_id: fused.doc_num_id,
                    path,
                    score: fused.fused_score as f32,
                    sources,
                })
            })
            .collect()
    }

    /// Rerank `results` against their stored text. Also returns how many
    /// candidates had no text and so kept their place.
    async fn reranked(
        &self,
        scorer: Arc<dyn RelevanceScorer>,
        query: &str,
        results: Vec<SearchResult>,
        limit: usize,
    ) -> Result<(Vec<SearchResult>, usize)> {
        let candidates = {
            let _gate = self.stores.gate.read().await;
            let mut texts = Vec::with_capacity(results.len());
            for r in &results {
                let body = self.stores.lexical.get(r.doc_num_id)?.map(|e| e.body);
                texts.push((r.doc_num_id, body));
            }
            texts
        };
        let unscorable = candidates.iter().filter(|(_, t)| t.is_none()).count();
        if unscorable > 0 {
            warn!(unscorable, "rerank candidates missing from the lexical index");
        }

        let query = query.to_string();
        let ranked = tokio::task::spawn_blocking(move || {
            reranker::rerank(scorer.as_ref(), &query, &candidates, limit)
        })
        .await
        .map_err(|e| Error::EmbeddingModel(format!("rerank task failed: {e}")))?;

        let reranked = ranked
            .into_iter()
            .filter_map(|r| {
                let mut result = results.get(r.original_rank)?.clone();
                if let Some(score) = r.score {
                    result.score = score;
                }
                Some(result)
            })
            .collect();
        Ok((reranked, unscorable))
    }

    fn deadline(&self) -> Option<Duration> {
        self.config.query_deadline_ms.map(Duration::from_millis)
    }

    fn empty_response(&self) -> Result<SearchResponse> {
        let health = self.stores.health()?;
        let mut response = SearchResponse {
            degraded: health.is_degraded(),
            ..SearchResponse::default()
        };
        if let Health::Corrupt(reason) = &health.vector {
            response.warnings.push(format!("vector index unusable: {reason}"));
        }
        if let Health::Corrupt(reason) = &health.lexical {
            response.warnings.push(format!("lexical index unusable: {reason}"));
        }
        Ok(response)
    }

    /// Turn a method failure into a warning, or surface it if the query
    /// itself is malformed.
    fn degrade(
        &self,
        method: SearchMethod,
        err: Error,
        response: &mut SearchResponse,
    ) -> Result<()> {
        match err {
            Error::InvalidPattern { .. } => Err(err),
            Error::Timeout => {
                response.timed_out = true;
                Err(err)
            }
            other => {
                warn!(%method, error = %other, "search method failed");
                response.warnings.push(format!("{method}: {other}"));
                Ok(())
            }
        }
    }

    // -- Maintenance --

    /// Bring the collection in line with the files under `root`.
    ///
    /// New and changed files are ingested with up to `workers` in flight;
    /// documents under `root` whose file is gone are removed. Existing tags
    /// are kept. Unreadable entries become failed report entries and the
    /// documents beneath them are left alone.
    pub async fn sync_directory(
        &self,
        root: &Path,
        mut progress: impl FnMut(SyncProgress<'_>),
    ) -> Result<BatchReport> {
        let include = walker::include_set(&self.config.include)?;
        let discovery = walker::discover_files(root, &include)?;
        let root = normalize_path(&root.canonicalize()?.to_string_lossy());
        progress(SyncProgress::Discovered(
            discovery.files.len() + discovery.skipped.len(),
        ));

        let mut report = BatchReport::default();
        let mut seen = BTreeSet::new();
        let mut tasks = JoinSet::new();
        let limit = self.config.workers.max(1);

        // Documents under an unreadable entry are kept as they are.
        let mut unreadable = Vec::new();
        for skipped in discovery.skipped {
            let path = normalize_path(&skipped.path.to_string_lossy());
            unreadable.push(format!("{}/", path.trim_end_matches('/')));
            seen.insert(path.clone());
            record(&mut report, &mut progress, path, &Err(skipped.error));
        }

        for file in discovery.files {
            let path = normalize_path(&file.absolute_path.to_string_lossy());
            seen.insert(path.clone());

            let text = match std::fs::read(&file.absolute_path) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(err) => {
                    record(&mut report, &mut progress, path, &Err(err.into()));
                    continue;
                }
            };
            let tags = self
                .stores
                .metadata
                .get_by_path(&path)?
                .map(|d| d.tags)
                .unwrap_or_default();
            let meta = IngestMetadata {
                mtime: Some(file.mtime),
                size: Some(file.size),
                tags,
                ..IngestMetadata::default()
            };

            if tasks.len() >= limit
                && let Some(joined) = tasks.join_next().await
            {
                let (path, result) = joined.map_err(|e| {
                    Error::EmbeddingModel(format!("ingest task failed: {e}"))
                })?;
                record(&mut report, &mut progress, path, &result);
            }

            let coordinator = Arc::clone(&self.coordinator);
            tasks.spawn(async move {
                let result = coordinator.index_document(&path, &text, meta).await;
                (path, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (path, result) = joined
                .map_err(|e| Error::EmbeddingModel(format!("ingest task failed: {e}")))?;
            record(&mut report, &mut progress, path, &result);
        }

        let prefix = format!("{}/", root.trim_end_matches('/'));
        for doc in self.stores.metadata.list_documents()? {
            let shielded = unreadable.iter().any(|dir| doc.path.starts_with(dir.as_str()));
            if doc.path.starts_with(&prefix) && !seen.contains(&doc.path) && !shielded {
                debug!(path = %doc.path, "source disappeared");
                let result = self.coordinator.remove_document(doc.id).await;
                record(&mut report, &mut progress, doc.path, &result);
            }
        }

        report.entries.sort_by(|a, b| a.path.cmp(&b.path));
        info!(
            root = %root,
            documents = report.entries.len(),
            failed = report.failures().count(),
            "sync finished"
        );
        Ok(report)
    }

    /// Clear and re-derive both indexes from the metadata store.
    pub async fn rebuild_indexes(&self) -> Result<BatchReport> {
        self.coordinator.rebuild().await
    }

    pub async fn purge_orphans(&self) -> Result<PurgeReport> {
        self.coordinator.purge_orphans().await
    }

    pub fn stats(&self) -> Result<Stats> {
        let counts = self.stores.metadata.counts()?;
        Ok(Stats {
            total_documents: counts.documents,
            total_tags: counts.tags,
            total_associations: counts.associations,
            index_freshness: IndexFreshness {
                indexed: counts.indexed,
                stale: counts.stale,
                last_indexed_at: counts.last_indexed_at,
            },
            vectors: self.stores.vectors.len()?,
            lexical_entries: self.stores.lexical.len()?,
            model_id: self.pool.model_id().to_string(),
            health: self.stores.health()?,
        })
    }

    /// Stop the embedding workers after they drain queued jobs.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

fn record(
    report: &mut BatchReport,
    progress: &mut impl FnMut(SyncProgress<'_>),
    path: String,
    result: &Result<IndexOutcome>,
) {
    report.push(path, IngestReport::from_result(result));
    if let Some(entry) = report.entries.last() {
        progress(SyncProgress::Processed(entry));
    }
}

fn single(candidate: Candidate) -> SearchResult {
    SearchResult {
        id: DocumentId::from_numeric(candidate.doc_num_id).to_string(),
        doc_num_id: candidate.doc_num_id,
        path: candidate.path,
        score: candidate.score,
        sources: vec![candidate.source],
    }
}

/// Lists in order, keeping each document's first appearance.
fn concatenated(lists: &[(SearchMethod, Vec<Candidate>)]) -> Vec<SearchResult> {
    let mut seen = HashMap::new();
    let mut results: Vec<SearchResult> = Vec::new();
    for (_, candidates) in lists {
        for c in candidates {
            match seen.get(&c.doc_num_id) {
                Some(&at) => {
                    let result: &mut SearchResult = &mut results[at];
                    result.sources.push(c.source);
                }
                None => {
                    seen.insert(c.doc_num_id, results.len());
                    results.push(single(c.clone()));
                }
            }
        }
    }
    results
}

fn apply_filters(results: &mut Vec<SearchResult>, filters: SearchFilters) {
    if let Some(min) = filters.min_score {
        results.retain(|r| r.score >= min);
    }
    if let Some(max) = filters.max_results {
        results.truncate(max);
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("root", &self.root)
            .field("model_id", &self.pool.model_id())
            .finish_non_exhaustive()
    }
}
