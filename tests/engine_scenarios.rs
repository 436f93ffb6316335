use std::{
    collections::{BTreeSet, HashMap},
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use docsift::{
    DataDir,
    Embedder,
    Engine,
    EngineConfig,
    Error,
    FeatureHashEmbedder,
    HybridQuery,
    IngestMetadata,
    IngestStatus,
    RelevanceScorer,
    SearchFilters,
    coordinator::{ContentSource, IndexOutcome},
    search::{FuzzyOptions, RegexTarget, SearchMethod, SearchParams},
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn test_config() -> EngineConfig {
    EngineConfig {
        workers: 2,
        queue_depth: 16,
        ..EngineConfig::default()
    }
}

/// Serves document text from memory, so rebuilds work without files.
#[derive(Default)]
struct MemorySource {
    texts: Mutex<HashMap<String, String>>,
}

impl MemorySource {
    fn put(&self, path: &str, text: &str) {
        self.texts
            .lock()
            .unwrap()
            .insert(path.to_string(), text.to_string());
    }
}

impl ContentSource for MemorySource {
    fn load(&self, path: &str) -> docsift::Result<String> {
        self.texts
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: "content",
                name: path.to_string(),
            })
    }
}

async fn open_engine(dir: &Path, source: Arc<MemorySource>) -> docsift::Result<Engine> {
    Engine::builder()
        .config(test_config())
        .embedder(Arc::new(FeatureHashEmbedder::new(64)))
        .content_source(source)
        .open(&DataDir::resolve(Some(dir))?)
        .await
}

/// The three-document collection used throughout.
async fn seed(engine: &Engine, source: &MemorySource) {
    let docs = [
        ("/docs/doc1", "machine learning basics", vec!["ml"], 300),
        ("/docs/doc2", "cooking recipes", vec!["food"], 200),
        ("/docs/doc3", "deep learning guide", vec!["ml", "ai"], 100),
    ];
    for (path, text, tags, mtime) in docs {
        source.put(path, text);
        let report = engine
            .ingest(path, text, IngestMetadata::with_tags(tags).mtime(mtime))
            .await;
        assert!(report.is_ok(), "{path}: {}", report.detail);
    }
}

fn tags(names: &[&str]) -> SearchParams {
    SearchParams::Tags {
        tags: names.iter().map(|t| t.to_string()).collect(),
        match_all: false,
    }
}

#[tokio::test]
async fn tag_search_orders_by_recency() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let source = Arc::new(MemorySource::default());
    let engine = open_engine(tmp.path(), Arc::clone(&source)).await?;
    seed(&engine, &source).await;

    let response = engine.search(&tags(&["ml"]), 10, SearchFilters::default()).await?;
    assert_eq!(response.paths(), vec!["/docs/doc1", "/docs/doc3"]);
    assert!(response.warnings.is_empty());
    assert!(!response.degraded);
    Ok(())
}

#[tokio::test]
async fn tag_logic_and_versus_or() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let source = Arc::new(MemorySource::default());
    let engine = open_engine(tmp.path(), Arc::clone(&source)).await?;
    seed(&engine, &source).await;

    let all = SearchParams::Tags {
        tags: vec!["ml".into(), "ai".into()],
        match_all: true,
    };
    let response = engine.search(&all, 10, SearchFilters::default()).await?;
    assert_eq!(response.paths(), vec!["/docs/doc3"]);

    let any = tags(&["ai", "food"]);
    let mut paths = engine
        .search(&any, 10, SearchFilters::default())
        .await?
        .paths()
        .into_iter()
        .map(String::from)
        .collect::<Vec<_>>();
    paths.sort();
    assert_eq!(paths, vec!["/docs/doc2", "/docs/doc3"]);
    Ok(())
}

#[tokio::test]
async fn hybrid_search_ranks_matching_documents_first() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let source = Arc::new(MemorySource::default());
    let engine = open_engine(tmp.path(), Arc::clone(&source)).await?;
    seed(&engine, &source).await;

    let query = HybridQuery::new("learning")
        .methods([SearchMethod::Semantic, SearchMethod::Lexical])
        .fuse(true);
    let response = engine.hybrid_search(&query).await?;
    let paths = response.paths();

    let top: BTreeSet<&str> = paths.iter().take(2).copied().collect();
    assert_eq!(top, BTreeSet::from(["/docs/doc1", "/docs/doc3"]));
    if let Some(pos) = paths.iter().position(|p| *p == "/docs/doc2") {
        assert_eq!(pos, 2);
    }
    for result in response.results.iter().take(2) {
        assert!(result.sources.contains(&SearchMethod::Semantic));
        assert!(result.sources.contains(&SearchMethod::Lexical));
    }
    Ok(())
}

#[tokio::test]
async fn unfused_results_keep_method_order_without_duplicates() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let source = Arc::new(MemorySource::default());
    let engine = open_engine(tmp.path(), Arc::clone(&source)).await?;
    seed(&engine, &source).await;

    let query = HybridQuery::new("ml")
        .methods([SearchMethod::Lexical, SearchMethod::Tags])
        .fuse(false);
    let response = engine.hybrid_search(&query).await?;
    // Lexical finds nothing for "ml"; tags finds doc1 and doc3.
    assert_eq!(response.paths(), vec!["/docs/doc1", "/docs/doc3"]);

    let unique: BTreeSet<&str> = response.paths().into_iter().collect();
    assert_eq!(unique.len(), response.results.len());
    Ok(())
}

#[tokio::test]
async fn reingesting_unchanged_content_changes_nothing() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let source = Arc::new(MemorySource::default());
    let engine = open_engine(tmp.path(), Arc::clone(&source)).await?;
    seed(&engine, &source).await;

    let before = engine.resolve("/docs/doc1")?;
    let stats_before = engine.stats()?;

    let report = engine
        .ingest(
            "/docs/doc1",
            "machine learning basics",
            IngestMetadata::with_tags(["ml"]).mtime(300),
        )
        .await;
    assert_eq!(report.status, IngestStatus::Ok);
    assert_eq!(report.outcome, Some(IndexOutcome::Unchanged));

    assert_eq!(engine.resolve("/docs/doc1")?, before);
    assert_eq!(engine.stats()?, stats_before);
    Ok(())
}

#[tokio::test]
async fn updated_content_replaces_old_entries() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let source = Arc::new(MemorySource::default());
    let engine = open_engine(tmp.path(), Arc::clone(&source)).await?;
    seed(&engine, &source).await;

    let id = engine.resolve("/docs/doc2")?.id;
    let report = engine
        .ingest("/docs/doc2", "baking bread", IngestMetadata::with_tags(["food"]))
        .await;
    assert_eq!(report.outcome, Some(IndexOutcome::Updated));
    assert_eq!(engine.resolve("/docs/doc2")?.id, id);

    let lexical = SearchParams::Lexical {
        query: "cooking".into(),
    };
    let response = engine.search(&lexical, 10, SearchFilters::default()).await?;
    assert!(response.results.is_empty());

    let lexical = SearchParams::Lexical {
        query: "bread".into(),
    };
    let response = engine.search(&lexical, 10, SearchFilters::default()).await?;
    assert_eq!(response.paths(), vec!["/docs/doc2"]);
    assert_eq!(engine.stats()?.vectors, 3);
    Ok(())
}

#[tokio::test]
async fn removed_documents_disappear_from_every_method() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let source = Arc::new(MemorySource::default());
    let engine = open_engine(tmp.path(), Arc::clone(&source)).await?;
    seed(&engine, &source).await;

    let id = engine.resolve("/docs/doc1")?.id;
    let report = engine.remove("/docs/doc1").await;
    assert_eq!(report.outcome, Some(IndexOutcome::Removed));

    let queries = [
        SearchParams::Semantic {
            query: "machine learning basics".into(),
        },
        SearchParams::Lexical {
            query: "machine".into(),
        },
        SearchParams::Fuzzy {
            pattern: "doc1".into(),
            options: FuzzyOptions::default(),
        },
        SearchParams::Regex {
            pattern: "machine".into(),
            target: RegexTarget::Content,
        },
        tags(&["ml"]),
    ];
    for params in &queries {
        let response = engine.search(params, 10, SearchFilters::default()).await?;
        assert!(
            !response.paths().contains(&"/docs/doc1"),
            "{:?} still returns the removed document",
            params.method()
        );
    }

    let stores = engine.stores();
    assert!(!stores.vectors.contains(id)?);
    assert!(!stores.lexical.contains(id)?);
    assert_eq!(engine.stats()?.total_documents, 2);

    let again = engine.remove("/docs/doc1").await;
    assert_eq!(again.status, IngestStatus::Failed);
    Ok(())
}

/// Fails to embed any text mentioning "poison".
struct PickyEmbedder(FeatureHashEmbedder);

impl Embedder for PickyEmbedder {
    fn model_id(&self) -> &str {
        self.0.model_id()
    }

    fn embed(&self, texts: &[String]) -> docsift::Result<Vec<Vec<f32>>> {
        if texts.iter().any(|t| t.contains("poison")) {
            return Err(Error::EmbeddingModel("model refused".into()));
        }
        self.0.embed(texts)
    }
}

#[tokio::test]
async fn failed_ingest_leaves_no_trace_and_batch_continues() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let engine = Engine::builder()
        .config(test_config())
        .embedder(Arc::new(PickyEmbedder(FeatureHashEmbedder::new(32))))
        .open(&DataDir::resolve(Some(tmp.path()))?)
        .await?;

    let bad = engine
        .ingest("/docs/bad", "poison pill", IngestMetadata::default())
        .await;
    assert_eq!(bad.status, IngestStatus::Failed);
    assert!(bad.detail.contains("model refused"));

    let good = engine
        .ingest("/docs/good", "fine text", IngestMetadata::default())
        .await;
    assert!(good.is_ok());

    let stats = engine.stats()?;
    assert_eq!(stats.total_documents, 1);
    assert_eq!(stats.vectors, 1);
    assert_eq!(stats.lexical_entries, 1);
    Ok(())
}

#[tokio::test]
async fn rerank_reorders_within_the_candidate_set() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let source = Arc::new(MemorySource::default());
    let scorer: Arc<dyn RelevanceScorer> =
        Arc::new(|_query: &str, doc: &str| -> docsift::Result<f32> {
            if doc.contains("cooking") {
                Err(Error::EmbeddingModel("cannot score".into()))
            } else if doc.contains("guide") {
                Ok(10.0)
            } else {
                Ok(1.0)
            }
        });
    let engine = Engine::builder()
        .config(test_config())
        .embedder(Arc::new(FeatureHashEmbedder::new(64)))
        .reranker(scorer)
        .content_source(Arc::clone(&source) as Arc<dyn ContentSource>)
        .open(&DataDir::resolve(Some(tmp.path()))?)
        .await?;
    seed(&engine, &source).await;

    let query = HybridQuery::new("learning")
        .methods([SearchMethod::Semantic, SearchMethod::Lexical])
        .rerank(true)
        .top_k(2);
    let response = engine.hybrid_search(&query).await?;

    assert_eq!(response.paths(), vec!["/docs/doc3", "/docs/doc1"]);
    assert_eq!(response.results[0].score, 10.0);
    Ok(())
}

#[tokio::test]
async fn rerank_leaves_candidates_without_text_in_place() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let source = Arc::new(MemorySource::default());
    {
        let engine = open_engine(tmp.path(), Arc::clone(&source)).await?;
        seed(&engine, &source).await;
        engine.shutdown().await;
    }

    let data_dir = DataDir::resolve(Some(tmp.path()))?;
    std::fs::write(data_dir.lexical_dir()?.join("meta.json"), "not json")?;

    let scored = Arc::new(Mutex::new(Vec::<String>::new()));
    let seen = Arc::clone(&scored);
    let scorer: Arc<dyn RelevanceScorer> =
        Arc::new(move |_query: &str, doc: &str| -> docsift::Result<f32> {
            seen.lock().unwrap().push(doc.to_string());
            Ok(doc.len() as f32)
        });
    let engine = Engine::builder()
        .config(test_config())
        .embedder(Arc::new(FeatureHashEmbedder::new(64)))
        .reranker(scorer)
        .content_source(Arc::clone(&source) as Arc<dyn ContentSource>)
        .open(&data_dir)
        .await?;
    assert!(engine.health()?.is_degraded());

    let query = HybridQuery::new("learning").methods([SearchMethod::Semantic]);
    let fused = engine.hybrid_search(&query).await?;
    let reranked = engine.hybrid_search(&query.clone().rerank(true)).await?;

    assert_eq!(fused.results.len(), 3);
    assert_eq!(reranked.paths(), fused.paths());
    assert!(scored.lock().unwrap().is_empty());
    assert!(reranked.degraded);
    assert!(reranked.warnings.iter().any(|w| w.starts_with("rerank")));
    Ok(())
}

#[tokio::test]
async fn rerank_without_scorer_warns() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let source = Arc::new(MemorySource::default());
    let engine = open_engine(tmp.path(), Arc::clone(&source)).await?;
    seed(&engine, &source).await;

    let response = engine
        .hybrid_search(&HybridQuery::new("learning").rerank(true))
        .await?;
    assert!(!response.results.is_empty());
    assert!(response.warnings.iter().any(|w| w.starts_with("rerank")));
    Ok(())
}

#[tokio::test]
async fn malformed_regex_is_surfaced() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let source = Arc::new(MemorySource::default());
    let engine = open_engine(tmp.path(), Arc::clone(&source)).await?;
    seed(&engine, &source).await;

    let params = SearchParams::Regex {
        pattern: "(unclosed".into(),
        target: RegexTarget::Content,
    };
    let err = engine
        .search(&params, 10, SearchFilters::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidPattern { .. }));

    let query = HybridQuery::new("[").methods([SearchMethod::Regex, SearchMethod::Tags]);
    assert!(matches!(
        engine.hybrid_search(&query).await,
        Err(Error::InvalidPattern { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn score_filters_apply_after_ranking() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let source = Arc::new(MemorySource::default());
    let engine = open_engine(tmp.path(), Arc::clone(&source)).await?;
    seed(&engine, &source).await;

    let params = SearchParams::Tags {
        tags: vec!["ml".into(), "ai".into()],
        match_all: false,
    };
    // doc3 carries both tags (score 2), doc1 one (score 1).
    let filtered = engine
        .search(
            &params,
            10,
            SearchFilters {
                min_score: Some(2.0),
                max_results: None,
            },
        )
        .await?;
    assert_eq!(filtered.paths(), vec!["/docs/doc3"]);

    let capped = engine
        .search(
            &params,
            10,
            SearchFilters {
                min_score: None,
                max_results: Some(1),
            },
        )
        .await?;
    assert_eq!(capped.results.len(), 1);
    Ok(())
}

#[tokio::test]
async fn stats_count_documents_tags_and_freshness() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let source = Arc::new(MemorySource::default());
    let engine = open_engine(tmp.path(), Arc::clone(&source)).await?;
    seed(&engine, &source).await;

    let stats = engine.stats()?;
    assert_eq!(stats.total_documents, 3);
    assert_eq!(stats.total_tags, 3);
    assert_eq!(stats.total_associations, 4);
    assert_eq!(stats.index_freshness.indexed, 3);
    assert_eq!(stats.index_freshness.stale, 0);
    assert!(stats.index_freshness.last_indexed_at.is_some());
    assert_eq!(stats.vectors, 3);
    assert_eq!(stats.lexical_entries, 3);
    assert_eq!(stats.model_id, "feature-hash-64");
    Ok(())
}

#[tokio::test]
async fn tag_edits_show_up_in_tag_search() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let source = Arc::new(MemorySource::default());
    let engine = open_engine(tmp.path(), Arc::clone(&source)).await?;
    seed(&engine, &source).await;

    let doc = engine.add_tags("/docs/doc2", &BTreeSet::from(["ml".to_string()])).await?;
    assert!(doc.tags.contains("ml"));

    let response = engine.search(&tags(&["ml"]), 10, SearchFilters::default()).await?;
    assert_eq!(response.paths(), vec!["/docs/doc1", "/docs/doc2", "/docs/doc3"]);

    engine.remove_tags("/docs/doc2", &BTreeSet::from(["ml".to_string()])).await?;
    assert_eq!(
        engine.tags_of("/docs/doc2")?,
        BTreeSet::from(["food".to_string()])
    );

    let usage = engine.list_tags()?;
    let ml = usage.iter().find(|t| t.name == "ml").map(|t| t.documents);
    assert_eq!(ml, Some(2));
    Ok(())
}

#[tokio::test]
async fn documents_resolve_by_short_id() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let source = Arc::new(MemorySource::default());
    let engine = open_engine(tmp.path(), Arc::clone(&source)).await?;
    seed(&engine, &source).await;

    let doc = engine.resolve("/docs/doc3")?;
    let short = doc.document_id().extend_short(10).to_string();
    assert_eq!(engine.resolve(&short)?.path, "/docs/doc3");
    assert_eq!(engine.resolve(&doc.document_id().full_hex())?.id, doc.id);
    assert!(matches!(
        engine.resolve("/docs/missing"),
        Err(Error::NotFound { .. })
    ));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ingests_of_distinct_documents_all_land() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let source = Arc::new(MemorySource::default());
    let engine = Arc::new(open_engine(tmp.path(), source).await?);

    let tasks: Vec<_> = (0..24)
        .map(|i| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .ingest(
                        &format!("/bulk/{i}.md"),
                        &format!("document number {i}"),
                        IngestMetadata::default(),
                    )
                    .await
            })
        })
        .collect();
    for task in tasks {
        assert!(task.await?.is_ok());
    }

    let stats = engine.stats()?;
    assert_eq!(stats.total_documents, 24);
    assert_eq!(stats.vectors, 24);
    assert_eq!(stats.lexical_entries, 24);
    Ok(())
}

#[tokio::test]
async fn sync_directory_tracks_the_tree() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let data = tmp.path().join("data");
    let tree = tmp.path().join("tree");
    std::fs::create_dir_all(tree.join("sub"))?;
    std::fs::write(tree.join("a.md"), "alpha notes")?;
    std::fs::write(tree.join("sub").join("b.txt"), "beta notes")?;
    std::fs::write(tree.join("image.png"), "binary")?;

    let engine = Engine::builder()
        .config(test_config())
        .embedder(Arc::new(FeatureHashEmbedder::new(64)))
        .open(&DataDir::resolve(Some(&data))?)
        .await?;

    let mut processed = 0;
    let report = engine
        .sync_directory(&tree, |event| {
            if let docsift::engine::SyncProgress::Processed(_) = event {
                processed += 1;
            }
        })
        .await?;
    assert_eq!(report.count(IngestStatus::Ok), 2);
    assert_eq!(processed, 2);

    let b_path = tree.join("sub").join("b.txt").canonicalize()?;
    let b_path = b_path.to_string_lossy().into_owned();
    engine.add_tags(&b_path, &BTreeSet::from(["keep".to_string()])).await?;

    std::fs::remove_file(tree.join("a.md"))?;
    let report = engine.sync_directory(&tree, |_| {}).await?;
    let outcomes: Vec<_> = report
        .entries
        .iter()
        .map(|e| e.report.outcome)
        .collect();
    assert_eq!(
        outcomes,
        vec![Some(IndexOutcome::Removed), Some(IndexOutcome::Unchanged)]
    );

    assert_eq!(engine.stats()?.total_documents, 1);
    assert!(engine.tags_of(&b_path)?.contains("keep"));
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn unreadable_subdirectory_fails_alone_during_sync() -> TestResult {
    use std::os::unix::fs::PermissionsExt;

    let tmp = tempfile::tempdir()?;
    let data = tmp.path().join("data");
    let tree = tmp.path().join("tree");
    let locked = tree.join("locked");
    std::fs::create_dir_all(&locked)?;
    std::fs::write(tree.join("a.md"), "alpha notes")?;
    std::fs::write(locked.join("b.md"), "beta notes")?;

    let engine = Engine::builder()
        .config(test_config())
        .embedder(Arc::new(FeatureHashEmbedder::new(64)))
        .open(&DataDir::resolve(Some(&data))?)
        .await?;
    let report = engine.sync_directory(&tree, |_| {}).await?;
    assert_eq!(report.count(IngestStatus::Ok), 2);

    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000))?;
    // Privileged users read through the mode bits; nothing to check then.
    let readable = std::fs::read_dir(&locked).is_ok();
    let report = engine.sync_directory(&tree, |_| {}).await;
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755))?;
    if readable {
        return Ok(());
    }

    let report = report?;
    assert_eq!(report.count(IngestStatus::Ok), 1);
    assert_eq!(report.count(IngestStatus::Failed), 1);
    assert_eq!(engine.stats()?.total_documents, 2);
    Ok(())
}

#[tokio::test]
async fn corrupt_vector_file_degrades_until_rebuilt() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let source = Arc::new(MemorySource::default());
    {
        let engine = open_engine(tmp.path(), Arc::clone(&source)).await?;
        seed(&engine, &source).await;
        engine.shutdown().await;
    }

    let data_dir = DataDir::resolve(Some(tmp.path()))?;
    std::fs::write(data_dir.vectors_db("feature-hash-64")?, vec![0xAB; 8192])?;

    let engine = open_engine(tmp.path(), Arc::clone(&source)).await?;
    assert!(engine.health()?.is_degraded());

    let semantic = SearchParams::Semantic {
        query: "learning".into(),
    };
    let response = engine.search(&semantic, 10, SearchFilters::default()).await?;
    assert!(response.degraded);
    assert!(response.results.is_empty());
    assert!(!response.warnings.is_empty());

    // Other methods keep working.
    let response = engine.search(&tags(&["ml"]), 10, SearchFilters::default()).await?;
    assert_eq!(response.results.len(), 2);

    let report = engine.rebuild_indexes().await?;
    assert_eq!(report.count(IngestStatus::Ok), 3);
    assert!(!engine.health()?.is_degraded());

    let response = engine.search(&semantic, 10, SearchFilters::default()).await?;
    assert!(!response.degraded);
    assert_eq!(response.results.len(), 3);
    Ok(())
}

/// Embeds documents instantly but takes a long time over queries.
struct SlowQueries(FeatureHashEmbedder);

impl Embedder for SlowQueries {
    fn model_id(&self) -> &str {
        self.0.model_id()
    }

    fn embed(&self, texts: &[String]) -> docsift::Result<Vec<Vec<f32>>> {
        self.0.embed(texts)
    }

    fn embed_query(&self, query: &str) -> docsift::Result<Vec<f32>> {
        std::thread::sleep(Duration::from_millis(800));
        self.0.embed_query(query)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deadline_keeps_gathered_candidates() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let source = Arc::new(MemorySource::default());
    let engine = Engine::builder()
        .config(EngineConfig {
            query_deadline_ms: Some(200),
            ..test_config()
        })
        .embedder(Arc::new(SlowQueries(FeatureHashEmbedder::new(64))))
        .content_source(Arc::clone(&source) as Arc<dyn ContentSource>)
        .open(&DataDir::resolve(Some(tmp.path()))?)
        .await?;
    seed(&engine, &source).await;

    let query = HybridQuery::new("ml").methods([SearchMethod::Semantic, SearchMethod::Tags]);
    let response = engine.hybrid_search(&query).await?;
    assert!(response.timed_out);
    assert_eq!(response.paths(), vec!["/docs/doc1", "/docs/doc3"]);
    assert!(response.warnings.iter().any(|w| w.starts_with("semantic")));

    let semantic = SearchParams::Semantic { query: "ml".into() };
    let err = engine
        .search(&semantic, 10, SearchFilters::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout));
    Ok(())
}
