use std::{collections::BTreeSet, process::ExitCode, sync::Arc, time::SystemTime};

use clap::Parser;
use docsift::{
    BatchReport,
    DataDir,
    Engine,
    EngineConfig,
    FeatureHashEmbedder,
    HybridQuery,
    IngestMetadata,
    IngestReport,
    MetadataStore,
    SearchFilters,
    SearchResponse,
    config::keys,
    coordinator::IngestStatus,
    engine::SyncProgress,
    error::Result,
    search::{FuzzyOptions, SearchMethod, SearchParams},
};
use kdam::{BarExt, tqdm};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command, ConfigAction, FilterArgs, TagAction};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCSIFT_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(ExitCode::SUCCESS);
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;

    // Settings only need the metadata store.
    if let Command::Config { action } = &cli.command {
        let store = MetadataStore::open(&data_dir.metadata_db())?;
        return config_command(&store, action, cli.json).map(|_| ExitCode::SUCCESS);
    }

    let mut builder = Engine::builder().model_id(cli.model.clone());
    if cli.offline {
        builder = builder.embedder(Arc::new(FeatureHashEmbedder::default()));
    }
    let engine = builder.open(&data_dir).await?;

    let code = dispatch(&engine, &cli).await;
    engine.shutdown().await;
    code
}

async fn dispatch(engine: &Engine, cli: &Cli) -> Result<ExitCode> {
    let json = cli.json;
    match &cli.command {
        Command::Ingest(args) => {
            let path = args.path.canonicalize()?;
            let bytes = std::fs::read(&path)?;
            let file_meta = std::fs::metadata(&path)?;
            let mtime = file_meta
                .modified()
                .unwrap_or(SystemTime::UNIX_EPOCH)
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();

            let mut meta = IngestMetadata::with_tags(args.tag.iter().cloned()).mtime(mtime);
            meta.size = Some(file_meta.len());
            if let Some(mime) = &args.mime_type {
                meta = meta.mime_type(mime.clone());
            }

            let text = String::from_utf8_lossy(&bytes);
            let report = engine.ingest(&path.to_string_lossy(), &text, meta).await;
            Ok(print_report(&report, json))
        }
        Command::Remove { reference } => Ok(print_report(&engine.remove(reference).await, json)),
        Command::Reindex { reference } => Ok(print_report(&engine.reindex(reference).await, json)),
        Command::Sync(args) => {
            let show_bar = !args.no_progress && !json;
            let mut bar = None;
            let report = engine
                .sync_directory(&args.root, |event| match event {
                    SyncProgress::Discovered(total) if show_bar => {
                        bar = Some(tqdm!(total = total, desc = "Syncing", unit = " files"));
                    }
                    SyncProgress::Processed(_) => {
                        if let Some(bar) = bar.as_mut() {
                            let _ = bar.update(1);
                        }
                    }
                    _ => {}
                })
                .await?;
            if show_bar {
                eprintln!();
            }
            Ok(print_batch(&report, json))
        }
        Command::Search(args) => {
            let params = match args.method {
                SearchMethod::Semantic => SearchParams::Semantic {
                    query: args.query.clone(),
                },
                SearchMethod::Lexical => SearchParams::Lexical {
                    query: args.query.clone(),
                },
                SearchMethod::Fuzzy => SearchParams::Fuzzy {
                    pattern: args.query.clone(),
                    options: FuzzyOptions {
                        case_sensitive: args.case_sensitive,
                        exact: args.exact,
                    },
                },
                SearchMethod::Regex => SearchParams::Regex {
                    pattern: args.query.clone(),
                    target: args.target,
                },
                SearchMethod::Tags => SearchParams::Tags {
                    tags: split_tags(&args.query),
                    match_all: args.all,
                },
            };
            let response = engine
                .search(&params, args.filter.count, filters(&args.filter))
                .await?;
            print_response(&response, &args.filter, json);
            Ok(ExitCode::SUCCESS)
        }
        Command::Hybrid(args) => {
            let query = HybridQuery {
                candidates_k: args.candidates,
                filters: filters(&args.filter),
                ..HybridQuery::new(args.query.clone())
                    .methods(args.methods.iter().copied())
                    .fuse(!args.no_fuse)
                    .rerank(args.rerank)
                    .top_k(args.filter.count)
            };
            let response = engine.hybrid_search(&query).await?;
            print_response(&response, &args.filter, json);
            Ok(ExitCode::SUCCESS)
        }
        Command::Tag { action } => {
            match action {
                TagAction::Add { reference, tags } => {
                    let doc = engine.add_tags(reference, &tags.iter().cloned().collect()).await?;
                    print_tags(&doc.path, &doc.tags, json);
                }
                TagAction::Remove { reference, tags } => {
                    let doc = engine.remove_tags(reference, &tags.iter().cloned().collect()).await?;
                    print_tags(&doc.path, &doc.tags, json);
                }
                TagAction::Show { reference } => {
                    print_tags(reference, &engine.tags_of(reference)?, json);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Tags => {
            let tags = engine.list_tags()?;
            if json {
                print_json(&tags);
            } else if tags.is_empty() {
                println!("No tags.");
            } else {
                for tag in tags {
                    println!("{:>6}  {}", tag.documents, tag.name);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Stats => {
            let stats = engine.stats()?;
            if json {
                print_json(&stats);
            } else {
                println!("Documents:    {}", stats.total_documents);
                println!("Tags:         {}", stats.total_tags);
                println!("Tag links:    {}", stats.total_associations);
                println!("Indexed:      {}", stats.index_freshness.indexed);
                println!("Stale:        {}", stats.index_freshness.stale);
                if let Some(at) = stats.index_freshness.last_indexed_at {
                    println!("Last indexed: {at}");
                }
                println!("Vectors:      {}", stats.vectors);
                println!("Text entries: {}", stats.lexical_entries);
                println!("Model:        {}", stats.model_id);
                if stats.health.is_degraded() {
                    println!("Status:       degraded (run `docsift rebuild`)");
                } else {
                    println!("Status:       healthy");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Rebuild => {
            let report = engine.rebuild_indexes().await?;
            Ok(print_batch(&report, json))
        }
        Command::Config { .. } | Command::Completions(_) => Ok(ExitCode::SUCCESS),
    }
}

fn config_command(store: &MetadataStore, action: &ConfigAction, json: bool) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = EngineConfig::load(store)?;
            if json {
                print_json(&config);
            } else {
                for key in keys::ALL {
                    let value = store
                        .get_setting(key)?
                        .unwrap_or_else(|| "(default)".to_string());
                    println!("{key} = {value}");
                }
            }
        }
        ConfigAction::Set { key, value } => {
            EngineConfig::save(store, key, value)?;
            println!("{key} = {value}");
        }
    }
    Ok(())
}

fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

fn filters(args: &FilterArgs) -> SearchFilters {
    SearchFilters {
        min_score: args.min_score,
        max_results: Some(args.count),
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(out) => println!("{out}"),
        Err(err) => eprintln!("error: could not serialize output: {err}"),
    }
}

fn print_report(report: &IngestReport, json: bool) -> ExitCode {
    if json {
        print_json(report);
    } else {
        match report.status {
            IngestStatus::Ok => println!("{}", report.detail),
            IngestStatus::Partial | IngestStatus::Failed => {
                eprintln!("{}: {}", report.status.as_str(), report.detail)
            }
        }
    }
    if report.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_batch(report: &BatchReport, json: bool) -> ExitCode {
    if json {
        print_json(report);
    } else {
        for entry in report.failures() {
            eprintln!("{}: {}", entry.path, entry.report.detail);
        }
        println!(
            "{} ok, {} partial, {} failed",
            report.count(IngestStatus::Ok),
            report.count(IngestStatus::Partial),
            report.count(IngestStatus::Failed)
        );
    }
    if report.failures().next().is_none() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_response(response: &SearchResponse, args: &FilterArgs, json: bool) {
    for warning in &response.warnings {
        eprintln!("warning: {warning}");
    }
    if json {
        print_json(response);
        return;
    }
    if args.files {
        for r in &response.results {
            println!("{}", r.path);
        }
        return;
    }
    if response.results.is_empty() {
        println!("No results.");
        return;
    }
    for (i, r) in response.results.iter().enumerate() {
        let sources: Vec<&str> = r.sources.iter().map(|m| m.as_str()).collect();
        println!(
            "{:>3}. {:.4}  {} {}  [{}]",
            i + 1,
            r.score,
            r.id,
            r.path,
            sources.join(",")
        );
    }
}

fn print_tags(label: &str, tags: &BTreeSet<String>, json: bool) {
    if json {
        print_json(tags);
    } else {
        let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
        println!("{label}: {}", tags.join(", "));
    }
}
