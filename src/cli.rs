use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use docsift::search::{RegexTarget, SearchMethod};

#[derive(Debug, Parser)]
#[command(
    name = "docsift",
    about = "Index files and search them by meaning, words, names, patterns or tags"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the ColBERT model ID or local model path
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Use the built-in hashing embedder instead of downloading a model
    #[arg(long, global = true)]
    pub offline: bool,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Index one file
    Ingest(IngestArgs),
    /// Index every matching file under a directory and drop vanished ones
    Sync(SyncArgs),
    /// Remove a document from every index
    Remove {
        /// Document path or #id
        reference: String,
    },
    /// Re-read a document from disk and rewrite its index entries
    Reindex {
        /// Document path or #id
        reference: String,
    },
    /// Search with a single method
    Search(SearchArgs),
    /// Search with several methods and merge the rankings
    Hybrid(HybridArgs),
    /// Add or remove tags on a document
    Tag {
        #[command(subcommand)]
        action: TagAction,
    },
    /// List tags and how many documents carry each
    Tags,
    /// Show collection and index statistics
    Stats,
    /// Clear and re-derive the vector and lexical indexes
    Rebuild,
    /// Read or change persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Ingest --

#[derive(Debug, Parser)]
pub struct IngestArgs {
    /// File to index
    pub path: PathBuf,

    /// Tags to attach (comma-separated or repeated)
    #[arg(short, long, value_delimiter = ',')]
    pub tag: Vec<String>,

    /// Override the detected MIME type
    #[arg(long)]
    pub mime_type: Option<String>,
}

// -- Sync --

#[derive(Debug, Parser)]
pub struct SyncArgs {
    /// Directory to sync
    pub root: PathBuf,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

// -- Tags --

#[derive(Debug, Subcommand)]
pub enum TagAction {
    /// Attach tags to a document
    Add {
        /// Document path or #id
        reference: String,
        #[arg(required = true, value_delimiter = ',')]
        tags: Vec<String>,
    },
    /// Detach tags from a document
    Remove {
        /// Document path or #id
        reference: String,
        #[arg(required = true, value_delimiter = ',')]
        tags: Vec<String>,
    },
    /// Show a document's tags
    Show {
        /// Document path or #id
        reference: String,
    },
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Persist a setting
    Set { key: String, value: String },
}

// -- Search --

#[derive(Debug, Parser)]
pub struct FilterArgs {
    /// Number of results to return
    #[arg(short = 'n', long, default_value = "10")]
    pub count: usize,

    /// Minimum score threshold
    #[arg(long)]
    pub min_score: Option<f32>,

    /// Output only file paths (one per line)
    #[arg(long)]
    pub files: bool,
}

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The query, pattern or comma-separated tags
    pub query: String,

    /// Retrieval method
    #[arg(short, long, default_value = "semantic", value_parser = parse_method)]
    pub method: SearchMethod,

    /// Tags: require every tag instead of any
    #[arg(long)]
    pub all: bool,

    /// Fuzzy: match case exactly
    #[arg(long)]
    pub case_sensitive: bool,

    /// Fuzzy: require the whole file name to match
    #[arg(long)]
    pub exact: bool,

    /// Regex: match against `content` or `filename`
    #[arg(long, default_value = "content", value_parser = parse_target)]
    pub target: RegexTarget,

    #[command(flatten)]
    pub filter: FilterArgs,
}

#[derive(Debug, Parser)]
pub struct HybridArgs {
    /// The query
    pub query: String,

    /// Methods to combine (comma-separated)
    #[arg(
        short,
        long,
        value_delimiter = ',',
        default_value = "semantic,lexical",
        value_parser = parse_method
    )]
    pub methods: Vec<SearchMethod>,

    /// Concatenate rankings instead of fusing them
    #[arg(long)]
    pub no_fuse: bool,

    /// Reorder the candidates with the relevance model
    #[arg(long)]
    pub rerank: bool,

    /// Candidates each method contributes
    #[arg(long)]
    pub candidates: Option<usize>,

    #[command(flatten)]
    pub filter: FilterArgs,
}

fn parse_method(s: &str) -> Result<SearchMethod, String> {
    s.parse().map_err(|e: docsift::Error| e.to_string())
}

fn parse_target(s: &str) -> Result<RegexTarget, String> {
    s.parse().map_err(|e: docsift::Error| e.to_string())
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "docsift",
            &mut std::io::stdout(),
        );
    }
}
