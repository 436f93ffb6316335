use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("lexical index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid tag name: {0:?}")]
    InvalidTag(String),

    #[error("embedding model error: {0}")]
    EmbeddingModel(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("ingest failed at {stage} stage and was rolled back: {reason}")]
    PartialIngest {
        stage: crate::coordinator::IngestStage,
        reason: String,
    },

    #[error("document {id} was modified concurrently")]
    ConcurrentModification { id: String },

    #[error("{index} index is corrupt, rebuild required: {reason}")]
    IndexCorruption { index: &'static str, reason: String },

    #[error("query deadline expired before any candidates were gathered")]
    Timeout,

    #[error("embedding queue is full")]
    PoolSaturated,

    #[error("embedding pool has shut down")]
    PoolClosed,

    #[error("internal lock poisoned")]
    LockPoisoned,

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

impl Error {
    /// True for errors that describe an embedding model failure, including
    /// vectors of the wrong dimensionality.
    pub fn is_model_error(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingModel(_) | Self::DimensionMismatch { .. }
        )
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::LockPoisoned
    }
}
