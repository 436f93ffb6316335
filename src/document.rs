//! Document records and the per-document index lifecycle.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::doc_id::DocumentId;

/// Lifecycle state of a document across the three stores.
///
/// Only `Indexed` and `Stale` are ever persisted; `Staged` and `Reindexing`
/// exist while the coordinator holds the document's write lock, and
/// `Deleted` is reported once the row is gone.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    NotIndexed,
    Staged,
    Indexed,
    Stale,
    Reindexing,
    Deleted,
}

impl IndexStatus {
    /// Whether the lifecycle permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: IndexStatus) -> bool {
        use IndexStatus::*;
        match (self, next) {
            (Deleted, _) => false,
            (_, Deleted) => true,
            (NotIndexed, Staged) => true,
            (Staged, Indexed) => true,
            // A failed stage rolls back to where it started.
            (Staged, NotIndexed) => true,
            (Indexed, Stale) => true,
            (Stale, Reindexing) => true,
            (Reindexing, Indexed) => true,
            (Reindexing, Stale) => true,
            _ => false,
        }
    }

    /// Move to `next`, or return `None` if the transition is not allowed.
    pub fn transition(self, next: IndexStatus) -> Option<IndexStatus> {
        self.can_transition_to(next).then_some(next)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotIndexed => "not_indexed",
            Self::Staged => "staged",
            Self::Indexed => "indexed",
            Self::Stale => "stale",
            Self::Reindexing => "reindexing",
            Self::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authoritative record of a known document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: u64,
    pub path: String,
    pub content_hash: String,
    pub size: u64,
    pub mime_type: String,
    /// Seconds since the Unix epoch.
    pub mtime: u64,
    /// Populated from the tag association tables on read; never stored
    /// inside the row itself.
    #[serde(skip)]
    pub tags: BTreeSet<String>,
    pub index_status: IndexStatus,
    /// Bumped on every committed change to the row or its tags.
    pub revision: u64,
    /// Seconds since the Unix epoch of the last successful index commit.
    pub indexed_at: u64,
}

impl Document {
    pub fn document_id(&self) -> DocumentId {
        DocumentId::from_numeric(self.id)
    }

    /// The final path segment, used by filename search.
    pub fn basename(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Caller-supplied metadata accompanying a document's text.
#[derive(Debug, Clone, Default)]
pub struct IngestMetadata {
    pub mime_type: Option<String>,
    pub mtime: Option<u64>,
    pub size: Option<u64>,
    pub tags: BTreeSet<String>,
}

impl IngestMetadata {
    pub fn with_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn mtime(mut self, mtime: u64) -> Self {
        self.mtime = Some(mtime);
        self
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// Hex-encoded blake3 digest of document text.
pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// Guess a MIME type from the path's extension.
pub fn guess_mime_type(path: &str) -> String {
    mime_guess::from_path(path)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
