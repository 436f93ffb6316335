//! Per-document write path across the three stores.
//!
//! A write embeds the text first, then applies the vector, lexical and
//! metadata stages in that order while holding the exclusive side of the
//! consistency gate. If a stage fails, the stages already applied are undone
//! before the error is returned, so readers (who take the shared side of the
//! gate) only ever see a document's old state or its new one.

use std::{collections::BTreeSet, sync::Arc};

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{
    doc_id::{DocumentId, normalize_path},
    document::{
        Document,
        IndexStatus,
        IngestMetadata,
        content_hash,
        guess_mime_type,
        unix_now,
    },
    error::{Error, Result},
    lexical_index::{LexicalEntry, LexicalIndex},
    locks::KeyedLocks,
    metadata_store::{Expect, MetadataStore, normalize_tags},
    pool::EmbeddingPool,
    vector_index::VectorIndex,
};

/// The store a failed write was applying when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStage {
    Vector,
    Lexical,
    Metadata,
}

impl std::fmt::Display for IngestStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Vector => "vector",
            Self::Lexical => "lexical",
            Self::Metadata => "metadata",
        })
    }
}

/// What a successful coordinator call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOutcome {
    /// First ingest of the document.
    Indexed,
    /// Content changed and every store was rewritten.
    Updated,
    /// Same content, different tags: only the metadata row changed.
    TagsUpdated,
    /// Same content and tags: nothing was touched.
    Unchanged,
    /// Explicit reindex rewrote every store.
    Reindexed,
    Removed,
}

impl IndexOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Indexed => "indexed",
            Self::Updated => "updated",
            Self::TagsUpdated => "tags updated",
            Self::Unchanged => "unchanged",
            Self::Reindexed => "reindexed",
            Self::Removed => "removed",
        }
    }
}

impl std::fmt::Display for IndexOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Usability of one on-disk index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum Health {
    Healthy,
    Corrupt(String),
}

impl Health {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexHealth {
    pub vector: Health,
    pub lexical: Health,
}

impl IndexHealth {
    pub fn healthy() -> Self {
        Self {
            vector: Health::Healthy,
            lexical: Health::Healthy,
        }
    }

    pub fn is_degraded(&self) -> bool {
        !(self.vector.is_healthy() && self.lexical.is_healthy())
    }
}

/// The three stores plus the gate that keeps cross-store reads consistent.
pub struct Stores {
    pub metadata: MetadataStore,
    pub vectors: VectorIndex,
    pub lexical: LexicalIndex,
    pub(crate) gate: RwLock<()>,
    pub(crate) health: std::sync::RwLock<IndexHealth>,
}

impl Stores {
    pub fn new(
        metadata: MetadataStore,
        vectors: VectorIndex,
        lexical: LexicalIndex,
        health: IndexHealth,
    ) -> Self {
        Self {
            metadata,
            vectors,
            lexical,
            gate: RwLock::new(()),
            health: std::sync::RwLock::new(health),
        }
    }

    pub fn health(&self) -> Result<IndexHealth> {
        Ok(self.health.read()?.clone())
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

/// Where document text comes from when the indexes are re-derived.
pub trait ContentSource: Send + Sync {
    fn load(&self, path: &str) -> Result<String>;
}

/// Reads the file at the document's path. Invalid UTF-8 is replaced.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsContentSource;

impl ContentSource for FsContentSource {
    fn load(&self, path: &str) -> Result<String> {
        let bytes = std::fs::read(path)?;
        Ok(match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
        })
    }
}

/// Outcome of a bulk operation: one entry per document, never aborted by a
/// single failure.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub entries: Vec<BatchEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    pub path: String,
    pub report: IngestReport,
}

impl BatchReport {
    pub fn push(&mut self, path: impl Into<String>, report: IngestReport) {
        self.entries.push(BatchEntry {
            path: path.into(),
            report,
        });
    }

    pub fn count(&self, status: IngestStatus) -> usize {
        self.entries
            .iter()
            .filter(|e| e.report.status == status)
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &BatchEntry> {
        self.entries
            .iter()
            .filter(|e| e.report.status != IngestStatus::Ok)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Ok,
    /// A stage failed and the write was rolled back.
    Partial,
    Failed,
}

impl IngestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

/// Result of a single write, as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub status: IngestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<IndexOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<IngestStage>,
    pub detail: String,
}

impl IngestReport {
    pub fn from_result(result: &Result<IndexOutcome>) -> Self {
        match result {
            Ok(outcome) => Self {
                status: IngestStatus::Ok,
                outcome: Some(*outcome),
                stage: None,
                detail: outcome.to_string(),
            },
            Err(Error::PartialIngest { stage, .. }) => Self {
                status: IngestStatus::Partial,
                outcome: None,
                stage: Some(*stage),
                detail: result_error(result),
            },
            Err(_) => Self {
                status: IngestStatus::Failed,
                outcome: None,
                stage: None,
                detail: result_error(result),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == IngestStatus::Ok
    }
}

fn result_error(result: &Result<IndexOutcome>) -> String {
    result
        .as_ref()
        .err()
        .map(ToString::to_string)
        .unwrap_or_default()
}

/// Counts from an orphan sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub vectors_removed: usize,
    pub lexical_removed: usize,
    pub marked_stale: usize,
}

/// Owns every document write: ingest, removal and reindex.
pub struct Coordinator {
    stores: Arc<Stores>,
    pool: Arc<EmbeddingPool>,
    content: Arc<dyn ContentSource>,
    locks: KeyedLocks,
}

fn partial(stage: IngestStage, err: Error) -> Error {
    match err {
        // A revision conflict is reported as itself, not as a stage failure.
        Error::ConcurrentModification { .. } => err,
        other => Error::PartialIngest {
            stage,
            reason: other.to_string(),
        },
    }
}

/// Move `id` along the lifecycle, logging the step.
fn step(id: u64, from: IndexStatus, to: IndexStatus) -> IndexStatus {
    if from.can_transition_to(to) {
        debug!(doc = %DocumentId::from_numeric(id), %from, %to, "status");
    } else {
        warn!(doc = %DocumentId::from_numeric(id), %from, %to, "unexpected status transition");
    }
    to
}

/// A fully prepared write for one document.
struct Staged {
    doc: Document,
    tags: BTreeSet<String>,
    entry: LexicalEntry,
    vector: Vec<f32>,
    expect: Expect,
}

impl Coordinator {
    pub fn new(
        stores: Arc<Stores>,
        pool: Arc<EmbeddingPool>,
        content: Arc<dyn ContentSource>,
    ) -> Self {
        Self {
            stores,
            pool,
            content,
            locks: KeyedLocks::new(),
        }
    }

    pub fn stores(&self) -> &Arc<Stores> {
        &self.stores
    }

    /// Ingest `text` as the content of `path`.
    ///
    /// Unchanged content with unchanged tags touches nothing. Unchanged
    /// content with new tags rewrites only the metadata row.
    pub async fn index_document(
        &self,
        path: &str,
        text: &str,
        meta: IngestMetadata,
    ) -> Result<IndexOutcome> {
        let path = normalize_path(path);
        let id = DocumentId::for_path(&path).numeric;
        let _guard = self.locks.lock(id).await?;

        // Bad tags are the caller's error; reject them before any store is touched.
        let requested = normalize_tags(&meta.tags)?;
        let hash = content_hash(text);
        let existing = self.stores.metadata.get(id)?;

        // A stale row may have lost its index entries, so only an indexed
        // row with the same content can be skipped.
        if let Some(current) = &existing
            && current.content_hash == hash
            && current.index_status == IndexStatus::Indexed
        {
            if requested == current.tags {
                debug!(doc = %current.document_id(), "content unchanged");
                return Ok(IndexOutcome::Unchanged);
            }
            let _gate = self.stores.gate.write().await;
            self.stores.metadata.upsert(
                current,
                &requested,
                Expect::Revision(current.revision),
            )?;
            return Ok(IndexOutcome::TagsUpdated);
        }

        let (start, working, expect) = match &existing {
            None => {
                let s = step(id, IndexStatus::NotIndexed, IndexStatus::Staged);
                (IndexStatus::NotIndexed, s, Expect::Absent)
            }
            Some(current) => {
                let marked = self.mark_stale(current)?;
                let s = step(id, IndexStatus::Stale, IndexStatus::Reindexing);
                (IndexStatus::Stale, s, Expect::Revision(marked.revision))
            }
        };

        let now = unix_now();
        let doc = Document {
            id,
            path: path.clone(),
            content_hash: hash,
            size: meta.size.unwrap_or(text.len() as u64),
            mime_type: meta.mime_type.unwrap_or_else(|| guess_mime_type(&path)),
            mtime: meta.mtime.unwrap_or(now),
            tags: BTreeSet::new(),
            index_status: IndexStatus::Indexed,
            revision: 0,
            indexed_at: now,
        };

        let vector = match self.pool.embed(vec![text.to_string()]).await {
            Ok(mut vectors) => vectors.pop().ok_or_else(|| {
                Error::EmbeddingModel("model returned no vector".into())
            }),
            Err(err) => Err(err),
        };
        let vector = match vector {
            Ok(v) => v,
            Err(err) => {
                step(id, working, start);
                return Err(err);
            }
        };

        let staged = Staged {
            entry: LexicalEntry {
                id,
                path: path.clone(),
                body: text.to_string(),
                mtime: doc.mtime,
            },
            doc,
            tags: requested,
            vector,
            expect,
        };

        match self.commit(staged).await {
            Ok(_) => {
                step(id, working, IndexStatus::Indexed);
                Ok(if existing.is_some() {
                    IndexOutcome::Updated
                } else {
                    IndexOutcome::Indexed
                })
            }
            Err(err) => {
                step(id, working, start);
                Err(err)
            }
        }
    }

    /// Persist `Stale` for a row about to be rewritten.
    fn mark_stale(&self, current: &Document) -> Result<Document> {
        if current.index_status == IndexStatus::Stale {
            return Ok(current.clone());
        }
        step(current.id, current.index_status, IndexStatus::Stale);
        self.stores.metadata.set_status(current.id, IndexStatus::Stale)
    }

    async fn commit(&self, staged: Staged) -> Result<Document> {
        let _gate = self.stores.gate.write().await;
        self.apply(&staged)
    }

    /// Apply the vector, lexical and metadata stages in order, undoing the
    /// earlier ones if a later one fails. The caller holds the exclusive gate.
    fn apply(&self, staged: &Staged) -> Result<Document> {
        let stores = &self.stores;
        let id = staged.doc.id;

        let previous_vector = stores
            .vectors
            .insert(id, &staged.vector)
            .map_err(|e| partial(IngestStage::Vector, e))?;

        let previous_entry = match stores.lexical.upsert(&staged.entry) {
            Ok(prev) => prev,
            Err(err) => {
                self.undo_vector(id, previous_vector.as_deref());
                return Err(partial(IngestStage::Lexical, err));
            }
        };

        match stores
            .metadata
            .upsert(&staged.doc, &staged.tags, staged.expect)
        {
            Ok(stored) => Ok(stored),
            Err(err) => {
                self.undo_lexical(id, previous_entry.as_ref());
                self.undo_vector(id, previous_vector.as_deref());
                Err(partial(IngestStage::Metadata, err))
            }
        }
    }

    fn undo_vector(&self, id: u64, previous: Option<&[f32]>) {
        let result = match previous {
            Some(v) => self.stores.vectors.insert(id, v).map(|_| ()),
            None => self.stores.vectors.remove(id).map(|_| ()),
        };
        if let Err(err) = result {
            warn!(doc = %DocumentId::from_numeric(id), error = %err, "vector rollback failed");
        }
    }

    fn undo_lexical(&self, id: u64, previous: Option<&LexicalEntry>) {
        if let Err(err) = self.stores.lexical.restore(id, previous) {
            warn!(doc = %DocumentId::from_numeric(id), error = %err, "lexical rollback failed");
        }
    }

    /// Attach tags to a document, serialized with its other writes.
    pub async fn add_tags(&self, id: u64, tags: &BTreeSet<String>) -> Result<Document> {
        let _guard = self.locks.lock(id).await?;
        let _gate = self.stores.gate.write().await;
        self.stores.metadata.add_tags(id, tags)
    }

    /// Detach tags from a document, serialized with its other writes.
    pub async fn remove_tags(&self, id: u64, tags: &BTreeSet<String>) -> Result<Document> {
        let _guard = self.locks.lock(id).await?;
        let _gate = self.stores.gate.write().await;
        self.stores.metadata.remove_tags(id, tags)
    }

    /// Remove a document from every store, indexes first.
    pub async fn remove_document(&self, id: u64) -> Result<IndexOutcome> {
        let _guard = self.locks.lock(id).await?;
        let doc = self.stores.metadata.get(id)?.ok_or_else(|| Error::NotFound {
            kind: "document",
            name: DocumentId::from_numeric(id).to_string(),
        })?;

        let stores = &self.stores;
        let _gate = stores.gate.write().await;

        let previous_vector = stores
            .vectors
            .remove(id)
            .map_err(|e| partial(IngestStage::Vector, e))?;

        let previous_entry = match stores.lexical.remove(id) {
            Ok(prev) => prev,
            Err(err) => {
                self.undo_vector(id, previous_vector.as_deref());
                return Err(partial(IngestStage::Lexical, err));
            }
        };

        if let Err(err) = stores.metadata.delete(id) {
            self.undo_lexical(id, previous_entry.as_ref());
            self.undo_vector(id, previous_vector.as_deref());
            return Err(partial(IngestStage::Metadata, err));
        }

        step(id, doc.index_status, IndexStatus::Deleted);
        Ok(IndexOutcome::Removed)
    }

    /// Re-extract and rewrite a known document in every store.
    pub async fn reindex(&self, id: u64) -> Result<IndexOutcome> {
        let _guard = self.locks.lock(id).await?;
        let current = self.stores.metadata.get(id)?.ok_or_else(|| Error::NotFound {
            kind: "document",
            name: DocumentId::from_numeric(id).to_string(),
        })?;
        let text = self.content.load(&current.path)?;

        let marked = self.mark_stale(&current)?;
        let stale = IndexStatus::Stale;
        let working = step(id, stale, IndexStatus::Reindexing);

        let vector = match self.pool.embed(vec![text.clone()]).await {
            Ok(mut vectors) => vectors.pop().ok_or_else(|| {
                Error::EmbeddingModel("model returned no vector".into())
            })?,
            Err(err) => {
                step(id, working, stale);
                return Err(err);
            }
        };

        let now = unix_now();
        let doc = Document {
            content_hash: content_hash(&text),
            size: text.len() as u64,
            index_status: IndexStatus::Indexed,
            indexed_at: now,
            ..marked.clone()
        };
        let staged = Staged {
            entry: LexicalEntry {
                id,
                path: doc.path.clone(),
                body: text,
                mtime: doc.mtime,
            },
            tags: marked.tags.clone(),
            doc,
            vector,
            expect: Expect::Revision(marked.revision),
        };

        match self.commit(staged).await {
            Ok(_) => {
                step(id, working, IndexStatus::Indexed);
                Ok(IndexOutcome::Reindexed)
            }
            Err(err) => {
                step(id, working, stale);
                Err(err)
            }
        }
    }

    /// Clear both indexes and re-derive them from the metadata rows.
    ///
    /// Holds the exclusive gate throughout, so no query or write observes a
    /// half-built index. Documents whose content can no longer be loaded
    /// stay in the metadata store marked stale.
    pub async fn rebuild(&self) -> Result<BatchReport> {
        let stores = &self.stores;
        let _gate = stores.gate.write().await;
        info!("rebuilding vector and lexical indexes");

        stores.vectors.clear()?;
        stores.lexical.clear()?;

        let mut report = BatchReport::default();
        for doc in stores.metadata.list_documents()? {
            let result = self.rebuild_one(&doc).await;
            if let Err(err) = &result {
                warn!(path = %doc.path, error = %err, "could not rebuild document");
                if doc.index_status != IndexStatus::Stale
                    && let Err(mark) = stores.metadata.set_status(doc.id, IndexStatus::Stale)
                {
                    warn!(path = %doc.path, error = %mark, "could not mark stale");
                }
            }
            report.push(doc.path.clone(), IngestReport::from_result(&result));
        }

        *stores.health.write()? = IndexHealth::healthy();
        info!(
            documents = report.entries.len(),
            failed = report.failures().count(),
            "rebuild finished"
        );
        Ok(report)
    }

    /// Re-derive one document's index entries. Runs under the gate held by
    /// [`Coordinator::rebuild`].
    async fn rebuild_one(&self, doc: &Document) -> Result<IndexOutcome> {
        let text = self.content.load(&doc.path)?;
        let vector = self
            .pool
            .embed(vec![text.clone()])
            .await?
            .pop()
            .ok_or_else(|| Error::EmbeddingModel("model returned no vector".into()))?;

        let staged = Staged {
            entry: LexicalEntry {
                id: doc.id,
                path: doc.path.clone(),
                body: text.clone(),
                mtime: doc.mtime,
            },
            doc: Document {
                content_hash: content_hash(&text),
                size: text.len() as u64,
                index_status: IndexStatus::Indexed,
                indexed_at: unix_now(),
                ..doc.clone()
            },
            tags: doc.tags.clone(),
            vector,
            expect: Expect::Revision(doc.revision),
        };
        self.apply(&staged)?;
        Ok(IndexOutcome::Reindexed)
    }

    /// Remove index entries with no metadata row, and mark rows whose index
    /// entries are missing as stale.
    pub async fn purge_orphans(&self) -> Result<PurgeReport> {
        let stores = &self.stores;
        let _gate = stores.gate.write().await;
        let health = stores.health()?;
        let known: BTreeSet<u64> = stores.metadata.list_ids()?.into_iter().collect();
        let mut report = PurgeReport::default();

        let vector_ids: BTreeSet<u64> = stores.vectors.ids()?.into_iter().collect();
        let lexical_ids: BTreeSet<u64> = stores.lexical.ids()?.into_iter().collect();

        for id in vector_ids.difference(&known) {
            stores.vectors.remove(*id)?;
            report.vectors_removed += 1;
        }
        for id in lexical_ids.difference(&known) {
            stores.lexical.remove(*id)?;
            report.lexical_removed += 1;
        }

        // Missing entries in a corrupt index are expected until a rebuild.
        if !health.is_degraded() {
            for doc in stores.metadata.list_documents()? {
                let missing = !vector_ids.contains(&doc.id)
                    || !lexical_ids.contains(&doc.id);
                if missing && doc.index_status == IndexStatus::Indexed {
                    stores.metadata.set_status(doc.id, IndexStatus::Stale)?;
                    report.marked_stale += 1;
                }
            }
        }

        if report != PurgeReport::default() {
            warn!(
                vectors = report.vectors_removed,
                lexical = report.lexical_removed,
                stale = report.marked_stale,
                "repaired index drift"
            );
        }
        Ok(report)
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator").finish_non_exhaustive()
    }
}
