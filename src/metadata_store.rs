use std::{collections::BTreeSet, path::Path};

use redb::{
    Database,
    MultimapTableDefinition,
    ReadableDatabase,
    ReadableMultimapTable,
    ReadableTable,
    TableDefinition,
};
use serde::Serialize;

use crate::{
    document::{Document, IndexStatus},
    error::{Error, Result},
};

const FILES: TableDefinition<u64, &[u8]> = TableDefinition::new("files");
const PATHS: TableDefinition<&str, u64> = TableDefinition::new("paths");
const TAGS: TableDefinition<&str, u64> = TableDefinition::new("tags");
const TAG_NAMES: TableDefinition<u64, &str> =
    TableDefinition::new("tag_names");
const FILE_TAGS: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("file_tags");
const TAG_FILES: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("tag_files");
const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

const NEXT_TAG_ID: &str = "next_tag_id";

/// Authoritative record of documents, tags and their associations.
///
/// Every mutation runs in a single redb write transaction, so a row and its
/// tag associations are always committed together.
pub struct MetadataStore {
    db: Database,
}

/// A tag with the number of documents carrying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagUsage {
    pub name: String,
    pub documents: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub documents: u64,
    pub tags: u64,
    pub associations: u64,
    pub indexed: u64,
    pub stale: u64,
    /// Most recent `indexed_at` across all rows.
    pub last_indexed_at: Option<u64>,
}

/// How an upsert should treat an existing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// Write unconditionally.
    Any,
    /// The row must not exist yet.
    Absent,
    /// The row must exist with exactly this revision.
    Revision(u64),
}

/// Trim and validate tag names.
pub fn normalize_tags<'a, I>(tags: I) -> Result<BTreeSet<String>>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut out = BTreeSet::new();
    for tag in tags {
        let trimmed = tag.trim();
        if trimmed.is_empty() || trimmed.contains(',') {
            return Err(Error::InvalidTag(tag.clone()));
        }
        out.insert(trimmed.to_string());
    }
    Ok(out)
}

fn tag_names_for(
    file_tags: &impl ReadableMultimapTable<u64, u64>,
    tag_names: &impl ReadableTable<u64, &'static str>,
    file_id: u64,
) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    for tag_id in file_tags.get(file_id)? {
        let tag_id = tag_id?.value();
        if let Some(name) = tag_names.get(tag_id)? {
            names.insert(name.value().to_string());
        }
    }
    Ok(names)
}

fn decode_row(bytes: &[u8]) -> Result<Document> {
    Ok(serde_json::from_slice(bytes)?)
}

impl MetadataStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        // Ensure all tables exist by opening them in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(FILES)?;
        txn.open_table(PATHS)?;
        txn.open_table(TAGS)?;
        txn.open_table(TAG_NAMES)?;
        txn.open_multimap_table(FILE_TAGS)?;
        txn.open_multimap_table(TAG_FILES)?;
        txn.open_table(SETTINGS)?;
        txn.open_table(COUNTERS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    // -- Documents --

    pub fn get(&self, id: u64) -> Result<Option<Document>> {
        let txn = self.db.begin_read()?;
        let files = txn.open_table(FILES)?;
        let Some(bytes) = files.get(id)? else {
            return Ok(None);
        };
        let mut doc = decode_row(bytes.value())?;
        let file_tags = txn.open_multimap_table(FILE_TAGS)?;
        let tag_names = txn.open_table(TAG_NAMES)?;
        doc.tags = tag_names_for(&file_tags, &tag_names, id)?;
        Ok(Some(doc))
    }

    pub fn get_by_path(&self, path: &str) -> Result<Option<Document>> {
        let id = {
            let txn = self.db.begin_read()?;
            let paths = txn.open_table(PATHS)?;
            paths.get(path)?.map(|v| v.value())
        };
        match id {
            Some(id) => self.get(id),
            None => Ok(None),
        }
    }

    /// Insert or replace a document row and its full tag set.
    ///
    /// The stored revision is one past the previous row's (or 1 for a new
    /// row); the committed document is returned.
    pub fn upsert(
        &self,
        doc: &Document,
        tags: &BTreeSet<String>,
        expect: Expect,
    ) -> Result<Document> {
        let tags = normalize_tags(tags)?;

        let txn = self.db.begin_write()?;
        let stored = {
            let mut files = txn.open_table(FILES)?;
            let previous = files
                .get(doc.id)?
                .map(|v| decode_row(v.value()))
                .transpose()?;

            check_expectation(doc.id, previous.as_ref(), expect)?;

            let mut stored = doc.clone();
            stored.revision =
                previous.as_ref().map_or(1, |p| p.revision + 1);
            files.insert(doc.id, serde_json::to_vec(&stored)?.as_slice())?;

            let mut paths = txn.open_table(PATHS)?;
            if let Some(prev) = &previous
                && prev.path != stored.path
            {
                paths.remove(prev.path.as_str())?;
            }
            paths.insert(stored.path.as_str(), doc.id)?;

            stored.tags = tags.clone();
            stored
        };
        self.replace_tags_in(&txn, doc.id, &tags)?;
        txn.commit()?;
        Ok(stored)
    }

    /// Remove a row and its tag associations. Tags themselves survive.
    pub fn delete(&self, id: u64) -> Result<Option<Document>> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut files = txn.open_table(FILES)?;
            let removed = files
                .remove(id)?
                .map(|v| decode_row(v.value()))
                .transpose()?;
            if let Some(doc) = &removed {
                let mut paths = txn.open_table(PATHS)?;
                paths.remove(doc.path.as_str())?;
            }
            removed
        };
        if removed.is_some() {
            self.replace_tags_in(&txn, id, &BTreeSet::new())?;
        }
        txn.commit()?;
        Ok(removed)
    }

    /// Change a row's persisted status, bumping its revision.
    pub fn set_status(&self, id: u64, status: IndexStatus) -> Result<Document> {
        let txn = self.db.begin_write()?;
        let doc = {
            let mut files = txn.open_table(FILES)?;
            let mut doc = files
                .get(id)?
                .map(|v| decode_row(v.value()))
                .transpose()?
                .ok_or_else(|| not_found(id))?;
            doc.index_status = status;
            doc.revision += 1;
            files.insert(id, serde_json::to_vec(&doc)?.as_slice())?;
            doc
        };
        txn.commit()?;
        self.get(id)?.ok_or_else(|| not_found(doc.id))
    }

    pub fn add_tags(
        &self,
        id: u64,
        tags: &BTreeSet<String>,
    ) -> Result<Document> {
        let add = normalize_tags(tags)?;
        self.edit_tags(id, |current| current.extend(add))
    }

    pub fn remove_tags(
        &self,
        id: u64,
        tags: &BTreeSet<String>,
    ) -> Result<Document> {
        let remove = normalize_tags(tags)?;
        self.edit_tags(id, |current| current.retain(|t| !remove.contains(t)))
    }

    fn edit_tags(
        &self,
        id: u64,
        edit: impl FnOnce(&mut BTreeSet<String>),
    ) -> Result<Document> {
        let txn = self.db.begin_write()?;
        let mut tags = {
            let file_tags = txn.open_multimap_table(FILE_TAGS)?;
            let tag_names = txn.open_table(TAG_NAMES)?;
            tag_names_for(&file_tags, &tag_names, id)?
        };
        {
            let mut files = txn.open_table(FILES)?;
            let mut doc = files
                .get(id)?
                .map(|v| decode_row(v.value()))
                .transpose()?
                .ok_or_else(|| not_found(id))?;
            doc.revision += 1;
            files.insert(id, serde_json::to_vec(&doc)?.as_slice())?;
        }
        edit(&mut tags);
        self.replace_tags_in(&txn, id, &tags)?;
        txn.commit()?;
        self.get(id)?.ok_or_else(|| not_found(id))
    }

    fn replace_tags_in(
        &self,
        txn: &redb::WriteTransaction,
        file_id: u64,
        tags: &BTreeSet<String>,
    ) -> Result<()> {
        let mut file_tags = txn.open_multimap_table(FILE_TAGS)?;
        let mut tag_files = txn.open_multimap_table(TAG_FILES)?;
        let mut tag_ids = txn.open_table(TAGS)?;
        let mut tag_names = txn.open_table(TAG_NAMES)?;
        let mut counters = txn.open_table(COUNTERS)?;

        let old: Vec<u64> = file_tags
            .remove_all(file_id)?
            .map(|g| g.map(|v| v.value()))
            .collect::<std::result::Result<_, _>>()?;
        for tag_id in old {
            tag_files.remove(tag_id, file_id)?;
        }

        for name in tags {
            let existing = tag_ids.get(name.as_str())?.map(|v| v.value());
            let tag_id = match existing {
                Some(tag_id) => tag_id,
                None => {
                    let next =
                        counters.get(NEXT_TAG_ID)?.map_or(1, |v| v.value());
                    counters.insert(NEXT_TAG_ID, next + 1)?;
                    tag_ids.insert(name.as_str(), next)?;
                    tag_names.insert(next, name.as_str())?;
                    next
                }
            };
            file_tags.insert(file_id, tag_id)?;
            tag_files.insert(tag_id, file_id)?;
        }
        Ok(())
    }

    /// Documents carrying all (`match_all`) or any of the given tags.
    pub fn documents_with_tags(
        &self,
        tags: &[String],
        match_all: bool,
    ) -> Result<Vec<Document>> {
        let wanted: BTreeSet<&str> =
            tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()).collect();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let ids: BTreeSet<u64> = {
            let txn = self.db.begin_read()?;
            let tag_ids = txn.open_table(TAGS)?;
            let tag_files = txn.open_multimap_table(TAG_FILES)?;

            let mut per_tag: Vec<BTreeSet<u64>> = Vec::new();
            for name in &wanted {
                let mut files = BTreeSet::new();
                if let Some(tag_id) = tag_ids.get(*name)? {
                    for file in tag_files.get(tag_id.value())? {
                        files.insert(file?.value());
                    }
                }
                per_tag.push(files);
            }

            if match_all {
                let mut iter = per_tag.into_iter();
                let first = iter.next().unwrap_or_default();
                iter.fold(first, |acc, s| {
                    acc.intersection(&s).copied().collect()
                })
            } else {
                per_tag.into_iter().flatten().collect()
            }
        };

        let mut docs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(doc) = self.get(id)? {
                docs.push(doc);
            }
        }
        Ok(docs)
    }

    /// All documents with their tags, in a single read transaction.
    pub fn list_documents(&self) -> Result<Vec<Document>> {
        let txn = self.db.begin_read()?;
        let files = txn.open_table(FILES)?;
        let file_tags = txn.open_multimap_table(FILE_TAGS)?;
        let tag_names = txn.open_table(TAG_NAMES)?;
        let mut result = Vec::new();
        for entry in files.iter()? {
            let (k, v) = entry?;
            let mut doc = decode_row(v.value())?;
            doc.tags = tag_names_for(&file_tags, &tag_names, k.value())?;
            result.push(doc);
        }
        Ok(result)
    }

    pub fn list_ids(&self) -> Result<Vec<u64>> {
        let txn = self.db.begin_read()?;
        let files = txn.open_table(FILES)?;
        let mut result = Vec::new();
        for entry in files.iter()? {
            let (k, _v) = entry?;
            result.push(k.value());
        }
        Ok(result)
    }

    pub fn contains(&self, id: u64) -> Result<bool> {
        let txn = self.db.begin_read()?;
        let files = txn.open_table(FILES)?;
        Ok(files.get(id)?.is_some())
    }

    pub fn list_tags(&self) -> Result<Vec<TagUsage>> {
        let txn = self.db.begin_read()?;
        let tag_ids = txn.open_table(TAGS)?;
        let tag_files = txn.open_multimap_table(TAG_FILES)?;
        let mut result = Vec::new();
        for entry in tag_ids.iter()? {
            let (name, tag_id) = entry?;
            let documents = tag_files.get(tag_id.value())?.count() as u64;
            result.push(TagUsage {
                name: name.value().to_string(),
                documents,
            });
        }
        Ok(result)
    }

    pub fn counts(&self) -> Result<StoreCounts> {
        let txn = self.db.begin_read()?;
        let files = txn.open_table(FILES)?;
        let tag_ids = txn.open_table(TAGS)?;
        let file_tags = txn.open_multimap_table(FILE_TAGS)?;

        let mut counts = StoreCounts::default();
        for entry in files.iter()? {
            let (_, v) = entry?;
            let doc = decode_row(v.value())?;
            counts.documents += 1;
            match doc.index_status {
                IndexStatus::Stale => counts.stale += 1,
                _ => counts.indexed += 1,
            }
            counts.last_indexed_at =
                counts.last_indexed_at.max(Some(doc.indexed_at));
        }
        for entry in tag_ids.iter()? {
            entry?;
            counts.tags += 1;
        }
        for entry in file_tags.iter()? {
            let (_, values) = entry?;
            counts.associations += values.count() as u64;
        }
        Ok(counts)
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    /// Get a setting, returning the default if not set.
    pub fn get_setting_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get_setting(key)?
            .unwrap_or_else(|| default.to_string()))
    }
}

fn check_expectation(
    id: u64,
    previous: Option<&Document>,
    expect: Expect,
) -> Result<()> {
    let ok = match (expect, previous) {
        (Expect::Any, _) => true,
        (Expect::Absent, prev) => prev.is_none(),
        (Expect::Revision(r), Some(prev)) => prev.revision == r,
        (Expect::Revision(_), None) => false,
    };
    if ok {
        Ok(())
    } else {
        Err(Error::ConcurrentModification {
            id: crate::doc_id::DocumentId::from_numeric(id).to_string(),
        })
    }
}

fn not_found(id: u64) -> Error {
    Error::NotFound {
        kind: "document",
        name: crate::doc_id::DocumentId::from_numeric(id).to_string(),
    }
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore").finish_non_exhaustive()
    }
}
