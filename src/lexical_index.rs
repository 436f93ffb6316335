use std::{path::Path, sync::Mutex};

use tantivy::{
    DocAddress,
    Index,
    IndexReader,
    IndexWriter,
    Searcher,
    TantivyDocument,
    Term,
    collector::{Count, DocSetCollector, TopDocs},
    doc,
    query::{AllQuery, QueryParser, TermQuery},
    schema::*,
    tokenizer::{
        LowerCaser,
        RemoveLongFilter,
        SimpleTokenizer,
        Stemmer,
        TextAnalyzer,
    },
};
use tracing::warn;

use crate::error::{Error, Result};

/// Field names used in the schema.
pub mod fields {
    pub const DOC_NUM_ID: &str = "doc_num_id";
    pub const PATH: &str = "path";
    pub const BODY: &str = "body";
    pub const MTIME: &str = "mtime";
}

/// Resolved field handles for the schema.
#[derive(Clone, Copy)]
struct SchemaFields {
    doc_num_id: Field,
    path: Field,
    body: Field,
    mtime: Field,
}

/// The stored form of one document in the lexical index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexicalEntry {
    pub id: u64,
    pub path: String,
    pub body: String,
    pub mtime: u64,
}

/// A BM25 match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LexicalHit {
    pub id: u64,
    pub score: f32,
}

/// Tantivy-backed full-text index with BM25 ranking.
///
/// Every mutation is committed before it returns, so a successful call is
/// immediately visible to searches.
pub struct LexicalIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: SchemaFields,
}

fn build_schema() -> Schema {
    let mut builder = Schema::builder();

    builder.add_u64_field(fields::DOC_NUM_ID, INDEXED | STORED | FAST);
    builder.add_text_field(fields::PATH, STRING | STORED);

    let body_opts = TextOptions::default()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("en_stem")
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        )
        .set_stored();
    builder.add_text_field(fields::BODY, body_opts);

    builder.add_u64_field(fields::MTIME, STORED | FAST);

    builder.build()
}

fn resolve_fields(schema: &Schema) -> Result<SchemaFields> {
    let f = |name: &str| {
        schema.get_field(name).map_err(|_| Error::IndexCorruption {
            index: "lexical",
            reason: format!("schema is missing field '{name}'"),
        })
    };
    Ok(SchemaFields {
        doc_num_id: f(fields::DOC_NUM_ID)?,
        path: f(fields::PATH)?,
        body: f(fields::BODY)?,
        mtime: f(fields::MTIME)?,
    })
}

fn register_tokenizers(index: &Index) {
    let en_stem = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(tantivy::tokenizer::Language::English))
        .build();
    index.tokenizers().register("en_stem", en_stem);
}

fn corrupt(err: impl std::fmt::Display) -> Error {
    Error::IndexCorruption {
        index: "lexical",
        reason: err.to_string(),
    }
}

impl LexicalIndex {
    /// Open or create a lexical index at the given directory.
    ///
    /// An existing index that cannot be opened, or whose schema lacks the
    /// expected fields, is reported as [`Error::IndexCorruption`].
    pub fn open(dir: &Path, memory_budget: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let mmap_dir =
            tantivy::directory::MmapDirectory::open(dir).map_err(corrupt)?;
        let index = if Index::exists(&mmap_dir).map_err(corrupt)? {
            Index::open(mmap_dir).map_err(corrupt)?
        } else {
            Index::create(
                mmap_dir,
                build_schema(),
                tantivy::IndexSettings::default(),
            )?
        };

        Self::from_index(index, memory_budget)
    }

    /// Create an in-memory index (for testing).
    pub fn open_in_ram(memory_budget: usize) -> Result<Self> {
        Self::from_index(Index::create_in_ram(build_schema()), memory_budget)
    }

    fn from_index(index: Index, memory_budget: usize) -> Result<Self> {
        let fields = resolve_fields(&index.schema())?;
        register_tokenizers(&index);
        let reader = index.reader()?;
        let writer = index.writer_with_num_threads(1, memory_budget)?;

        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            fields,
        })
    }

    fn searcher(&self) -> Result<Searcher> {
        self.reader.reload()?;
        Ok(self.reader.searcher())
    }

    fn id_term(&self, id: u64) -> Term {
        Term::from_field_u64(self.fields.doc_num_id, id)
    }

    /// Run `ops` against the writer and commit, rolling back on failure.
    fn commit_with(
        &self,
        ops: impl FnOnce(&IndexWriter, &SchemaFields) -> tantivy::Result<()>,
    ) -> Result<()> {
        let mut writer = self.writer.lock()?;
        let outcome = ops(&*writer, &self.fields)
            .and_then(|()| writer.commit().map(|_| ()));
        if let Err(err) = outcome {
            if let Err(rollback) = writer.rollback() {
                warn!(error = %rollback, "lexical rollback failed");
            }
            return Err(err.into());
        }
        drop(writer);
        self.reader.reload()?;
        Ok(())
    }

    /// Replace the entry for `entry.id`, returning the entry it replaced.
    pub fn upsert(&self, entry: &LexicalEntry) -> Result<Option<LexicalEntry>> {
        let previous = self.get(entry.id)?;
        let term = self.id_term(entry.id);
        self.commit_with(|writer, f| {
            writer.delete_term(term);
            writer.add_document(doc!(
                f.doc_num_id => entry.id,
                f.path => entry.path.as_str(),
                f.body => entry.body.as_str(),
                f.mtime => entry.mtime,
            ))?;
            Ok(())
        })?;
        Ok(previous)
    }

    /// Remove the entry for `id`, returning it if present.
    pub fn remove(&self, id: u64) -> Result<Option<LexicalEntry>> {
        let previous = self.get(id)?;
        if previous.is_some() {
            let term = self.id_term(id);
            self.commit_with(|writer, _| {
                writer.delete_term(term);
                Ok(())
            })?;
        }
        Ok(previous)
    }

    /// Put back what an `upsert` or `remove` displaced.
    pub fn restore(&self, id: u64, previous: Option<&LexicalEntry>) -> Result<()> {
        match previous {
            Some(entry) => self.upsert(entry).map(|_| ()),
            None => self.remove(id).map(|_| ()),
        }
    }

    /// Delete every entry.
    pub fn clear(&self) -> Result<()> {
        self.commit_with(|writer, _| {
            writer.delete_all_documents()?;
            Ok(())
        })
    }

    pub fn get(&self, id: u64) -> Result<Option<LexicalEntry>> {
        let searcher = self.searcher()?;
        let query = TermQuery::new(self.id_term(id), IndexRecordOption::Basic);
        let top = searcher.search(&query, &TopDocs::with_limit(1))?;
        match top.first() {
            Some((_, address)) => Ok(Some(self.load(&searcher, *address)?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, id: u64) -> Result<bool> {
        let searcher = self.searcher()?;
        let query = TermQuery::new(self.id_term(id), IndexRecordOption::Basic);
        Ok(searcher.search(&query, &Count)? > 0)
    }

    /// Every stored entry, ordered by id.
    pub fn scan(&self) -> Result<Vec<LexicalEntry>> {
        let searcher = self.searcher()?;
        let addresses = searcher.search(&AllQuery, &DocSetCollector)?;
        let mut entries = Vec::with_capacity(addresses.len());
        for address in addresses {
            entries.push(self.load(&searcher, address)?);
        }
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    pub fn ids(&self) -> Result<Vec<u64>> {
        Ok(self.scan()?.into_iter().map(|e| e.id).collect())
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.searcher()?.num_docs())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Rank entries against `query_str` with BM25.
    ///
    /// Query syntax errors are tolerated; the parsable part of the query is
    /// still run. A blank query matches nothing.
    pub fn search(&self, query_str: &str, limit: usize) -> Result<Vec<LexicalHit>> {
        if query_str.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let f = self.fields;
        let searcher = self.searcher()?;

        let parser = QueryParser::for_index(&self.index, vec![f.body]);
        let (query, _errors) = parser.parse_query_lenient(query_str);
        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            results.push(LexicalHit {
                id: extract_u64(&doc, f.doc_num_id),
                score,
            });
        }
        Ok(results)
    }

    fn load(&self, searcher: &Searcher, address: DocAddress) -> Result<LexicalEntry> {
        let f = self.fields;
        let doc: TantivyDocument = searcher.doc(address)?;
        Ok(LexicalEntry {
            id: extract_u64(&doc, f.doc_num_id),
            path: extract_text(&doc, f.path),
            body: extract_text(&doc, f.body),
            mtime: extract_u64(&doc, f.mtime),
        })
    }
}

impl std::fmt::Debug for LexicalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LexicalIndex").finish_non_exhaustive()
    }
}

fn extract_text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn extract_u64(doc: &TantivyDocument, field: Field) -> u64 {
    doc.get_first(field).and_then(|v| v.as_u64()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, path: &str, body: &str) -> LexicalEntry {
        LexicalEntry {
            id,
            path: path.to_string(),
            body: body.to_string(),
            mtime: id * 10,
        }
    }

    fn index() -> LexicalIndex {
        LexicalIndex::open_in_ram(15_000_000).unwrap()
    }

    #[test]
    fn create_and_search() {
        let idx = index();
        idx.upsert(&entry(1, "/hello.md", "This is a test document about hello world"))
            .unwrap();
        idx.upsert(&entry(2, "/rust.md", "Rust is a systems programming language"))
            .unwrap();

        let results = idx.search("hello world", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, 1);
        assert!(results[0].score > 0.0);
    }

    #[test]
    fn upsert_replaces_and_returns_previous() {
        let idx = index();
        assert_eq!(idx.upsert(&entry(1, "/a.md", "old content")).unwrap(), None);
        let previous = idx.upsert(&entry(1, "/a.md", "new content")).unwrap();
        assert_eq!(previous.unwrap().body, "old content");

        assert!(idx.search("old", 10).unwrap().is_empty());
        let results = idx.search("content", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(idx.len().unwrap(), 1);
    }

    #[test]
    fn remove_and_restore() {
        let idx = index();
        idx.upsert(&entry(1, "/a.md", "hello world")).unwrap();

        let removed = idx.remove(1).unwrap();
        assert!(removed.is_some());
        assert!(!idx.contains(1).unwrap());
        assert!(idx.search("hello", 10).unwrap().is_empty());

        idx.restore(1, removed.as_ref()).unwrap();
        assert_eq!(idx.get(1).unwrap(), removed);

        idx.restore(1, None).unwrap();
        assert!(!idx.contains(1).unwrap());
    }

    #[test]
    fn remove_missing_is_none() {
        let idx = index();
        assert_eq!(idx.remove(42).unwrap(), None);
    }

    #[test]
    fn stemming_works() {
        let idx = index();
        idx.upsert(&entry(1, "/a.md", "the runners were running quickly"))
            .unwrap();
        assert!(!idx.search("run", 10).unwrap().is_empty());
    }

    #[test]
    fn blank_query_matches_nothing() {
        let idx = index();
        idx.upsert(&entry(1, "/a.md", "anything")).unwrap();
        assert!(idx.search("   ", 10).unwrap().is_empty());
    }

    #[test]
    fn lenient_parsing_survives_syntax_errors() {
        let idx = index();
        idx.upsert(&entry(1, "/a.md", "tokio runtime internals")).unwrap();
        let results = idx.search("runtime AND (", 10).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn scan_and_clear() {
        let idx = index();
        idx.upsert(&entry(3, "/c", "c")).unwrap();
        idx.upsert(&entry(1, "/a", "a")).unwrap();
        assert_eq!(idx.ids().unwrap(), vec![1, 3]);

        idx.clear().unwrap();
        assert!(idx.is_empty().unwrap());
    }

    #[test]
    fn disk_persistence() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("lexical");

        {
            let idx = LexicalIndex::open(&dir, 15_000_000).unwrap();
            idx.upsert(&entry(7, "/a.md", "persistent data")).unwrap();
        }

        {
            let idx = LexicalIndex::open(&dir, 15_000_000).unwrap();
            let results = idx.search("persistent", 10).unwrap();
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].id, 7);
            assert_eq!(idx.get(7).unwrap().unwrap().path, "/a.md");
        }
    }

    #[test]
    fn garbage_directory_is_corruption() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("lexical");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("meta.json"), b"{ not json").unwrap();

        let err = LexicalIndex::open(&dir, 15_000_000).unwrap_err();
        assert!(matches!(err, Error::IndexCorruption { index: "lexical", .. }));
    }
}
