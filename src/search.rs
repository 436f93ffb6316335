use std::{collections::HashMap, str::FromStr, sync::Arc};

use nucleo_matcher::{
    Config,
    Matcher,
    Utf32Str,
    pattern::{AtomKind, CaseMatching, Normalization, Pattern},
};
use regex::RegexBuilder;
use serde::Serialize;

use crate::{
    coordinator::{Health, Stores},
    document::Document,
    error::{Error, Result},
    pool::EmbeddingPool,
};

/// Regexes larger than this compiled size are rejected.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// The retrieval strategies a query can be routed to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    Semantic,
    Lexical,
    Fuzzy,
    Regex,
    Tags,
}

impl SearchMethod {
    pub const ALL: [SearchMethod; 5] = [
        Self::Semantic,
        Self::Lexical,
        Self::Fuzzy,
        Self::Regex,
        Self::Tags,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Lexical => "lexical",
            Self::Fuzzy => "fuzzy",
            Self::Regex => "regex",
            Self::Tags => "tags",
        }
    }
}

impl FromStr for SearchMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Config(format!("unknown search method '{s}'")))
    }
}

impl std::fmt::Display for SearchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FuzzyOptions {
    pub case_sensitive: bool,
    /// Require the whole basename to equal the pattern.
    pub exact: bool,
}

/// What a regex is matched against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegexTarget {
    #[default]
    Content,
    Filename,
}

impl FromStr for RegexTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "content" => Ok(Self::Content),
            "filename" | "name" => Ok(Self::Filename),
            other => Err(Error::Config(format!("unknown regex target '{other}'"))),
        }
    }
}

/// Method-specific query input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchParams {
    Semantic { query: String },
    Lexical { query: String },
    Fuzzy { pattern: String, options: FuzzyOptions },
    Regex { pattern: String, target: RegexTarget },
    Tags { tags: Vec<String>, match_all: bool },
}

impl SearchParams {
    pub fn method(&self) -> SearchMethod {
        match self {
            Self::Semantic { .. } => SearchMethod::Semantic,
            Self::Lexical { .. } => SearchMethod::Lexical,
            Self::Fuzzy { .. } => SearchMethod::Fuzzy,
            Self::Regex { .. } => SearchMethod::Regex,
            Self::Tags { .. } => SearchMethod::Tags,
        }
    }

    /// Build the parameters for `method` from a single query string, as
    /// hybrid search does. Tags are comma-separated and OR-matched.
    pub fn from_query(method: SearchMethod, query: &str) -> Self {
        let query = query.to_string();
        match method {
            SearchMethod::Semantic => Self::Semantic { query },
            SearchMethod::Lexical => Self::Lexical { query },
            SearchMethod::Fuzzy => Self::Fuzzy {
                pattern: query,
                options: FuzzyOptions::default(),
            },
            SearchMethod::Regex => Self::Regex {
                pattern: query,
                target: RegexTarget::Content,
            },
            SearchMethod::Tags => Self::Tags {
                tags: query
                    .split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect(),
                match_all: false,
            },
        }
    }
}

/// One ranked hit from a single retrieval method.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub doc_num_id: u64,
    pub path: String,
    /// Method-specific; higher is better.
    pub score: f32,
    pub mtime: u64,
    pub source: SearchMethod,
}

/// Routes queries to the retrieval strategies.
///
/// Store reads happen under the shared side of the consistency gate, so a
/// query never observes a document halfway through a write.
pub struct QueryDispatcher {
    stores: Arc<Stores>,
    pool: Arc<EmbeddingPool>,
    fuzzy_min_score: u32,
}

impl QueryDispatcher {
    pub fn new(
        stores: Arc<Stores>,
        pool: Arc<EmbeddingPool>,
        fuzzy_min_score: u32,
    ) -> Self {
        Self {
            stores,
            pool,
            fuzzy_min_score,
        }
    }

    pub async fn dispatch(
        &self,
        params: &SearchParams,
        k: usize,
    ) -> Result<Vec<Candidate>> {
        match params {
            SearchParams::Semantic { query } => self.semantic(query, k).await,
            SearchParams::Lexical { query } => self.lexical(query, k).await,
            SearchParams::Fuzzy { pattern, options } => {
                self.fuzzy_filename(pattern, *options, k).await
            }
            SearchParams::Regex { pattern, target } => {
                self.regex(pattern, *target, k).await
            }
            SearchParams::Tags { tags, match_all } => {
                self.by_tags(tags, *match_all, k).await
            }
        }
    }

    fn ensure_usable(&self, index: &'static str, health: &Health) -> Result<()> {
        match health {
            Health::Healthy => Ok(()),
            Health::Corrupt(reason) => Err(Error::IndexCorruption {
                index,
                reason: reason.clone(),
            }),
        }
    }

    /// Nearest documents to the embedded query, closest first.
    pub async fn semantic(&self, query: &str, k: usize) -> Result<Vec<Candidate>> {
        self.ensure_usable("vector", &self.stores.health()?.vector)?;
        if query.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let embedded = self.pool.embed_query(query).await?;

        let _gate = self.stores.gate.read().await;
        let hits = self.stores.vectors.search(&embedded, k)?;
        let scored = hits.into_iter().map(|h| (h.id, h.score)).collect();
        self.finish(scored, SearchMethod::Semantic, k)
    }

    /// BM25 term ranking over document content.
    pub async fn lexical(&self, query: &str, k: usize) -> Result<Vec<Candidate>> {
        self.ensure_usable("lexical", &self.stores.health()?.lexical)?;
        let _gate = self.stores.gate.read().await;
        let hits = self.stores.lexical.search(query, k)?;
        let scored = hits.into_iter().map(|h| (h.id, h.score)).collect();
        self.finish(scored, SearchMethod::Lexical, k)
    }

    /// Approximate match of `pattern` against path basenames.
    pub async fn fuzzy_filename(
        &self,
        pattern: &str,
        options: FuzzyOptions,
        k: usize,
    ) -> Result<Vec<Candidate>> {
        if pattern.trim().is_empty() {
            return Err(Error::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "empty pattern".to_string(),
            });
        }
        let docs = {
            let _gate = self.stores.gate.read().await;
            self.stores.metadata.list_documents()?
        };

        let scored: Vec<(u64, f32)> = if options.exact {
            let folded = pattern.to_lowercase();
            docs.iter()
                .filter(|d| {
                    if options.case_sensitive {
                        d.basename() == pattern
                    } else {
                        d.basename().to_lowercase() == folded
                    }
                })
                .map(|d| (d.id, 1.0))
                .collect()
        } else {
            let case = if options.case_sensitive {
                CaseMatching::Respect
            } else {
                CaseMatching::Ignore
            };
            let pattern =
                Pattern::new(pattern, case, Normalization::Smart, AtomKind::Fuzzy);
            let mut matcher = Matcher::new(Config::DEFAULT);
            let mut buf = Vec::new();
            docs.iter()
                .filter_map(|d| {
                    let score = pattern
                        .score(Utf32Str::new(d.basename(), &mut buf), &mut matcher)?;
                    (score >= self.fuzzy_min_score).then_some((d.id, score as f32))
                })
                .collect()
        };

        Ok(rank(scored, &index_docs(docs), SearchMethod::Fuzzy, k))
    }

    /// Documents whose content or basename matches `pattern`.
    ///
    /// Content matches score by match count.
    pub async fn regex(
        &self,
        pattern: &str,
        target: RegexTarget,
        k: usize,
    ) -> Result<Vec<Candidate>> {
        let re = RegexBuilder::new(pattern)
            .size_limit(REGEX_SIZE_LIMIT)
            .build()
            .map_err(|e| Error::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;

        match target {
            RegexTarget::Filename => {
                let docs = {
                    let _gate = self.stores.gate.read().await;
                    self.stores.metadata.list_documents()?
                };
                let scored = docs
                    .iter()
                    .filter(|d| re.is_match(d.basename()))
                    .map(|d| (d.id, 1.0))
                    .collect();
                Ok(rank(scored, &index_docs(docs), SearchMethod::Regex, k))
            }
            RegexTarget::Content => {
                self.ensure_usable("lexical", &self.stores.health()?.lexical)?;
                let _gate = self.stores.gate.read().await;
                let scored = self
                    .stores
                    .lexical
                    .scan()?
                    .into_iter()
                    .filter_map(|entry| {
                        let count = re.find_iter(&entry.body).count();
                        (count > 0).then_some((entry.id, count as f32))
                    })
                    .collect();
                self.finish(scored, SearchMethod::Regex, k)
            }
        }
    }

    /// Documents carrying every tag (`match_all`) or any of them.
    ///
    /// Scores by how many of the requested tags a document carries.
    pub async fn by_tags(
        &self,
        tags: &[String],
        match_all: bool,
        k: usize,
    ) -> Result<Vec<Candidate>> {
        let docs = {
            let _gate = self.stores.gate.read().await;
            self.stores.metadata.documents_with_tags(tags, match_all)?
        };
        let scored = docs
            .iter()
            .map(|d| {
                let hits = tags.iter().filter(|t| d.tags.contains(t.trim())).count();
                (d.id, hits as f32)
            })
            .collect();
        Ok(rank(scored, &index_docs(docs), SearchMethod::Tags, k))
    }

    /// Resolve index hits against the metadata store and rank them.
    ///
    /// Hits without a metadata row are dropped.
    fn finish(
        &self,
        scored: Vec<(u64, f32)>,
        source: SearchMethod,
        k: usize,
    ) -> Result<Vec<Candidate>> {
        let mut docs = HashMap::with_capacity(scored.len());
        for (id, _) in &scored {
            if let Some(doc) = self.stores.metadata.get(*id)? {
                docs.insert(*id, doc);
            }
        }
        Ok(rank(scored, &docs, source, k))
    }
}

fn index_docs(docs: Vec<Document>) -> HashMap<u64, Document> {
    docs.into_iter().map(|d| (d.id, d)).collect()
}

/// Order by score, then newer mtime, then id; keep the top `k`.
fn rank(
    scored: Vec<(u64, f32)>,
    docs: &HashMap<u64, Document>,
    source: SearchMethod,
    k: usize,
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = scored
        .into_iter()
        .filter_map(|(id, score)| {
            let doc = docs.get(&id)?;
            Some(Candidate {
                doc_num_id: id,
                path: doc.path.clone(),
                score,
                mtime: doc.mtime,
                source,
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(b.mtime.cmp(&a.mtime))
            .then(a.doc_num_id.cmp(&b.doc_num_id))
    });
    candidates.truncate(k);
    candidates
}

impl std::fmt::Debug for QueryDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryDispatcher").finish_non_exhaustive()
    }
}
