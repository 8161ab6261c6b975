//! In-memory retrieval over a loaded corpus.
//!
//! The [`ContextRetriever`] trait is the seam the orchestrator retrieves
//! through. [`Library`] implements it by brute-force cosine similarity over
//! every bit with an embedding.
//!
//! # Budget walk
//!
//! 1. Score every bit against the query vector.
//! 2. Sort by similarity, descending. Ties keep corpus order.
//! 3. Take bits in order while the running token total stays within the
//!    budget. Stop at the first bit that does not fit.
//! 4. Collect sources from the taken bits, deduplicated by URL in
//!    first-seen order.

use std::cmp::Ordering;
use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::budget::{estimate_tokens, ContextBudget};
use crate::corpus::{decode_embedding, BitInfo, Corpus};
use crate::embedding::cosine_similarity;
use crate::models::Source;

/// Budget-fitting context for one ask.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievedContext {
    pub chunks: Vec<String>,
    pub sources: Vec<Source>,
}

impl RetrievedContext {
    /// Chunks joined with newlines, as placed in the prompt.
    pub fn text(&self) -> String {
        self.chunks.join("\n")
    }
}

/// Ordering for [`LibraryQuery`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Similarity,
    /// Corpus order.
    Manual,
}

impl SortOrder {
    pub fn from_param(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("manual") => SortOrder::Manual,
            _ => SortOrder::Similarity,
        }
    }
}

/// Parameters of the raw search operation.
#[derive(Debug, Clone)]
pub struct LibraryQuery {
    pub query_vec: Option<Vec<f32>>,
    /// Token budget for the returned bits.
    pub count: usize,
    pub sort: SortOrder,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueryResult {
    pub version: u32,
    pub embedding_model: String,
    pub bits: Vec<QueryBit>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueryBit {
    pub text: String,
    pub info: BitInfo,
    pub token_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
}

/// Retrieval capability.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    /// Embedding model the corpus was built with.
    fn embedding_model(&self) -> &str;

    /// Ranked, deduplicated, budget-fitting context for `query_vec`.
    async fn retrieve(&self, query_vec: &[f32], budget: ContextBudget) -> Result<RetrievedContext>;

    /// Raw search.
    async fn query(&self, params: &LibraryQuery) -> Result<QueryResult>;
}

#[derive(Debug)]
struct Entry {
    text: String,
    info: BitInfo,
    vector: Option<Vec<f32>>,
    token_count: usize,
}

/// A corpus held in memory with decoded embeddings.
#[derive(Debug)]
pub struct Library {
    version: u32,
    embedding_model: String,
    model_name: String,
    entries: Vec<Entry>,
}

impl Library {
    /// Decode every bit's embedding. Bits without one are kept for manual
    /// ordering but never returned by similarity retrieval.
    pub fn from_corpus(corpus: Corpus) -> Result<Self> {
        let model_name = corpus.model_name().to_string();
        let mut entries = Vec::with_capacity(corpus.bits.len());
        for bit in corpus.bits {
            let vector = match &bit.embedding {
                Some(encoded) => Some(decode_embedding(encoded)?),
                None => None,
            };
            let token_count = bit
                .token_count
                .unwrap_or_else(|| estimate_tokens(&bit.text));
            entries.push(Entry {
                text: bit.text,
                info: bit.info,
                vector,
                token_count,
            });
        }

        Ok(Self {
            version: corpus.version,
            embedding_model: corpus.embedding_model,
            model_name,
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embedded entries with their similarity, best first.
    fn ranked(&self, query_vec: &[f32]) -> Vec<(&Entry, f32)> {
        let mut scored: Vec<(&Entry, f32)> = self
            .entries
            .iter()
            .filter_map(|e| {
                e.vector
                    .as_deref()
                    .map(|v| (e, cosine_similarity(query_vec, v)))
            })
            .collect();
        // sort_by is stable, so equal scores keep corpus order
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored
    }
}

/// Longest prefix of `items` whose token counts sum to at most `budget`.
fn take_within_budget<T>(items: Vec<T>, budget: usize, tokens: impl Fn(&T) -> usize) -> Vec<T> {
    let mut used = 0usize;
    let mut taken = Vec::new();
    for item in items {
        match used.checked_add(tokens(&item)) {
            Some(next) if next <= budget => used = next,
            _ => break,
        }
        taken.push(item);
    }
    taken
}

fn unique_sources<'a>(infos: impl Iterator<Item = &'a BitInfo>) -> Vec<Source> {
    let mut seen = HashSet::new();
    let mut sources = Vec::new();
    for info in infos {
        if seen.insert(info.url.as_str()) {
            sources.push(Source {
                url: info.url.clone(),
                title: info.title.clone().unwrap_or_default(),
            });
        }
    }
    sources
}

#[async_trait]
impl ContextRetriever for Library {
    fn embedding_model(&self) -> &str {
        &self.model_name
    }

    async fn retrieve(&self, query_vec: &[f32], budget: ContextBudget) -> Result<RetrievedContext> {
        let taken = take_within_budget(self.ranked(query_vec), budget.tokens(), |(e, _)| {
            e.token_count
        });

        let sources = unique_sources(taken.iter().map(|(e, _)| &e.info));
        let chunks = taken.into_iter().map(|(e, _)| e.text.clone()).collect();
        Ok(RetrievedContext { chunks, sources })
    }

    async fn query(&self, params: &LibraryQuery) -> Result<QueryResult> {
        let ordered: Vec<(&Entry, Option<f32>)> = match (&params.query_vec, params.sort) {
            (Some(vec), SortOrder::Similarity) => self
                .ranked(vec)
                .into_iter()
                .map(|(e, s)| (e, Some(s)))
                .collect(),
            (Some(vec), SortOrder::Manual) => self
                .entries
                .iter()
                .map(|e| (e, e.vector.as_deref().map(|v| cosine_similarity(vec, v))))
                .collect(),
            (None, _) => self.entries.iter().map(|e| (e, None)).collect(),
        };

        let bits = take_within_budget(ordered, params.count, |(e, _)| e.token_count)
            .into_iter()
            .map(|(e, similarity)| QueryBit {
                text: e.text.clone(),
                info: e.info.clone(),
                token_count: e.token_count,
                similarity,
            })
            .collect();

        Ok(QueryResult {
            version: self.version,
            embedding_model: self.embedding_model.clone(),
            bits,
        })
    }
}
