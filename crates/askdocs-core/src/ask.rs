//! The `ask` and `query` flows.
//!
//! Both are free functions over an injected [`Capabilities`] bundle and an
//! immutable [`AskSettings`], so nothing is constructed per request.
//!
//! # Ask
//!
//! ```text
//! Received → Validated → RateChecked → EmbeddingComputed → ContextRetrieved
//!          → PromptBuilt → CompletionObtained → Logged → Responded
//! ```
//!
//! Each stage short-circuits on failure. A record is appended only after a
//! completion is obtained, and a failed append is logged without failing the
//! response.
//!
//! # Query
//!
//! Raw retrieval: embeds the query text (if any) with the service
//! credential and delegates to [`ContextRetriever::query`]. No quota, no
//! prompt, no completion, no log.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::budget::ContextBudget;
use crate::completion::CompletionInvoker;
use crate::embedding::{Embedder, UpstreamCall};
use crate::error::AskError;
use crate::library::{ContextRetriever, LibraryQuery, QueryResult, SortOrder};
use crate::models::{AnswerFormat, AskId, AskRecord, Credential, IpHash, Query, Source};
use crate::prompt::PromptTemplate;
use crate::rate_gate::{GateDecision, RateGate};
use crate::store::QueryLog;

/// Capabilities the flows call through.
#[derive(Clone)]
pub struct Capabilities {
    pub retriever: Arc<dyn ContextRetriever>,
    pub embedder: Arc<dyn Embedder>,
    pub completion: Arc<dyn CompletionInvoker>,
    pub log: Arc<dyn QueryLog>,
}

/// Immutable settings resolved at startup.
#[derive(Debug, Clone)]
pub struct AskSettings {
    pub budget: ContextBudget,
    pub max_query_length: usize,
    pub answer_tokens: usize,
    pub template: PromptTemplate,
    pub gate: RateGate,
    /// A bypass credential must be longer than this many characters.
    pub bypass_min_length: usize,
    pub service_credential: Credential,
    pub embedding_timeout: Duration,
    pub completion_timeout: Duration,
    /// Token budget for `query` when the caller gives no `count`.
    pub default_query_count: usize,
}

/// One ask, as received from the transport.
#[derive(Debug, Clone, Default)]
pub struct AskRequest {
    pub query: Option<String>,
    pub format: AnswerFormat,
    /// Caller address used for quota identity.
    pub client_addr: String,
    /// Raw value of the caller-supplied credential header.
    pub bypass: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AskResponse {
    pub answer: String,
    pub sources: Vec<Source>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<AskId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AskStage {
    Received,
    Validated,
    RateChecked,
    EmbeddingComputed,
    ContextRetrieved,
    PromptBuilt,
    CompletionObtained,
    Logged,
    Responded,
}

fn enter(stage: AskStage) {
    debug!(?stage, "ask stage");
}

/// Answer a question from the corpus.
pub async fn ask(
    caps: &Capabilities,
    settings: &AskSettings,
    req: AskRequest,
) -> Result<AskResponse, AskError> {
    enter(AskStage::Received);

    let query = Query::parse(
        req.query.as_deref().unwrap_or_default(),
        settings.max_query_length,
    )?;
    enter(AskStage::Validated);

    let iphash = IpHash::from_addr(&req.client_addr);
    let bypass = Credential::bypass(req.bypass.as_deref(), settings.bypass_min_length);
    let now = Utc::now();

    let credential = match settings
        .gate
        .check(caps.log.as_ref(), &iphash, bypass, now)
        .await?
    {
        GateDecision::Bypass(credential) => {
            debug!(identity = iphash.short(), "caller credential bypasses quota");
            credential
        }
        GateDecision::Allow => settings.service_credential.clone(),
        GateDecision::Deny => {
            info!(identity = iphash.short(), "ask quota exceeded");
            return Err(AskError::QuotaExceeded);
        }
    };
    enter(AskStage::RateChecked);

    let embed_call = UpstreamCall {
        credential: &credential,
        timeout: settings.embedding_timeout,
    };
    let query_vec = caps.embedder.embed(query.as_str(), embed_call).await?;
    enter(AskStage::EmbeddingComputed);

    let context = caps.retriever.retrieve(&query_vec, settings.budget).await?;
    enter(AskStage::ContextRetrieved);

    let prompt = settings
        .template
        .assemble(query.as_str(), &context.text(), req.format);
    enter(AskStage::PromptBuilt);

    let completion_call = UpstreamCall {
        credential: &credential,
        timeout: settings.completion_timeout,
    };
    let answer = caps
        .completion
        .complete(&prompt, settings.answer_tokens, completion_call)
        .await?;
    enter(AskStage::CompletionObtained);

    let record = AskRecord::new(query, iphash, answer.clone(), context.sources.clone(), now);
    let id = match caps.log.append(&record).await {
        Ok(id) => Some(id),
        Err(e) => {
            error!(error = %e, "failed to append ask record");
            None
        }
    };
    enter(AskStage::Logged);

    info!(
        chunks = context.chunks.len(),
        sources = context.sources.len(),
        id,
        "ask answered"
    );
    enter(AskStage::Responded);

    Ok(AskResponse {
        answer,
        sources: context.sources,
        id,
    })
}

/// Parameters of the raw search flow.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pub query: Option<String>,
    pub count: Option<usize>,
    pub sort: SortOrder,
}

/// Raw retrieval over the corpus.
pub async fn query(
    caps: &Capabilities,
    settings: &AskSettings,
    params: QueryParams,
) -> Result<QueryResult, AskError> {
    let query_vec = match params.query.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => {
            let call = UpstreamCall {
                credential: &settings.service_credential,
                timeout: settings.embedding_timeout,
            };
            Some(caps.embedder.embed(text, call).await?)
        }
        _ => None,
    };

    let library_query = LibraryQuery {
        query_vec,
        count: params.count.unwrap_or(settings.default_query_count),
        sort: params.sort,
    };
    Ok(caps.retriever.query(&library_query).await?)
}
