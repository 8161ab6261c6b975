//! HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/` | Raw corpus search (`query`, `count`, `sort`) |
//! | `GET`  | `/` | Redirect to the configured front end |
//! | `POST` | `/ask` | Answer a question (`query`, `format`) |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Request bodies may be JSON, form-encoded, or multipart.
//!
//! # Error Contract
//!
//! ```json
//! { "error": "Too many requests. Please try again later or include your OpenAI API key." }
//! ```
//!
//! `/ask` uses 400 (invalid query), 403 (upstream rejected the key), 429
//! (quota), 502 (upstream failure) and 500 (anything else). `POST /`
//! reports every failure with status 200.
//!
//! # Caller Identity
//!
//! The quota identity is the address in the configured trusted proxy header
//! (default `X-Appengine-User-IP`), falling back to the TCP peer address.

use std::any::Any;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use askdocs_core::ask::{self, AskRequest, AskResponse, AskSettings, Capabilities, QueryParams};
use askdocs_core::embedding::Embedder;
use askdocs_core::error::{AskError, ErrorClass};
use askdocs_core::library::{ContextRetriever, QueryResult, SortOrder};
use askdocs_core::models::{AnswerFormat, Credential};
use axum::{
    extract::{ConnectInfo, FromRequest, FromRequestParts, Multipart, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::corpus_cmd::load_library;
use crate::db;
use crate::migrate::migrate_pool;
use crate::openai::{self, OpenAICompletion, OpenAIEmbedder};
use crate::query_log::SqliteQueryLog;

/// Header carrying a caller-supplied upstream key.
pub const BYPASS_HEADER: &str = "x-openai-api-key";

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    caps: Capabilities,
    settings: Arc<AskSettings>,
    redirect_url: Arc<str>,
    trusted_ip_header: HeaderName,
}

impl AppState {
    /// Resolve settings from `config`. The context budget is computed here,
    /// once.
    pub fn new(
        config: &Config,
        caps: Capabilities,
        service_credential: Credential,
    ) -> anyhow::Result<Self> {
        let settings = AskSettings {
            budget: config.context_budget()?,
            max_query_length: config.model.max_query_length,
            answer_tokens: config.model.answer_tokens,
            template: config.prompt.clone(),
            gate: config.rate_limit.gate()?,
            bypass_min_length: config.rate_limit.bypass_min_length,
            service_credential,
            embedding_timeout: config.embedding_timeout(),
            completion_timeout: config.completion_timeout(),
            default_query_count: config.server.default_query_count,
        };

        let trusted_ip_header = HeaderName::from_bytes(config.server.trusted_ip_header.as_bytes())
            .with_context(|| {
                format!(
                    "Invalid server.trusted_ip_header: {}",
                    config.server.trusted_ip_header
                )
            })?;

        Ok(Self {
            caps,
            settings: Arc::new(settings),
            redirect_url: Arc::from(config.server.redirect_url.as_str()),
            trusted_ip_header,
        })
    }
}

/// Build the router with CORS, request tracing, and panic recovery.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods(AnyOrigin)
        .allow_headers(AnyOrigin);

    Router::new()
        .route("/", get(handle_redirect).post(handle_query))
        .route("/ask", post(handle_ask))
        .route("/health", get(handle_health))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Wire the production adapters from `config` and serve until terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let service_credential = openai::service_credential()?;

    let library = load_library(&config.library.path)?;
    info!(
        bits = library.len(),
        model = library.embedding_model(),
        "corpus loaded"
    );

    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;

    let embedding_model = config
        .embedding
        .model
        .clone()
        .unwrap_or_else(|| library.embedding_model().to_string());

    let client = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;

    let embedder = OpenAIEmbedder::new(client.clone(), &config.embedding, embedding_model);
    if !same_embedding_model(&embedder, &library) {
        warn!(
            query_model = embedder.model_name(),
            corpus_model = library.embedding_model(),
            "query embedding model differs from the corpus model"
        );
    }

    let caps = Capabilities {
        retriever: Arc::new(library),
        embedder: Arc::new(embedder),
        completion: Arc::new(OpenAICompletion::new(client, &config.completion)),
        log: Arc::new(SqliteQueryLog::new(pool)),
    };

    let state = AppState::new(config, caps, service_credential)?;
    info!(budget = %state.settings.budget, "context budget");

    let app = build_router(state);

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!("listening on http://{}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Whether queries are embedded with the model the corpus was built with.
fn same_embedding_model(embedder: &dyn Embedder, retriever: &dyn ContextRetriever) -> bool {
    embedder.model_name() == retriever.embedding_model()
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Error type that converts into a `{"error": ...}` response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
}

fn internal_error() -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: "Internal server error.".to_string(),
    }
}

impl From<AskError> for AppError {
    fn from(err: AskError) -> Self {
        let status = match err.class() {
            ErrorClass::BadRequest => StatusCode::BAD_REQUEST,
            ErrorClass::Forbidden => StatusCode::FORBIDDEN,
            ErrorClass::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorClass::UpstreamFailure => {
                warn!(error = %err, "upstream failure");
                return AppError {
                    status: StatusCode::BAD_GATEWAY,
                    message: "The language model service failed. Please try again later."
                        .to_string(),
                };
            }
            ErrorClass::Internal => {
                error!(error = %err, "unhandled error");
                return internal_error();
            }
        };
        AppError {
            status,
            message: err.to_string(),
        }
    }
}

fn handle_panic(_panic: Box<dyn Any + Send + 'static>) -> Response {
    error!("handler panicked");
    internal_error().into_response()
}

// ============ Extractors ============

/// Deserializes a JSON, form-encoded, or multipart body, chosen by
/// `Content-Type`. Any other content type (or none) yields `T::default()`.
pub struct JsonOrForm<T>(pub T);

impl<S, T> FromRequest<S> for JsonOrForm<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Default + Send,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("application/json") {
            let Json(value) = Json::<T>::from_request(req, state)
                .await
                .map_err(|rej| bad_request(rej.body_text()))?;
            Ok(JsonOrForm(value))
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(value) = Form::<T>::from_request(req, state)
                .await
                .map_err(|rej| bad_request(rej.body_text()))?;
            Ok(JsonOrForm(value))
        } else if content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|rej| bad_request(rej.body_text()))?;
            Ok(JsonOrForm(multipart_fields(multipart).await?))
        } else {
            Ok(JsonOrForm(T::default()))
        }
    }
}

/// Text fields of a multipart body, first value per name. File parts are
/// skipped.
async fn multipart_fields<T: DeserializeOwned>(mut multipart: Multipart) -> Result<T, AppError> {
    let mut fields = serde_json::Map::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.body_text()))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if field.file_name().is_some() {
            continue;
        }
        let value = field.text().await.map_err(|e| bad_request(e.body_text()))?;
        fields
            .entry(name)
            .or_insert(serde_json::Value::String(value));
    }
    serde_json::from_value(serde_json::Value::Object(fields))
        .map_err(|e| bad_request(format!("Invalid form field: {}", e)))
}

/// TCP peer address, when the server was started with connect info.
pub struct PeerAddr(pub Option<SocketAddr>);

impl<S> FromRequestParts<S> for PeerAddr
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(PeerAddr(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr),
        ))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: impl header::AsHeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Caller address: trusted proxy header (first entry), else the peer.
fn client_addr(headers: &HeaderMap, trusted: &HeaderName, peer: Option<SocketAddr>) -> String {
    if let Some(value) = header_str(headers, trusted) {
        let first = value.split(',').next().unwrap_or_default().trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }
    match peer {
        Some(addr) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET / ============

async fn handle_redirect(State(state): State<AppState>) -> Response {
    (
        StatusCode::FOUND,
        [(header::LOCATION, state.redirect_url.to_string())],
    )
        .into_response()
}

// ============ POST / ============

/// `count` arrives as a JSON number or, from forms, a numeric string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CountParam {
    Number(u64),
    Text(String),
}

impl CountParam {
    fn resolve(self) -> Result<usize, String> {
        match self {
            CountParam::Number(n) => Ok(n as usize),
            CountParam::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| format!("Invalid 'count' parameter: {}", s)),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct QueryForm {
    query: Option<String>,
    count: Option<CountParam>,
    sort: Option<String>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum QueryReply {
    Ok(QueryResult),
    Err(ErrorBody),
}

async fn handle_query(
    State(state): State<AppState>,
    form: Result<JsonOrForm<QueryForm>, AppError>,
) -> Json<QueryReply> {
    let error = |message: String| Json(QueryReply::Err(ErrorBody { error: message }));

    let form = match form {
        Ok(JsonOrForm(form)) => form,
        Err(e) => return error(e.message),
    };
    let count = match form.count.map(CountParam::resolve).transpose() {
        Ok(count) => count,
        Err(message) => return error(message),
    };

    let params = QueryParams {
        query: form.query,
        count,
        sort: SortOrder::from_param(form.sort.as_deref()),
    };

    match ask::query(&state.caps, &state.settings, params).await {
        Ok(result) => Json(QueryReply::Ok(result)),
        Err(err) => {
            warn!(error = %err, "query failed");
            let message = match err {
                AskError::Unhandled(_) => "Internal server error.".to_string(),
                other => other.to_string(),
            };
            error(message)
        }
    }
}

// ============ POST /ask ============

#[derive(Debug, Default, Deserialize)]
struct AskForm {
    query: Option<String>,
    format: Option<String>,
}

async fn handle_ask(
    State(state): State<AppState>,
    PeerAddr(peer): PeerAddr,
    headers: HeaderMap,
    JsonOrForm(form): JsonOrForm<AskForm>,
) -> Result<Json<AskResponse>, AppError> {
    let req = AskRequest {
        query: form.query,
        format: AnswerFormat::from_param(form.format.as_deref()),
        client_addr: client_addr(&headers, &state.trusted_ip_header, peer),
        bypass: header_str(&headers, BYPASS_HEADER).map(str::to_string),
    };

    let resp = ask::ask(&state.caps, &state.settings, req).await?;
    Ok(Json(resp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_client_addr_prefers_trusted_header() {
        let trusted = HeaderName::from_static("x-appengine-user-ip");
        let peer: Option<SocketAddr> = Some("10.1.2.3:5555".parse().unwrap());

        let mut headers = HeaderMap::new();
        assert_eq!(client_addr(&headers, &trusted, peer), "10.1.2.3");
        assert_eq!(client_addr(&headers, &trusted, None), "unknown");

        headers.insert(
            trusted.clone(),
            HeaderValue::from_static("198.51.100.4, 10.0.0.1"),
        );
        assert_eq!(client_addr(&headers, &trusted, peer), "198.51.100.4");
    }

    #[test]
    fn test_count_param_resolution() {
        assert_eq!(CountParam::Number(500).resolve(), Ok(500));
        assert_eq!(CountParam::Text(" 250 ".into()).resolve(), Ok(250));
        assert!(CountParam::Text("lots".into()).resolve().is_err());
    }

    #[test]
    fn test_upstream_failure_is_bad_gateway() {
        let err = AppError::from(AskError::Upstream(
            askdocs_core::error::UpstreamError::Timeout,
        ));
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert!(!err.message.contains("timed out"));
    }

    struct NamedEmbedder(&'static str);

    #[async_trait::async_trait]
    impl Embedder for NamedEmbedder {
        fn model_name(&self) -> &str {
            self.0
        }

        async fn embed(
            &self,
            _text: &str,
            _call: askdocs_core::embedding::UpstreamCall<'_>,
        ) -> Result<Vec<f32>, askdocs_core::error::UpstreamError> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_same_embedding_model() {
        let corpus = askdocs_core::corpus::Corpus::from_json(
            r#"{"version":1,"embedding_model":"openai.com:text-embedding-ada-002","bits":[]}"#,
        )
        .unwrap();
        let library = askdocs_core::library::Library::from_corpus(corpus).unwrap();

        assert!(same_embedding_model(
            &NamedEmbedder("text-embedding-ada-002"),
            &library
        ));
        assert!(!same_embedding_model(
            &NamedEmbedder("text-embedding-3-small"),
            &library
        ));
    }

    #[test]
    fn test_quota_error_message() {
        let err = AppError::from(AskError::QuotaExceeded);
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            err.message,
            "Too many requests. Please try again later or include your OpenAI API key."
        );
    }
}
