//! Error taxonomy for the ask pipeline.
//!
//! [`UpstreamError`] classifies failures of the embedding and completion
//! providers. [`AskError`] is what the orchestrator returns; each variant
//! maps to exactly one [`ErrorClass`], which the HTTP layer turns into a
//! status code.

use thiserror::Error;

use crate::models::MIN_QUERY_LENGTH;

/// Failure of an embedding or completion call.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    #[error("upstream rejected the credential: {0}")]
    InvalidCredential(String),

    #[error("upstream rate limited the request")]
    RateLimited,

    #[error("upstream request timed out")]
    Timeout,

    #[error("upstream network error: {0}")]
    Network(String),

    #[error("malformed upstream response: {0}")]
    Malformed(String),

    #[error("upstream API error {status}: {message}")]
    Api { status: u16, message: String },
}

impl UpstreamError {
    /// Map a non-success HTTP status from a provider to an error.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::InvalidCredential(body),
            429 => Self::RateLimited,
            _ => Self::Api {
                status,
                message: body,
            },
        }
    }
}

/// Errors surfaced by [`crate::ask::ask`].
#[derive(Debug, Error)]
pub enum AskError {
    #[error(
        "Missing or invalid 'query' parameter. Must be between {min} and {max} characters.",
        min = MIN_QUERY_LENGTH
    )]
    InvalidQuery { max: usize },

    #[error("Too many requests. Please try again later or include your OpenAI API key.")]
    QuotaExceeded,

    #[error("OpenAI API key is invalid.")]
    InvalidUpstreamCredential,

    #[error(transparent)]
    Upstream(UpstreamError),

    #[error(transparent)]
    Unhandled(#[from] anyhow::Error),
}

impl From<UpstreamError> for AskError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::InvalidCredential(_) => AskError::InvalidUpstreamCredential,
            other => AskError::Upstream(other),
        }
    }
}

/// Coarse classification of an [`AskError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    BadRequest,
    Forbidden,
    RateLimited,
    UpstreamFailure,
    Internal,
}

impl AskError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AskError::InvalidQuery { .. } => ErrorClass::BadRequest,
            AskError::QuotaExceeded => ErrorClass::RateLimited,
            AskError::InvalidUpstreamCredential => ErrorClass::Forbidden,
            AskError::Upstream(_) => ErrorClass::UpstreamFailure,
            AskError::Unhandled(_) => ErrorClass::Internal,
        }
    }
}
