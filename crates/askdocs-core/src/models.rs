//! Core data models for the ask pipeline.
//!
//! These types carry a single request from validation through the rate
//! gate and into the persisted [`AskRecord`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::AskError;

/// Minimum trimmed query length, in characters.
pub const MIN_QUERY_LENGTH: usize = 10;

/// A validated, trimmed question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query(String);

impl Query {
    /// Trim `raw` and check its length (in Unicode scalar values) against
    /// `[MIN_QUERY_LENGTH, max_len]`.
    pub fn parse(raw: &str, max_len: usize) -> Result<Self, AskError> {
        let trimmed = raw.trim();
        let len = trimmed.chars().count();
        if len < MIN_QUERY_LENGTH || len > max_len {
            return Err(AskError::InvalidQuery { max: max_len });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Requested answer format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerFormat {
    #[default]
    Text,
    Markdown,
}

impl AnswerFormat {
    /// Anything other than `"markdown"` (including absence) is plain text.
    pub fn from_param(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("markdown") => AnswerFormat::Markdown,
            _ => AnswerFormat::Text,
        }
    }
}

/// One-way hash of a caller's source address, used only for quota counting.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IpHash(String);

impl IpHash {
    /// Lowercase hex SHA-256 of the address string.
    pub fn from_addr(addr: &str) -> Self {
        let digest = Sha256::digest(addr.as_bytes());
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight hex digits, for debug logging.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Debug for IpHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IpHash({}…)", self.short())
    }
}

/// An upstream API credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Interpret a caller-supplied bypass credential.
    ///
    /// Returns `Some` only when the trimmed value is longer than `min_len`
    /// characters.
    pub fn bypass(raw: Option<&str>, min_len: usize) -> Option<Self> {
        let trimmed = raw?.trim();
        if trimmed.chars().count() > min_len {
            Some(Self(trimmed.to_string()))
        } else {
            None
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Provenance of a retrieved chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    pub title: String,
}

/// Identifier assigned to a persisted [`AskRecord`].
pub type AskId = i64;

/// Persisted fact of a served ask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskRecord {
    pub created: DateTime<Utc>,
    pub query: String,
    pub iphash: IpHash,
    pub result: String,
    pub sources: Vec<Source>,
    /// Always 0 when written by the ask flow.
    pub rating: i64,
}

impl AskRecord {
    pub fn new(
        query: Query,
        iphash: IpHash,
        result: String,
        sources: Vec<Source>,
        created: DateTime<Utc>,
    ) -> Self {
        Self {
            created,
            query: query.into_string(),
            iphash,
            result,
            sources,
            rating: 0,
        }
    }
}
