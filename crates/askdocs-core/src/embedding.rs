//! Embedder trait and vector utilities.
//!
//! Defines the [`Embedder`] capability used to embed a query, the
//! per-request [`UpstreamCall`] context every upstream call receives, and
//! pure helpers for vector encoding and similarity.
//!
//! The OpenAI implementation lives in the `askdocs` app crate.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::UpstreamError;
use crate::models::Credential;

/// Per-request parameters for one upstream call.
///
/// The credential is chosen per request (service key, or the caller's
/// bypass key) and never stored on the provider.
#[derive(Debug, Clone, Copy)]
pub struct UpstreamCall<'a> {
    pub credential: &'a Credential,
    pub timeout: Duration,
}

/// Computes embedding vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-ada-002"`).
    fn model_name(&self) -> &str;

    /// Embed a single text.
    async fn embed(&self, text: &str, call: UpstreamCall<'_>) -> Result<Vec<f32>, UpstreamError>;
}

/// Encode a float vector as little-endian f32 bytes.
///
/// ```rust
/// use askdocs_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes. Trailing bytes that do not form a full
/// value are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-magnitude vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}
