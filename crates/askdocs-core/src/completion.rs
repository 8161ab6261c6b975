//! Text-completion capability.

use async_trait::async_trait;

use crate::embedding::UpstreamCall;
use crate::error::UpstreamError;

/// Executes a single text-completion call. Implementations do not retry.
#[async_trait]
pub trait CompletionInvoker: Send + Sync {
    /// Complete `prompt`, generating at most `max_answer_tokens` tokens.
    /// Returns the trimmed answer text.
    async fn complete(
        &self,
        prompt: &str,
        max_answer_tokens: usize,
        call: UpstreamCall<'_>,
    ) -> Result<String, UpstreamError>;
}
