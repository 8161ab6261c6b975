//! Context token budget.
//!
//! The completion model accepts a fixed number of tokens per request. That
//! window is shared by the prompt boilerplate, the caller's question, the
//! retrieved context, and the generated answer. The budget for retrieved
//! context is whatever remains after reserving room for everything else,
//! with the question reserved at its maximum allowed length.
//!
//! Token counts are estimated at [`CHARS_PER_TOKEN`] characters per token.

use std::fmt;
use thiserror::Error;

/// Estimated characters per token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Terms of the budget computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetInputs {
    pub model_max_tokens: usize,
    pub prompt_overhead_tokens: usize,
    pub max_query_length: usize,
    pub answer_tokens: usize,
}

impl BudgetInputs {
    /// Tokens reserved for a question of `max_query_length` characters.
    pub fn query_reserve_tokens(&self) -> usize {
        self.max_query_length.div_ceil(CHARS_PER_TOKEN)
    }
}

/// Maximum number of tokens of retrieved context per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBudget(usize);

impl ContextBudget {
    pub fn new(tokens: usize) -> Self {
        Self(tokens)
    }

    pub fn tokens(self) -> usize {
        self.0
    }
}

impl fmt::Display for ContextBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} tokens", self.0)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BudgetError {
    #[error(
        "context budget is negative ({budget}): model_max_tokens {model_max_tokens} \
         - prompt_overhead_tokens {prompt_overhead_tokens} - query reserve {query_reserve} \
         (max_query_length {max_query_length}) - answer_tokens {answer_tokens}"
    )]
    Negative {
        budget: i128,
        model_max_tokens: usize,
        prompt_overhead_tokens: usize,
        query_reserve: usize,
        max_query_length: usize,
        answer_tokens: usize,
    },
}

/// Compute the context budget:
/// `model_max_tokens - prompt_overhead_tokens - ceil(max_query_length / 4) - answer_tokens`.
pub fn compute_context_budget(inputs: BudgetInputs) -> Result<ContextBudget, BudgetError> {
    let query_reserve = inputs.query_reserve_tokens();
    // every usize term fits in i128, so the difference is exact
    let budget = inputs.model_max_tokens as i128
        - inputs.prompt_overhead_tokens as i128
        - query_reserve as i128
        - inputs.answer_tokens as i128;

    usize::try_from(budget)
        .map(ContextBudget)
        .map_err(|_| BudgetError::Negative {
            budget,
            model_max_tokens: inputs.model_max_tokens,
            prompt_overhead_tokens: inputs.prompt_overhead_tokens,
            query_reserve,
            max_query_length: inputs.max_query_length,
            answer_tokens: inputs.answer_tokens,
        })
}

/// Estimate the token count of `text` as `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}
