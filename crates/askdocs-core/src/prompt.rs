//! Completion prompt assembly.
//!
//! The wording comes from [`PromptTemplate`] (loaded from the `[prompt]`
//! config section); the layout is fixed:
//!
//! ```text
//! {persona} {instruction} {fallback_pointer}.{code_block_directive?}
//!
//! Context:
//! {context}
//!
//! Question:
//! {query}
//!
//! Answer{markdown_suffix?}:
//! ```

use serde::Deserialize;

use crate::models::AnswerFormat;

/// Prompt wording.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PromptTemplate {
    pub persona: String,
    pub instruction: String,
    pub fallback_pointer: String,
    /// Appended to the first line for markdown answers.
    pub code_block_directive: String,
    /// Appended to `Answer` for markdown answers.
    pub markdown_suffix: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            persona: "You are the \"ChatWP Bot\".".to_string(),
            instruction: "Answer the question as truthfully as possible using the provided \
                          context, and if the answer is not contained within the text below, \
                          say \"I'm not sure\" and suggest looking for this information on"
                .to_string(),
            fallback_pointer: "[wordpress.org](https://wordpress.org)".to_string(),
            code_block_directive: " If the question includes a request for code, provide a \
                                   code block directly from the context."
                .to_string(),
            markdown_suffix: " in Markdown".to_string(),
        }
    }
}

impl PromptTemplate {
    /// Render the prompt for `query` over `context`.
    pub fn assemble(&self, query: &str, context: &str, format: AnswerFormat) -> String {
        let (directive, suffix) = match format {
            AnswerFormat::Markdown => (
                self.code_block_directive.as_str(),
                self.markdown_suffix.as_str(),
            ),
            AnswerFormat::Text => ("", ""),
        };

        format!(
            "{} {} {}.{}\n\nContext:\n{} \n\nQuestion:\n{}\n\nAnswer{}:",
            self.persona,
            self.instruction,
            self.fallback_pointer,
            directive,
            context,
            query,
            suffix
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_prompt_has_no_markdown_parts() {
        let t = PromptTemplate::default();
        let prompt = t.assemble("How do I register a widget?", "ctx", AnswerFormat::Text);
        assert!(!prompt.contains(&t.code_block_directive));
        assert!(prompt.ends_with("Answer:"));
    }

    #[test]
    fn test_markdown_prompt_has_directive_and_suffix() {
        let t = PromptTemplate::default();
        let prompt = t.assemble("How do I register a widget?", "ctx", AnswerFormat::Markdown);
        assert_eq!(prompt.matches(&t.code_block_directive).count(), 1);
        assert!(prompt.ends_with("Answer in Markdown:"));
    }

    #[test]
    fn test_layout() {
        let t = PromptTemplate {
            persona: "P.".into(),
            instruction: "I".into(),
            fallback_pointer: "F".into(),
            code_block_directive: " D".into(),
            markdown_suffix: " M".into(),
        };
        assert_eq!(
            t.assemble("q?", "c1\nc2", AnswerFormat::Markdown),
            "P. I F. D\n\nContext:\nc1\nc2 \n\nQuestion:\nq?\n\nAnswer M:"
        );
        assert_eq!(
            t.assemble("q?", "", AnswerFormat::Text),
            "P. I F.\n\nContext:\n \n\nQuestion:\nq?\n\nAnswer:"
        );
    }

    #[test]
    fn test_default_wording() {
        let prompt = PromptTemplate::default().assemble("q", "c", AnswerFormat::Text);
        assert!(prompt.starts_with("You are the \"ChatWP Bot\". Answer the question"));
        assert!(prompt.contains("on [wordpress.org](https://wordpress.org).\n\nContext:"));
    }
}
