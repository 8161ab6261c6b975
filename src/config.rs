//! TOML configuration.
//!
//! Every section except `[db]` and `[library]` has defaults, so a minimal
//! config only names the database and corpus paths. [`load_config`] also
//! computes the context budget, so a config that leaves no room for
//! retrieved context fails at startup rather than on the first request.

use anyhow::{Context, Result};
use askdocs_core::budget::{compute_context_budget, BudgetInputs, ContextBudget};
use askdocs_core::models::MIN_QUERY_LENGTH;
use askdocs_core::prompt::PromptTemplate;
use askdocs_core::rate_gate::RateGate;
use chrono::Utc;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub library: LibraryConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub prompt: PromptTemplate,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LibraryConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_redirect_url")]
    pub redirect_url: String,
    /// Header set by the fronting proxy with the caller's address.
    #[serde(default = "default_trusted_ip_header")]
    pub trusted_ip_header: String,
    #[serde(default = "default_query_count")]
    pub default_query_count: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            redirect_url: default_redirect_url(),
            trusted_ip_header: default_trusted_ip_header(),
            default_query_count: default_query_count(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_redirect_url() -> String {
    "https://wpdocs.chat".to_string()
}
fn default_trusted_ip_header() -> String {
    "X-Appengine-User-IP".to_string()
}
fn default_query_count() -> usize {
    2000
}

/// Token accounting for the completion model.
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_prompt_overhead_tokens")]
    pub prompt_overhead_tokens: usize,
    #[serde(default = "default_max_query_length")]
    pub max_query_length: usize,
    #[serde(default = "default_answer_tokens")]
    pub answer_tokens: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            prompt_overhead_tokens: default_prompt_overhead_tokens(),
            max_query_length: default_max_query_length(),
            answer_tokens: default_answer_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    2000
}
fn default_prompt_overhead_tokens() -> usize {
    108
}
fn default_max_query_length() -> usize {
    200
}
fn default_answer_tokens() -> usize {
    256
}

impl ModelConfig {
    pub fn budget_inputs(&self) -> BudgetInputs {
        BudgetInputs {
            model_max_tokens: self.max_tokens,
            prompt_overhead_tokens: self.prompt_overhead_tokens,
            max_query_length: self.max_query_length,
            answer_tokens: self.answer_tokens,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Defaults to the model named in the corpus file.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: None,
            base_url: default_openai_base_url(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_model")]
    pub model: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub temperature: f32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: default_completion_model(),
            base_url: default_openai_base_url(),
            timeout_secs: default_completion_timeout_secs(),
            temperature: 0.0,
        }
    }
}

fn default_completion_model() -> String {
    "gpt-3.5-turbo-instruct".to_string()
}
fn default_completion_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_asks")]
    pub max_asks: u64,
    #[serde(default = "default_window_hours")]
    pub window_hours: i64,
    #[serde(default = "default_bypass_min_length")]
    pub bypass_min_length: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_asks: default_max_asks(),
            window_hours: default_window_hours(),
            bypass_min_length: default_bypass_min_length(),
        }
    }
}

fn default_max_asks() -> u64 {
    6
}
fn default_window_hours() -> i64 {
    24
}
fn default_bypass_min_length() -> usize {
    20
}

impl RateLimitConfig {
    pub fn window(&self) -> Result<chrono::Duration> {
        let window = chrono::Duration::try_hours(self.window_hours).with_context(|| {
            format!("rate_limit.window_hours out of range: {}", self.window_hours)
        })?;
        if Utc::now().checked_sub_signed(window).is_none() {
            anyhow::bail!("rate_limit.window_hours out of range: {}", self.window_hours);
        }
        Ok(window)
    }

    pub fn gate(&self) -> Result<RateGate> {
        Ok(RateGate::new(self.max_asks, self.window()?))
    }
}

impl Config {
    pub fn context_budget(&self) -> Result<ContextBudget> {
        Ok(compute_context_budget(self.model.budget_inputs())?)
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_secs(self.embedding.timeout_secs)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion.timeout_secs)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate a config from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.model.max_query_length < MIN_QUERY_LENGTH {
        anyhow::bail!("model.max_query_length must be >= {}", MIN_QUERY_LENGTH);
    }
    if config.model.answer_tokens == 0 {
        anyhow::bail!("model.answer_tokens must be > 0");
    }
    if config.rate_limit.max_asks == 0 {
        anyhow::bail!("rate_limit.max_asks must be > 0");
    }
    if config.rate_limit.window_hours <= 0 {
        anyhow::bail!("rate_limit.window_hours must be > 0");
    }
    config.rate_limit.window()?;
    if config.prompt.code_block_directive.trim().is_empty() {
        anyhow::bail!("prompt.code_block_directive must not be empty");
    }
    if config.embedding.timeout_secs == 0 || config.completion.timeout_secs == 0 {
        anyhow::bail!("embedding.timeout_secs and completion.timeout_secs must be > 0");
    }

    config
        .context_budget()
        .context("Invalid [model] token settings")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(body: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    const MINIMAL: &str = r#"
[db]
path = "./data/askdocs.sqlite"

[library]
path = "./libraries/docs.json"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let file = write_config(MINIMAL);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.server.redirect_url, "https://wpdocs.chat");
        assert_eq!(config.server.trusted_ip_header, "X-Appengine-User-IP");
        assert_eq!(config.completion.model, "gpt-3.5-turbo-instruct");
        assert_eq!(config.rate_limit.max_asks, 6);
        assert_eq!(config.rate_limit.bypass_min_length, 20);
        assert!(config.embedding.model.is_none());
        assert_eq!(config.context_budget().unwrap().tokens(), 1586);
    }

    #[test]
    fn test_prompt_section_overrides_wording() {
        let file = write_config(&format!(
            "{}\n[prompt]\npersona = \"You are DocsBot.\"\n",
            MINIMAL
        ));
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.prompt.persona, "You are DocsBot.");
        assert_eq!(
            config.prompt.markdown_suffix,
            PromptTemplate::default().markdown_suffix
        );
    }

    #[test]
    fn test_negative_budget_rejected() {
        let file = write_config(&format!("{}\n[model]\nanswer_tokens = 5000\n", MINIMAL));
        let err = load_config(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("context budget is negative"));
    }

    #[test]
    fn test_empty_code_block_directive_rejected() {
        let file = write_config(&format!(
            "{}\n[prompt]\ncode_block_directive = \"\"\n",
            MINIMAL
        ));
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_short_max_query_length_rejected() {
        let file = write_config(&format!("{}\n[model]\nmax_query_length = 5\n", MINIMAL));
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_oversized_window_rejected() {
        for hours in ["10000000000", "9000000000000"] {
            let file = write_config(&format!(
                "{}\n[rate_limit]\nwindow_hours = {}\n",
                MINIMAL, hours
            ));
            let err = load_config(file.path()).unwrap_err();
            assert!(err.to_string().contains("rate_limit.window_hours out of range"));
        }
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/askdocs.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
