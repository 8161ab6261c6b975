//! Corpus file format and the corpus filter.
//!
//! A corpus file is a JSON document:
//!
//! ```json
//! {
//!   "version": 1,
//!   "embedding_model": "openai.com:text-embedding-ada-002",
//!   "bits": [
//!     { "text": "...", "info": { "url": "...", "title": "...", "description": "..." },
//!       "embedding": "<base64 little-endian f32>", "token_count": 42 }
//!   ]
//! }
//! ```
//!
//! [`filter_corpus_json`] removes bits by URL substring while writing every
//! kept bit back byte-for-byte as it appeared in the input.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::embedding::{blob_to_vec, vec_to_blob};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Corpus {
    pub version: u32,
    pub embedding_model: String,
    pub bits: Vec<Bit>,
}

/// One pre-embedded chunk of documentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bit {
    pub text: String,
    pub info: BitInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BitInfo {
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Corpus {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse corpus JSON")
    }

    /// The model part of `embedding_model`, without the provider prefix.
    pub fn model_name(&self) -> &str {
        self.embedding_model
            .split_once(':')
            .map(|(_, model)| model)
            .unwrap_or(&self.embedding_model)
    }
}

/// Base64 of little-endian f32 values.
pub fn encode_embedding(vec: &[f32]) -> String {
    STANDARD.encode(vec_to_blob(vec))
}

pub fn decode_embedding(encoded: &str) -> Result<Vec<f32>> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .context("Invalid base64 embedding")?;
    Ok(blob_to_vec(&bytes))
}

/// Counts reported by [`filter_corpus_json`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterStats {
    pub kept: usize,
    pub removed: usize,
}

#[derive(Deserialize)]
struct RawCorpus<'a> {
    version: u32,
    embedding_model: String,
    #[serde(borrow)]
    bits: Vec<&'a RawValue>,
}

#[derive(Serialize)]
struct RawCorpusOut<'a> {
    version: u32,
    embedding_model: &'a str,
    bits: &'a [&'a RawValue],
}

#[derive(Deserialize)]
struct UrlProbe {
    #[serde(default)]
    info: UrlProbeInfo,
}

#[derive(Deserialize, Default)]
struct UrlProbeInfo {
    #[serde(default)]
    url: String,
}

/// Drop every bit whose `info.url` contains `excluded`.
///
/// The output keeps the input's `version` and `embedding_model`; kept bits
/// are copied as raw JSON text.
pub fn filter_corpus_json(input: &str, excluded: &str) -> Result<(String, FilterStats)> {
    let corpus: RawCorpus<'_> =
        serde_json::from_str(input).context("Failed to parse corpus JSON")?;

    let total = corpus.bits.len();
    let mut kept = Vec::with_capacity(total);
    for (i, bit) in corpus.bits.iter().enumerate() {
        let probe: UrlProbe = serde_json::from_str(bit.get())
            .with_context(|| format!("Failed to parse bit {}", i))?;
        if !probe.info.url.contains(excluded) {
            kept.push(*bit);
        }
    }

    let out = RawCorpusOut {
        version: corpus.version,
        embedding_model: &corpus.embedding_model,
        bits: &kept,
    };
    let json = serde_json::to_string(&out)?;

    let stats = FilterStats {
        kept: kept.len(),
        removed: total - kept.len(),
    };
    Ok((json, stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "version": 1,
        "embedding_model": "openai.com:text-embedding-ada-002",
        "bits": [
            {"text": "Widgets live in sidebars.", "info": {"url": "https://developer.wordpress.org/themes/widgets/", "title": "Widgets"}, "token_count": 6},
            {"text": "file listing",   "info": {"url": "https://developer.wordpress.org/reference/files/wp-load.php/"}},
            {"text": "Hooks", "info": {"url": "https://developer.wordpress.org/plugins/hooks/", "title": "Hooks", "description": "About hooks"}},
            {"text": "another file", "info": {"url": "https://developer.wordpress.org/reference/files/wp-config.php/"}}
        ]
    }"#;

    #[test]
    fn test_parse_corpus() {
        let corpus = Corpus::from_json(SAMPLE).unwrap();
        assert_eq!(corpus.version, 1);
        assert_eq!(corpus.bits.len(), 4);
        assert_eq!(corpus.model_name(), "text-embedding-ada-002");
        assert_eq!(corpus.bits[0].token_count, Some(6));
        assert_eq!(corpus.bits[1].info.title, None);
    }

    #[test]
    fn test_model_name_without_provider() {
        let corpus = Corpus {
            version: 1,
            embedding_model: "text-embedding-3-small".into(),
            bits: vec![],
        };
        assert_eq!(corpus.model_name(), "text-embedding-3-small");
    }

    #[test]
    fn test_embedding_codec() {
        let v = vec![0.25f32, -1.5, 3.0];
        let encoded = encode_embedding(&v);
        assert_eq!(decode_embedding(&encoded).unwrap(), v);
        assert!(decode_embedding("not base64!").is_err());
    }

    #[test]
    fn test_filter_removes_matching_urls() {
        let (out, stats) = filter_corpus_json(SAMPLE, "/reference/files/").unwrap();
        assert_eq!(stats, FilterStats { kept: 2, removed: 2 });

        let corpus = Corpus::from_json(&out).unwrap();
        assert_eq!(corpus.version, 1);
        assert_eq!(corpus.embedding_model, "openai.com:text-embedding-ada-002");
        assert!(corpus
            .bits
            .iter()
            .all(|b| !b.info.url.contains("/reference/files/")));
    }

    #[test]
    fn test_filter_keeps_bits_byte_identical() {
        let (out, _) = filter_corpus_json(SAMPLE, "/reference/files/").unwrap();
        assert!(out.contains(
            r#"{"text": "Hooks", "info": {"url": "https://developer.wordpress.org/plugins/hooks/", "title": "Hooks", "description": "About hooks"}}"#
        ));
    }

    #[test]
    fn test_filter_with_no_matches_keeps_everything() {
        let (_, stats) = filter_corpus_json(SAMPLE, "/nothing-matches/").unwrap();
        assert_eq!(stats, FilterStats { kept: 4, removed: 0 });
    }

    #[test]
    fn test_filter_rejects_invalid_json() {
        assert!(filter_corpus_json("{\"bits\": [", "/x/").is_err());
    }
}
