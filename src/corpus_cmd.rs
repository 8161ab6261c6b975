//! Corpus file commands: loading a library for serving, and
//! `askdocs filter-corpus`.

use anyhow::{Context, Result};
use askdocs_core::corpus::{filter_corpus_json, Corpus, FilterStats};
use askdocs_core::library::Library;
use std::path::Path;

/// Default URL substring removed by `filter-corpus`.
pub const DEFAULT_EXCLUDE: &str = "/reference/files/";

/// Read and decode a corpus file into a [`Library`].
pub fn load_library(path: &Path) -> Result<Library> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read corpus file: {}", path.display()))?;
    let corpus = Corpus::from_json(&json)
        .with_context(|| format!("Invalid corpus file: {}", path.display()))?;
    Library::from_corpus(corpus)
}

/// Write `output` with every bit of `input` whose URL does not contain
/// `exclude`.
pub fn run_filter(input: &Path, output: &Path, exclude: &str) -> Result<FilterStats> {
    let json = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read corpus file: {}", input.display()))?;

    let (filtered, stats) = filter_corpus_json(&json, exclude)
        .with_context(|| format!("Failed to filter {}", input.display()))?;

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(output, filtered)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "Kept {} bits, removed {} matching '{}'.",
        stats.kept, stats.removed, exclude
    );
    println!("Wrote {}", output.display());
    Ok(stats)
}
