//! # askdocs Core
//!
//! Domain logic for answering questions about a documentation corpus:
//! query validation, the per-identity rate gate, the context token budget,
//! prompt assembly, the in-memory corpus library, and the `ask` / `query`
//! orchestration over injected capabilities.
//!
//! This crate performs no network, database, or filesystem I/O. Upstream
//! providers (embeddings, completions) and persistence (the query log) are
//! reached only through the traits in [`embedding`], [`completion`], and
//! [`store`]; the application crate supplies the concrete adapters.

pub mod ask;
pub mod budget;
pub mod completion;
pub mod corpus;
pub mod embedding;
pub mod error;
pub mod library;
pub mod models;
pub mod prompt;
pub mod rate_gate;
pub mod store;
