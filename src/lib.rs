//! # askdocs
//!
//! Retrieval-augmented question answering over a fixed, pre-embedded
//! documentation corpus.
//!
//! A question is validated, checked against the caller's daily quota,
//! embedded, matched against the corpus by cosine similarity, and answered
//! by a completion model from the best-matching chunks that fit the
//! model's token budget. Every answer is recorded in SQLite, which is also
//! what the quota counts.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────────────┐   ┌──────────────┐
//! │   HTTP   │──▶│  askdocs-core      │──▶│  OpenAI API  │
//! │  (axum)  │   │  gate → embed →    │   │  embeddings  │
//! └──────────┘   │  retrieve → prompt │   │  completions │
//!                │  → complete → log  │   └──────────────┘
//!                └─────────┬──────────┘
//!                          ▼
//!                   ┌─────────────┐
//!                   │ SQLite asks │
//!                   └─────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`query_log`] | SQLite query log |
//! | [`openai`] | OpenAI embedding and completion adapters |
//! | [`corpus_cmd`] | Corpus loading and filtering |
//! | [`server`] | HTTP server |

pub mod config;
pub mod corpus_cmd;
pub mod db;
pub mod migrate;
pub mod openai;
pub mod query_log;
pub mod server;
