//! Query log abstraction.
//!
//! The [`QueryLog`] trait records served asks and backs the rate gate's
//! counting. Backends: SQLite in the app crate, [`memory::InMemoryQueryLog`]
//! here for tests.
//!
//! Implementations must be `Send + Sync`; handlers call them concurrently
//! without any coordination from the core.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{AskId, AskRecord, IpHash};

/// Durable record of served asks.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`append`](QueryLog::append) | Persist one ask, returning its id |
/// | [`count_since`](QueryLog::count_since) | Count an identity's asks with `created >= since` |
#[async_trait]
pub trait QueryLog: Send + Sync {
    /// Persist a record. Returns the assigned id.
    async fn append(&self, record: &AskRecord) -> Result<AskId>;

    /// Number of records for `iphash` created at or after `since`.
    async fn count_since(&self, iphash: &IpHash, since: DateTime<Utc>) -> Result<u64>;
}
