//! In-memory [`QueryLog`] for tests.

use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{AskId, AskRecord, IpHash};

use super::QueryLog;

/// Query log held in a `Vec` behind a `RwLock`.
#[derive(Default)]
pub struct InMemoryQueryLog {
    records: RwLock<Vec<AskRecord>>,
}

impl InMemoryQueryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything appended so far, in order.
    pub fn records(&self) -> Vec<AskRecord> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl QueryLog for InMemoryQueryLog {
    async fn append(&self, record: &AskRecord) -> Result<AskId> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.push(record.clone());
        Ok(records.len() as AskId)
    }

    async fn count_since(&self, iphash: &IpHash, since: DateTime<Utc>) -> Result<u64> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let count = records
            .iter()
            .filter(|r| &r.iphash == iphash && r.created >= since)
            .count();
        Ok(count as u64)
    }
}
