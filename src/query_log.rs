//! SQLite-backed [`QueryLog`].
//!
//! Rows live in the `asks` table created by [`crate::migrate`]. Timestamps
//! are stored as Unix milliseconds so the window comparison is an integer
//! range scan over `idx_asks_iphash_created`.

use anyhow::{Context, Result};
use askdocs_core::models::{AskId, AskRecord, IpHash};
use askdocs_core::store::QueryLog;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

pub struct SqliteQueryLog {
    pool: SqlitePool,
}

impl SqliteQueryLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueryLog for SqliteQueryLog {
    async fn append(&self, record: &AskRecord) -> Result<AskId> {
        let sources_json =
            serde_json::to_string(&record.sources).context("Failed to encode sources")?;

        let result = sqlx::query(
            "INSERT INTO asks (created_at, query, iphash, result, sources_json, rating) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(record.created.timestamp_millis())
        .bind(&record.query)
        .bind(record.iphash.as_str())
        .bind(&record.result)
        .bind(&sources_json)
        .bind(record.rating)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn count_since(&self, iphash: &IpHash, since: DateTime<Utc>) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM asks WHERE iphash = ? AND created_at >= ?")
                .bind(iphash.as_str())
                .bind(since.timestamp_millis())
                .fetch_one(&self.pool)
                .await?;

        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_path;
    use crate::migrate::migrate_pool;
    use askdocs_core::models::{Query, Source};
    use chrono::Duration;
    use sqlx::Row;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqliteQueryLog) {
        let tmp = TempDir::new().unwrap();
        let pool = connect_path(&tmp.path().join("data/asks.sqlite"))
            .await
            .unwrap();
        migrate_pool(&pool).await.unwrap();
        (tmp, SqliteQueryLog::new(pool))
    }

    fn record(ip: &IpHash, created: DateTime<Utc>) -> AskRecord {
        AskRecord::new(
            Query::parse("How do I register a widget?", 200).unwrap(),
            ip.clone(),
            "Use register_widget().".into(),
            vec![Source {
                url: "https://developer.wordpress.org/themes/functionality/widgets/".into(),
                title: "Widgets".into(),
            }],
            created,
        )
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let (_tmp, log) = setup().await;
        let ip = IpHash::from_addr("203.0.113.7");
        let id = log.append(&record(&ip, Utc::now())).await.unwrap();
        assert_eq!(id, 1);

        let row = sqlx::query("SELECT query, iphash, sources_json, rating FROM asks WHERE id = ?")
            .bind(id)
            .fetch_one(&log.pool)
            .await
            .unwrap();
        let query: String = row.get("query");
        let iphash: String = row.get("iphash");
        let sources_json: String = row.get("sources_json");
        let rating: i64 = row.get("rating");

        assert_eq!(query, "How do I register a widget?");
        assert_eq!(iphash, ip.as_str());
        assert!(sources_json.contains("\"title\":\"Widgets\""));
        assert_eq!(rating, 0);
    }

    #[tokio::test]
    async fn test_count_since_window() {
        let (_tmp, log) = setup().await;
        let ip = IpHash::from_addr("203.0.113.7");
        let now = Utc::now();
        let since = now - Duration::hours(24);

        log.append(&record(&ip, now)).await.unwrap();
        log.append(&record(&ip, since)).await.unwrap();
        log.append(&record(&ip, since - Duration::milliseconds(1)))
            .await
            .unwrap();
        log.append(&record(&IpHash::from_addr("203.0.113.8"), now))
            .await
            .unwrap();

        assert_eq!(log.count_since(&ip, since).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let (_tmp, log) = setup().await;
        migrate_pool(&log.pool).await.unwrap();
        let ip = IpHash::from_addr("203.0.113.7");
        assert_eq!(log.count_since(&ip, Utc::now()).await.unwrap(), 0);
    }
}
