use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the `asks` table and its index. Idempotent.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // result and sources_json are stored, never queried
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS asks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at INTEGER NOT NULL,
            query TEXT NOT NULL,
            iphash TEXT NOT NULL,
            result TEXT NOT NULL,
            sources_json TEXT NOT NULL DEFAULT '[]',
            rating INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_asks_iphash_created ON asks(iphash, created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
