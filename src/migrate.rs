use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    ensure_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the report table and its indexes. Idempotent.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    // One row per report name; upserts rely on the UNIQUE constraint.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ai_analysis (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            report_name TEXT NOT NULL UNIQUE,
            ai_description TEXT NOT NULL,
            minio_report_path TEXT,
            create_time INTEGER NOT NULL,
            update_time INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_ai_analysis_create_time ON ai_analysis(create_time DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
