use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create tables and indexes if they do not exist.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    // Document status records
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            document_name TEXT NOT NULL,
            content_type TEXT NOT NULL,
            status TEXT NOT NULL,
            uploaded_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            index_pointer TEXT,
            CHECK ((status = 'COMPLETED') = (index_pointer IS NOT NULL))
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Conversation sessions
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            session_id TEXT PRIMARY KEY,
            config_json TEXT NOT NULL,
            history_json TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_updated_at ON documents(updated_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
