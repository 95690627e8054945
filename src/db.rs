//! SQLite pool shared by the document status and conversation stores.
//!
//! Background ingestion runs write status records while chat turns read and
//! write conversations, so the pool uses WAL journaling and waits on a busy
//! database instead of failing the write.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::config::Config;

const MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (creating if needed) the database at `[db].path`.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_connect_creates_nested_directory() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("nested/dir/ragchat.sqlite");
        let config = parse_config(&format!(
            r#"
            [db]
            path = "{}"

            [embedding]
            provider = "endpoint"
            url = "http://localhost:8080/embed"
            model = "e5"
            dims = 4

            [storage]
            root = "{}"

            [server]
            bind = "127.0.0.1:7331"
            "#,
            db_path.display(),
            tmp.path().join("blobs").display()
        ))
        .unwrap();

        let pool = connect(&config).await.unwrap();
        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        assert!(db_path.exists());
    }
}
