use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::{Storage, VerdictRecord};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::store::{normalize_url, NewsItem, StoreSnapshot};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const NEXT_ID_KEY: &str = "next_id";

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// In-memory database holding a single connection for its lifetime.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            }
        })?;

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn save_verdict(&self, record: &VerdictRecord) -> StorageResult<()> {
        let suspicious = serde_json::to_string(&record.suspicious)?;

        sqlx::query(
            r#"
            INSERT INTO verdicts (url, verdict, suspicious, saved_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                verdict = excluded.verdict,
                suspicious = excluded.suspicious,
                saved_at = excluded.saved_at
            "#,
        )
        .bind(normalize_url(&record.url))
        .bind(&record.verdict)
        .bind(&suspicious)
        .bind(record.saved_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(url = %record.url, verdict = %record.verdict, "Verdict saved");
        Ok(())
    }

    async fn get_verdict(&self, url: &str) -> StorageResult<Option<VerdictRecord>> {
        let row: Option<VerdictRow> = sqlx::query_as(
            r#"
            SELECT url, verdict, suspicious, saved_at
            FROM verdicts
            WHERE url = ?
            "#,
        )
        .bind(normalize_url(url))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn delete_verdict(&self, url: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM verdicts WHERE url = ?")
            .bind(normalize_url(url))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_verdicts(&self) -> StorageResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM verdicts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn save_snapshot(&self, snapshot: &StoreSnapshot) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM news_items")
            .execute(&mut *tx)
            .await?;

        for (position, item) in snapshot.items.iter().enumerate() {
            let data = serde_json::to_string(item)?;
            sqlx::query(
                r#"
                INSERT INTO news_items (id, position, data, updated_at)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(item.id.0 as i64)
            .bind(position as i64)
            .bind(&data)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO store_meta (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(NEXT_ID_KEY)
        .bind(snapshot.next_id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(items = snapshot.items.len(), next_id = snapshot.next_id, "Snapshot saved");
        Ok(())
    }

    async fn load_snapshot(&self) -> StorageResult<Option<StoreSnapshot>> {
        let next_id: Option<(String,)> =
            sqlx::query_as("SELECT value FROM store_meta WHERE key = ?")
                .bind(NEXT_ID_KEY)
                .fetch_optional(&self.pool)
                .await?;

        let Some((next_id,)) = next_id else {
            return Ok(None);
        };
        let next_id = next_id.parse::<u64>().map_err(|e| StorageError::Query {
            message: format!("Corrupt id counter '{}': {}", next_id, e),
        })?;

        let rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, data FROM news_items ORDER BY position ASC")
                .fetch_all(&self.pool)
                .await?;

        let items = rows
            .into_iter()
            .filter_map(|(id, data)| match serde_json::from_str::<NewsItem>(&data) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(item_id = id, error = %e, "Skipping unreadable persisted item");
                    None
                }
            })
            .collect();

        Ok(Some(StoreSnapshot { items, next_id }))
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct VerdictRow {
    url: String,
    verdict: String,
    suspicious: String,
    saved_at: String,
}

impl From<VerdictRow> for VerdictRecord {
    fn from(row: VerdictRow) -> Self {
        Self {
            url: row.url,
            verdict: row.verdict,
            suspicious: serde_json::from_str(&row.suspicious).unwrap_or_default(),
            saved_at: DateTime::parse_from_rfc3339(&row.saved_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }
    }
}
