//! SQLite-backed persistence delegate.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use sqlx::{FromRow, SqliteConnection};
use std::path::Path;
use std::str::FromStr;

use super::{PersistenceDelegate, PersistenceInfo};
use crate::connection::Connection;
use crate::error::{DatabaseError, Error, Result};
use crate::headers::Headers;
use crate::parameters::Parameters;
use crate::types::Method;

/// Request left over from a previous process
#[derive(Clone, Debug, PartialEq)]
pub struct PendingRequest {
    /// Persistence key
    pub key: String,
    /// HTTP method
    pub method: Method,
    /// Request URL as originally given
    pub url: String,
    /// Explicitly set headers (None = defaults applied)
    pub headers: Option<Headers>,
    /// Request parameters
    pub parameters: Parameters,
    /// Whether the body was being streamed to a file
    pub download_to_file: bool,
    /// Caller metadata
    pub metadata: serde_json::Value,
    /// When the request was started
    pub started_at: DateTime<Utc>,
}

impl PendingRequest {
    /// Persistence info to attach to the re-issued connection
    pub fn info(&self) -> PersistenceInfo {
        PersistenceInfo {
            key: self.key.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

#[derive(Debug, FromRow)]
struct PendingRow {
    key: String,
    method: String,
    url: String,
    headers: Option<String>,
    parameters: String,
    download_to_file: bool,
    metadata: String,
    started_at: i64,
}

impl TryFrom<PendingRow> for PendingRequest {
    type Error = Error;

    fn try_from(row: PendingRow) -> Result<Self> {
        let headers = row
            .headers
            .as_deref()
            .map(serde_json::from_str::<Headers>)
            .transpose()?;
        Ok(Self {
            method: row.method.parse()?,
            headers,
            parameters: serde_json::from_str(&row.parameters)?,
            metadata: serde_json::from_str(&row.metadata)?,
            started_at: Utc
                .timestamp_opt(row.started_at, 0)
                .single()
                .unwrap_or_else(Utc::now),
            key: row.key,
            url: row.url,
            download_to_file: row.download_to_file,
        })
    }
}

/// Records started requests in SQLite and forgets them once they finish
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Open (or create) the database and run migrations
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let store = Self { pool };
        store.run_migrations().await?;

        tracing::info!(path = %path.display(), "Request persistence opened");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create schema_version table: {}",
                e
            )))
        })?;

        let current_version: Option<i64> =
            sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(version) FROM schema_version")
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?
                .flatten();

        if current_version.unwrap_or(0) < 1 {
            Self::migrate_v1(&mut conn).await?;
        }

        Ok(())
    }

    /// Migration v1: persisted request table
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("Applying persistence migration v1");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS persisted_requests (
                key TEXT PRIMARY KEY,
                method TEXT NOT NULL,
                url TEXT NOT NULL,
                headers TEXT,
                parameters TEXT NOT NULL,
                download_to_file INTEGER NOT NULL DEFAULT 0,
                metadata TEXT NOT NULL,
                started_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create persisted_requests table: {}",
                e
            )))
        })?;

        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (1, ?)")
            .bind(Utc::now().timestamp())
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to record migration v1: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Record (or refresh) a started request
    pub async fn record(&self, connection: &Connection, info: &PersistenceInfo) -> Result<()> {
        let headers = connection
            .explicit_headers()
            .map(|h| serde_json::to_string(&h))
            .transpose()?;
        let parameters = serde_json::to_string(connection.parameters())?;
        let metadata = serde_json::to_string(&info.metadata)?;
        let started_at = connection
            .started_at()
            .unwrap_or_else(Utc::now)
            .timestamp();

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO persisted_requests (
                key, method, url, headers, parameters,
                download_to_file, metadata, started_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&info.key)
        .bind(connection.method().as_str())
        .bind(connection.url().as_str())
        .bind(headers)
        .bind(parameters)
        .bind(connection.download_to_file())
        .bind(metadata)
        .bind(started_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to record request: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Forget a request; returns whether it was recorded
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM persisted_requests WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to remove request: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    /// Requests recorded but never finished, oldest first
    pub async fn pending(&self) -> Result<Vec<PendingRequest>> {
        let rows = sqlx::query_as::<_, PendingRow>(
            r#"
            SELECT key, method, url, headers, parameters,
                   download_to_file, metadata, started_at
            FROM persisted_requests
            ORDER BY started_at ASC, key ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list pending requests: {}",
                e
            )))
        })?;

        rows.into_iter().map(PendingRequest::try_from).collect()
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl PersistenceDelegate for SqlitePersistence {
    async fn connection_started(
        &self,
        connection: &Connection,
        info: &PersistenceInfo,
    ) -> Result<()> {
        self.record(connection, info).await
    }

    async fn connection_finished(
        &self,
        _connection: &Connection,
        info: &PersistenceInfo,
    ) -> Result<()> {
        self.remove(&info.key).await.map(|_| ())
    }
}
