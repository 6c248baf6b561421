//! Schema-less per-photo metadata documents.
//!
//! Documents are JSON objects keyed by the photo id. They are advisory: the
//! relational row stays authoritative and an absent document is a normal
//! outcome, never an error.

use crate::config::DatabaseConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, instrument};

/// Field map stored for a key
pub type Document = Map<String, Value>;

/// Key-value store of mutable metadata documents
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Replace the document stored under `key`
    async fn set(&self, key: &str, fields: Document) -> Result<()>;

    /// Fetch a document, `None` when absent
    async fn get(&self, key: &str) -> Result<Option<Document>>;

    /// Merge `fields` into an existing document
    ///
    /// Returns `false` without writing anything when the document is absent.
    async fn patch(&self, key: &str, fields: Document) -> Result<bool>;

    /// Remove a document; absent keys are not an error
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Document store backed by a PostgreSQL JSONB table
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    /// Connect to the document database
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to document database")?;

        info!("Connected to document database");

        Ok(Self { pool })
    }

    /// Create the documents table if needed
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS photo_documents (
                id TEXT PRIMARY KEY,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create photo_documents table")?;

        Ok(())
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    #[instrument(skip(self, fields))]
    async fn set(&self, key: &str, fields: Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO photo_documents (id, data, created_at, updated_at)
            VALUES ($1, $2, NOW(), NOW())
            ON CONFLICT (id) DO UPDATE
            SET data = EXCLUDED.data, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(Value::Object(fields))
        .execute(&self.pool)
        .await
        .context("Failed to write document")?;

        debug!(key = %key, "Document written");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Document>> {
        let row: Option<(Value,)> = sqlx::query_as("SELECT data FROM photo_documents WHERE id = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read document")?;

        Ok(row.and_then(|(data,)| match data {
            Value::Object(map) => Some(map),
            _ => None,
        }))
    }

    #[instrument(skip(self, fields))]
    async fn patch(&self, key: &str, fields: Document) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE photo_documents
            SET data = data || $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(key)
        .bind(Value::Object(fields))
        .execute(&self.pool)
        .await
        .context("Failed to patch document")?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM photo_documents WHERE id = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .context("Failed to delete document")?;

        Ok(())
    }
}
