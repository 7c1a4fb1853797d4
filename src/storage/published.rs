use std::str::FromStr;
use std::time::Duration;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    QueryBuilder, SqlitePool,
};
use thiserror::Error;

use super::{DedupGate, PublishRecorder};
use crate::feed::Article;

/// Keeps each INSERT well under SQLite's bound-parameter limit (5 * 100).
const BATCH_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another run holds the database
    #[error("The published store is locked by another run")]
    Locked,

    #[error("Published store migration failed: {0}")]
    Migration(#[source] sqlx::Error),

    #[error("Published store error: {0}")]
    Other(#[from] sqlx::Error),
}

impl StoreError {
    fn from_sqlx(err: sqlx::Error) -> Self {
        let message = err.to_string().to_lowercase();
        if message.contains("database is locked")
            || message.contains("database table is locked")
            || message.contains("sqlite_busy")
            || message.contains("sqlite_locked")
        {
            return StoreError::Locked;
        }
        StoreError::Other(err)
    }
}

/// SQLite table of GUIDs that have been delivered.
#[derive(Clone)]
pub struct PublishedStore {
    pool: SqlitePool,
}

impl PublishedStore {
    /// Open (creating if needed) the store at `path` and run migrations.
    ///
    /// # Arguments
    ///
    /// * `path` - SQLite file path; `":memory:"` gives a private in-memory store
    ///
    /// # Errors
    ///
    /// - [`StoreError::Locked`] - Another run holds the database lock
    /// - [`StoreError::Migration`] - The `published` table could not be created
    /// - [`StoreError::Other`] - The file could not be opened
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let in_memory = path == ":memory:";
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout lets an overlapping run wait for the lock instead of failing
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StoreError::from_sqlx)?
            .pragma("busy_timeout", "5000");

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 4 })
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StoreError::from_sqlx)?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS published (
                guid TEXT PRIMARY KEY,
                header TEXT NOT NULL,
                title TEXT NOT NULL,
                link TEXT NOT NULL,
                published_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(StoreError::Migration)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_published_at ON published(published_at DESC)",
        )
        .execute(&mut *tx)
        .await
        .map_err(StoreError::Migration)?;

        tx.commit().await.map_err(StoreError::Migration)?;
        Ok(())
    }

    pub async fn is_published(&self, guid: &str) -> Result<bool, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM published WHERE guid = ?")
            .bind(guid)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(row.is_some())
    }

    /// Marks `articles` as delivered in a single transaction.
    ///
    /// GUIDs that are already present are left untouched. Returns the
    /// number of rows actually inserted.
    pub async fn mark_published(&self, articles: &[Article]) -> Result<usize, StoreError> {
        if articles.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;
        let mut inserted = 0usize;

        for chunk in articles.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO published (guid, header, title, link, published_at) ",
            );
            builder.push_values(chunk, |mut b, article| {
                b.push_bind(&article.guid)
                    .push_bind(&article.header)
                    .push_bind(&article.title)
                    .push_bind(&article.link)
                    .push_bind(now);
            });
            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from_sqlx)?;

            let changes: (i64,) = sqlx::query_as("SELECT changes()")
                .fetch_one(&mut *tx)
                .await
                .map_err(StoreError::from_sqlx)?;
            inserted += changes.0 as usize;
        }

        tx.commit().await.map_err(StoreError::from_sqlx)?;
        Ok(inserted)
    }

    /// Number of GUIDs recorded so far.
    pub async fn count(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM published")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(count)
    }
}

impl DedupGate for PublishedStore {
    type Error = StoreError;

    async fn is_published(&self, guid: &str) -> Result<bool, Self::Error> {
        PublishedStore::is_published(self, guid).await
    }
}

impl PublishRecorder for PublishedStore {
    type Error = StoreError;

    async fn mark_published(&self, articles: &[Article]) -> Result<usize, Self::Error> {
        PublishedStore::mark_published(self, articles).await
    }
}
