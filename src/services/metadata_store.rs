//! src/services/metadata_store.rs
//!
//! MetadataStore — image metadata backed by SQLite. The `images` table keys
//! rows by `(owner_id, created_at)` and carries a secondary index on
//! `image_id`; listings are planned by [`QueryPlan`].

use crate::{
    models::image::{ImageRecord, RecordKey},
    services::query::QueryPlan,
};
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite, types::Json};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const RECORD_COLUMNS: &str = "owner_id, created_at, image_id, file_name, content_type, \
     size_bytes, tags, description, blob_bucket, blob_key";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One page of a listing.
#[derive(Debug, Default)]
pub struct QueryPage {
    pub records: Vec<ImageRecord>,
    /// Key of the last record in `records` when more rows remain in range.
    pub last_evaluated_key: Option<RecordKey>,
}

#[derive(Clone)]
pub struct MetadataStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl MetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn migrate(&self) -> StoreResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("running {} schema statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Cheap round trip used by readiness checks.
    pub async fn ping(&self) -> StoreResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }

    /// Insert or replace the record stored under the same primary key.
    pub async fn put(&self, record: &ImageRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO images (
                owner_id, created_at, image_id, file_name, content_type,
                size_bytes, tags, description, blob_bucket, blob_key
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(owner_id, created_at) DO UPDATE SET
                image_id = excluded.image_id,
                file_name = excluded.file_name,
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                tags = excluded.tags,
                description = excluded.description,
                blob_bucket = excluded.blob_bucket,
                blob_key = excluded.blob_key
            "#,
        )
        .bind(&record.owner_id)
        .bind(&record.created_at)
        .bind(&record.image_id)
        .bind(&record.file_name)
        .bind(&record.content_type)
        .bind(record.size_bytes)
        .bind(Json(&record.tags))
        .bind(&record.description)
        .bind(&record.blob_bucket)
        .bind(&record.blob_key)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Look a record up through the `image_id` index.
    ///
    /// Should the index ever hold duplicates, the first row in key order wins.
    pub async fn get_by_image_id(&self, image_id: &str) -> StoreResult<Option<ImageRecord>> {
        let record = sqlx::query_as::<_, ImageRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM images WHERE image_id = ? \
             ORDER BY owner_id, created_at LIMIT 1"
        ))
        .bind(image_id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(record)
    }

    /// Delete by primary key. Missing keys are not an error.
    pub async fn delete_by_key(&self, key: &RecordKey) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM images WHERE owner_id = ? AND created_at = ?")
            .bind(&key.owner_id)
            .bind(&key.created_at)
            .execute(&*self.db)
            .await?;
        debug!(
            owner_id = %key.owner_id,
            created_at = %key.created_at,
            rows = result.rows_affected(),
            "deleted image record"
        );
        Ok(())
    }

    /// Run one page of a planned listing, newest first.
    pub async fn query(&self, plan: &QueryPlan) -> StoreResult<QueryPage> {
        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT {RECORD_COLUMNS} FROM images"));
        plan.push_sql(&mut builder);

        let mut records: Vec<ImageRecord> = builder.build_query_as().fetch_all(&*self.db).await?;

        let mut last_evaluated_key = None;
        if records.len() == plan.fetch_limit() {
            records.pop();
            last_evaluated_key = records.last().map(ImageRecord::key);
        }

        Ok(QueryPage {
            records,
            last_evaluated_key,
        })
    }
}

/// In-memory store on a single pinned connection, schema applied.
#[cfg(test)]
pub(crate) async fn memory_store() -> MetadataStore {
    use sqlx::sqlite::SqlitePoolOptions;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = MetadataStore::new(Arc::new(pool));
    store.migrate().await.unwrap();
    store
}
