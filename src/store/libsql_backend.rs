//! libSQL backend — async `Database` trait implementation.
//!
//! Each collection is a table of JSON records with the `message_id`
//! lifted into its own indexed column. Filters on `message_id` hit the
//! column; filters on any other field go through `json_extract`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database as LibSqlDatabase, params};
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{Collection, Database, MESSAGE_ID_FIELD, MatchFilter};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Field names are spliced into SQL, so only plain identifiers pass.
fn validate_field(field: &str) -> Result<(), DatabaseError> {
    let mut chars = field.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(DatabaseError::InvalidField(field.to_string()))
    }
}

/// WHERE clause for an equality filter; the value binds to `?{param}`.
fn where_clause(filter: &MatchFilter, param: usize) -> Result<String, DatabaseError> {
    validate_field(&filter.field)?;
    if filter.field == MESSAGE_ID_FIELD {
        Ok(format!("message_id = ?{param}"))
    } else {
        Ok(format!("json_extract(record, '$.{}') = ?{param}", filter.field))
    }
}

// ── Database impl ───────────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn insert(&self, collection: Collection, record: &Value) -> Result<(), DatabaseError> {
        let Some(obj) = record.as_object() else {
            return Err(DatabaseError::Serialization(format!(
                "{collection} record must be a JSON object"
            )));
        };
        let message_id = obj
            .get(MESSAGE_ID_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                DatabaseError::Serialization(format!(
                    "{collection} record is missing a string `message_id`"
                ))
            })?
            .to_string();
        let record_json = serde_json::to_string(record)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        self.conn()
            .execute(
                &format!(
                    "INSERT INTO {} (id, message_id, record, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    collection.name()
                ),
                params![id.clone(), message_id.clone(), record_json, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert into {collection}: {e}")))?;

        debug!(%collection, id = %id, message_id = %message_id, "Record inserted");
        Ok(())
    }

    async fn update(
        &self,
        collection: Collection,
        filter: &MatchFilter,
        patch: &Map<String, Value>,
    ) -> Result<u64, DatabaseError> {
        for key in patch.keys() {
            validate_field(key)?;
        }
        let clause = where_clause(filter, 3)?;
        if patch.is_empty() {
            return Ok(0);
        }
        let patch_json = serde_json::to_string(patch)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        let affected = self
            .conn()
            .execute(
                &format!(
                    "UPDATE {} SET record = json_patch(record, ?1), \
                     message_id = COALESCE(json_extract(?1, '$.message_id'), message_id), \
                     updated_at = ?2 WHERE {clause}",
                    collection.name()
                ),
                params![patch_json, now, filter.value.clone()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update {collection}: {e}")))?;

        debug!(%collection, field = %filter.field, affected, "Records updated");
        Ok(affected)
    }

    async fn find(
        &self,
        collection: Collection,
        filter: &MatchFilter,
    ) -> Result<Vec<Value>, DatabaseError> {
        let clause = where_clause(filter, 1)?;
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT record FROM {} WHERE {clause} ORDER BY rowid ASC",
                    collection.name()
                ),
                params![filter.value.clone()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find in {collection}: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("find in {collection}: {e}")))?
        {
            let raw: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("find row parse: {e}")))?;
            match serde_json::from_str(&raw) {
                Ok(value) => records.push(value),
                Err(e) => tracing::warn!(%collection, "Skipping unparseable record: {e}"),
            }
        }
        Ok(records)
    }
}
