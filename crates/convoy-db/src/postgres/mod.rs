//! Postgres back-ends.
//!
//! Entities are stored as one JSONB document per row with expression
//! indexes over the fields the queries filter on. The schema is applied
//! idempotently at connect time, so a fresh database works out of the box.

mod api_keys;
mod applications;
mod deliveries;
mod events;
mod groups;

pub use api_keys::PostgresApiKeyRepository;
pub use applications::PostgresApplicationRepository;
pub use deliveries::PostgresEventDeliveryRepository;
pub use events::PostgresEventRepository;
pub use groups::PostgresGroupRepository;

use serde::de::DeserializeOwned;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use convoy_core::error::{Error, Result};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS groups (id TEXT PRIMARY KEY, doc JSONB NOT NULL)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_groups_active_name ON groups ((doc->>'name')) \
     WHERE doc->>'document_status' = 'Active'",
    "CREATE TABLE IF NOT EXISTS applications (id TEXT PRIMARY KEY, doc JSONB NOT NULL)",
    "CREATE INDEX IF NOT EXISTS idx_applications_group_id ON applications ((doc->>'group_id'))",
    "CREATE TABLE IF NOT EXISTS events (id TEXT PRIMARY KEY, doc JSONB NOT NULL)",
    "CREATE INDEX IF NOT EXISTS idx_events_group_id ON events ((doc->>'group_id'))",
    "CREATE INDEX IF NOT EXISTS idx_events_app_id ON events ((doc->>'app_id'))",
    "CREATE TABLE IF NOT EXISTS event_deliveries (id TEXT PRIMARY KEY, doc JSONB NOT NULL)",
    "CREATE INDEX IF NOT EXISTS idx_event_deliveries_status ON event_deliveries ((doc->>'status'))",
    "CREATE INDEX IF NOT EXISTS idx_event_deliveries_next_send ON event_deliveries \
     ((doc->'metadata'->>'next_send_time'))",
    "CREATE TABLE IF NOT EXISTS api_keys (id TEXT PRIMARY KEY, doc JSONB NOT NULL)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_api_keys_mask_id ON api_keys ((doc->>'mask_id'))",
];

/// Open a pool and apply the schema.
pub async fn connect(dsn: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(dsn)
        .await
        .map_err(|e| Error::Transient(format!("database connect failed: {}", e)))?;

    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(&pool)
            .await
            .map_err(map_sqlx_err)?;
    }
    Ok(pool)
}

#[derive(sqlx::FromRow)]
pub(crate) struct DocRow {
    pub(crate) doc: serde_json::Value,
}

pub(crate) fn parse_doc<T: DeserializeOwned>(row: DocRow) -> Result<T> {
    serde_json::from_value(row.doc)
        .map_err(|e| Error::Internal(format!("malformed document: {}", e)))
}

pub(crate) fn parse_docs<T: DeserializeOwned>(rows: Vec<DocRow>) -> Result<Vec<T>> {
    rows.into_iter().map(parse_doc).collect()
}

pub(crate) fn map_sqlx_err(err: sqlx::Error) -> Error {
    match &err {
        sqlx::Error::RowNotFound => Error::NotFound("not found".to_string()),
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            Error::Conflict("document already exists".to_string())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => Error::Transient(err.to_string()),
        _ => Error::Internal(err.to_string()),
    }
}

pub(crate) fn to_doc<T: serde::Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| Error::Internal(e.to_string()))
}
