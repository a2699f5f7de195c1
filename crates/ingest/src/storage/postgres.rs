//! PostgreSQL relational sink
//!
//! One table per registry entity, `id BIGINT PRIMARY KEY`. Foreign keys are
//! enforced by the persister, not by constraints, so batches can arrive in
//! any entity order without failing the whole insert.

use async_trait::async_trait;
use deadpool_postgres::{Config, Pool, Runtime};
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;

use super::RelationalStore;
use crate::{
    error::{IngestError, IngestResult},
    schema::{entity_schema, EntitySchema, FieldKind},
    types::{CanonicalRecord, EntityKind, FieldValue},
};

/// Relational store backed by a `deadpool-postgres` pool
#[derive(Debug, Clone)]
pub struct PostgresRelationalStore {
    pool: Pool,
}

impl PostgresRelationalStore {
    /// Create a pool for `database_url`
    ///
    /// # Errors
    ///
    /// Returns error if the pool cannot be built from the URL.
    pub fn connect(database_url: &str, max_connections: usize) -> IngestResult<Self> {
        let mut pg_config = Config::new();
        pg_config.url = Some(database_url.to_string());
        pg_config.pool = Some(deadpool_postgres::PoolConfig::new(max_connections));

        let pool = pg_config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| {
                tracing::error!("PostgreSQL pool creation failed: {e}");
                IngestError::store("create_pool", e.to_string())
            })?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool
    #[must_use]
    pub const fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create the entity tables if they do not exist yet
    ///
    /// # Errors
    ///
    /// Returns error if a connection cannot be acquired or DDL fails.
    pub async fn ensure_schema(&self) -> IngestResult<()> {
        let client = self.pool.get().await?;
        for kind in EntityKind::ALL {
            let ddl = create_table_sql(kind.as_str(), entity_schema(kind))?;
            client.batch_execute(&ddl).await?;
            tracing::debug!(table = kind.as_str(), "ensured table");
        }
        Ok(())
    }
}

#[async_trait]
impl RelationalStore for PostgresRelationalStore {
    async fn exists(&self, table: &str, id: i64) -> IngestResult<bool> {
        let table = checked_identifier(table)?;
        let client = self.pool.get().await?;
        let sql = format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = $1)");
        let row = client.query_one(sql.as_str(), &[&id]).await?;
        Ok(row.try_get(0)?)
    }

    async fn insert(&self, table: &str, record: &CanonicalRecord) -> IngestResult<()> {
        let table = checked_identifier(table)?;
        let mut columns = Vec::with_capacity(record.fields.len());
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(record.fields.len());

        // Null columns are omitted so the column default applies.
        for (name, value) in &record.fields {
            let param: &(dyn ToSql + Sync) = match value {
                FieldValue::Integer(v) => v,
                FieldValue::Text(v) => v,
                FieldValue::Null => continue,
            };
            columns.push(checked_identifier(name)?);
            params.push(param);
        }

        let placeholders = (1..=params.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({placeholders})",
            columns.join(", ")
        );

        let client = self.pool.get().await?;
        client.execute(sql.as_str(), &params).await?;
        Ok(())
    }
}

/// Accept lowercase SQL identifiers only; table and column names are
/// interpolated into statements.
fn checked_identifier(name: &str) -> IngestResult<&str> {
    let mut chars = name.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let valid_tail = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid_head && valid_tail && name.len() <= 63 {
        Ok(name)
    } else {
        Err(IngestError::configuration(format!(
            "'{name}' is not a valid table or column name"
        )))
    }
}

fn create_table_sql(table: &str, schema: &EntitySchema) -> IngestResult<String> {
    let table = checked_identifier(table)?;
    let mut columns = Vec::with_capacity(schema.fields.len());
    for field in schema.fields {
        let name = checked_identifier(field.name)?;
        let column = match (field.name, field.kind, field.required) {
            ("id", _, _) => format!("{name} BIGINT PRIMARY KEY"),
            (_, FieldKind::Integer, true) => format!("{name} BIGINT NOT NULL"),
            (_, FieldKind::Integer, false) => format!("{name} BIGINT"),
            (_, FieldKind::Text, true) => format!("{name} TEXT NOT NULL"),
            (_, FieldKind::Text, false) => format!("{name} TEXT"),
        };
        columns.push(column);
    }
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {table} ({})",
        columns.join(", ")
    ))
}
