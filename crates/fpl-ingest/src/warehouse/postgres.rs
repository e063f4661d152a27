//! PostgreSQL warehouse
//!
//! Each dataset is a Postgres schema and each table stores one JSONB document
//! per row alongside its ordinal. Load bookkeeping lives in
//! `public.fpl_table_metadata`, whose `last_modified` is taken from
//! `clock_timestamp()` inside the load transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::{LoadOptions, LoadSource, TableHandle, TableId, Warehouse, WriteDisposition};
use crate::codec::decode_rows;
use crate::error::{IngestError, Result};
use crate::schema::Schema;
use crate::storage::{ObjectHandle, ObjectStorage};
use crate::table::Row;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

const METADATA_TABLE: &str = "public.fpl_table_metadata";

/// Rows per INSERT; two bind parameters each
const INSERT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl PostgresConfig {
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("DATABASE_URL")
            .map_err(|_| IngestError::InvalidConfig("DATABASE_URL must be set".to_string()))?;

        Ok(Self {
            url,
            max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
            connect_timeout_secs: std::env::var("DB_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
        })
    }
}

pub struct PostgresWarehouse {
    pool: PgPool,
    storage: Arc<dyn ObjectStorage>,
}

impl PostgresWarehouse {
    pub fn new(pool: PgPool, storage: Arc<dyn ObjectStorage>) -> Self {
        Self { pool, storage }
    }

    /// Connect and make sure the metadata table exists
    pub async fn connect(config: &PostgresConfig, storage: Arc<dyn ObjectStorage>) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;
        info!(max_connections = config.max_connections, "Database connection pool created");

        let warehouse = Self::new(pool, storage);
        warehouse.ensure_metadata_table().await?;
        Ok(warehouse)
    }

    pub async fn ensure_metadata_table(&self) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {METADATA_TABLE} (
                dataset TEXT NOT NULL,
                table_name TEXT NOT NULL,
                last_modified TIMESTAMPTZ NOT NULL,
                row_count BIGINT NOT NULL,
                table_schema JSONB,
                PRIMARY KEY (dataset, table_name)
            )
            "#
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn source_objects(&self, source: &LoadSource) -> Result<Vec<ObjectHandle>> {
        let objects = match source {
            LoadSource::Object(handle) => vec![handle.clone()],
            LoadSource::Prefix(prefix) => self.storage.list(prefix).await?,
        };
        if objects.is_empty() {
            return Err(IngestError::warehouse(format!("no objects match {source}")));
        }
        Ok(objects)
    }

    async fn read_rows(&self, objects: &[ObjectHandle], options: &LoadOptions) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        for object in objects {
            let bytes = self.storage.read(object).await?;
            let decoded = decode_rows(&bytes, options.file_type)?;
            debug!(uri = %object.uri, rows = decoded.len(), "Read staged object");
            rows.extend(decoded);
        }
        Ok(rows)
    }

    async fn prepare_table(
        tx: &mut Transaction<'_, Postgres>,
        schema: &str,
        table: &str,
        disposition: WriteDisposition,
        destination: &TableId,
    ) -> Result<i64> {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {schema}"))
            .execute(&mut **tx)
            .await?;
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {schema}.{table} (
                ordinal BIGINT NOT NULL,
                data JSONB NOT NULL,
                loaded_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp()
            )
            "#
        ))
        .execute(&mut **tx)
        .await?;

        match disposition {
            WriteDisposition::WriteTruncate => {
                sqlx::query(&format!("TRUNCATE TABLE {schema}.{table}"))
                    .execute(&mut **tx)
                    .await?;
                Ok(0)
            },
            WriteDisposition::WriteEmpty => {
                let populated: bool =
                    sqlx::query_scalar(&format!("SELECT EXISTS (SELECT 1 FROM {schema}.{table})"))
                        .fetch_one(&mut **tx)
                        .await?;
                if populated {
                    return Err(IngestError::warehouse(format!(
                        "{destination} is not empty and write disposition is WRITE_EMPTY"
                    )));
                }
                Ok(0)
            },
            WriteDisposition::WriteAppend => {
                let next: i64 = sqlx::query_scalar(&format!(
                    "SELECT COALESCE(MAX(ordinal) + 1, 0) FROM {schema}.{table}"
                ))
                .fetch_one(&mut **tx)
                .await?;
                Ok(next)
            },
        }
    }
}

#[async_trait]
impl Warehouse for PostgresWarehouse {
    #[instrument(skip_all, fields(destination = %destination))]
    async fn load(&self, source: &LoadSource, destination: &TableId, options: &LoadOptions) -> Result<TableHandle> {
        let schema_ident = quote_ident(&destination.dataset)?;
        let table_ident = quote_ident(&destination.table)?;

        let objects = self.source_objects(source).await?;
        let rows = self.read_rows(&objects, options).await?;
        if let Some(schema) = &options.schema {
            check_required_fields(schema, &rows)?;
        }
        if !options.extra.is_empty() {
            debug!(keys = ?options.extra.keys().collect::<Vec<_>>(), "Ignoring load options");
        }

        let mut tx = self.pool.begin().await?;
        let first = Self::prepare_table(
            &mut tx,
            &schema_ident,
            &table_ident,
            options.write_disposition,
            destination,
        )
        .await?;

        let documents: Vec<(i64, Value)> = (first..).zip(rows.into_iter().map(Value::Object)).collect();
        let mut inserted = 0;
        for batch in documents.chunks(INSERT_BATCH_SIZE) {
            let mut query_builder: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO {schema_ident}.{table_ident} (ordinal, data) "));
            query_builder.push_values(batch, |mut b, (ordinal, data)| {
                b.push_bind(*ordinal).push_bind(data);
            });
            inserted += query_builder.build().execute(&mut *tx).await?.rows_affected();
        }

        let table_schema = options.schema.as_ref().map(serde_json::to_value).transpose()?;
        sqlx::query(&format!(
            r#"
            INSERT INTO {METADATA_TABLE} AS meta (dataset, table_name, last_modified, row_count, table_schema)
            VALUES ($1, $2, clock_timestamp(), (SELECT COUNT(*) FROM {schema_ident}.{table_ident}), $3)
            ON CONFLICT (dataset, table_name) DO UPDATE SET
                last_modified = EXCLUDED.last_modified,
                row_count = EXCLUDED.row_count,
                table_schema = COALESCE(EXCLUDED.table_schema, meta.table_schema)
            "#
        ))
        .bind(&destination.dataset)
        .bind(&destination.table)
        .bind(table_schema)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            source = %source,
            objects = objects.len(),
            rows = inserted,
            disposition = options.write_disposition.as_str(),
            "Loaded table"
        );

        Ok(TableHandle {
            id: destination.clone(),
            rows_loaded: inserted,
        })
    }

    async fn table_exists(&self, table: &TableHandle) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = $1 AND table_name = $2
            )
            "#,
        )
        .bind(&table.id.dataset)
        .bind(&table.id.table)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn last_modified(&self, table: &TableHandle) -> Result<Option<DateTime<Utc>>> {
        let modified: Option<DateTime<Utc>> = sqlx::query_scalar(&format!(
            "SELECT last_modified FROM {METADATA_TABLE} WHERE dataset = $1 AND table_name = $2"
        ))
        .bind(&table.id.dataset)
        .bind(&table.id.table)
        .fetch_optional(&self.pool)
        .await?;
        Ok(modified)
    }
}

/// Double-quote an identifier made only of ASCII letters, digits and `_`
pub fn quote_ident(name: &str) -> Result<String> {
    let valid = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(IngestError::warehouse(format!("invalid identifier '{name}'")));
    }
    Ok(format!("\"{name}\""))
}

/// Every REQUIRED top-level field must be present and non-null in every row
pub fn check_required_fields(schema: &Schema, rows: &[Row]) -> Result<()> {
    let required: Vec<&str> = schema
        .iter()
        .filter(|f| f.is_required())
        .map(|f| f.name.as_str())
        .collect();

    for (i, row) in rows.iter().enumerate() {
        for field in &required {
            if row.get(*field).map_or(true, Value::is_null) {
                return Err(IngestError::warehouse(format!(
                    "row {i} is missing required field '{field}'"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::{FieldMode, SchemaField};
    use crate::table::value_to_rows;
    use serde_json::json;

    fn field(name: &str, mode: FieldMode) -> SchemaField {
        SchemaField {
            name: name.to_string(),
            field_type: "INTEGER".to_string(),
            mode,
            description: None,
            fields: Vec::new(),
        }
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("fantasy_premier_league").unwrap(), "\"fantasy_premier_league\"");
        assert!(quote_ident("history; DROP TABLE x").is_err());
        assert!(quote_ident("").is_err());
        assert!(quote_ident("a\"b").is_err());
    }

    #[test]
    fn test_required_fields_enforced() {
        let schema = vec![field("element_id", FieldMode::Required), field("minutes", FieldMode::Nullable)];
        let ok = value_to_rows("history", &json!([{"element_id": 1, "minutes": null}])).unwrap();
        assert!(check_required_fields(&schema, &ok).is_ok());

        let missing = value_to_rows("history", &json!([{"element_id": 1}, {"minutes": 90}])).unwrap();
        let err = check_required_fields(&schema, &missing).unwrap_err();
        assert!(err.to_string().contains("row 1"));

        let null = value_to_rows("history", &json!([{"element_id": null}])).unwrap();
        assert!(check_required_fields(&schema, &null).is_err());
    }
}
