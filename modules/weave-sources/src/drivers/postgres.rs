//! Postgres driver. Reads rows out of one or more tables in a
//! customer's own Postgres database, each configured with a cursor
//! column (`updated_at`, a monotonic id, whatever the table offers).
//! Rows are schema-free at the driver level — the column set isn't known
//! until query time — so each row becomes a `PolymorphicEntity` keyed by
//! its primary key columns, joined with `:`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use sqlx::postgres::PgRow;
use sqlx::{Column, PgPool, Row, TypeInfo};

use weave_types::entity::{EntityKind, PostgresRowFields};
use weave_types::{Cursor, Entity, PolymorphicAttributes};

use crate::{stream_from_future, Result, SourceDriver, SourceError, SourceEvent};

/// One table in scope for a Postgres source connection.
#[derive(Clone)]
pub struct TableConfig {
    pub schema_name: String,
    pub table_name: String,
    pub primary_key_columns: Vec<String>,
    pub cursor_column: Option<String>,
}

struct Inner {
    pool: PgPool,
    tables: Vec<TableConfig>,
}

pub struct PostgresDriver {
    inner: Arc<Inner>,
}

impl PostgresDriver {
    pub fn new(pool: PgPool, tables: Vec<TableConfig>) -> Self {
        Self {
            inner: Arc::new(Inner { pool, tables }),
        }
    }
}

impl Inner {
    async fn fetch_table(
        &self,
        table: &TableConfig,
        since: Option<&str>,
    ) -> Result<(Vec<SourceEvent>, Option<String>)> {
        let qualified = format!("\"{}\".\"{}\"", table.schema_name, table.table_name);
        let query = match (&table.cursor_column, since) {
            (Some(col), Some(since)) => {
                format!("SELECT * FROM {qualified} WHERE \"{col}\" > $1 ORDER BY \"{col}\" ASC")
            }
            (Some(col), None) => format!("SELECT * FROM {qualified} ORDER BY \"{col}\" ASC"),
            (None, _) => format!("SELECT * FROM {qualified}"),
        };

        let rows: Vec<PgRow> = if table.cursor_column.is_some() && since.is_some() {
            sqlx::query(&query)
                .bind(since.unwrap())
                .fetch_all(&self.pool)
                .await
                .map_err(|e| SourceError::Fatal(e.to_string()))?
        } else {
            sqlx::query(&query)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| SourceError::Fatal(e.to_string()))?
        };

        let mut events = Vec::new();
        let mut max_cursor_value: Option<String> = None;

        for row in &rows {
            let mut values = BTreeMap::new();
            for col in row.columns() {
                let name = col.name();
                let rendered = render_column(row, col);
                if table.cursor_column.as_deref() == Some(name) {
                    max_cursor_value = Some(rendered.clone());
                }
                values.insert(name.to_string(), rendered);
            }

            let pk = table
                .primary_key_columns
                .iter()
                .filter_map(|c| values.get(c).cloned())
                .collect::<Vec<_>>()
                .join(":");
            let entity_id = format!("{}.{}:{}", table.schema_name, table.table_name, pk);

            let fields = PostgresRowFields { row: values };
            let mut entity = Entity::new(entity_id, "postgres", EntityKind::PostgresRow(fields));
            entity.polymorphic = Some(PolymorphicAttributes {
                table_name: table.table_name.clone(),
                schema_name: table.schema_name.clone(),
                primary_key_columns: table.primary_key_columns.clone(),
            });
            events.push(Ok(SourceEvent::Entity(entity)));
        }

        Ok((events, max_cursor_value))
    }
}

/// Best-effort string rendering of a column value. Unsupported types fall
/// back to a type-tagged placeholder rather than failing the whole row —
/// Postgres sources are schema-free, so exotic column types (arrays,
/// custom enums) are expected and shouldn't abort a sync.
fn render_column(row: &PgRow, col: &sqlx::postgres::PgColumn) -> String {
    let idx = col.ordinal();
    match col.type_info().name() {
        "TEXT" | "VARCHAR" | "CHAR" | "NAME" => row.try_get::<Option<String>, _>(idx).ok().flatten().unwrap_or_default(),
        "INT4" | "INT2" => row.try_get::<Option<i32>, _>(idx).ok().flatten().map(|v| v.to_string()).unwrap_or_default(),
        "INT8" => row.try_get::<Option<i64>, _>(idx).ok().flatten().map(|v| v.to_string()).unwrap_or_default(),
        "FLOAT4" | "FLOAT8" | "NUMERIC" => row.try_get::<Option<f64>, _>(idx).ok().flatten().map(|v| v.to_string()).unwrap_or_default(),
        "BOOL" => row.try_get::<Option<bool>, _>(idx).ok().flatten().map(|v| v.to_string()).unwrap_or_default(),
        "TIMESTAMP" | "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| v.to_rfc3339())
            .unwrap_or_default(),
        "UUID" => row.try_get::<Option<uuid::Uuid>, _>(idx).ok().flatten().map(|v| v.to_string()).unwrap_or_default(),
        "JSON" | "JSONB" => row
            .try_get::<Option<serde_json::Value>, _>(idx)
            .ok()
            .flatten()
            .map(|v| v.to_string())
            .unwrap_or_default(),
        other => format!("<unsupported:{other}>"),
    }
}

#[async_trait]
impl SourceDriver for PostgresDriver {
    fn short_name(&self) -> &'static str {
        "postgres"
    }

    fn stream_entities(&self, cursor: Option<Cursor>) -> BoxStream<'_, Result<SourceEvent>> {
        let timestamps = match cursor {
            Some(Cursor::PostgresTableTimestamps(map)) => map,
            _ => BTreeMap::new(),
        };
        let inner = self.inner.clone();
        stream_from_future(async move {
            let mut events = Vec::new();
            let mut next_timestamps = timestamps.clone();

            for table in &inner.tables {
                let since = timestamps.get(&table.table_name).map(|s| s.as_str());
                match inner.fetch_table(table, since).await {
                    Ok((table_events, max_cursor)) => {
                        events.extend(table_events);
                        if let Some(max_cursor) = max_cursor {
                            next_timestamps.insert(table.table_name.clone(), max_cursor);
                        }
                    }
                    Err(e) => return vec![Err(e)],
                }
            }

            events.push(Ok(SourceEvent::CursorUpdate(Cursor::PostgresTableTimestamps(
                next_timestamps,
            ))));
            events
        })
    }
}
