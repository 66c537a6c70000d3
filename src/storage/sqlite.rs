// ABOUTME: SQLite-backed collection source - one table per collection
// ABOUTME: Runs max-id and id-range queries and converts rows to JSON documents

use anyhow::{anyhow, bail, Context, Result};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use serde_json::Value as JsonValue;
use std::path::Path;

use super::{CollectionSource, Record};
use crate::utils::{quote_ident, validate_collection_name};

/// Read-only view of an embedded database whose tables are collections.
///
/// Every collection is expected to carry an integer identifier column
/// (`id_field`) that increases with each appended record.
pub struct SqliteSource {
    conn: Connection,
    id_field: String,
}

impl SqliteSource {
    /// Open a database file read-only.
    pub fn open(path: &Path, id_field: &str) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("Failed to open database {:?}", path))?;
        Self::from_connection(conn, id_field)
    }

    /// Wrap an already open connection.
    pub fn from_connection(conn: Connection, id_field: &str) -> Result<Self> {
        validate_collection_name(id_field).context("Invalid identifier field name")?;
        Ok(Self {
            conn,
            id_field: id_field.to_string(),
        })
    }

    /// Collection names match tables case-insensitively, like SQLite itself.
    fn ensure_collection(&self, collection: &str) -> Result<()> {
        validate_collection_name(collection)?;

        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
                [collection],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("Failed to look up collection '{}'", collection))?;

        if found.is_none() {
            bail!("Collection '{}' not found in database", collection);
        }
        Ok(())
    }

    fn query_records(
        &self,
        collection: &str,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Record>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .with_context(|| format!("Failed to prepare query for collection '{}'", collection))?;

        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let column_count = columns.len();

        let rows = stmt
            .query_map(params, |row| {
                (0..column_count)
                    .map(|idx| row.get::<_, SqlValue>(idx))
                    .collect::<rusqlite::Result<Vec<SqlValue>>>()
            })
            .with_context(|| format!("Failed to query collection '{}'", collection))?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to read rows from collection '{}'", collection))?;

        rows.into_iter()
            .map(|values| self.row_to_record(collection, &columns, values))
            .collect()
    }

    fn row_to_record(
        &self,
        collection: &str,
        columns: &[String],
        values: Vec<SqlValue>,
    ) -> Result<Record> {
        let mut id = None;
        let mut document = serde_json::Map::with_capacity(columns.len());

        for (column, value) in columns.iter().zip(values) {
            if *column == self.id_field {
                match value {
                    SqlValue::Integer(i) => id = Some(i),
                    ref other => bail!(
                        "Collection '{}' has a non-integer {} value: {:?}",
                        collection,
                        self.id_field,
                        other
                    ),
                }
            }
            let json = sqlite_value_to_json(&value)
                .with_context(|| format!("Failed to convert column '{}' to JSON", column))?;
            document.insert(column.clone(), json);
        }

        let id = id.ok_or_else(|| {
            anyhow!(
                "Collection '{}' has no '{}' column",
                collection,
                self.id_field
            )
        })?;
        Ok(Record::new(id, JsonValue::Object(document)))
    }
}

impl CollectionSource for SqliteSource {
    fn latest(&self, collection: &str) -> Result<Option<Record>> {
        self.ensure_collection(collection)?;

        let sql = format!(
            "SELECT * FROM {} ORDER BY {} DESC LIMIT 1",
            quote_ident(collection),
            quote_ident(&self.id_field)
        );
        let mut records = self.query_records(collection, &sql, [])?;
        Ok(records.pop())
    }

    fn records_after(&self, collection: &str, after: i64, limit: usize) -> Result<Vec<Record>> {
        self.ensure_collection(collection)?;

        let sql = format!(
            "SELECT * FROM {table} WHERE {id} > ?1 ORDER BY {id} ASC LIMIT ?2",
            table = quote_ident(collection),
            id = quote_ident(&self.id_field)
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let records = self.query_records(collection, &sql, rusqlite::params![after, limit])?;

        tracing::debug!(
            "Read {} records from '{}' after id {}",
            records.len(),
            collection,
            after
        );
        Ok(records)
    }
}

/// Convert a single SQLite value to JSON.
///
/// - INTEGER → number
/// - REAL → number (non-finite values become strings, JSON cannot hold them)
/// - TEXT → string
/// - BLOB → `{"_type": "blob", "data": "<base64>"}`
/// - NULL → null
pub fn sqlite_value_to_json(value: &SqlValue) -> Result<JsonValue> {
    match value {
        SqlValue::Null => Ok(JsonValue::Null),
        SqlValue::Integer(i) => Ok(JsonValue::Number((*i).into())),
        SqlValue::Real(f) => {
            if f.is_finite() {
                serde_json::Number::from_f64(*f)
                    .map(JsonValue::Number)
                    .ok_or_else(|| anyhow!("Failed to convert float {} to JSON number", f))
            } else {
                Ok(JsonValue::String(f.to_string()))
            }
        }
        SqlValue::Text(s) => Ok(JsonValue::String(s.clone())),
        SqlValue::Blob(b) => {
            let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b);
            Ok(serde_json::json!({
                "_type": "blob",
                "data": encoded
            }))
        }
    }
}
