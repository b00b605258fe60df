// src/store/relation.rs

//! One table with a column set that only ever grows.

use super::Record;
use crate::error::{StoreError, StoreResult};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params, params_from_iter};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub decl_type: String,
}

impl Column {
    fn has_text_affinity(&self) -> bool {
        let t = self.decl_type.to_ascii_uppercase();
        t.contains("TEXT") || t.contains("CHAR") || t.contains("CLOB")
    }
}

/// In-memory view of a table's columns, loaded from `pragma_table_info`.
///
/// All schema changes go through [`Relation::ensure_columns`], which only
/// ever adds nullable `TEXT` columns.
#[derive(Debug, Clone)]
pub struct Relation {
    name: String,
    columns: Vec<Column>,
}

impl Relation {
    /// Load an existing table. `Ok(None)` when it does not exist yet.
    pub fn load(conn: &Connection, name: &str) -> StoreResult<Option<Self>> {
        validate_name(name)?;
        let columns = table_columns(conn, name)?;
        if columns.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self {
            name: name.to_string(),
            columns,
        }))
    }

    /// Create the table with exactly the columns found in `records`. Each
    /// column takes its type from the first non-null value in the batch.
    pub fn create(conn: &Connection, name: &str, records: &[Record]) -> StoreResult<Self> {
        validate_name(name)?;
        let columns = union_columns(records);

        let defs: Vec<String> = columns
            .iter()
            .map(|col| format!("{} {}", quote_ident(col), first_type(records, col)))
            .collect();
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(name),
            defs.join(", ")
        );
        conn.execute(&sql, [])?;
        info!(relation = name, columns = columns.len(), "Created relation");

        // Another writer may have won the race; trust what is on disk.
        let columns = table_columns(conn, name)?;
        Ok(Self {
            name: name.to_string(),
            columns,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Add every column in `wanted` the table does not have yet.
    ///
    /// A column that already exists on disk (added by a concurrent writer
    /// since this relation was loaded) counts as success. Returns the
    /// columns this call actually added.
    pub fn ensure_columns(&mut self, conn: &Connection, wanted: &[String]) -> StoreResult<Vec<String>> {
        let mut added = Vec::new();

        for col in wanted {
            if self.has_column(col) {
                continue;
            }
            let sql = format!(
                "ALTER TABLE {} ADD COLUMN {} TEXT",
                quote_ident(&self.name),
                quote_ident(col)
            );
            match conn.execute(&sql, []) {
                Ok(_) => {
                    self.columns.push(Column {
                        name: col.clone(),
                        decl_type: "TEXT".to_string(),
                    });
                    added.push(col.clone());
                }
                Err(e) => {
                    debug!(relation = %self.name, column = %col, error = %e, "ADD COLUMN failed, re-reading schema");
                    self.columns = table_columns(conn, &self.name)?;
                    if !self.has_column(col) {
                        return Err(StoreError::Migration {
                            relation: self.name.clone(),
                            column: col.clone(),
                            source: e,
                        });
                    }
                }
            }
        }

        if !added.is_empty() {
            info!(relation = %self.name, added = ?added, "Migrated relation: added columns");
        }
        Ok(added)
    }

    /// Append `records`. Columns a record lacks are written as NULL.
    ///
    /// Every record column must already exist (see [`Relation::ensure_columns`]).
    pub fn insert(&self, conn: &Connection, records: &[Record]) -> StoreResult<usize> {
        let wanted = union_columns(records);
        let columns: Vec<&Column> = wanted.iter().filter_map(|c| self.column(c)).collect();
        if columns.is_empty() {
            return Ok(0);
        }

        let names: Vec<String> = columns.iter().map(|c| quote_ident(&c.name)).collect();
        let slots: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&self.name),
            names.join(", "),
            slots.join(", ")
        );
        let mut stmt = conn.prepare(&sql)?;

        let mut inserted = 0;
        for record in records {
            let values = columns.iter().map(|col| {
                let value = record.get(&col.name).cloned().unwrap_or(SqlValue::Null);
                fit_to_column(col, value)
            });
            inserted += stmt.execute(params_from_iter(values))?;
        }
        Ok(inserted)
    }
}

/// A number headed for a TEXT column is stored as its text form. Text in a
/// numeric column is left to SQLite's type affinity.
fn fit_to_column(col: &Column, value: SqlValue) -> SqlValue {
    if !col.has_text_affinity() {
        return value;
    }
    match value {
        SqlValue::Integer(i) => SqlValue::Text(i.to_string()),
        SqlValue::Real(f) => SqlValue::Text(f.to_string()),
        other => other,
    }
}

fn table_columns(conn: &Connection, name: &str) -> StoreResult<Vec<Column>> {
    let mut stmt = conn.prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")?;
    let rows = stmt.query_map(params![name], |row| {
        Ok(Column {
            name: row.get(0)?,
            decl_type: row.get(1)?,
        })
    })?;
    Ok(rows.collect::<Result<_, _>>()?)
}

/// Ordered, case-insensitive union of every column in the batch.
pub(crate) fn union_columns(records: &[Record]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for col in records.iter().flat_map(Record::columns) {
        if !columns.iter().any(|c| c.eq_ignore_ascii_case(col)) {
            columns.push(col.to_string());
        }
    }
    columns
}

fn first_type(records: &[Record], col: &str) -> &'static str {
    records
        .iter()
        .filter_map(|r| r.get(col))
        .find_map(|v| match v {
            SqlValue::Null => None,
            SqlValue::Integer(_) => Some("INTEGER"),
            SqlValue::Real(_) => Some("REAL"),
            SqlValue::Text(_) => Some("TEXT"),
            SqlValue::Blob(_) => Some("BLOB"),
        })
        .unwrap_or("TEXT")
}

pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub(crate) fn validate_name(name: &str) -> StoreResult<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidRelation(name.to_string()))
    }
}
