// src/store/mod.rs

mod relation;

pub use relation::Relation;

use crate::error::StoreResult;
use crate::normalize::NormalizedInvoice;
use relation::{quote_ident, union_columns, validate_name};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, ToSql, TransactionBehavior, params};
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};

pub const INVOICES: &str = "invoices";
pub const LINE_ITEMS: &str = "line_items";

/// One row on its way into (or out of) a relation, in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, SqlValue)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `column`, replacing an earlier value under the same name.
    pub fn push(&mut self, column: impl Into<String>, value: SqlValue) {
        let column = column.into();
        match self.fields.iter_mut().find(|(c, _)| c.eq_ignore_ascii_case(&column)) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.fields
            .iter()
            .find(|(c, _)| c.eq_ignore_ascii_case(column))
            .map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(c, _)| c.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .fields
            .iter()
            .map(|(c, v)| {
                let json = match v {
                    SqlValue::Null => Value::Null,
                    SqlValue::Integer(i) => Value::from(*i),
                    SqlValue::Real(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
                    SqlValue::Text(s) => Value::String(s.clone()),
                    SqlValue::Blob(b) => Value::String(format!("<{} bytes>", b.len())),
                };
                (c.clone(), json)
            })
            .collect();
        Value::Object(map)
    }
}

/// Which table saves went through for one document.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SaveReport {
    pub header_rows: usize,
    pub item_rows: usize,
    pub failed: Vec<String>,
}

impl SaveReport {
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// SQLite-backed home of the `invoices` and `line_items` relations.
pub struct InvoiceStore {
    conn: Connection,
}

impl InvoiceStore {
    /// Open (or create) the store at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> StoreResult<Self> {
        let conn = Connection::open(db_path)?;
        // Other drivers may be migrating the same file.
        conn.busy_timeout(Duration::from_secs(5))?;
        info!("Database initialized successfully");
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> StoreResult<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// Append `records` to `relation`, creating or widening it first.
    ///
    /// Migration and inserts share one transaction, so a failed save leaves
    /// no partial rows behind. The write lock is held from before the schema
    /// is read until commit.
    pub fn save(&mut self, records: &[Record], relation: &str) -> StoreResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        validate_name(relation)?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut rel = match Relation::load(&tx, relation)? {
            Some(rel) => rel,
            None => Relation::create(&tx, relation, records)?,
        };
        rel.ensure_columns(&tx, &union_columns(records))?;
        let inserted = rel.insert(&tx, records)?;
        tx.commit()?;

        Ok(inserted)
    }

    /// Save one document's header and line items. Each table is saved on
    /// its own; a failure is logged and reported, never raised.
    pub fn save_document(&mut self, invoice: &NormalizedInvoice) -> SaveReport {
        let header = [invoice.header.to_record()];
        let items: Vec<Record> = invoice.line_items.iter().map(|i| i.to_record()).collect();

        let mut report = SaveReport::default();
        match self.save(&header, INVOICES) {
            Ok(n) => report.header_rows = n,
            Err(e) => {
                error!(relation = INVOICES, error = %e, "Table save failed");
                report.failed.push(INVOICES.to_string());
            }
        }
        match self.save(&items, LINE_ITEMS) {
            Ok(n) => report.item_rows = n,
            Err(e) => {
                error!(relation = LINE_ITEMS, error = %e, "Table save failed");
                report.failed.push(LINE_ITEMS.to_string());
            }
        }
        report
    }

    pub fn relation(&self, name: &str) -> StoreResult<Option<Relation>> {
        Relation::load(&self.conn, name)
    }

    /// Every row of `relation`, oldest first.
    pub fn all_rows(&self, relation: &str) -> StoreResult<Vec<Record>> {
        self.select(relation, "", &[])
    }

    /// Invoices whose vendor name contains `needle`.
    pub fn invoices_by_vendor(&self, needle: &str) -> StoreResult<Vec<Record>> {
        let pattern = format!("%{needle}%");
        self.select(INVOICES, "WHERE vendor_name LIKE ?1", &[&pattern])
    }

    /// Invoices dated within `[start, end]` (inclusive, `YYYY-MM-DD`).
    pub fn invoices_between(&self, start: &str, end: &str) -> StoreResult<Vec<Record>> {
        self.select(
            INVOICES,
            "WHERE DATE(invoice_date) BETWEEN DATE(?1) AND DATE(?2)",
            &[&start, &end],
        )
    }

    /// Line items, optionally only those of one invoice number.
    pub fn line_items(&self, invoice_number: Option<&str>) -> StoreResult<Vec<Record>> {
        match invoice_number {
            Some(number) => self.select(LINE_ITEMS, "WHERE invoice_number = ?1", &[&number]),
            None => self.all_rows(LINE_ITEMS),
        }
    }

    pub fn row_count(&self, relation: &str) -> StoreResult<usize> {
        if self.relation(relation)?.is_none() {
            return Ok(0);
        }
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(relation));
        let count: i64 = self.conn.query_row(&sql, params![], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }

    /// Row counts of (invoices, line items).
    pub fn get_counts(&self) -> StoreResult<(usize, usize)> {
        Ok((self.row_count(INVOICES)?, self.row_count(LINE_ITEMS)?))
    }

    fn select(&self, relation: &str, filter: &str, args: &[&dyn ToSql]) -> StoreResult<Vec<Record>> {
        let Some(rel) = self.relation(relation)? else {
            return Ok(Vec::new());
        };
        let sql = format!(
            "SELECT * FROM {} {filter} ORDER BY rowid",
            quote_ident(rel.name())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let rows = stmt.query_map(args, |row| {
            let mut record = Record::new();
            for (i, name) in names.iter().enumerate() {
                record.push(name, row.get::<_, SqlValue>(i)?);
            }
            Ok(record)
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}
