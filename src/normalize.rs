// src/normalize.rs

use crate::coerce;
use crate::raw::{RawExtraction, RawRecord};
use crate::store::Record;
use rusqlite::types::Value as SqlValue;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// Invoice number written when the extractor did not give one.
pub const UNKNOWN_INVOICE: &str = "UNKNOWN";
pub const DEFAULT_CURRENCY: &str = "USD";

// Canonical key first, then the spellings extractors commonly use instead.
const INVOICE_NUMBER: &[&str] = &["invoice_number", "invoice_no", "invoice_id", "invoice_num"];
const INVOICE_DATE: &[&str] = &["invoice_date", "date", "issue_date", "issued_on"];
const DUE_DATE: &[&str] = &["due_date", "payment_due", "due"];
const VENDOR_NAME: &[&str] = &["vendor_name", "vendor", "seller", "supplier", "supplier_name"];
const CUSTOMER_NAME: &[&str] = &["customer_name", "customer", "buyer", "bill_to", "client"];
const SUBTOTAL: &[&str] = &["subtotal", "sub_total", "net_amount"];
const TAX: &[&str] = &["tax", "tax_amount", "vat", "gst"];
const TOTAL: &[&str] = &["total", "total_amount", "amount_due", "grand_total"];
const CURRENCY: &[&str] = &["currency", "currency_code"];
const LINE_ITEMS: &[&str] = &["line_items", "items", "lines"];

const HEADER_FIELDS: &[&[&str]] = &[
    INVOICE_NUMBER,
    INVOICE_DATE,
    DUE_DATE,
    VENDOR_NAME,
    CUSTOMER_NAME,
    SUBTOTAL,
    TAX,
    TOTAL,
    CURRENCY,
];

const DESCRIPTION: &[&str] = &["description", "item", "name", "product"];
const QUANTITY: &[&str] = &["quantity", "qty"];
const UNIT_PRICE: &[&str] = &["unit_price", "price", "rate", "unit_cost"];
const AMOUNT: &[&str] = &["amount", "line_total", "total"];

const ITEM_FIELDS: &[&[&str]] = &[DESCRIPTION, QUANTITY, UNIT_PRICE, AMOUNT];

/// Columns every line-item row carries.
const ITEM_COLUMNS: &[&str] = &["invoice_number", "description", "quantity", "unit_price", "amount"];

/// Names SQLite resolves to the implicit row id.
const ROWID_ALIASES: &[&str] = &["rowid", "oid"];

#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    /// Rewrite dates to `YYYY-MM-DD` (unparseable dates become null).
    pub canonical_dates: bool,
    /// Attach the best-effort `extraction_confidence` column to headers.
    pub annotate_confidence: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            canonical_dates: true,
            annotate_confidence: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceHeader {
    pub invoice_number: String,
    pub invoice_date: Option<String>,
    pub due_date: Option<String>,
    pub vendor_name: String,
    pub customer_name: String,
    pub subtotal: f64,
    pub tax: f64,
    pub total: f64,
    pub currency: String,
    /// Share of header fields the extractor filled in. Heuristic only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineItem {
    pub invoice_number: String,
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub amount: f64,
    /// Any other keys the extractor produced, already renamed to column names.
    pub extra: Vec<(String, Value)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedInvoice {
    pub header: InvoiceHeader,
    pub line_items: Vec<LineItem>,
}

/// Turn a raw extraction into one header and its line items.
///
/// Never fails: every field falls back to its default on its own.
pub fn normalize(raw: &RawExtraction, opts: &NormalizeOptions) -> NormalizedInvoice {
    let rec = raw.record();

    let date = |keys: &[&str]| {
        let text = rec.text(keys)?;
        if opts.canonical_dates {
            coerce::canonical_date(&text)
        } else {
            Some(text)
        }
    };

    let header = InvoiceHeader {
        invoice_number: rec
            .text(INVOICE_NUMBER)
            .unwrap_or_else(|| UNKNOWN_INVOICE.to_string()),
        invoice_date: date(INVOICE_DATE),
        due_date: date(DUE_DATE),
        vendor_name: rec.text(VENDOR_NAME).unwrap_or_default(),
        customer_name: rec.text(CUSTOMER_NAME).unwrap_or_default(),
        subtotal: rec.number(SUBTOTAL),
        tax: rec.number(TAX),
        total: rec.number(TOTAL),
        currency: rec
            .text(CURRENCY)
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        extraction_confidence: opts.annotate_confidence.then(|| confidence(rec)),
    };

    let (items, dropped) = rec.objects(LINE_ITEMS);
    if dropped > 0 {
        warn!(dropped, "Ignoring line items that are not objects");
    }

    let line_items = items
        .into_iter()
        .map(|item| normalize_item(item, &header.invoice_number))
        .collect();

    NormalizedInvoice { header, line_items }
}

fn normalize_item(item: RawRecord<'_>, invoice_number: &str) -> LineItem {
    // Keys that actually supplied a fixed field; other aliases stay as extras.
    let consumed: Vec<&str> = ITEM_FIELDS
        .iter()
        .filter_map(|aliases| item.lookup(aliases))
        .map(|(key, _)| key)
        .collect();

    let mut extra: Vec<(String, Value)> = Vec::new();
    for (key, value) in item.entries() {
        if consumed.contains(&key.as_str()) {
            continue;
        }
        let Some(column) = column_name(key) else {
            continue;
        };
        if ITEM_COLUMNS.contains(&column.as_str()) || extra.iter().any(|(c, _)| *c == column) {
            continue;
        }
        extra.push((column, value.clone()));
    }

    LineItem {
        invoice_number: invoice_number.to_string(),
        description: item.text(DESCRIPTION).unwrap_or_default(),
        quantity: item.number(QUANTITY),
        unit_price: item.number(UNIT_PRICE),
        amount: item.number(AMOUNT),
        extra,
    }
}

fn confidence(rec: RawRecord<'_>) -> f64 {
    let present = HEADER_FIELDS.iter().filter(|keys| rec.has(keys)).count();
    present as f64 / HEADER_FIELDS.len() as f64
}

/// Rename an arbitrary JSON key into a stable lowercase snake_case column.
pub fn column_name(key: &str) -> Option<String> {
    let mut out = String::with_capacity(key.len());
    for c in key.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    if out.is_empty() {
        return None;
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) || ROWID_ALIASES.contains(&out.as_str()) {
        out.insert_str(0, "f_");
    }
    Some(out)
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(coerce::safe_float(Some(value))),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

fn opt_text(value: &Option<String>) -> SqlValue {
    value.clone().map_or(SqlValue::Null, SqlValue::Text)
}

impl InvoiceHeader {
    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.push("invoice_number", SqlValue::Text(self.invoice_number.clone()));
        record.push("invoice_date", opt_text(&self.invoice_date));
        record.push("due_date", opt_text(&self.due_date));
        record.push("vendor_name", SqlValue::Text(self.vendor_name.clone()));
        record.push("customer_name", SqlValue::Text(self.customer_name.clone()));
        record.push("subtotal", SqlValue::Real(self.subtotal));
        record.push("tax", SqlValue::Real(self.tax));
        record.push("total", SqlValue::Real(self.total));
        record.push("currency", SqlValue::Text(self.currency.clone()));
        if let Some(confidence) = self.extraction_confidence {
            record.push("extraction_confidence", SqlValue::Real(confidence));
        }
        record
    }
}

impl LineItem {
    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.push("invoice_number", SqlValue::Text(self.invoice_number.clone()));
        record.push("description", SqlValue::Text(self.description.clone()));
        record.push("quantity", SqlValue::Real(self.quantity));
        record.push("unit_price", SqlValue::Real(self.unit_price));
        record.push("amount", SqlValue::Real(self.amount));
        for (column, value) in &self.extra {
            record.push(column, json_to_sql(value));
        }
        record
    }
}
