// src/coerce.rs

//! Total conversions from untyped JSON values into the types we store.
//! None of these functions can fail; bad input turns into a default.

use serde_json::Value;
use time::Date;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

/// Convert anything an extractor might emit into a finite `f64`.
///
/// Strings may carry thousands separators and a `$` sign (`"$1,200.50"`).
/// Absent, `null`, `"none"`, `"null"`, unparseable and non-finite values all
/// come out as `0.0`.
pub fn safe_float(value: Option<&Value>) -> f64 {
    let parsed = match value {
        None | Some(Value::Null) => return 0.0,
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => parse_amount(s),
        Some(_) => 0.0,
    };
    if parsed.is_finite() { parsed } else { 0.0 }
}

/// String half of [`safe_float`].
pub fn parse_amount(raw: &str) -> f64 {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',' && *c != '$').collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty()
        || cleaned.eq_ignore_ascii_case("none")
        || cleaned.eq_ignore_ascii_case("null")
    {
        return 0.0;
    }
    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => 0.0,
    }
}

/// Scalar JSON value as trimmed text. `null`, arrays, objects and blank
/// strings yield `None`.
pub fn text_value(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };
    (!text.is_empty()).then_some(text)
}

const DATE_FORMATS: &[&[BorrowedFormatItem<'static>]] = &[
    format_description!("[year]-[month]-[day]"),
    format_description!("[year]/[month]/[day]"),
    format_description!("[month padding:none]/[day padding:none]/[year]"),
    format_description!("[day padding:none].[month padding:none].[year]"),
    format_description!("[month repr:long case_sensitive:false] [day padding:none] [year]"),
    format_description!("[month repr:short case_sensitive:false] [day padding:none] [year]"),
    format_description!("[day padding:none] [month repr:long case_sensitive:false] [year]"),
    format_description!("[day padding:none] [month repr:short case_sensitive:false] [year]"),
];

const ISO_DATE: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Parse a free-form invoice date into `YYYY-MM-DD`.
///
/// Commas and repeated whitespace are ignored, so `"February 16, 2026"` and
/// `"16 Feb 2026"` both work. ISO timestamps keep only their date part.
pub fn canonical_date(raw: &str) -> Option<String> {
    let cleaned = raw
        .replace(',', " ")
        .replace("Sept ", "Sep ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if cleaned.is_empty() {
        return None;
    }

    let date = DATE_FORMATS
        .iter()
        .find_map(|fmt| Date::parse(&cleaned, *fmt).ok())
        .or_else(|| {
            // "2026-02-16T10:00:00Z", "2026-02-16 10:00"
            let head = cleaned.get(..10)?;
            matches!(cleaned.as_bytes().get(10), Some(b'T' | b' '))
                .then(|| Date::parse(head, ISO_DATE).ok())
                .flatten()
        })?;

    date.format(ISO_DATE).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_safe_float_never_fails() {
        assert_eq!(safe_float(None), 0.0);
        assert_eq!(safe_float(Some(&Value::Null)), 0.0);
        assert_eq!(safe_float(Some(&json!(""))), 0.0);
        assert_eq!(safe_float(Some(&json!("null"))), 0.0);
        assert_eq!(safe_float(Some(&json!("None"))), 0.0);
        assert_eq!(safe_float(Some(&json!("$1,200.50"))), 1200.50);
        assert_eq!(safe_float(Some(&json!("1200.50"))), 1200.50);
        assert_eq!(safe_float(Some(&json!(12.5))), 12.5);
        assert_eq!(safe_float(Some(&json!("abc"))), 0.0);
    }

    #[test]
    fn test_safe_float_odd_inputs() {
        assert_eq!(safe_float(Some(&json!(true))), 0.0);
        assert_eq!(safe_float(Some(&json!([1, 2]))), 0.0);
        assert_eq!(safe_float(Some(&json!({"v": 1}))), 0.0);
        assert_eq!(safe_float(Some(&json!("  $ 45.00  "))), 45.0);
        assert_eq!(safe_float(Some(&json!("-12.00"))), -12.0);
        assert_eq!(safe_float(Some(&json!("NaN"))), 0.0);
        assert_eq!(safe_float(Some(&json!("inf"))), 0.0);
        assert_eq!(safe_float(Some(&json!("1e999"))), 0.0);
        assert_eq!(safe_float(Some(&json!(7))), 7.0);
    }

    #[test]
    fn test_text_value() {
        assert_eq!(text_value(Some(&json!(" ACME "))), Some("ACME".to_string()));
        assert_eq!(text_value(Some(&json!(123))), Some("123".to_string()));
        assert_eq!(text_value(Some(&json!("   "))), None);
        assert_eq!(text_value(Some(&Value::Null)), None);
        assert_eq!(text_value(Some(&json!({"a": 1}))), None);
        assert_eq!(text_value(None), None);
    }

    #[test]
    fn test_canonical_date() {
        assert_eq!(canonical_date("2026-02-16").as_deref(), Some("2026-02-16"));
        assert_eq!(canonical_date("2026/02/16").as_deref(), Some("2026-02-16"));
        assert_eq!(canonical_date("02/16/2026").as_deref(), Some("2026-02-16"));
        assert_eq!(canonical_date("2/6/2026").as_deref(), Some("2026-02-06"));
        assert_eq!(canonical_date("16.02.2026").as_deref(), Some("2026-02-16"));
        assert_eq!(canonical_date("February 16, 2026").as_deref(), Some("2026-02-16"));
        assert_eq!(canonical_date("feb 16 2026").as_deref(), Some("2026-02-16"));
        assert_eq!(canonical_date("16 Feb 2026").as_deref(), Some("2026-02-16"));
        assert_eq!(canonical_date("2026-02-16T10:30:00Z").as_deref(), Some("2026-02-16"));
    }

    #[test]
    fn test_canonical_date_rejects_garbage() {
        assert_eq!(canonical_date(""), None);
        assert_eq!(canonical_date("next tuesday"), None);
        assert_eq!(canonical_date("2026-13-45"), None);
    }
}
