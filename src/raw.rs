// src/raw.rs

use crate::coerce;
use crate::error::ExtractError;
use serde_json::{Map, Value};

/// Parsed extractor output before normalization.
///
/// Extractors answer with either an object or a list of objects; anything
/// else is rejected by [`parse_extraction`].
#[derive(Debug, Clone, PartialEq)]
pub enum RawExtraction {
    Object(Map<String, Value>),
    List(Vec<Value>),
}

impl RawExtraction {
    pub fn from_value(value: Value) -> Result<Self, ExtractError> {
        match value {
            Value::Object(map) => Ok(Self::Object(map)),
            Value::Array(items) => Ok(Self::List(items)),
            other => Err(ExtractError::InvalidJson {
                reason: format!("top-level value is not an object or list: {other}"),
            }),
        }
    }

    /// The single invoice record: the object itself, or the first element of
    /// a list when it is an object.
    pub fn record(&self) -> RawRecord<'_> {
        let map = match self {
            Self::Object(map) => Some(map),
            Self::List(items) => items.first().and_then(Value::as_object),
        };
        RawRecord(map)
    }

    /// True when there is nothing to normalize (`{}`, `[]`, `[1, 2]`).
    pub fn is_empty(&self) -> bool {
        self.record().0.is_none_or(Map::is_empty)
    }
}

/// Borrowed view over one JSON object with total, alias-aware accessors.
#[derive(Debug, Clone, Copy)]
pub struct RawRecord<'a>(Option<&'a Map<String, Value>>);

impl<'a> RawRecord<'a> {
    pub fn new(map: &'a Map<String, Value>) -> Self {
        Self(Some(map))
    }

    /// First non-null value found under `keys`, tried in order. Keys match
    /// case-insensitively.
    pub fn get(&self, keys: &[&str]) -> Option<&'a Value> {
        self.lookup(keys).map(|(_, v)| v)
    }

    /// Like [`RawRecord::get`], but also returns the key as spelled in the
    /// object.
    pub fn lookup(&self, keys: &[&str]) -> Option<(&'a str, &'a Value)> {
        let map = self.0?;
        keys.iter().find_map(|key| {
            map.get_key_value(*key)
                .or_else(|| map.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)))
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.as_str(), v))
        })
    }

    pub fn text(&self, keys: &[&str]) -> Option<String> {
        coerce::text_value(self.get(keys))
    }

    pub fn number(&self, keys: &[&str]) -> f64 {
        coerce::safe_float(self.get(keys))
    }

    pub fn has(&self, keys: &[&str]) -> bool {
        self.get(keys).is_some()
    }

    /// Nested objects under the first list-valued key in `keys`.
    /// Non-object entries are dropped; the count is returned alongside.
    pub fn objects(&self, keys: &[&str]) -> (Vec<RawRecord<'a>>, usize) {
        let Some(Value::Array(items)) = self.get(keys) else {
            return (Vec::new(), 0);
        };
        let records: Vec<_> = items
            .iter()
            .filter_map(Value::as_object)
            .map(RawRecord::new)
            .collect();
        let dropped = items.len() - records.len();
        (records, dropped)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&'a String, &'a Value)> {
        self.0.into_iter().flat_map(|map| map.iter())
    }
}

/// Parse whatever an extractor returned into a [`RawExtraction`].
///
/// Leading/trailing code fences (with an optional language tag) are removed.
/// If the remainder still is not valid JSON, the outermost `{...}` span is
/// tried, which copes with models that prepend reasoning text.
pub fn parse_extraction(response: &str) -> Result<RawExtraction, ExtractError> {
    let body = strip_code_fences(response);

    let value = match serde_json::from_str::<Value>(body) {
        Ok(value) => value,
        Err(first) => {
            let inner = extract_json_object(body).ok_or_else(|| ExtractError::InvalidJson {
                reason: first.to_string(),
            })?;
            serde_json::from_str::<Value>(inner).map_err(|e| ExtractError::InvalidJson {
                reason: e.to_string(),
            })?
        }
    };

    RawExtraction::from_value(value)
}

fn strip_code_fences(s: &str) -> &str {
    let mut body = s.trim();
    if let Some(rest) = body.strip_prefix("```") {
        // optional language tag: ```json, ```JSON5 ...
        let tag_len = rest
            .find(|c: char| !c.is_ascii_alphanumeric() && c != '_' && c != '-')
            .unwrap_or(rest.len());
        body = &rest[tag_len..];
    }
    if let Some(rest) = body.trim_end().strip_suffix("```") {
        body = rest;
    }
    body.trim()
}

fn extract_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    (end > start).then(|| &s[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_object() {
        let raw = parse_extraction(r#"{"invoice_number": "A-1"}"#).unwrap();
        assert_eq!(raw.record().text(&["invoice_number"]).as_deref(), Some("A-1"));
    }

    #[test]
    fn test_fenced_with_language_tag() {
        let raw = parse_extraction("```json\n{\"total\": \"$5.00\"}\n```").unwrap();
        assert_eq!(raw.record().number(&["total"]), 5.0);

        let raw = parse_extraction("```\n[{\"total\": 7}]\n```").unwrap();
        assert_eq!(raw.record().number(&["total"]), 7.0);
    }

    #[test]
    fn test_reasoning_prefix() {
        let raw = parse_extraction("Sure! Here it is: {\"tax\": 1.5} hope that helps").unwrap();
        assert_eq!(raw.record().number(&["tax"]), 1.5);
    }

    #[test]
    fn test_rejects_non_json() {
        assert!(matches!(
            parse_extraction("I could not read this invoice."),
            Err(ExtractError::InvalidJson { .. })
        ));
        assert!(parse_extraction("42").is_err());
        assert!(parse_extraction("{not json}").is_err());
    }

    #[test]
    fn test_list_uses_first_object() {
        let raw = RawExtraction::from_value(json!([{"a": 1}, {"a": 2}])).unwrap();
        assert_eq!(raw.record().number(&["a"]), 1.0);

        let raw = RawExtraction::from_value(json!([])).unwrap();
        assert!(raw.is_empty());
        assert_eq!(raw.record().text(&["a"]), None);

        let raw = RawExtraction::from_value(json!(["text"])).unwrap();
        assert!(raw.is_empty());
    }

    #[test]
    fn test_get_skips_nulls_and_ignores_case() {
        let map = json!({"invoice_no": null, "Invoice_Number": "X9"});
        let raw = RawExtraction::from_value(map).unwrap();
        let rec = raw.record();
        assert_eq!(rec.text(&["invoice_no", "invoice_number"]).as_deref(), Some("X9"));
        assert_eq!(
            rec.lookup(&["invoice_no", "invoice_number"]).map(|(k, _)| k),
            Some("Invoice_Number")
        );
    }

    #[test]
    fn test_objects_drops_non_objects() {
        let raw = RawExtraction::from_value(json!({"line_items": [{"a": 1}, "junk", 3]})).unwrap();
        let (items, dropped) = raw.record().objects(&["line_items"]);
        assert_eq!(items.len(), 1);
        assert_eq!(dropped, 2);
    }
}
