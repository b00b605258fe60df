use regex::Regex;
use serde_json::{Map, Value, json};

/// Keyword-anchored regex pass over the whole text.
/// Fields that cannot be found are left out rather than guessed.
pub fn extract(text: &str) -> Value {
    let mut out = Map::new();
    let mut put = |key: &str, value: Option<Value>| {
        if let Some(v) = value {
            out.insert(key.to_string(), v);
        }
    };

    put("invoice_number", extract_invoice_no(text).map(Value::from));
    put("invoice_date", labelled_date(text, r"Invoice\s+Date|Date\s+of\s+Issue|Dated?").map(Value::from));
    put("due_date", labelled_date(text, r"Due\s+Date|Payment\s+Due|Due").map(Value::from));
    put("vendor_name", extract_vendor(text).map(Value::from));
    put("customer_name", extract_customer(text).map(Value::from));
    put("subtotal", labelled_amount(text, r"Sub\s*-?\s*total").map(Value::from));
    put("tax", labelled_amount(text, r"Tax|VAT|GST").map(Value::from));
    put("total", extract_total(text).map(Value::from));
    put("currency", extract_currency(text).map(Value::from));

    out.insert("line_items".to_string(), json!(extract_line_items(text)));
    Value::Object(out)
}

// ---------------------------------------------------------------------------
// Scalar field extractors
// ---------------------------------------------------------------------------

fn extract_invoice_no(text: &str) -> Option<String> {
    // "Invoice No.", "Invoice Number:", "Invoice #123", "INV# 5"
    let re = Regex::new(
        r"(?i)\b(?:Invoice|Inv)\s*(?:No\.?|Number|Num\.?|#)\s*[:#]?\s*#?\s*([A-Za-z0-9][A-Za-z0-9\-/]*)",
    )
    .ok()?;
    re.captures(text).map(|c| c[1].trim().to_string())
}

fn labelled_date(text: &str, label: &str) -> Option<String> {
    // label followed by "February 16, 2026", "16 Feb 2026", "16/02/2026" or "2026-02-16"
    let pattern = format!(
        r"(?i)\b(?:{label})\s*:?\s*([A-Za-z]+\.?\s+\d{{1,2}},?\s+\d{{4}}|\d{{1,2}}\s+[A-Za-z]+\.?\s+\d{{4}}|\d{{1,2}}[/\-.]\d{{1,2}}[/\-.]\d{{2,4}}|\d{{4}}-\d{{2}}-\d{{2}})"
    );
    let re = Regex::new(&pattern).ok()?;
    re.captures(text).map(|c| c[1].trim().to_string())
}

fn labelled_amount(text: &str, label: &str) -> Option<String> {
    let pattern = format!(r"(?i)\b(?:{label})\b[^\d\n$]{{0,20}}(\$?\s*\d[\d,]*(?:\.\d+)?)");
    let re = Regex::new(&pattern).ok()?;
    re.captures(text).map(|c| c[1].trim().to_string())
}

fn extract_total(text: &str) -> Option<String> {
    // Take the last standalone "Total" (grand totals come after sub-totals).
    // "Subtotal" has no word boundary before "total", so it never matches.
    let re = Regex::new(r"(?i)\b(?:Grand\s+)?Total(?:\s+Due|\s+Amount)?\b[^\d\n$]{0,20}(\$?\s*\d[\d,]*(?:\.\d+)?)").ok()?;
    re.captures_iter(text).last().map(|c| c[1].trim().to_string())
}

fn extract_currency(text: &str) -> Option<String> {
    // Look for US$, USD, SGD, EUR, etc.
    let re = Regex::new(r"(?i)(US\$|\bUSD\b|\bSGD\b|\bEUR\b|\bGBP\b|\bTHB\b|\bJPY\b|\bCAD\b|\bAUD\b|\bINR\b)").ok()?;
    let raw = re.captures(text)?[1].to_uppercase();
    Some(if raw == "US$" { "USD".to_string() } else { raw })
}

fn extract_vendor(text: &str) -> Option<String> {
    let labelled = Regex::new(r"(?im)^\s*(?:From|Vendor|Seller|Supplier)\s*:\s*(.+?)\s*$").ok()?;
    if let Some(c) = labelled.captures(text) {
        return Some(c[1].to_string());
    }
    // Otherwise the first company-looking name is usually the issuer.
    extract_company_names(text).into_iter().next()
}

fn extract_customer(text: &str) -> Option<String> {
    let re = Regex::new(r"(?im)^\s*(?:Bill\s+To|Sold\s+To|Customer|Buyer)\s*:?\s*(.+?)\s*$").ok()?;
    re.captures(text)
        .map(|c| c[1].to_string())
        .filter(|s| !s.is_empty())
}

/// Find company-like names (X PTE LTD, X CO. LTD, X INC, X LLC, ...).
fn extract_company_names(text: &str) -> Vec<String> {
    let Ok(re) = Regex::new(
        r"(?i)\b([A-Z][A-Za-z\.&\s]+?\s(?:PTE\.?\s*LTD\.?|CO\.?,?\s*LTD\.?|CORPORATION|CORP\.?|INC\.?|LLC|LTD\.?|GMBH))",
    ) else {
        return Vec::new();
    };
    re.captures_iter(text)
        .map(|c| c[1].trim().to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// Line items extraction
// ---------------------------------------------------------------------------

/// Rows shaped like `<description> <qty> <unit price> <amount>`, one per line.
fn extract_line_items(text: &str) -> Vec<Value> {
    let Ok(row_re) = Regex::new(
        r"(?m)^\s*([A-Za-z][^\d\n]*?)\s+(\d+(?:\.\d+)?)\s+\$?(\d[\d,]*\.\d{2})\s+\$?(\d[\d,]*\.\d{2})\s*$",
    ) else {
        return Vec::new();
    };

    row_re
        .captures_iter(text)
        .filter(|c| !c[1].to_ascii_lowercase().contains("total"))
        .map(|c| {
            json!({
                "description": c[1].trim(),
                "quantity": &c[2],
                "unit_price": &c[3],
                "amount": &c[4],
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_invoice() {
        let v = extract("Invoice #123 Total: $45.00");
        assert_eq!(v["invoice_number"], "123");
        assert_eq!(v["total"], "$45.00");
        assert!(v.get("subtotal").is_none());
        assert_eq!(v["line_items"], json!([]));
    }

    #[test]
    fn test_full_invoice() {
        let text = "ACME SUPPLIES INC\n\
                    Invoice Number: INV-2026-001\n\
                    Invoice Date: February 16, 2026\n\
                    Due Date: 2026-03-18\n\
                    Bill To: Globex Corporation\n\
                    Widget large 2 10.00 20.00\n\
                    Gadget 1 5.50 5.50\n\
                    Subtotal: $25.50\n\
                    Tax: $2.04\n\
                    Total: USD 27.54\n";
        let v = extract(text);
        assert_eq!(v["invoice_number"], "INV-2026-001");
        assert_eq!(v["invoice_date"], "February 16, 2026");
        assert_eq!(v["due_date"], "2026-03-18");
        assert_eq!(v["vendor_name"], "ACME SUPPLIES INC");
        assert_eq!(v["customer_name"], "Globex Corporation");
        assert_eq!(v["subtotal"], "$25.50");
        assert_eq!(v["tax"], "$2.04");
        assert_eq!(v["total"], "27.54");
        assert_eq!(v["currency"], "USD");

        let items = v["line_items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["description"], "Widget large");
        assert_eq!(items[0]["quantity"], "2");
        assert_eq!(items[1]["amount"], "5.50");
    }

    #[test]
    fn test_nothing_found() {
        let v = extract("lorem ipsum");
        assert_eq!(v, json!({"line_items": []}));
    }
}
