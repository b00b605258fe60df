// src/heuristics/mod.rs

mod generic;

use crate::error::ExtractError;
use crate::llm_extract::StructuredExtractor;
use async_trait::async_trait;
use serde_json::Value;

/// Offline extractor: keyword-anchored regexes instead of a model.
///
/// Emits the same JSON shape the LLM prompt asks for, so it goes through
/// exactly the same parse and normalize path.
pub struct HeuristicExtractor;

#[async_trait]
impl StructuredExtractor for HeuristicExtractor {
    fn name(&self) -> &str {
        "heuristics"
    }

    async fn extract(&self, text: &str) -> Result<String, ExtractError> {
        Ok(extract_invoice(text).to_string())
    }
}

/// Extract structured invoice data from raw OCR text.
pub fn extract_invoice(text: &str) -> Value {
    generic::extract(text)
}
