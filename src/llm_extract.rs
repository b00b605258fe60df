// src/llm_extract.rs

use crate::config::{LlmBackend, LlmSection};
use crate::error::ExtractError;
use crate::heuristics::HeuristicExtractor;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Something that turns document text into a JSON-ish string.
///
/// The answer is not trusted: callers run it through
/// [`crate::raw::parse_extraction`].
#[async_trait]
pub trait StructuredExtractor: Send + Sync {
    fn name(&self) -> &str;
    async fn extract(&self, text: &str) -> Result<String, ExtractError>;
}

/// The prompt template that instructs the model to extract structured invoice data.
const SYSTEM_PROMPT: &str = r#"You are an invoice data extraction assistant.
Given raw OCR text of an invoice, extract structured data and return ONLY valid JSON.

The JSON must match this schema:
{
  "invoice_number": "string or null",
  "invoice_date": "YYYY-MM-DD or null",
  "due_date": "YYYY-MM-DD or null",
  "vendor_name": "string or null",
  "customer_name": "string or null",
  "subtotal": number or null,
  "tax": number or null,
  "total": number or null,
  "currency": "ISO 4217 code or null",
  "line_items": [
    {
      "description": "string",
      "quantity": number,
      "unit_price": number,
      "amount": number
    }
  ]
}

Notes:
- The text may be garbled by OCR. Do your best to reconstruct the data.
- Use null for fields you cannot determine.
- You may add extra keys to line items if the invoice has more columns.
- Return ONLY the JSON object, no markdown fences, no commentary."#;

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Resolved endpoint configuration ready to make API calls.
#[derive(Debug, Clone)]
pub struct ResolvedEndpoint {
    pub base_url: String,
    pub model: String,
    api_key: String,
}

/// Resolve the LLM config section into a concrete endpoint.
pub fn resolve_endpoint(llm: &LlmSection) -> Result<ResolvedEndpoint, ExtractError> {
    let (endpoint, api_key) = match llm.backend {
        // required by the API shape but ignored
        LlmBackend::Ollama => (&llm.ollama, "ollama".to_string()),
        // CLIProxyAPI uses OAuth, not API keys
        LlmBackend::Cliproxy => (&llm.cliproxy, "cliproxy".to_string()),
        LlmBackend::Remote => {
            let key = std::env::var("LLM_API_KEY").map_err(|_| {
                ExtractError::Backend("LLM_API_KEY env var required for remote backend".into())
            })?;
            (&llm.remote, key)
        }
        LlmBackend::Heuristics => {
            return Err(ExtractError::Backend(
                "heuristics backend has no HTTP endpoint".into(),
            ));
        }
    };
    info!(url = %endpoint.base_url, model = %endpoint.model, backend = ?llm.backend, "Using LLM backend");
    Ok(ResolvedEndpoint {
        base_url: endpoint.base_url.trim_end_matches('/').to_string(),
        model: endpoint.model.clone(),
        api_key,
    })
}

/// OpenAI-compatible `/chat/completions` client.
pub struct ChatCompletionsExtractor {
    client: Client,
    endpoint: ResolvedEndpoint,
    max_prompt_chars: usize,
}

impl ChatCompletionsExtractor {
    pub fn new(endpoint: ResolvedEndpoint, max_prompt_chars: usize) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            max_prompt_chars,
        }
    }

    /// Check if the server answers at all. Ollama's health endpoint is the
    /// root, not under `/v1`.
    pub async fn check_health(&self) -> bool {
        let health_url = self.endpoint.base_url.trim_end_matches("/v1");

        match self
            .client
            .get(health_url)
            .timeout(Duration::from_secs(3))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                info!("LLM server is reachable");
                true
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "LLM server returned non-OK status");
                false
            }
            Err(e) => {
                warn!(error = %e, "LLM server not reachable");
                false
            }
        }
    }
}

#[async_trait]
impl StructuredExtractor for ChatCompletionsExtractor {
    fn name(&self) -> &str {
        &self.endpoint.model
    }

    async fn extract(&self, text: &str) -> Result<String, ExtractError> {
        let text = truncate_chars(text, self.max_prompt_chars);

        let request = ChatRequest {
            model: self.endpoint.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: format!("Extract invoice data from the following OCR text:\n\n{text}"),
                },
            ],
            temperature: 0.0,
        };

        let url = format!("{}/chat/completions", self.endpoint.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.endpoint.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractError::Api { status, body });
        }

        let chat: ChatResponse = response.json().await?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ExtractError::EmptyResponse)?;

        debug!(chars = content.len(), "LLM response received");
        Ok(content)
    }
}

/// The first `max` characters of `text`, cut on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Build the extractor selected in config. Ollama is health-checked up
/// front; an unreachable server is only a warning since each document
/// failure is contained anyway.
pub async fn build_extractor(llm: &LlmSection) -> Result<Box<dyn StructuredExtractor>, ExtractError> {
    if llm.backend == LlmBackend::Heuristics {
        info!("Backend set to heuristics, using regex extraction");
        return Ok(Box::new(HeuristicExtractor));
    }

    let extractor = ChatCompletionsExtractor::new(resolve_endpoint(llm)?, llm.max_prompt_chars);
    if llm.backend == LlmBackend::Ollama && !extractor.check_health().await {
        warn!(
            url = %extractor.endpoint.base_url,
            "Ollama is not running. Start it with: ollama serve"
        );
    }
    Ok(Box::new(extractor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("€€€", 0), "");
    }

    #[test]
    fn test_heuristics_has_no_endpoint() {
        let llm = LlmSection {
            backend: LlmBackend::Heuristics,
            ..LlmSection::default()
        };
        assert!(matches!(resolve_endpoint(&llm), Err(ExtractError::Backend(_))));
    }

    #[test]
    fn test_resolve_ollama_trims_slash() {
        let mut llm = LlmSection::default();
        llm.ollama.base_url = "http://localhost:11434/v1/".to_string();
        let endpoint = resolve_endpoint(&llm).unwrap();
        assert_eq!(endpoint.base_url, "http://localhost:11434/v1");
        assert_eq!(endpoint.model, "qwen3:8b");
    }

    #[tokio::test]
    async fn test_build_heuristics_extractor() {
        let llm = LlmSection {
            backend: LlmBackend::Heuristics,
            ..LlmSection::default()
        };
        let extractor = build_extractor(&llm).await.unwrap();
        assert_eq!(extractor.name(), "heuristics");
    }
}
