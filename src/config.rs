use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use serde::Deserialize;
use std::{fs, path::Path};

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_path: String,
    pub input_dir: String,
    pub ocr: OcrSection,
    pub llm: LlmSection,
    pub pipeline: PipelineSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "invoices.db".to_string(),
            input_dir: "invoices".to_string(),
            ocr: OcrSection::default(),
            llm: LlmSection::default(),
            pipeline: PipelineSection::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OcrSection {
    /// Below this many non-whitespace characters the fallback engine runs.
    pub min_text_chars: usize,
    /// Fallback OCR command; `{path}` is replaced by the image path.
    /// Empty disables the fallback.
    pub fallback_command: Vec<String>,
    /// Renders PDF pages to images before the fallback OCR runs. `{path}` is
    /// the PDF, `{out}` the output file prefix. Empty leaves PDFs to the text
    /// layer alone.
    pub rasterize_command: Vec<String>,
}

impl Default for OcrSection {
    fn default() -> Self {
        Self {
            min_text_chars: 20,
            fallback_command: vec![
                "tesseract".to_string(),
                "{path}".to_string(),
                "stdout".to_string(),
            ],
            rasterize_command: ["pdftoppm", "-r", "300", "-png", "{path}", "{out}"]
                .map(String::from)
                .to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    Ollama,
    Cliproxy,
    Remote,
    Heuristics,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Endpoint {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub backend: LlmBackend,
    /// Text beyond this many characters is not sent to the model.
    pub max_prompt_chars: usize,
    pub ollama: Endpoint,
    pub cliproxy: Endpoint,
    pub remote: Endpoint,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            backend: LlmBackend::Ollama,
            max_prompt_chars: 12_000,
            ollama: Endpoint {
                base_url: "http://localhost:11434/v1".to_string(),
                model: "qwen3:8b".to_string(),
            },
            cliproxy: Endpoint {
                base_url: "http://localhost:8317/v1".to_string(),
                model: "gemini-2.5-flash".to_string(),
            },
            remote: Endpoint {
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-4o-mini".to_string(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// Documents whose text has fewer characters than this are skipped.
    pub min_text_chars: usize,
    pub canonical_dates: bool,
    pub annotate_confidence: bool,
    pub retry: RetryPolicy,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            min_text_chars: 1,
            canonical_dates: true,
            annotate_confidence: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    /// Like [`Config::load`], but a missing file means "all defaults".
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Backoff;

    #[test]
    fn test_defaults() {
        let cfg = Config::load_or_default("does/not/exist.toml").unwrap();
        assert_eq!(cfg.db_path, "invoices.db");
        assert_eq!(cfg.ocr.min_text_chars, 20);
        assert_eq!(cfg.ocr.rasterize_command[0], "pdftoppm");
        assert_eq!(cfg.ocr.rasterize_command.last().map(String::as_str), Some("{out}"));
        assert_eq!(cfg.llm.backend, LlmBackend::Ollama);
        assert_eq!(cfg.pipeline.retry.max_retries, 1);
        assert!(cfg.pipeline.canonical_dates);
    }

    #[test]
    fn test_partial_file() {
        let toml = r#"
            db_path = "out/ledger.db"

            [ocr]
            rasterize_command = []

            [llm]
            backend = "heuristics"

            [llm.remote]
            base_url = "https://example.test/v1"
            model = "m"

            [pipeline]
            annotate_confidence = true

            [pipeline.retry]
            max_retries = 2
            backoff = { kind = "exponential", base_ms = 10, max_ms = 100 }
        "#;
        let cfg = Config::parse(toml, Path::new("inline.toml")).unwrap();
        assert_eq!(cfg.db_path, "out/ledger.db");
        assert_eq!(cfg.input_dir, "invoices");
        assert!(cfg.ocr.rasterize_command.is_empty());
        assert_eq!(cfg.ocr.fallback_command[0], "tesseract");
        assert_eq!(cfg.llm.backend, LlmBackend::Heuristics);
        assert_eq!(cfg.llm.remote.model, "m");
        assert_eq!(cfg.llm.ollama.model, "qwen3:8b");
        assert!(cfg.pipeline.annotate_confidence);
        assert_eq!(cfg.pipeline.retry.max_retries, 2);
        assert!(matches!(cfg.pipeline.retry.backoff, Backoff::Exponential { base_ms: 10, .. }));
    }

    #[test]
    fn test_bad_file_reports_path() {
        let err = Config::parse("db_path = [", Path::new("broken.toml")).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }
}
