// src/error.rs

//! Error types for each pipeline stage.
//!
//! Every stage returns its own error enum. The batch driver only ever sees
//! [`PipelineError`] and matches on it to decide which summary bucket a
//! document lands in; nothing here is fatal to a batch.

use std::path::PathBuf;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config '{path}': {source}")]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Failure of a single OCR engine. `FallbackOcr` absorbs these.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("io error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse PDF: {0}")]
    Pdf(String),

    #[error("PDF looks scanned (no text layer)")]
    ScannedImage,

    #[error("unsupported file type for {engine}: '{path}'")]
    Unsupported { engine: String, path: PathBuf },

    #[error("ocr command '{program}' failed: {detail}")]
    Command { program: String, detail: String },
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("empty response from LLM")]
    EmptyResponse,

    #[error("response is not a JSON object: {reason}")]
    InvalidJson { reason: String },

    #[error("extraction returned an empty object")]
    EmptyExtraction,

    #[error("backend not usable: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid relation name '{0}'")]
    InvalidRelation(String),

    #[error("column '{column}' could not be added to '{relation}': {source}")]
    Migration {
        relation: String,
        column: String,
        source: rusqlite::Error,
    },
}

/// Per-document outcome errors, as seen by the batch driver.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no usable text ({chars} chars)")]
    NoText { chars: usize },

    #[error("no JSON after {attempts} attempt(s): {last}")]
    NoJson { attempts: u32, last: ExtractError },

    #[error("save failed for: {}", .tables.join(", "))]
    Save { tables: Vec<String> },

    #[error("panic while processing document: {0}")]
    Panicked(String),

    #[error("invalid input pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}
