// src/documents.rs

use crate::error::PipelineError;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const EXTENSIONS: &[&str] = &["pdf", "png", "jpg", "jpeg", "tif", "tiff"];

/// A document resolved to a local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Used in log lines; the file name.
    pub id: String,
    pub path: PathBuf,
}

impl Document {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let id = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { id, path }
    }
}

/// Every supported document directly inside `dir`, sorted by path.
pub fn discover_documents(dir: impl AsRef<Path>) -> Result<Vec<Document>, PipelineError> {
    let dir = dir.as_ref();
    let pattern = format!("{}/*", glob::Pattern::escape(&dir.to_string_lossy()));
    let mut docs = Vec::new();

    for entry in glob::glob(&pattern)? {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "Unreadable directory entry");
                continue;
            }
        };
        let supported = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)));
        if supported && path.is_file() {
            docs.push(Document::from_path(path));
        }
    }

    docs.sort_by(|a, b| a.path.cmp(&b.path));
    info!(dir = %dir.display(), found = docs.len(), "Discovered documents");
    Ok(docs)
}
