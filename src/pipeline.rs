// src/pipeline.rs

//! Batch driver: OCR → structured extraction → normalize → store, one
//! document at a time. A document can fail in any stage; the batch never
//! does.

use crate::config::PipelineSection;
use crate::documents::Document;
use crate::error::{ExtractError, PipelineError};
use crate::llm_extract::StructuredExtractor;
use crate::normalize::{NormalizeOptions, normalize};
use crate::ocr::FallbackOcr;
use crate::raw::{RawExtraction, parse_extraction};
use crate::retry::RetryPolicy;
use crate::store::{InvoiceStore, SaveReport};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tracing::{Instrument, debug, error, info, info_span, warn};

#[derive(Debug, Clone, Copy)]
pub struct DriverOptions {
    /// Documents with fewer trimmed characters than this never reach the extractor.
    pub min_text_chars: usize,
    pub retry: RetryPolicy,
    pub normalize: NormalizeOptions,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self::from(&PipelineSection::default())
    }
}

impl From<&PipelineSection> for DriverOptions {
    fn from(section: &PipelineSection) -> Self {
        Self {
            min_text_chars: section.min_text_chars,
            retry: section.retry,
            normalize: NormalizeOptions {
                canonical_dates: section.canonical_dates,
                annotate_confidence: section.annotate_confidence,
            },
        }
    }
}

/// Per-outcome document counts for one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub skipped_no_text: usize,
    pub skipped_no_json: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.processed + self.skipped_no_text + self.skipped_no_json + self.failed
    }

    fn record(&mut self, doc: &Document, outcome: &Result<SaveReport, PipelineError>) {
        match outcome {
            Ok(report) => {
                self.processed += 1;
                info!(
                    document = %doc.id,
                    header_rows = report.header_rows,
                    item_rows = report.item_rows,
                    "Saved to DB"
                );
            }
            Err(e @ PipelineError::NoText { .. }) => {
                self.skipped_no_text += 1;
                warn!(document = %doc.id, reason = %e, "Skipping: no text found");
            }
            Err(e @ PipelineError::NoJson { .. }) => {
                self.skipped_no_json += 1;
                warn!(document = %doc.id, reason = %e, "Skipping: JSON extraction failed");
            }
            Err(e) => {
                self.failed += 1;
                error!(document = %doc.id, error = %e, "Document failed, moving to next");
            }
        }
    }
}

pub struct BatchDriver {
    ocr: FallbackOcr,
    extractor: Box<dyn StructuredExtractor>,
    store: InvoiceStore,
    options: DriverOptions,
}

impl BatchDriver {
    pub fn new(
        ocr: FallbackOcr,
        extractor: Box<dyn StructuredExtractor>,
        store: InvoiceStore,
        options: DriverOptions,
    ) -> Self {
        Self {
            ocr,
            extractor,
            store,
            options,
        }
    }

    pub fn store(&self) -> &InvoiceStore {
        &self.store
    }

    /// Process every document in order. Only a process-level interrupt
    /// stops this early.
    pub async fn run(&mut self, docs: &[Document]) -> BatchSummary {
        let mut summary = BatchSummary::default();
        info!(documents = docs.len(), extractor = self.extractor.name(), "Starting batch");

        for (i, doc) in docs.iter().enumerate() {
            info!("[{}/{}] Processing {}", i + 1, docs.len(), doc.id);
            let span = info_span!("document", id = %doc.id, index = i + 1);

            let outcome = AssertUnwindSafe(self.process(doc))
                .catch_unwind()
                .instrument(span)
                .await
                .unwrap_or_else(|panic| Err(PipelineError::Panicked(panic_message(&*panic))));

            summary.record(doc, &outcome);
        }

        info!(
            total = summary.total(),
            processed = summary.processed,
            skipped_no_text = summary.skipped_no_text,
            skipped_no_json = summary.skipped_no_json,
            failed = summary.failed,
            "Batch complete"
        );
        summary
    }

    /// Run all stages for one document.
    pub async fn process(&mut self, doc: &Document) -> Result<SaveReport, PipelineError> {
        let text = self.ocr.run(&doc.path);
        let chars = text.trim().chars().count();
        if chars < self.options.min_text_chars {
            return Err(PipelineError::NoText { chars });
        }
        debug!(chars, "Text ready for extraction");

        let raw = self.extract_json(&text).await?;
        let invoice = normalize(&raw, &self.options.normalize);
        info!(
            invoice_number = %invoice.header.invoice_number,
            vendor = %invoice.header.vendor_name,
            total = invoice.header.total,
            line_items = invoice.line_items.len(),
            "Normalized invoice"
        );

        let report = self.store.save_document(&invoice);
        if report.is_ok() {
            Ok(report)
        } else {
            Err(PipelineError::Save {
                tables: report.failed,
            })
        }
    }

    /// Ask the extractor for JSON under the retry policy. An empty object
    /// counts as a failed attempt.
    async fn extract_json(&self, text: &str) -> Result<RawExtraction, PipelineError> {
        let extractor = self.extractor.as_ref();
        self.options
            .retry
            .run(|attempt| async move {
                debug!(attempt, "Requesting structured extraction");
                let response = extractor.extract(text).await?;
                let raw = parse_extraction(&response)?;
                if raw.is_empty() {
                    return Err(ExtractError::EmptyExtraction);
                }
                Ok::<_, ExtractError>(raw)
            })
            .await
            .map_err(|(attempts, last)| PipelineError::NoJson { attempts, last })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
