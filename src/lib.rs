//! OCR'd invoices in, append-only SQLite ledger out.
//!
//! Extractor output is never trusted: [`raw`] parses whatever came back,
//! [`normalize`] turns it into one header plus line items without ever
//! failing, and [`store`] appends the rows while widening the tables for
//! any column it has not seen before. [`pipeline`] ties the stages together
//! so that one bad document cannot stop a batch.

pub mod coerce;
pub mod config;
pub mod documents;
pub mod error;
pub mod heuristics;
pub mod llm_extract;
pub mod normalize;
pub mod ocr;
pub mod pipeline;
pub mod raw;
pub mod retry;
pub mod store;
