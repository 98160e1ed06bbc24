//! Batch record generation engine
//!
//! This crate turns a spreadsheet and a Word template into one filled
//! document per selected row:
//! - Spreadsheet loading (xlsx/xlsm/xlsb/xls/ods via calamine, csv)
//! - `{{field}}` placeholder substitution inside .docx packages or text
//! - Record selection by text and per-field filters
//! - Batch generation with per-record failure reporting and zip packaging
//! - Optional grouping: one document per group with a table row per record
//!
//! The pipeline is synchronous and holds no state between calls; callers
//! pass everything a run needs in a [`pipeline::GenerationRequest`].
//!
//! # Feature Flags
//!
//! - `fixtures`: Exposes [`fixtures`] for building minimal .xlsx/.docx
//!   packages in memory (used by tests of dependent crates)

pub mod archive;
pub mod config;
pub mod error;
pub mod format;
pub mod generator;
pub mod loader;
pub mod pipeline;
pub mod record;
pub mod selector;
pub mod template;
pub mod upload;
pub mod value;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub use archive::{ArchivePolicy, Download};
pub use config::BatchConfig;
pub use error::{
    EngineLoadError, GenerateError, MissingFieldError, ParseError, PipelineError, RenderError,
    UnsupportedFormatError,
};
pub use generator::{generate, BatchReport, BatchState, GenerateOptions, GeneratedDocument};
pub use loader::{load, DataSet, LoadOptions};
pub use record::{Record, Schema};
pub use selector::{select, FieldFilter, Query};
pub use template::{render, render_group, DocumentTemplate, Template};
pub use upload::{SpreadsheetFormat, TemplateFormat, Upload};
pub use value::{CellValue, FieldValue};
