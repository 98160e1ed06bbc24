//! Error types for loading, rendering and generating documents
//!
//! Fatal kinds ([`ParseError`], [`UnsupportedFormatError`],
//! [`EngineLoadError`]) stop a run before any document is produced.
//! [`MissingFieldError`] is scoped to a single record and only stops the
//! batch when it runs fail-fast.

use thiserror::Error;

use crate::upload::UploadRole;

/// The spreadsheet could not be turned into records
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Spreadsheet could not be read: {0}")]
    Unreadable(String),

    #[error("Spreadsheet contains no sheets")]
    NoSheets,

    #[error("Spreadsheet has no header row")]
    MissingHeader,
}

/// An upload is not a file type the pipeline accepts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unsupported {role} file '{file_name}': {reason}")]
pub struct UnsupportedFormatError {
    pub role: UploadRole,
    pub file_name: String,
    pub reason: String,
}

impl UnsupportedFormatError {
    pub fn new(role: UploadRole, file_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            role,
            file_name: file_name.into(),
            reason: reason.into(),
        }
    }
}

/// One or more placeholders have no matching field in the record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("No value for placeholder(s): {}", .fields.join(", "))]
pub struct MissingFieldError {
    /// Missing field names, in the order the template first uses them
    pub fields: Vec<String>,
}

/// The template itself is unusable
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineLoadError {
    #[error("Template is not a readable .docx package: {0}")]
    NotAPackage(String),

    #[error("Template package has no '{0}' part")]
    MissingPart(String),

    #[error("Malformed XML in '{part}': {message}")]
    MalformedXml { part: String, message: String },

    #[error("Template part '{0}' is not valid UTF-8")]
    Encoding(String),
}

/// Rendering one record failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error(transparent)]
    MissingField(#[from] MissingFieldError),

    #[error("Document could not be written: {0}")]
    Output(String),
}

/// A batch stopped before completing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerateError {
    #[error("Batch aborted at record {index} ('{key}'): {source}")]
    Aborted {
        index: usize,
        key: String,
        source: MissingFieldError,
    },

    #[error("Group field '{0}' is not a column of the spreadsheet")]
    UnknownGroupField(String),

    #[error("Grouped output needs a .docx template with a table row holding placeholders")]
    NoRepeatingRows,

    #[error("Document could not be written: {0}")]
    Output(String),
}

/// Any error that ends a pipeline run without output
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error(transparent)]
    Unsupported(#[from] UnsupportedFormatError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    EngineLoad(#[from] EngineLoadError),

    #[error(transparent)]
    Generate(#[from] GenerateError),
}

impl From<zip::result::ZipError> for GenerateError {
    fn from(err: zip::result::ZipError) -> Self {
        GenerateError::Output(err.to_string())
    }
}
