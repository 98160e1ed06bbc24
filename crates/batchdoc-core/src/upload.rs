//! Upload validation by file extension and content signature

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::UnsupportedFormatError;

/// Local file header magic shared by every OOXML/ODF package
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// OLE2 compound document magic (legacy .xls)
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// A file received from the client, held in memory for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    /// Lowercased extension without the dot
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.file_name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// Which slot of the form an upload was sent in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadRole {
    Spreadsheet,
    Template,
}

impl fmt::Display for UploadRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadRole::Spreadsheet => write!(f, "spreadsheet"),
            UploadRole::Template => write!(f, "template"),
        }
    }
}

/// Spreadsheet formats the loader reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpreadsheetFormat {
    Xlsx,
    Xlsm,
    Xlsb,
    Xls,
    Ods,
    Csv,
}

impl SpreadsheetFormat {
    /// Whether the file goes through calamine rather than the csv reader
    pub fn is_workbook(&self) -> bool {
        !matches!(self, SpreadsheetFormat::Csv)
    }
}

/// Template formats the engine compiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateFormat {
    Docx,
    Text,
}

impl TemplateFormat {
    /// Get the MIME type of documents rendered from this format
    pub fn mime_type(&self) -> &'static str {
        match self {
            TemplateFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            TemplateFormat::Text => "text/plain; charset=utf-8",
        }
    }

    /// Get the file extension of documents rendered from this format
    pub fn extension(&self) -> &'static str {
        match self {
            TemplateFormat::Docx => "docx",
            TemplateFormat::Text => "txt",
        }
    }
}

/// Validate a spreadsheet upload and tell which reader it needs
pub fn detect_spreadsheet(upload: &Upload) -> Result<SpreadsheetFormat, UnsupportedFormatError> {
    let role = UploadRole::Spreadsheet;
    let ext = require_content(role, upload)?;

    let format = match ext.as_str() {
        "xlsx" => SpreadsheetFormat::Xlsx,
        "xlsm" => SpreadsheetFormat::Xlsm,
        "xlsb" => SpreadsheetFormat::Xlsb,
        "xls" => SpreadsheetFormat::Xls,
        "ods" => SpreadsheetFormat::Ods,
        "csv" => SpreadsheetFormat::Csv,
        other => {
            return Err(UnsupportedFormatError::new(
                role,
                &upload.file_name,
                format!(
                    "extension '.{}' is not one of .xlsx, .xlsm, .xlsb, .xls, .ods, .csv",
                    other
                ),
            ));
        }
    };

    match format {
        SpreadsheetFormat::Xls => require_magic(role, upload, OLE_MAGIC, "an Excel 97-2003 workbook")?,
        SpreadsheetFormat::Csv => require_text(role, upload)?,
        _ => require_magic(role, upload, ZIP_MAGIC, "a zip-based workbook")?,
    }

    Ok(format)
}

/// Validate a template upload and tell which compiler it needs
pub fn detect_template(upload: &Upload) -> Result<TemplateFormat, UnsupportedFormatError> {
    let role = UploadRole::Template;
    let ext = require_content(role, upload)?;

    match ext.as_str() {
        "docx" => {
            require_magic(role, upload, ZIP_MAGIC, "a .docx package")?;
            Ok(TemplateFormat::Docx)
        }
        "txt" => {
            require_text(role, upload)?;
            Ok(TemplateFormat::Text)
        }
        "doc" => Err(UnsupportedFormatError::new(
            role,
            &upload.file_name,
            "legacy .doc templates are not supported, save the template as .docx",
        )),
        other => Err(UnsupportedFormatError::new(
            role,
            &upload.file_name,
            format!("extension '.{}' is not one of .docx, .txt", other),
        )),
    }
}

fn require_content(role: UploadRole, upload: &Upload) -> Result<String, UnsupportedFormatError> {
    if upload.bytes.is_empty() {
        return Err(UnsupportedFormatError::new(role, &upload.file_name, "file is empty"));
    }
    upload
        .extension()
        .ok_or_else(|| UnsupportedFormatError::new(role, &upload.file_name, "file has no extension"))
}

fn require_magic(
    role: UploadRole,
    upload: &Upload,
    magic: &[u8],
    expected: &str,
) -> Result<(), UnsupportedFormatError> {
    if upload.bytes.starts_with(magic) {
        Ok(())
    } else {
        Err(UnsupportedFormatError::new(
            role,
            &upload.file_name,
            format!("content is not {}", expected),
        ))
    }
}

fn require_text(role: UploadRole, upload: &Upload) -> Result<(), UnsupportedFormatError> {
    match std::str::from_utf8(&upload.bytes) {
        Ok(text) if !text.contains('\0') => Ok(()),
        _ => Err(UnsupportedFormatError::new(
            role,
            &upload.file_name,
            "content is not UTF-8 text",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_is_lowercased() {
        let upload = Upload::new("Batch_Local.XLSX", b"PK\x03\x04rest".to_vec());
        assert_eq!(upload.extension().as_deref(), Some("xlsx"));
    }

    #[test]
    fn test_hidden_file_has_no_extension() {
        assert_eq!(Upload::new(".xlsx", vec![1]).extension(), None);
        assert_eq!(Upload::new("data.", vec![1]).extension(), None);
    }

    #[test]
    fn test_detects_zip_workbook() {
        let upload = Upload::new("data.xlsx", b"PK\x03\x04....".to_vec());
        assert_eq!(detect_spreadsheet(&upload), Ok(SpreadsheetFormat::Xlsx));
    }

    #[test]
    fn test_detects_legacy_xls_by_ole_magic() {
        let mut bytes = OLE_MAGIC.to_vec();
        bytes.extend_from_slice(b"body");
        let upload = Upload::new("old.xls", bytes);
        assert_eq!(detect_spreadsheet(&upload), Ok(SpreadsheetFormat::Xls));
    }

    #[test]
    fn test_rejects_renamed_file() {
        let upload = Upload::new("data.xlsx", b"Batch,Lot\nB1,L1\n".to_vec());
        let err = detect_spreadsheet(&upload).unwrap_err();
        assert_eq!(err.role, UploadRole::Spreadsheet);
        assert!(err.reason.contains("zip"));
    }

    #[test]
    fn test_rejects_unknown_extension() {
        let upload = Upload::new("data.pdf", b"%PDF-1.7".to_vec());
        assert!(detect_spreadsheet(&upload).is_err());
    }

    #[test]
    fn test_rejects_empty_upload() {
        let err = detect_spreadsheet(&Upload::new("data.csv", Vec::new())).unwrap_err();
        assert_eq!(err.reason, "file is empty");
    }

    #[test]
    fn test_csv_must_be_text() {
        let upload = Upload::new("data.csv", vec![0xff, 0xfe, 0x00, 0x41]);
        assert!(detect_spreadsheet(&upload).is_err());
        let upload = Upload::new("data.csv", b"a,b\n1,2\n".to_vec());
        assert_eq!(detect_spreadsheet(&upload), Ok(SpreadsheetFormat::Csv));
    }

    #[test]
    fn test_template_formats() {
        let docx = Upload::new("register.docx", b"PK\x03\x04".to_vec());
        assert_eq!(detect_template(&docx), Ok(TemplateFormat::Docx));

        let text = Upload::new("label.txt", b"Batch {{Batch}}".to_vec());
        assert_eq!(detect_template(&text), Ok(TemplateFormat::Text));

        for name in ["label.html", "label.md"] {
            let markup = Upload::new(name, b"<p>{{Batch}}</p>".to_vec());
            assert!(detect_template(&markup).is_err(), "{} should be rejected", name);
        }

        let legacy = Upload::new("register.doc", OLE_MAGIC.to_vec());
        let err = detect_template(&legacy).unwrap_err();
        assert!(err.reason.contains(".docx"));
    }

    #[test]
    fn test_template_mime_and_extension() {
        assert_eq!(TemplateFormat::Docx.extension(), "docx");
        assert!(TemplateFormat::Docx.mime_type().contains("wordprocessingml"));
        assert_eq!(TemplateFormat::Text.extension(), "txt");
    }
}
