//! Packaging generated documents for download

use std::io::{Cursor, Write};
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::info;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::GenerateError;
use crate::generator::GeneratedDocument;

pub const ZIP_MIME_TYPE: &str = "application/zip";

/// When a batch is delivered as a zip archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchivePolicy {
    /// A single document is returned as-is, several are zipped
    #[default]
    Auto,
    /// Always zip, even a single document
    Always,
}

impl FromStr for ArchivePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(ArchivePolicy::Auto),
            "always" => Ok(ArchivePolicy::Always),
            other => Err(format!("Unknown archive policy '{}', expected auto or always", other)),
        }
    }
}

/// The payload returned to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub file_name: String,
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
    pub archived: bool,
}

/// `batch_documents_YYYYmmdd_HHMMSS.zip`
pub fn archive_name(now: &NaiveDateTime) -> String {
    format!("batch_documents_{}.zip", now.format("%Y%m%d_%H%M%S"))
}

/// Zip documents in batch order, one entry per document
pub fn write_zip(documents: &[GeneratedDocument]) -> Result<Vec<u8>, GenerateError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for document in documents {
        writer.start_file(document.file_name.as_str(), options)?;
        writer
            .write_all(&document.bytes)
            .map_err(|e| GenerateError::Output(e.to_string()))?;
    }

    Ok(writer.finish()?.into_inner())
}

/// Turn the documents of a batch into one download, `None` when there are none
pub fn package(
    mut documents: Vec<GeneratedDocument>,
    policy: ArchivePolicy,
    archive_file_name: &str,
) -> Result<Option<Download>, GenerateError> {
    if documents.is_empty() {
        return Ok(None);
    }

    if documents.len() == 1 && policy == ArchivePolicy::Auto {
        let document = documents.remove(0);
        return Ok(Some(Download {
            file_name: document.file_name,
            mime_type: document.mime_type,
            bytes: document.bytes,
            archived: false,
        }));
    }

    let bytes = write_zip(&documents)?;
    info!(
        "Packaged {} documents into '{}' ({} bytes)",
        documents.len(),
        archive_file_name,
        bytes.len()
    );
    Ok(Some(Download {
        file_name: archive_file_name.to_string(),
        mime_type: ZIP_MIME_TYPE,
        bytes,
        archived: true,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn doc(index: usize, name: &str, body: &str) -> GeneratedDocument {
        GeneratedDocument {
            index,
            key: name.to_string(),
            records: 1,
            file_name: format!("{}.txt", name),
            mime_type: "text/plain; charset=utf-8",
            bytes: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_archive_name() {
        let now = NaiveDate::from_ymd_opt(2025, 9, 7)
            .unwrap()
            .and_hms_opt(14, 3, 9)
            .unwrap();
        assert_eq!(archive_name(&now), "batch_documents_20250907_140309.zip");
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("AUTO".parse::<ArchivePolicy>(), Ok(ArchivePolicy::Auto));
        assert_eq!(" always ".parse::<ArchivePolicy>(), Ok(ArchivePolicy::Always));
        assert!("never".parse::<ArchivePolicy>().is_err());
    }

    #[test]
    fn test_no_documents_no_download() {
        assert_eq!(package(Vec::new(), ArchivePolicy::Always, "a.zip").unwrap(), None);
    }

    #[test]
    fn test_single_document_returned_directly() {
        let download = package(vec![doc(0, "B100", "x")], ArchivePolicy::Auto, "a.zip")
            .unwrap()
            .unwrap();
        assert_eq!(download.file_name, "B100.txt");
        assert!(!download.archived);
        assert_eq!(download.bytes, b"x".to_vec());
    }

    #[test]
    fn test_always_archives_single_document() {
        let download = package(vec![doc(0, "B100", "x")], ArchivePolicy::Always, "a.zip")
            .unwrap()
            .unwrap();
        assert!(download.archived);
        assert_eq!(download.mime_type, ZIP_MIME_TYPE);
        assert_eq!(fixtures::zip_names(&download.bytes), vec!["B100.txt"]);
    }

    #[test]
    fn test_archive_keeps_batch_order() {
        let documents = vec![doc(0, "B3", "3"), doc(1, "B1", "1"), doc(2, "B2", "2")];
        let download = package(documents, ArchivePolicy::Auto, "batch.zip")
            .unwrap()
            .unwrap();
        assert_eq!(download.file_name, "batch.zip");
        assert_eq!(
            fixtures::zip_names(&download.bytes),
            vec!["B3.txt", "B1.txt", "B2.txt"]
        );
        assert_eq!(fixtures::docx_part(&download.bytes, "B1.txt"), "1");
    }

    #[test]
    fn test_zip_is_deterministic() {
        let documents = vec![doc(0, "B1", "1"), doc(1, "B2", "2")];
        assert_eq!(write_zip(&documents).unwrap(), write_zip(&documents).unwrap());
    }
}
