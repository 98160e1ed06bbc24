//! One request end to end: validate, load, select, generate, package
//!
//! Everything a run needs travels in the request value; nothing is kept
//! between runs.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::archive::{package, Download};
use crate::config::BatchConfig;
use crate::error::PipelineError;
use crate::generator::{generate, BatchState, RecordFailure};
use crate::loader::{load, DataSet};
use crate::selector::{distinct_values, select, Query};
use crate::template::DocumentTemplate;
use crate::upload::{detect_spreadsheet, detect_template, TemplateFormat, Upload};

/// Inputs of one generation run
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub spreadsheet: Upload,
    pub template: Upload,
    pub query: Query,
    pub config: BatchConfig,
}

/// A generated document without its bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSummary {
    pub index: usize,
    pub key: String,
    /// Records rendered into the document
    pub records: usize,
    pub file_name: String,
}

/// Result of a run that got as far as generation
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub state: BatchState,
    pub sheet: Option<String>,
    /// Records read from the spreadsheet
    pub loaded: usize,
    /// Records left after selection
    pub matched: usize,
    pub documents: Vec<DocumentSummary>,
    pub failures: Vec<RecordFailure>,
    /// `None` when no record produced a document
    pub download: Option<Download>,
}

/// Run the whole pipeline
///
/// Uploads are validated and the template compiled before any record is
/// rendered, so a fatal error never leaves partial output behind.
pub fn run(
    request: &GenerationRequest,
    archive_name: &str,
) -> Result<GenerationOutcome, PipelineError> {
    let spreadsheet_format = detect_spreadsheet(&request.spreadsheet)?;
    let template_format = detect_template(&request.template)?;

    let data = load(
        &request.spreadsheet.bytes,
        spreadsheet_format,
        &request.config.load_options(),
    )?;
    let loaded = data.len();
    let sheet = data.sheet.clone();

    let template = DocumentTemplate::load(&request.template, template_format).map_err(|e| {
        warn!(
            state = ?BatchState::Failed,
            "Template '{}' failed to load: {}", request.template.file_name, e
        );
        e
    })?;

    let batch = select(data.into_records(), &request.query);
    let matched = batch.len();
    info!("{} of {} records selected for generation", matched, loaded);

    let report = generate(&template, &batch, &request.config.generate_options())?;
    let documents = report
        .documents
        .iter()
        .map(|d| DocumentSummary {
            index: d.index,
            key: d.key.clone(),
            records: d.records,
            file_name: d.file_name.clone(),
        })
        .collect();
    let download = package(report.documents, request.config.archive, archive_name)?;

    Ok(GenerationOutcome {
        state: report.state,
        sheet,
        loaded,
        matched,
        documents,
        failures: report.failures,
        download,
    })
}

/// Loaded and selected records as display strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preview {
    pub sheet: Option<String>,
    pub fields: Vec<String>,
    /// Canonical alias names and the column each resolved to
    pub aliases: BTreeMap<String, String>,
    pub total: usize,
    pub matched: usize,
    /// One row per selected record, values in `fields` order
    pub rows: Vec<Vec<String>>,
    /// Distinct values of the requested fields
    pub distinct: BTreeMap<String, Vec<String>>,
}

/// Load and select without generating
pub fn preview(
    spreadsheet: &Upload,
    query: &Query,
    config: &BatchConfig,
    distinct_fields: &[String],
) -> Result<Preview, PipelineError> {
    let format = detect_spreadsheet(spreadsheet)?;
    let DataSet {
        schema,
        records,
        sheet,
    } = load(&spreadsheet.bytes, format, &config.load_options())?;
    let total = records.len();

    let distinct = distinct_fields
        .iter()
        .map(|field| (field.clone(), distinct_values(&records, field)))
        .collect();

    let selected = select(records, query);
    let rows = selected
        .iter()
        .map(|record| {
            record
                .fields()
                .map(|(_, value)| value.display().to_string())
                .collect()
        })
        .collect();

    Ok(Preview {
        sheet,
        fields: schema.fields().to_vec(),
        aliases: schema
            .aliases()
            .map(|(alias, field)| (alias.to_string(), field.to_string()))
            .collect(),
        total,
        matched: selected.len(),
        rows,
        distinct,
    })
}

/// Placeholders a template expects
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateFields {
    pub format: TemplateFormat,
    pub placeholders: Vec<String>,
}

/// Compile a template and list its placeholders
pub fn template_fields(upload: &Upload) -> Result<TemplateFields, PipelineError> {
    let format = detect_template(upload)?;
    let template = DocumentTemplate::load(upload, format)?;
    Ok(TemplateFields {
        format,
        placeholders: template.placeholders(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchivePolicy;
    use crate::error::{EngineLoadError, GenerateError, ParseError};
    use crate::fixtures;
    use crate::selector::FieldFilter;
    use pretty_assertions::assert_eq;

    const REGISTER: &str = "Batch,Product,Qty\nB100,Paracetamol,200\nB101,Ibuprofen,50\n";

    fn request(spreadsheet: Upload, template: Upload) -> GenerationRequest {
        GenerationRequest {
            spreadsheet,
            template,
            query: Query::default(),
            config: BatchConfig::default(),
        }
    }

    fn docx_template(paragraphs: &[&str]) -> Upload {
        Upload::new("register.docx", fixtures::docx_with_paragraphs(paragraphs))
    }

    #[test]
    fn test_xlsx_scenario_single_download() {
        let spreadsheet = Upload::new(
            "Batch_Local.xlsx",
            fixtures::xlsx("5_Arc_List", &[&["Batch", "Lot", "Qty"], &["B100", "L5", "200"]]),
        );
        let template = docx_template(&["{{Batch}} / {{Lot}} / {{Qty}}"]);

        let outcome = run(&request(spreadsheet, template), "batch.zip").unwrap();
        assert_eq!(outcome.state, BatchState::Completed);
        assert_eq!(outcome.sheet.as_deref(), Some("5_Arc_List"));

        let download = outcome.download.unwrap();
        assert_eq!(download.file_name, "B100.docx");
        assert!(!download.archived);
        assert_eq!(fixtures::docx_text(&download.bytes), "B100 / L5 / 200");
    }

    #[test]
    fn test_selection_and_archive() {
        let mut req = request(
            Upload::new("register.csv", REGISTER),
            Upload::new("label.txt", "{{Batch}}: {{Product}}"),
        );
        req.config.archive = ArchivePolicy::Always;
        req.query = Query::default().with_filter(FieldFilter::new("Product").equals("ibuprofen"));

        let outcome = run(&req, "batch_documents_20250907_120000.zip").unwrap();
        assert_eq!((outcome.loaded, outcome.matched), (2, 1));

        let download = outcome.download.unwrap();
        assert!(download.archived);
        assert_eq!(download.file_name, "batch_documents_20250907_120000.zip");
        assert_eq!(fixtures::zip_names(&download.bytes), vec!["B101.txt"]);
        assert_eq!(fixtures::docx_part(&download.bytes, "B101.txt"), "B101: Ibuprofen");
    }

    #[test]
    fn test_partial_failures_are_itemized() {
        let csv = "Batch,Note\nB1,first\nB2,\nB3,third\n";
        let req = request(
            Upload::new("notes.csv", csv),
            Upload::new("label.txt", "{{Batch}} {{Lot}}"),
        );
        let outcome = run(&req, "batch.zip").unwrap();
        assert_eq!(outcome.state, BatchState::CompletedWithErrors);
        assert_eq!(outcome.failures.len(), 3);
        assert!(outcome.documents.is_empty());
        assert!(outcome.download.is_none());
    }

    #[test]
    fn test_fail_fast_is_fatal() {
        let mut req = request(
            Upload::new("register.csv", REGISTER),
            Upload::new("label.txt", "{{Lot}}"),
        );
        req.config.fail_fast = true;
        let err = run(&req, "batch.zip").unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Generate(GenerateError::Aborted { index: 0, .. })
        ));
    }

    #[test]
    fn test_fatal_errors_stop_before_generation() {
        let bad_sheet = request(
            Upload::new("register.pdf", "%PDF"),
            Upload::new("label.txt", "{{Batch}}"),
        );
        assert!(matches!(run(&bad_sheet, "a.zip"), Err(PipelineError::Unsupported(_))));

        let no_header = request(
            Upload::new("register.csv", "\n\n"),
            Upload::new("label.txt", "{{Batch}}"),
        );
        assert!(matches!(
            run(&no_header, "a.zip"),
            Err(PipelineError::Parse(ParseError::MissingHeader))
        ));

        let broken_template = request(
            Upload::new("register.csv", REGISTER),
            Upload::new("register.docx", fixtures::zip_entries(&[("word/styles.xml", "<x/>")])),
        );
        assert!(matches!(
            run(&broken_template, "a.zip"),
            Err(PipelineError::EngineLoad(EngineLoadError::MissingPart(_)))
        ));
    }

    #[test]
    fn test_preview() {
        let upload = Upload::new("register.csv", REGISTER);
        let preview = preview(
            &upload,
            &Query::text("para"),
            &BatchConfig::default(),
            &["Product".to_string()],
        )
        .unwrap();
        assert_eq!(preview.fields, vec!["Batch", "Product", "Qty"]);
        assert_eq!((preview.total, preview.matched), (2, 1));
        assert_eq!(preview.rows, vec![vec!["B100", "Paracetamol", "200"]]);
        assert_eq!(preview.distinct["Product"], vec!["Ibuprofen", "Paracetamol"]);
    }

    #[test]
    fn test_template_fields() {
        let fields = template_fields(&docx_template(&["{{Batch}} {{Lot}}", "{{Batch}}"])).unwrap();
        assert_eq!(fields.format, TemplateFormat::Docx);
        assert_eq!(fields.placeholders, vec!["Batch", "Lot"]);
    }
}
