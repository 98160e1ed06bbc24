//! API handlers for the batch record server
//!
//! Provides REST endpoints for:
//! - Record preview (load + select)
//! - Template placeholder listing
//! - Batch generation, as a JSON report or a direct download

use std::collections::BTreeMap;
use std::time::Duration;

use axum::{
    extract::{Multipart, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use batchdoc_core::archive::archive_name;
use batchdoc_core::generator::RecordFailure;
use batchdoc_core::pipeline::{self, DocumentSummary, GenerationOutcome, GenerationRequest};
use batchdoc_core::{BatchState, PipelineError};
use serde::Serialize;
use tracing::{info, info_span, Instrument, Span};
use uuid::Uuid;

use crate::error::ServerError;
use crate::form::UploadForm;
use crate::AppState;

const GENERATED_HEADER: HeaderName = HeaderName::from_static("x-batch-generated");
const FAILED_HEADER: HeaderName = HeaderName::from_static("x-batch-failed");
const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Handler: GET /health
pub async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "batchdoc-server",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Run pipeline work on the blocking pool under the request timeout
async fn run_blocking<T, F>(timeout_ms: u64, work: F) -> Result<T, ServerError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
{
    let span = Span::current();
    let result = tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        tokio::task::spawn_blocking(move || span.in_scope(work)),
    )
    .await;

    match result {
        Ok(Ok(outcome)) => outcome.map_err(ServerError::from),
        Ok(Err(join_error)) => Err(ServerError::Internal(format!(
            "Generation task panicked: {}",
            join_error
        ))),
        Err(_timeout) => Err(ServerError::Timeout(timeout_ms)),
    }
}

/// Preview response
#[derive(Serialize)]
pub struct PreviewResponse {
    pub success: bool,
    pub request_id: String,
    pub sheet: Option<String>,
    pub fields: Vec<String>,
    pub aliases: BTreeMap<String, String>,
    pub total: usize,
    pub matched: usize,
    pub rows: Vec<Vec<String>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub distinct: BTreeMap<String, Vec<String>>,
}

/// Handler: POST /api/preview
pub async fn handle_preview(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<PreviewResponse>, ServerError> {
    let request_id = Uuid::new_v4();
    let span = info_span!("preview", %request_id);

    async move {
        let mut form = UploadForm::from_multipart(multipart).await?;
        let spreadsheet = form.take_spreadsheet()?;
        let query = form.query();
        let config = form.config(&state.config);
        let distinct = std::mem::take(&mut form.distinct);

        info!("Preview of '{}'", spreadsheet.file_name);
        let preview = run_blocking(state.timeout_ms, move || {
            pipeline::preview(&spreadsheet, &query, &config, &distinct)
        })
        .await?;

        Ok::<_, ServerError>(Json(PreviewResponse {
            success: true,
            request_id: request_id.to_string(),
            sheet: preview.sheet,
            fields: preview.fields,
            aliases: preview.aliases,
            total: preview.total,
            matched: preview.matched,
            rows: preview.rows,
            distinct: preview.distinct,
        }))
    }
    .instrument(span)
    .await
}

/// Template fields response
#[derive(Serialize)]
pub struct TemplateFieldsResponse {
    pub success: bool,
    pub request_id: String,
    pub format: &'static str,
    pub placeholders: Vec<String>,
    pub count: usize,
}

/// Handler: POST /api/template/fields
pub async fn handle_template_fields(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<TemplateFieldsResponse>, ServerError> {
    let request_id = Uuid::new_v4();
    let span = info_span!("template_fields", %request_id);

    async move {
        let mut form = UploadForm::from_multipart(multipart).await?;
        let template = form.take_template()?;

        info!("Listing placeholders of '{}'", template.file_name);
        let fields =
            run_blocking(state.timeout_ms, move || pipeline::template_fields(&template)).await?;
        let count = fields.placeholders.len();

        Ok::<_, ServerError>(Json(TemplateFieldsResponse {
            success: true,
            request_id: request_id.to_string(),
            format: fields.format.extension(),
            placeholders: fields.placeholders,
            count,
        }))
    }
    .instrument(span)
    .await
}

/// Generated file, base64-encoded
#[derive(Serialize)]
pub struct DownloadPayload {
    pub file_name: String,
    pub mime_type: &'static str,
    pub archived: bool,
    pub data: String,
}

/// Generation report
#[derive(Serialize)]
pub struct GenerateResponse {
    pub success: bool,
    pub request_id: String,
    pub state: BatchState,
    pub sheet: Option<String>,
    pub loaded: usize,
    pub matched: usize,
    pub generated: usize,
    pub failed: usize,
    pub documents: Vec<DocumentSummary>,
    pub failures: Vec<RecordFailure>,
    pub download: DownloadPayload,
}

/// Parse the form and run the pipeline for one request
async fn generate_from_form(
    state: &AppState,
    multipart: Multipart,
) -> Result<GenerationOutcome, ServerError> {
    let mut form = UploadForm::from_multipart(multipart).await?;
    let request = GenerationRequest {
        spreadsheet: form.take_spreadsheet()?,
        template: form.take_template()?,
        query: form.query(),
        config: form.config(&state.config),
    };
    info!(
        "Generate: spreadsheet='{}', template='{}'",
        request.spreadsheet.file_name, request.template.file_name
    );

    let name = archive_name(&chrono::Local::now().naive_local());
    let outcome = run_blocking(state.timeout_ms, move || pipeline::run(&request, &name)).await?;

    info!(
        "Generated {} of {} selected records ({:?})",
        outcome.documents.len(),
        outcome.matched,
        outcome.state
    );
    Ok(outcome)
}

/// Handler: POST /api/generate
pub async fn handle_generate(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<GenerateResponse>, ServerError> {
    let request_id = Uuid::new_v4();
    let span = info_span!("generate", %request_id);

    async move {
        let outcome = generate_from_form(&state, multipart).await?;
        let Some(download) = outcome.download else {
            return Err(ServerError::NoDocuments {
                failures: outcome.failures,
            });
        };

        Ok::<_, ServerError>(Json(GenerateResponse {
            success: true,
            request_id: request_id.to_string(),
            state: outcome.state,
            sheet: outcome.sheet,
            loaded: outcome.loaded,
            matched: outcome.matched,
            generated: outcome.documents.len(),
            failed: outcome.failures.len(),
            documents: outcome.documents,
            failures: outcome.failures,
            download: DownloadPayload {
                file_name: download.file_name,
                mime_type: download.mime_type,
                archived: download.archived,
                data: BASE64.encode(&download.bytes),
            },
        }))
    }
    .instrument(span)
    .await
}

/// Handler: POST /api/generate/download
pub async fn handle_generate_download(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ServerError> {
    let request_id = Uuid::new_v4();
    let span = info_span!("download", %request_id);

    async move {
        let outcome = generate_from_form(&state, multipart).await?;
        let generated = outcome.documents.len();
        let failed = outcome.failures.len();
        let Some(download) = outcome.download else {
            return Err(ServerError::NoDocuments {
                failures: outcome.failures,
            });
        };

        let disposition = HeaderValue::from_str(&content_disposition(&download.file_name))
            .map_err(|e| ServerError::Internal(format!("Invalid file name header: {}", e)))?;

        let mut response = (StatusCode::OK, download.bytes).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(download.mime_type));
        headers.insert(header::CONTENT_DISPOSITION, disposition);
        headers.insert(GENERATED_HEADER, HeaderValue::from(generated));
        headers.insert(FAILED_HEADER, HeaderValue::from(failed));
        if let Ok(id) = HeaderValue::from_str(&request_id.to_string()) {
            headers.insert(REQUEST_ID_HEADER, id);
        }
        Ok::<_, ServerError>(response)
    }
    .instrument(span)
    .await
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 name
pub fn content_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if fallback == file_name {
        return format!("attachment; filename=\"{}\"", file_name);
    }

    let encoded: String = file_name
        .bytes()
        .map(|b| {
            if b.is_ascii_alphanumeric() || b"-._~".contains(&b) {
                (b as char).to_string()
            } else {
                format!("%{:02X}", b)
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback, encoded
    )
}
