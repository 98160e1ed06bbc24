//! Error types for the batch record server

use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use batchdoc_core::generator::RecordFailure;
use batchdoc_core::{GenerateError, PipelineError};
use serde::Serialize;
use thiserror::Error;

/// Server error types
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("{0}")]
    UnsupportedFormat(String),

    #[error("{0}")]
    Parse(String),

    #[error("{0}")]
    Template(String),

    #[error("{message}")]
    BatchAborted {
        message: String,
        failure: RecordFailure,
    },

    #[error("No documents were generated")]
    NoDocuments { failures: Vec<RecordFailure> },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Generation timeout after {0}ms")]
    Timeout(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    code: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failures: Vec<RecordFailure>,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, code, failures) = match self {
            ServerError::UnsupportedFormat(_) => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "UNSUPPORTED_FORMAT",
                Vec::new(),
            ),
            ServerError::Parse(_) => (StatusCode::UNPROCESSABLE_ENTITY, "PARSE_ERROR", Vec::new()),
            ServerError::Template(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "TEMPLATE_ERROR",
                Vec::new(),
            ),
            ServerError::BatchAborted { failure, .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "BATCH_ABORTED",
                vec![failure],
            ),
            ServerError::NoDocuments { failures } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "NO_DOCUMENTS", failures)
            }
            ServerError::InvalidRequest(_) => {
                (StatusCode::BAD_REQUEST, "INVALID_REQUEST", Vec::new())
            }
            ServerError::Timeout(_) => (StatusCode::REQUEST_TIMEOUT, "TIMEOUT", Vec::new()),
            ServerError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                Vec::new(),
            ),
        };

        let body = ErrorResponse {
            success: false,
            error: message,
            code: code.to_string(),
            failures,
        };

        (status, Json(body)).into_response()
    }
}

impl From<PipelineError> for ServerError {
    fn from(err: PipelineError) -> Self {
        let message = err.to_string();
        match err {
            PipelineError::Unsupported(_) => ServerError::UnsupportedFormat(message),
            PipelineError::Parse(_) => ServerError::Parse(message),
            PipelineError::EngineLoad(_) => ServerError::Template(message),
            PipelineError::Generate(GenerateError::Aborted { index, key, source }) => {
                ServerError::BatchAborted {
                    message,
                    failure: RecordFailure {
                        index,
                        key,
                        error: source.to_string(),
                        missing_fields: source.fields,
                    },
                }
            }
            PipelineError::Generate(GenerateError::UnknownGroupField(_)) => {
                ServerError::InvalidRequest(message)
            }
            PipelineError::Generate(GenerateError::NoRepeatingRows) => ServerError::Template(message),
            PipelineError::Generate(GenerateError::Output(_)) => ServerError::Internal(message),
        }
    }
}

impl From<MultipartError> for ServerError {
    fn from(err: MultipartError) -> Self {
        ServerError::InvalidRequest(err.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchdoc_core::error::{MissingFieldError, ParseError};

    #[test]
    fn test_pipeline_errors_map_to_codes() {
        let err: ServerError = PipelineError::from(ParseError::MissingHeader).into();
        assert!(matches!(err, ServerError::Parse(_)));

        let err: ServerError = PipelineError::from(GenerateError::Aborted {
            index: 2,
            key: "B3".to_string(),
            source: MissingFieldError {
                fields: vec!["Lot".to_string()],
            },
        })
        .into();
        match err {
            ServerError::BatchAborted { failure, .. } => {
                assert_eq!(failure.index, 2);
                assert_eq!(failure.missing_fields, vec!["Lot".to_string()]);
            }
            other => panic!("unexpected mapping: {:?}", other),
        }

        let err: ServerError = PipelineError::from(GenerateError::NoRepeatingRows).into();
        assert!(matches!(err, ServerError::Template(_)));
        let err: ServerError =
            PipelineError::from(GenerateError::UnknownGroupField("Site".into())).into();
        assert!(matches!(err, ServerError::InvalidRequest(_)));
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (ServerError::UnsupportedFormat("x".into()), StatusCode::UNSUPPORTED_MEDIA_TYPE),
            (ServerError::Template("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (ServerError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
            (ServerError::Timeout(5), StatusCode::REQUEST_TIMEOUT),
            (ServerError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
