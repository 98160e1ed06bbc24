//! Multipart form parsing
//!
//! Every pipeline endpoint takes the same form: the uploads plus optional
//! text fields that override the server configuration for one request.

use axum::extract::Multipart;
use batchdoc_core::{ArchivePolicy, BatchConfig, Query, Upload};
use tracing::debug;

use crate::error::ServerError;

/// Fields of one pipeline request
#[derive(Debug, Default)]
pub struct UploadForm {
    pub spreadsheet: Option<Upload>,
    pub template: Option<Upload>,
    /// Free-text filter
    pub text: Option<String>,
    /// JSON query with field filters
    pub query: Option<Query>,
    pub sheet: Option<String>,
    pub name_field: Option<String>,
    pub fail_fast: Option<bool>,
    pub archive: Option<ArchivePolicy>,
    /// Field to group records by, one document per group
    pub group_by: Option<String>,
    /// Fields whose distinct values the preview should list
    pub distinct: Vec<String>,
}

impl UploadForm {
    /// Read every field of the form
    pub async fn from_multipart(mut multipart: Multipart) -> Result<Self, ServerError> {
        let mut form = UploadForm::default();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "spreadsheet" | "template" => {
                    let file_name = field
                        .file_name()
                        .map(str::to_string)
                        .unwrap_or_else(|| name.clone());
                    let bytes = field.bytes().await?;
                    debug!("Received {} '{}' ({} bytes)", name, file_name, bytes.len());
                    let upload = Upload::new(file_name, bytes.to_vec());
                    if name == "spreadsheet" {
                        form.spreadsheet = Some(upload);
                    } else {
                        form.template = Some(upload);
                    }
                }
                "text" => form.text = non_blank(field.text().await?),
                "query" => {
                    let raw = field.text().await?;
                    if !raw.trim().is_empty() {
                        let query = serde_json::from_str(&raw).map_err(|e| {
                            ServerError::InvalidRequest(format!("Invalid query JSON: {}", e))
                        })?;
                        form.query = Some(query);
                    }
                }
                "sheet" => form.sheet = non_blank(field.text().await?),
                "name_field" => form.name_field = non_blank(field.text().await?),
                "group_by" => form.group_by = non_blank(field.text().await?),
                "fail_fast" => form.fail_fast = Some(parse_flag(&field.text().await?)?),
                "archive" => {
                    let raw = field.text().await?;
                    let policy = raw.parse().map_err(ServerError::InvalidRequest)?;
                    form.archive = Some(policy);
                }
                "distinct" => {
                    let raw = field.text().await?;
                    form.distinct.extend(
                        raw.split(',')
                            .map(str::trim)
                            .filter(|f| !f.is_empty())
                            .map(str::to_string),
                    );
                }
                other => debug!("Ignoring form field '{}'", other),
            }
        }

        Ok(form)
    }

    pub fn take_spreadsheet(&mut self) -> Result<Upload, ServerError> {
        self.spreadsheet
            .take()
            .ok_or_else(|| ServerError::InvalidRequest("Missing 'spreadsheet' file".to_string()))
    }

    pub fn take_template(&mut self) -> Result<Upload, ServerError> {
        self.template
            .take()
            .ok_or_else(|| ServerError::InvalidRequest("Missing 'template' file".to_string()))
    }

    /// The JSON query with the `text` field taking precedence
    pub fn query(&self) -> Query {
        let mut query = self.query.clone().unwrap_or_default();
        if let Some(text) = &self.text {
            query.text = Some(text.clone());
        }
        query
    }

    /// Server configuration with this request's overrides applied
    pub fn config(&self, base: &BatchConfig) -> BatchConfig {
        let mut config = base.clone();
        if let Some(sheet) = &self.sheet {
            config.sheet_name = Some(sheet.clone());
        }
        if let Some(name_field) = &self.name_field {
            config.name_field = Some(name_field.clone());
        }
        if let Some(fail_fast) = self.fail_fast {
            config.fail_fast = fail_fast;
        }
        if let Some(archive) = self.archive {
            config.archive = archive;
        }
        if let Some(group_by) = &self.group_by {
            config.group_by = Some(group_by.clone());
        }
        config
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// `true`/`false` as sent by checkboxes and scripts
pub fn parse_flag(raw: &str) -> Result<bool, ServerError> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        other => Err(ServerError::InvalidRequest(format!(
            "Invalid boolean '{}' for fail_fast",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchdoc_core::FieldFilter;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("TRUE").unwrap());
        assert!(parse_flag(" on ").unwrap());
        assert!(!parse_flag("0").unwrap());
        assert!(parse_flag("maybe").is_err());
    }

    #[test]
    fn test_overrides_apply_to_copy() {
        let base = BatchConfig::default();
        let form = UploadForm {
            sheet: Some("5_Arc_List".to_string()),
            fail_fast: Some(true),
            archive: Some(ArchivePolicy::Always),
            group_by: Some("product".to_string()),
            ..UploadForm::default()
        };

        let config = form.config(&base);
        assert_eq!(config.sheet_name.as_deref(), Some("5_Arc_List"));
        assert!(config.fail_fast);
        assert_eq!(config.archive, ArchivePolicy::Always);
        assert_eq!(config.group_by.as_deref(), Some("product"));
        assert_eq!(base, BatchConfig::default());
    }

    #[test]
    fn test_text_field_overrides_query_text() {
        let form = UploadForm {
            text: Some("para".to_string()),
            query: Some(Query::text("ibu").with_filter(FieldFilter::new("Qty").equals("5"))),
            ..UploadForm::default()
        };
        let query = form.query();
        assert_eq!(query.text.as_deref(), Some("para"));
        assert_eq!(query.fields.len(), 1);
    }
}
