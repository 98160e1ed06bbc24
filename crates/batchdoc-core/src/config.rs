//! JSON configuration for batch runs
//!
//! Every key is optional and missing keys take their defaults, so `{}` is a
//! valid configuration.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::archive::ArchivePolicy;
use crate::generator::GenerateOptions;
use crate::loader::{FieldFormat, HeaderStyle, LoadOptions};
use crate::record::ColumnAliases;
use crate::value::DEFAULT_DATE_FORMAT;

/// Configuration could not be loaded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {message}")]
    Io { path: String, message: String },

    #[error("Invalid config JSON: {0}")]
    Json(String),

    #[error("Invalid date format '{0}'")]
    DateFormat(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Settings shared by every request of a server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Sheet to read from workbooks (first sheet when absent or not found)
    pub sheet_name: Option<String>,
    pub header_style: HeaderStyle,
    /// strftime pattern for date display
    pub date_format: String,
    /// Canonical field name to candidate header names
    #[serde(alias = "column_mappings")]
    pub column_aliases: ColumnAliases,
    pub field_formats: BTreeMap<String, FieldFormat>,
    /// Field naming each generated document
    pub name_field: Option<String>,
    pub fail_fast: bool,
    pub archive: ArchivePolicy,
    /// Field grouping records into one document each
    pub group_by: Option<String>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            sheet_name: None,
            header_style: HeaderStyle::default(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            column_aliases: ColumnAliases::new(),
            field_formats: BTreeMap::new(),
            name_field: None,
            fail_fast: false,
            archive: ArchivePolicy::default(),
            group_by: None,
        }
    }
}

impl BatchConfig {
    /// Read and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json(&text)
    }

    /// Parse and validate config JSON
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| ConfigError::Json(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Json(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let format = self.date_format.trim();
        if format.is_empty() || StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
            return Err(ConfigError::DateFormat(self.date_format.clone()));
        }
        if let Some(name) = self.column_aliases.keys().find(|k| k.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "column alias name '{}' is blank",
                name
            )));
        }
        if let Some(name) = self.field_formats.keys().find(|k| k.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "field format key '{}' is blank",
                name
            )));
        }
        if self.group_by.as_deref().is_some_and(|f| f.trim().is_empty()) {
            return Err(ConfigError::Invalid("group_by is blank".to_string()));
        }
        Ok(())
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            sheet_name: self.sheet_name.clone(),
            header_style: self.header_style,
            date_format: self.date_format.clone(),
            column_aliases: self.column_aliases.clone(),
            field_formats: self.field_formats.clone(),
        }
    }

    pub fn generate_options(&self) -> GenerateOptions {
        GenerateOptions {
            name_field: self.name_field.clone(),
            fail_fast: self.fail_fast,
            group_by: self.group_by.clone(),
        }
    }
}
