//! Batch generation: one rendered document per selected record or group
//!
//! Records are rendered sequentially in batch order. A record whose
//! placeholders cannot all be filled is reported as a [`RecordFailure`] and
//! the batch moves on, unless the run is fail-fast, in which case the whole
//! batch is aborted and no documents are returned.
//!
//! With a group field set, records sharing its value become one document
//! whose repeated table rows list them in batch-number order.

use std::collections::{HashMap, HashSet};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{GenerateError, RenderError};
use crate::format::sanitize_file_stem;
use crate::record::Record;
use crate::template::{render, render_group, DocumentTemplate};

lazy_static! {
    static ref DIGITS: Regex = Regex::new(r"\d+").expect("valid pattern");
}

/// Lifecycle of one batch run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Idle,
    Running,
    Completed,
    CompletedWithErrors,
    /// The template could not be loaded, nothing was generated
    Failed,
}

impl BatchState {
    /// Whether `next` may follow `self`
    pub fn can_transition_to(self, next: BatchState) -> bool {
        matches!(
            (self, next),
            (BatchState::Idle, BatchState::Running)
                | (BatchState::Idle, BatchState::Failed)
                | (BatchState::Running, BatchState::Completed)
                | (BatchState::Running, BatchState::CompletedWithErrors)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchState::Completed | BatchState::CompletedWithErrors | BatchState::Failed
        )
    }
}

/// Tracks the state of a run and logs every transition
#[derive(Debug)]
pub struct BatchRun {
    state: BatchState,
}

impl Default for BatchRun {
    fn default() -> Self {
        Self {
            state: BatchState::Idle,
        }
    }
}

impl BatchRun {
    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Move to `next`; transitions the lifecycle does not allow are ignored
    pub fn advance(&mut self, next: BatchState) -> BatchState {
        if self.state.can_transition_to(next) {
            debug!("Batch state {:?} -> {:?}", self.state, next);
            self.state = next;
        } else {
            warn!("Ignoring batch state change {:?} -> {:?}", self.state, next);
        }
        self.state
    }
}

/// Per-run generation settings
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GenerateOptions {
    /// Field whose value names each document; the first column when unset
    pub name_field: Option<String>,
    /// Abort the batch at the first record that fails
    pub fail_fast: bool,
    /// One document per distinct value of this field instead of per record
    pub group_by: Option<String>,
}

/// A document rendered for one record or group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedDocument {
    /// Position of the record (first record of a group) within the batch
    pub index: usize,
    /// Identifying value of the record, or the group value
    pub key: String,
    /// Records the document was rendered from
    pub records: usize,
    /// Unique file name within the batch
    pub file_name: String,
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
}

/// A record that produced no document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub index: usize,
    pub key: String,
    pub error: String,
    pub missing_fields: Vec<String>,
}

/// Outcome of a batch run: documents and failures, each in batch order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub state: BatchState,
    pub documents: Vec<GeneratedDocument>,
    pub failures: Vec<RecordFailure>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.documents.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn total(&self) -> usize {
        self.succeeded() + self.failed()
    }
}

/// Records that end up in one document
#[derive(Debug)]
struct Unit<'r> {
    index: usize,
    key: String,
    members: Members<'r>,
}

#[derive(Debug)]
enum Members<'r> {
    One(&'r Record),
    Group(Vec<&'r Record>),
}

impl Members<'_> {
    fn len(&self) -> usize {
        match self {
            Members::One(_) => 1,
            Members::Group(records) => records.len(),
        }
    }
}

/// Render `template` once per record of `batch`, or once per group when
/// `options.group_by` is set
///
/// Grouped runs check up front that the template has a repeating table row
/// and that the group field exists.
pub fn generate(
    template: &DocumentTemplate,
    batch: &[Record],
    options: &GenerateOptions,
) -> Result<BatchReport, GenerateError> {
    let mut run = BatchRun::default();
    run.advance(BatchState::Running);

    let name_field = options.name_field.as_deref();
    let units = match options.group_by.as_deref() {
        Some(field) => {
            if !template.has_repeating_rows() {
                return Err(GenerateError::NoRepeatingRows);
            }
            if batch.first().is_some_and(|record| record.get(field).is_none()) {
                return Err(GenerateError::UnknownGroupField(field.to_string()));
            }
            let groups = group_records(batch, field, name_field);
            info!(
                "Generating {} documents from {} records grouped by '{}'",
                groups.len(),
                batch.len(),
                field
            );
            groups
        }
        None => {
            info!("Generating {} documents", batch.len());
            batch
                .iter()
                .enumerate()
                .map(|(index, record)| Unit {
                    index,
                    key: record_key(record, index, name_field),
                    members: Members::One(record),
                })
                .collect()
        }
    };

    let format = template.format();
    let mut names = FileNames::default();
    let mut documents = Vec::with_capacity(units.len());
    let mut failures = Vec::new();

    for Unit {
        index,
        key,
        members,
    } in units
    {
        let rendered = match &members {
            Members::One(record) => render(template, record),
            Members::Group(records) => render_group(template, records),
        };

        match rendered {
            Ok(bytes) => {
                let file_name = names.claim(&key, index, format.extension());
                debug!("Rendered record {} as '{}'", index, file_name);
                documents.push(GeneratedDocument {
                    index,
                    key,
                    records: members.len(),
                    file_name,
                    mime_type: format.mime_type(),
                    bytes,
                });
            }
            Err(RenderError::MissingField(err)) if options.fail_fast => {
                warn!("Aborting batch at record {} ('{}'): {}", index, key, err);
                return Err(GenerateError::Aborted {
                    index,
                    key,
                    source: err,
                });
            }
            Err(RenderError::MissingField(err)) => {
                warn!("Record {} ('{}') skipped: {}", index, key, err);
                failures.push(RecordFailure {
                    index,
                    key,
                    error: err.to_string(),
                    missing_fields: err.fields,
                });
            }
            Err(RenderError::Output(message)) => return Err(GenerateError::Output(message)),
        }
    }

    let state = if failures.is_empty() {
        BatchState::Completed
    } else {
        BatchState::CompletedWithErrors
    };
    run.advance(state);

    info!(
        "Batch finished: {} generated, {} failed",
        documents.len(),
        failures.len()
    );

    Ok(BatchReport {
        state: run.state(),
        documents,
        failures,
    })
}

/// Records sharing a `field` value, groups in first-seen order
///
/// Within a group records are ordered by the number in their key
/// (`B10` after `B9`), keeping batch order on ties. A blank group value
/// forms its own group named `group_<n>`.
fn group_records<'r>(batch: &'r [Record], field: &str, name_field: Option<&str>) -> Vec<Unit<'r>> {
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(usize, &str, Vec<(u64, &Record)>)> = Vec::new();

    for (index, record) in batch.iter().enumerate() {
        let value = record.display(field).map(str::trim).unwrap_or_default();
        let slot = *positions.entry(value).or_insert_with(|| {
            groups.push((index, value, Vec::new()));
            groups.len() - 1
        });
        let number = batch_number(&record_key(record, index, name_field));
        groups[slot].2.push((number, record));
    }

    groups
        .into_iter()
        .enumerate()
        .map(|(ordinal, (index, value, mut members))| {
            members.sort_by_key(|(number, _)| *number);
            let key = if value.is_empty() {
                format!("group_{}", ordinal + 1)
            } else {
                value.to_string()
            };
            Unit {
                index,
                key,
                members: Members::Group(members.into_iter().map(|(_, record)| record).collect()),
            }
        })
        .collect()
}

/// First run of digits in `key`, 0 when there is none
pub fn batch_number(key: &str) -> u64 {
    DIGITS
        .find(key)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Display value of the naming field, or `record_<n>` (1-based) when blank
pub fn record_key(record: &Record, index: usize, name_field: Option<&str>) -> String {
    let value = match name_field {
        Some(field) => record.display(field),
        None => record.fields().next().map(|(_, value)| value.display()),
    };
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => fallback_name(index),
    }
}

fn fallback_name(index: usize) -> String {
    format!("record_{}", index + 1)
}

/// File names handed out within one batch
#[derive(Debug, Default)]
struct FileNames {
    used: HashSet<String>,
}

impl FileNames {
    /// Sanitized key plus extension, suffixed `_2`, `_3`, ... on collision
    fn claim(&mut self, key: &str, index: usize, extension: &str) -> String {
        let stem = match sanitize_file_stem(key) {
            s if s.is_empty() => fallback_name(index),
            s => s,
        };

        let mut candidate = format!("{}.{}", stem, extension);
        let mut suffix = 2;
        while !self.used.insert(candidate.to_lowercase()) {
            candidate = format!("{}_{}.{}", stem, suffix, extension);
            suffix += 1;
        }
        candidate
    }
}
