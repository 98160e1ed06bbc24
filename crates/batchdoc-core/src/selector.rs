//! Record selection by free text and per-field conditions

use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::format::parse_date_text;
use crate::record::Record;
use crate::value::{CellValue, FieldValue};

/// Selection criteria for one run
///
/// Accepts both `text`/`fields` and the `textFilter`/`fieldFilters` spelling.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Query {
    /// Case-insensitive substring matched against every field
    #[serde(alias = "textFilter", skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Conditions that must all hold
    #[serde(alias = "fieldFilters", skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldFilter>,
}

impl Query {
    pub fn text(needle: impl Into<String>) -> Self {
        Self {
            text: Some(needle.into()),
            fields: Vec::new(),
        }
    }

    pub fn with_filter(mut self, filter: FieldFilter) -> Self {
        self.fields.push(filter);
        self
    }

    /// A query with no effective criteria selects everything
    pub fn is_empty(&self) -> bool {
        self.text_needle().is_none() && self.fields.is_empty()
    }

    fn text_needle(&self) -> Option<String> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
    }
}

/// Conditions on one named field
///
/// Values may be given as JSON strings or numbers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    /// Case-insensitive exact match
    #[serde(
        default,
        deserialize_with = "optional_scalar",
        skip_serializing_if = "Option::is_none"
    )]
    pub equals: Option<String>,
    /// Case-insensitive membership
    #[serde(
        default,
        alias = "anyOf",
        deserialize_with = "scalar_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub any_of: Vec<String>,
    /// Inclusive lower bound
    #[serde(
        default,
        deserialize_with = "optional_scalar",
        skip_serializing_if = "Option::is_none"
    )]
    pub min: Option<String>,
    /// Inclusive upper bound
    #[serde(
        default,
        deserialize_with = "optional_scalar",
        skip_serializing_if = "Option::is_none"
    )]
    pub max: Option<String>,
}

impl FieldFilter {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ..Self::default()
        }
    }

    pub fn equals(mut self, value: impl Into<String>) -> Self {
        self.equals = Some(value.into());
        self
    }

    pub fn any_of<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.any_of = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn between(mut self, min: Option<&str>, max: Option<&str>) -> Self {
        self.min = min.map(str::to_string);
        self.max = max.map(str::to_string);
        self
    }

    fn matches(&self, record: &Record) -> bool {
        let Some(value) = record.get(&self.field) else {
            return false;
        };

        if let Some(expected) = &self.equals {
            if !is_same(value, expected) {
                return false;
            }
        }
        if !self.any_of.is_empty() && !self.any_of.iter().any(|option| is_same(value, option)) {
            return false;
        }
        if let Some(min) = &self.min {
            if !matches!(compare(value, min), Some(Ordering::Greater | Ordering::Equal)) {
                return false;
            }
        }
        if let Some(max) = &self.max {
            if !matches!(compare(value, max), Some(Ordering::Less | Ordering::Equal)) {
                return false;
            }
        }
        true
    }
}

/// Keep the records matching `query`, in their original order
pub fn select(records: Vec<Record>, query: &Query) -> Vec<Record> {
    if query.is_empty() {
        return records;
    }

    if let Some(first) = records.first() {
        for filter in &query.fields {
            if first.schema().index_of(&filter.field).is_none() {
                warn!("Filter on unknown field '{}' matches no records", filter.field);
            }
        }
    }

    let needle = query.text_needle();
    let total = records.len();
    let selected: Vec<Record> = records
        .into_iter()
        .filter(|record| {
            needle
                .as_deref()
                .map_or(true, |needle| contains_text(record, needle))
                && query.fields.iter().all(|filter| filter.matches(record))
        })
        .collect();

    debug!("Selected {} of {} records", selected.len(), total);
    selected
}

/// Sorted, de-duplicated, non-empty display values of one field
pub fn distinct_values(records: &[Record], field: &str) -> Vec<String> {
    records
        .iter()
        .filter_map(|record| record.display(field))
        .filter(|display| !display.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn contains_text(record: &Record, needle: &str) -> bool {
    record
        .fields()
        .any(|(_, value)| value.display().to_lowercase().contains(needle))
}

/// Exact match: by value for number and date cells, case-insensitive for text
fn is_same(value: &FieldValue, expected: &str) -> bool {
    let expected = expected.trim();
    match value.value() {
        CellValue::Number(n) => expected.parse::<f64>().is_ok_and(|b| *n == b),
        CellValue::Date(dt) => parse_date_text(expected).is_some_and(|d| dt.date() == d),
        _ => value.display().to_lowercase() == expected.to_lowercase(),
    }
}

/// Order a field against a bound: numerically when both are numbers, by
/// date when both are dates, otherwise as case-insensitive text
fn compare(value: &FieldValue, bound: &str) -> Option<Ordering> {
    let bound = bound.trim();

    if let (Some(a), Ok(b)) = (as_number(value), bound.parse::<f64>()) {
        return a.partial_cmp(&b);
    }
    if let (Some(a), Some(b)) = (as_date(value), parse_date_text(bound)) {
        return Some(a.cmp(&b));
    }
    Some(value.display().to_lowercase().cmp(&bound.to_lowercase()))
}

fn as_number(value: &FieldValue) -> Option<f64> {
    match value.value() {
        CellValue::Number(n) => Some(*n),
        CellValue::Date(_) => None,
        _ => value.display().trim().parse().ok(),
    }
}

fn as_date(value: &FieldValue) -> Option<NaiveDate> {
    match value.value() {
        CellValue::Date(dt) => Some(dt.date()),
        _ => parse_date_text(value.display()),
    }
}

fn optional_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    value.map(scalar_to_string::<D::Error>).transpose()
}

fn scalar_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Option::<Vec<serde_json::Value>>::deserialize(deserializer)?;
    values
        .unwrap_or_default()
        .into_iter()
        .map(scalar_to_string::<D::Error>)
        .collect()
}

fn scalar_to_string<E: serde::de::Error>(value: serde_json::Value) -> Result<String, E> {
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(if b { "TRUE" } else { "FALSE" }.to_string()),
        other => Err(E::custom(format!(
            "filter values must be strings or numbers, got {}",
            other
        ))),
    }
}


#[cfg(test)]
mod property_tests {
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;
    use crate::record::Schema;
    use crate::value::DEFAULT_DATE_FORMAT;

    fn build(rows: Vec<(String, String)>) -> Vec<Record> {
        let schema = Arc::new(Schema::new(vec!["Batch".to_string(), "Product".to_string()]));
        rows.into_iter()
            .map(|(batch, product)| {
                Record::new(
                    Arc::clone(&schema),
                    vec![
                        FieldValue::new(CellValue::text(batch), DEFAULT_DATE_FORMAT),
                        FieldValue::new(CellValue::text(product), DEFAULT_DATE_FORMAT),
                    ],
                )
            })
            .collect()
    }

    proptest! {
        /// Property: an empty query is the identity
        #[test]
        fn empty_query_is_identity(rows in prop::collection::vec(("[A-Z][0-9]{1,4}", "[a-z ]{0,12}"), 0..20)) {
            let records = build(rows);
            prop_assert_eq!(select(records.clone(), &Query::default()), records);
        }

        /// Property: text selection keeps order and only matching records
        #[test]
        fn text_selection_is_ordered_subset(
            rows in prop::collection::vec(("[A-Z][0-9]{1,4}", "[a-z]{1,8}"), 0..20),
            needle in "[a-z]{1,2}",
        ) {
            let records = build(rows);
            let selected = select(records.clone(), &Query::text(needle.clone()));

            let mut remaining = records.iter();
            for record in &selected {
                prop_assert!(remaining.any(|r| r == record), "selection must preserve order");
                prop_assert!(contains_text(record, &needle));
            }
            let expected = records.iter().filter(|r| contains_text(r, &needle)).count();
            prop_assert_eq!(selected.len(), expected);
        }
    }
}
