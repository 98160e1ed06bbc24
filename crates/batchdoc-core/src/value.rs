//! Tagged cell values and their display rules
//!
//! Spreadsheet cells are normalized into [`CellValue`] at load time and
//! paired with the string that template substitution will use, so the
//! formatting of a number or date never depends on where it came from.

use std::fmt::Write as _;

use chrono::{NaiveDateTime, Timelike};
use serde::Serialize;

/// Default date rendering (day.month.year, as used on batch registers)
pub const DEFAULT_DATE_FORMAT: &str = "%d.%m.%Y";

/// Cell contents treated as "no value"
pub const MISSING_MARKERS: &[&str] = &["", "NULL", "null", "NaN"];

/// A spreadsheet cell after type inference
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Date(NaiveDateTime),
}

impl CellValue {
    /// Build a text cell, mapping missing-value markers to `Empty`
    pub fn text(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        if MISSING_MARKERS.contains(&raw.trim()) {
            CellValue::Empty
        } else {
            CellValue::Text(raw)
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// Render with the given strftime date format
    pub fn display(&self, date_format: &str) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(s) => s.trim().to_string(),
            CellValue::Number(n) => format_number(*n),
            CellValue::Date(dt) => format_datetime(dt, date_format),
        }
    }
}

/// A loaded field: the typed value plus its display-ready string
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldValue {
    value: CellValue,
    display: String,
}

impl FieldValue {
    pub fn new(value: CellValue, date_format: &str) -> Self {
        let display = value.display(date_format);
        Self { value, display }
    }

    /// Replace the display string, keeping the typed value
    pub fn with_display(mut self, display: String) -> Self {
        self.display = display;
        self
    }

    pub fn value(&self) -> &CellValue {
        &self.value
    }

    pub fn display(&self) -> &str {
        &self.display
    }

    pub fn is_empty(&self) -> bool {
        self.display.is_empty()
    }
}

/// Integers print without decimals; fractions keep at most 10 places
pub fn format_number(n: f64) -> String {
    if !n.is_finite() {
        return n.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        return format!("{:.0}", n);
    }

    let fixed = format!("{:.10}", n);
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    match trimmed {
        "-0" | "" => "0".to_string(),
        other => other.to_string(),
    }
}

/// Dates print with `date_format`; a non-midnight time is appended
pub fn format_datetime(dt: &NaiveDateTime, date_format: &str) -> String {
    let mut out = String::new();
    if write!(out, "{}", dt.format(date_format)).is_err() {
        out.clear();
        out.push_str(&dt.format("%Y-%m-%d").to_string());
    }
    if dt.hour() != 0 || dt.minute() != 0 || dt.second() != 0 {
        out.push_str(&dt.format(" %H:%M:%S").to_string());
    }
    out
}
