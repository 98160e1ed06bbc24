//! Display normalization for header names, dates, percentages and file names

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

use crate::value::format_datetime;

lazy_static! {
    static ref NON_WORD: Regex = Regex::new(r"[^\w\s]").expect("valid pattern");
    static ref WHITESPACE: Regex = Regex::new(r"\s+").expect("valid pattern");
    static ref UNDERSCORES: Regex = Regex::new(r"_+").expect("valid pattern");
    static ref UNSAFE_FILE_CHARS: Regex = Regex::new(r"[^\w\s-]").expect("valid pattern");
}

/// Date layouts accepted in text cells, tried in order
pub const DATE_INPUT_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y", "%m/%d/%Y", "%d.%m.%Y", "%Y.%m.%d",
];

/// Spreadsheet "not available" markers, left untouched by normalization
const NOT_AVAILABLE: &[&str] = &["#N/A", "#NA", "N/A", "NA"];

/// Longest file stem produced by [`sanitize_file_stem`]
const MAX_STEM_CHARS: usize = 100;

/// Normalize a header to `snake_case`: punctuation dropped, lowercase,
/// whitespace to `_`, repeated `_` collapsed
pub fn snake_case(name: &str) -> String {
    let stripped = NON_WORD.replace_all(name, "");
    let lowered = stripped.trim().to_lowercase();
    let joined = WHITESPACE.replace_all(&lowered, "_");
    UNDERSCORES.replace_all(&joined, "_").into_owned()
}

/// Whether a cell holds one of the "not available" markers
pub fn is_not_available(text: &str) -> bool {
    let upper = text.trim().to_uppercase();
    NOT_AVAILABLE.contains(&upper.as_str())
}

/// Parse the date part of a text cell (anything after the first space is ignored)
pub fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let head = text.split_whitespace().next()?;
    DATE_INPUT_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(head, fmt).ok())
}

/// Re-print a date-like display string with `date_format`
///
/// Unparseable text is returned trimmed but otherwise unchanged.
pub fn normalize_date(text: &str, date_format: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if is_not_available(trimmed) {
        return trimmed.to_uppercase();
    }
    match parse_date_text(trimmed).and_then(|d| d.and_hms_opt(0, 0, 0)) {
        Some(dt) => format_datetime(&dt, date_format),
        None => trimmed.to_string(),
    }
}

/// Print a percentage with two decimals (`98.5` and `98.5 %` become `98.50%`)
pub fn format_percentage(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if is_not_available(trimmed) {
        return trimmed.to_uppercase();
    }
    let digits: String = trimmed
        .chars()
        .filter(|c| *c != '%' && !c.is_whitespace())
        .collect();
    match digits.parse::<f64>() {
        Ok(n) if n.is_finite() => format!("{:.2}%", n),
        _ => trimmed.to_string(),
    }
}

/// Reduce a record key to something safe inside a file or zip entry name
pub fn sanitize_file_stem(key: &str) -> String {
    let cleaned = UNSAFE_FILE_CHARS.replace_all(key, "");
    let collapsed = WHITESPACE.replace_all(cleaned.trim(), " ");
    collapsed.chars().take(MAX_STEM_CHARS).collect::<String>().trim().to_string()
}
