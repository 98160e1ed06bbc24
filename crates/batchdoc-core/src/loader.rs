//! Spreadsheet loading
//!
//! Workbooks go through calamine, CSV through the csv reader; both produce
//! a grid of [`CellValue`]s that [`DataSet::from_grid`] turns into records.
//! The first row is the header, trailing blank rows are dropped.

use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;
use std::sync::Arc;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ParseError;
use crate::format::{format_percentage, normalize_date, parse_date_text, snake_case};
use crate::record::{ColumnAliases, Record, Schema};
use crate::upload::SpreadsheetFormat;
use crate::value::{format_number, CellValue, FieldValue, DEFAULT_DATE_FORMAT};

/// How header cells become field names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderStyle {
    /// Trimmed header text
    #[default]
    Verbatim,
    /// `Batch No.` becomes `batch_no`
    SnakeCase,
}

/// Display normalization applied to one field after loading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldFormat {
    Text,
    Date,
    Percent,
}

/// Options for one load
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOptions {
    /// Sheet to read; the first sheet is used when absent or not found
    pub sheet_name: Option<String>,
    pub header_style: HeaderStyle,
    pub date_format: String,
    pub column_aliases: ColumnAliases,
    pub field_formats: BTreeMap<String, FieldFormat>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            sheet_name: None,
            header_style: HeaderStyle::default(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            column_aliases: ColumnAliases::new(),
            field_formats: BTreeMap::new(),
        }
    }
}

/// Records of one load and the schema they share
#[derive(Debug, Clone, PartialEq)]
pub struct DataSet {
    pub schema: Arc<Schema>,
    pub records: Vec<Record>,
    /// Sheet the records were read from (workbooks only)
    pub sheet: Option<String>,
}

impl DataSet {
    /// Build records from a cell grid whose first row is the header
    pub fn from_grid(grid: Vec<Vec<CellValue>>, options: &LoadOptions) -> Result<Self, ParseError> {
        let mut rows = grid;
        while rows
            .last()
            .is_some_and(|row| row.iter().all(CellValue::is_empty))
        {
            rows.pop();
        }

        let mut rows = rows.into_iter();
        let header = rows.next().ok_or(ParseError::MissingHeader)?;
        if header.iter().all(CellValue::is_empty) {
            return Err(ParseError::MissingHeader);
        }
        let data: Vec<Vec<CellValue>> = rows.collect();

        let width = used_width(&header, &data);
        let fields = header_names(&header[..width.min(header.len())], width, options);
        let schema = Arc::new(Schema::new(fields).with_aliases(&options.column_aliases));

        let formats = resolve_field_formats(&schema, &options.field_formats);

        let records = data
            .into_iter()
            .map(|row| {
                let values = row
                    .into_iter()
                    .take(width)
                    .enumerate()
                    .map(|(idx, cell)| {
                        let field = FieldValue::new(cell, &options.date_format);
                        match formats.get(&idx) {
                            Some(FieldFormat::Date) => match field.value() {
                                CellValue::Text(_) => {
                                    let display =
                                        normalize_date(field.display(), &options.date_format);
                                    field.with_display(display)
                                }
                                _ => field,
                            },
                            Some(FieldFormat::Percent) => {
                                let display = format_percentage(field.display());
                                field.with_display(display)
                            }
                            _ => field,
                        }
                    })
                    .collect();
                Record::new(Arc::clone(&schema), values)
            })
            .collect();

        Ok(Self {
            schema,
            records,
            sheet: None,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

/// Load a spreadsheet into records
pub fn load(
    bytes: &[u8],
    format: SpreadsheetFormat,
    options: &LoadOptions,
) -> Result<DataSet, ParseError> {
    let (grid, sheet) = if format.is_workbook() {
        let (sheet, grid) = read_workbook(bytes, options.sheet_name.as_deref())?;
        (grid, Some(sheet))
    } else {
        (read_csv(bytes)?, None)
    };

    let mut dataset = DataSet::from_grid(grid, options)?;
    dataset.sheet = sheet;

    info!(
        "Loaded {} records with {} fields{}",
        dataset.len(),
        dataset.schema.len(),
        dataset
            .sheet
            .as_deref()
            .map(|s| format!(" from sheet '{}'", s))
            .unwrap_or_default()
    );
    Ok(dataset)
}

fn read_workbook(
    bytes: &[u8],
    wanted: Option<&str>,
) -> Result<(String, Vec<Vec<CellValue>>), ParseError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| ParseError::Unreadable(e.to_string()))?;

    let names = workbook.sheet_names();
    let first = names.first().cloned().ok_or(ParseError::NoSheets)?;
    let sheet = match wanted {
        Some(name) if names.iter().any(|n| n == name) => name.to_string(),
        Some(name) => {
            warn!("Sheet '{}' not found, using first sheet '{}'", name, first);
            first
        }
        None => first,
    };

    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| ParseError::Unreadable(format!("sheet '{}': {}", sheet, e)))?;
    debug!("Sheet '{}' spans {:?}", sheet, range.get_size());

    let grid = range
        .rows()
        .map(|row| row.iter().map(workbook_cell).collect())
        .collect();
    Ok((sheet, grid))
}

fn workbook_cell(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        Data::String(s) => CellValue::text(s.as_str()),
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Bool(true) => CellValue::Text("TRUE".to_string()),
        Data::Bool(false) => CellValue::Text("FALSE".to_string()),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(value) if !dt.is_duration() => CellValue::Date(value),
            _ => CellValue::Number(dt.as_f64()),
        },
        Data::DateTimeIso(s) => parse_iso_datetime(s)
            .map(CellValue::Date)
            .unwrap_or_else(|| CellValue::text(s.as_str())),
        Data::DurationIso(s) => CellValue::text(s.as_str()),
        Data::Error(e) => CellValue::Text(e.to_string()),
    }
}

fn parse_iso_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn read_csv(bytes: &[u8]) -> Result<Vec<Vec<CellValue>>, ParseError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut rows: Vec<Vec<String>> = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| ParseError::Unreadable(e.to_string()))?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    let Some((header, body)) = rows.split_first() else {
        return Err(ParseError::MissingHeader);
    };

    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    let kinds: Vec<ColumnKind> = (0..width)
        .map(|col| infer_column(body.iter().filter_map(|row| row.get(col).map(String::as_str))))
        .collect();

    let mut grid = Vec::with_capacity(rows.len());
    grid.push(header.iter().map(|h| CellValue::text(h.as_str())).collect());
    for row in body {
        grid.push(
            row.iter()
                .zip(kinds.iter())
                .map(|(cell, kind)| kind.convert(cell))
                .collect(),
        );
    }
    Ok(grid)
}

/// Column type inferred from CSV text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Text,
    Number,
    Date,
}

impl ColumnKind {
    fn convert(&self, raw: &str) -> CellValue {
        let cell = CellValue::text(raw);
        if cell.is_empty() {
            return cell;
        }
        let trimmed = raw.trim();
        let typed = match self {
            ColumnKind::Number => parse_number(trimmed).map(CellValue::Number),
            ColumnKind::Date => parse_date_text(trimmed)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(CellValue::Date),
            ColumnKind::Text => None,
        };
        typed.unwrap_or(cell)
    }
}

/// A column is numeric (or date) only when every non-empty cell is
fn infer_column<'a>(cells: impl Iterator<Item = &'a str>) -> ColumnKind {
    let mut numbers = true;
    let mut dates = true;
    let mut seen = false;

    for cell in cells {
        if CellValue::text(cell).is_empty() {
            continue;
        }
        seen = true;
        let trimmed = cell.trim();
        numbers &= parse_number(trimmed).is_some();
        dates &= parse_date_text(trimmed).is_some();
        if !numbers && !dates {
            break;
        }
    }

    match (seen, numbers, dates) {
        (true, true, _) => ColumnKind::Number,
        (true, false, true) => ColumnKind::Date,
        _ => ColumnKind::Text,
    }
}

/// Parse a plain decimal that prints back exactly as written
///
/// Codes with leading zeros (`007`), exponents (`1E5`) and padded decimals
/// (`200.00`) stay text so their display is never rewritten.
fn parse_number(text: &str) -> Option<f64> {
    let unsigned = text.strip_prefix('-').unwrap_or(text);
    if !unsigned.chars().all(|c| c.is_ascii_digit() || c == '.')
        || !unsigned.chars().any(|c| c.is_ascii_digit())
    {
        return None;
    }
    text.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite() && format_number(*n) == text)
}

/// Columns up to the last one with a header or any data
fn used_width(header: &[CellValue], data: &[Vec<CellValue>]) -> usize {
    let last_in = |row: &[CellValue]| row.iter().rposition(|c| !c.is_empty()).map(|i| i + 1);
    data.iter()
        .filter_map(|row| last_in(row.as_slice()))
        .chain(last_in(header))
        .max()
        .unwrap_or(0)
}

/// Unique, non-blank field names for the header row
fn header_names(header: &[CellValue], width: usize, options: &LoadOptions) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::with_capacity(width);

    for idx in 0..width {
        let raw = header
            .get(idx)
            .map(|c| c.display(&options.date_format))
            .unwrap_or_default();
        let styled = match options.header_style {
            HeaderStyle::Verbatim => raw.trim().to_string(),
            HeaderStyle::SnakeCase => snake_case(&raw),
        };
        let base = if styled.is_empty() {
            format!("column_{}", idx + 1)
        } else {
            styled
        };

        let mut name = base.clone();
        let mut suffix = 2;
        while !seen.insert(name.clone()) {
            name = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        names.push(name);
    }

    names
}

/// Field formats keyed by column, looked up by field name or alias
fn resolve_field_formats(
    schema: &Schema,
    formats: &BTreeMap<String, FieldFormat>,
) -> BTreeMap<usize, FieldFormat> {
    formats
        .iter()
        .filter_map(|(name, format)| match schema.index_of(name) {
            Some(idx) => Some((idx, *format)),
            None => {
                debug!("Field format for '{}' matches no column", name);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use pretty_assertions::assert_eq;

    fn csv(text: &str) -> DataSet {
        load(text.as_bytes(), SpreadsheetFormat::Csv, &LoadOptions::default()).unwrap()
    }

    #[test]
    fn test_scenario_header_and_row() {
        let data = csv("Batch,Lot,Qty\nB100,L5,200\n");
        assert_eq!(data.schema.fields(), &["Batch", "Lot", "Qty"]);
        assert_eq!(data.len(), 1);
        let record = &data.records[0];
        assert_eq!(record.display("Batch"), Some("B100"));
        assert_eq!(record.display("Lot"), Some("L5"));
        assert_eq!(record.display("Qty"), Some("200"));
        assert_eq!(record.get("Qty").unwrap().value(), &CellValue::Number(200.0));
    }

    #[test]
    fn test_trailing_blank_rows_are_skipped() {
        let data = csv("Batch,Qty\nB1,1\nB2,2\n,\n , \n");
        assert_eq!(data.len(), 2);
    }

    #[test]
    fn test_interior_blank_rows_are_kept() {
        let data = csv("Batch,Qty\nB1,1\n,\nB2,2\n");
        assert_eq!(data.len(), 3);
        assert!(data.records[1].is_blank());
    }

    #[test]
    fn test_header_only_has_no_records() {
        let data = csv("Batch,Lot\n");
        assert!(data.is_empty());
        assert_eq!(data.schema.len(), 2);
    }

    #[test]
    fn test_empty_source_has_no_header() {
        let err = load(b"", SpreadsheetFormat::Csv, &LoadOptions::default()).unwrap_err();
        assert_eq!(err, ParseError::MissingHeader);
        let err = load(b",,\n,,\n", SpreadsheetFormat::Csv, &LoadOptions::default()).unwrap_err();
        assert_eq!(err, ParseError::MissingHeader);
    }

    #[test]
    fn test_blank_and_duplicate_headers() {
        let data = csv("Batch,,Batch,Batch\nB1,x,y,z\n");
        assert_eq!(data.schema.fields(), &["Batch", "column_2", "Batch_2", "Batch_3"]);
    }

    #[test]
    fn test_snake_case_headers() {
        let options = LoadOptions {
            header_style: HeaderStyle::SnakeCase,
            ..LoadOptions::default()
        };
        let data = load(
            b"Batch No.,Mfg Date\nB1,2025-01-02\n",
            SpreadsheetFormat::Csv,
            &options,
        )
        .unwrap();
        assert_eq!(data.schema.fields(), &["batch_no", "mfg_date"]);
    }

    #[test]
    fn test_csv_column_inference() {
        let data = csv("Code,Qty,Made,Note\n007,10,2025-09-07,a\n012,2.5,07.09.2025,3\n");
        let first = &data.records[0];
        assert_eq!(first.get("Code").unwrap().value(), &CellValue::Text("007".into()));
        assert_eq!(first.get("Qty").unwrap().value(), &CellValue::Number(10.0));
        assert!(matches!(first.get("Made").unwrap().value(), CellValue::Date(_)));
        assert_eq!(first.display("Made"), Some("07.09.2025"));
        assert_eq!(data.records[1].display("Made"), Some("07.09.2025"));
        assert_eq!(
            data.records[1].get("Note").unwrap().value(),
            &CellValue::Text("3".into())
        );
    }

    #[test]
    fn test_numbers_must_print_back_unchanged() {
        let data = csv("Lot,Qty,Count\n1E5,200.00,3\n2E3,12.50,-4.25\n");
        let first = &data.records[0];
        assert_eq!(first.display("Lot"), Some("1E5"));
        assert_eq!(first.get("Lot").unwrap().value(), &CellValue::Text("1E5".into()));
        assert_eq!(first.display("Qty"), Some("200.00"));
        assert_eq!(data.records[1].display("Qty"), Some("12.50"));
        assert_eq!(first.get("Count").unwrap().value(), &CellValue::Number(3.0));
        assert_eq!(data.records[1].display("Count"), Some("-4.25"));
    }

    #[test]
    fn test_date_fields_keep_typed_value_under_custom_format() {
        let mut options = LoadOptions {
            date_format: "%m/%d/%Y".to_string(),
            ..LoadOptions::default()
        };
        options.field_formats.insert("Mfg".into(), FieldFormat::Date);

        let data = load(
            b"Batch,Mfg\nB1,2025-09-07\nB2,2025-12-31\n",
            SpreadsheetFormat::Csv,
            &options,
        )
        .unwrap();
        assert_eq!(data.records[0].display("Mfg"), Some("09/07/2025"));
        assert_eq!(data.records[1].display("Mfg"), Some("12/31/2025"));
    }

    #[test]
    fn test_date_field_keeps_time_component() {
        let mut options = LoadOptions::default();
        options.field_formats.insert("Sent".into(), FieldFormat::Date);
        let grid = vec![
            vec![CellValue::text("Batch"), CellValue::text("Sent")],
            vec![
                CellValue::text("B1"),
                CellValue::Date(
                    chrono::NaiveDate::from_ymd_opt(2025, 9, 7)
                        .unwrap()
                        .and_hms_opt(14, 30, 0)
                        .unwrap(),
                ),
            ],
        ];
        let data = DataSet::from_grid(grid, &options).unwrap();
        assert_eq!(data.records[0].display("Sent"), Some("07.09.2025 14:30:00"));
    }

    #[test]
    fn test_missing_markers_load_empty() {
        let data = csv("Batch,Remarks\nB1,NULL\nB2,NaN\n");
        assert_eq!(data.records[0].display("Remarks"), Some(""));
        assert!(data.records[1].get("Remarks").unwrap().value().is_empty());
    }

    #[test]
    fn test_ragged_rows_are_padded() {
        let data = csv("Batch,Lot,Qty\nB1\nB2,L2,5,extra\n");
        assert_eq!(data.schema.len(), 4);
        assert_eq!(data.records[0].display("Qty"), Some(""));
        assert_eq!(data.records[1].display("column_4"), Some("extra"));
    }

    #[test]
    fn test_bom_is_ignored() {
        let data = csv("\u{feff}Batch\nB1\n");
        assert_eq!(data.schema.fields(), &["Batch"]);
    }

    #[test]
    fn test_field_formats_and_aliases() {
        let mut options = LoadOptions::default();
        options
            .column_aliases
            .insert("yield".into(), vec!["batch_yield".into()]);
        options.field_formats.insert("yield".into(), FieldFormat::Percent);
        options.field_formats.insert("Sent".into(), FieldFormat::Date);

        let data = load(
            b"Batch,Batch Yield %,Sent\nB1,98.5,pending\nB2,#N/A,2025/01/02\n",
            SpreadsheetFormat::Csv,
            &options,
        )
        .unwrap();

        assert_eq!(data.records[0].display("yield"), Some("98.50%"));
        assert_eq!(data.records[0].display("Sent"), Some("pending"));
        assert_eq!(data.records[1].display("Batch Yield %"), Some("#N/A"));
        assert_eq!(data.records[1].display("Sent"), Some("2025/01/02"));
    }

    #[test]
    fn test_xlsx_scenario() {
        let bytes = fixtures::xlsx(
            "5_Arc_List",
            &[&["Batch", "Lot", "Qty"], &["B100", "L5", "200"]],
        );
        let data = load(&bytes, SpreadsheetFormat::Xlsx, &LoadOptions::default()).unwrap();
        assert_eq!(data.sheet.as_deref(), Some("5_Arc_List"));
        assert_eq!(data.schema.fields(), &["Batch", "Lot", "Qty"]);
        assert_eq!(data.len(), 1);
        assert_eq!(data.records[0].display("Qty"), Some("200"));
    }

    #[test]
    fn test_xlsx_missing_sheet_falls_back_to_first() {
        let bytes = fixtures::xlsx("Data", &[&["Batch"], &["B1"], &["B2"]]);
        let options = LoadOptions {
            sheet_name: Some("5_Arc_List".into()),
            ..LoadOptions::default()
        };
        let data = load(&bytes, SpreadsheetFormat::Xlsx, &options).unwrap();
        assert_eq!(data.sheet.as_deref(), Some("Data"));
        assert_eq!(data.len(), 2);
    }

    #[test]
    fn test_corrupt_workbook_is_unreadable() {
        let err = load(b"PK\x03\x04garbage", SpreadsheetFormat::Xlsx, &LoadOptions::default())
            .unwrap_err();
        assert!(matches!(err, ParseError::Unreadable(_)));
    }
}
