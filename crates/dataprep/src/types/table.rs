//! In-memory column-oriented table

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::error::{Error, Result};

/// Cell tokens read as missing values
const MISSING_TOKENS: &[&str] = &["", "na", "n/a", "nan", "null", "none", "nat"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y"];

/// Semantic type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Numeric,
    Categorical,
    Datetime,
}

impl std::fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnKind::Numeric => write!(f, "numeric"),
            ColumnKind::Categorical => write!(f, "categorical"),
            ColumnKind::Datetime => write!(f, "datetime"),
        }
    }
}

/// Column values; `None` is a missing cell
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Numeric(Vec<Option<f64>>),
    Categorical(Vec<Option<String>>),
    Datetime(Vec<Option<NaiveDateTime>>),
}

impl ColumnData {
    /// Infer the column kind from raw cells: numeric if every present cell
    /// parses as a number, datetime if every present cell parses as a date,
    /// categorical otherwise. A column with no present cells is numeric.
    pub fn infer(raw: Vec<Option<String>>) -> Self {
        let cells: Vec<Option<String>> = raw
            .into_iter()
            .map(|c| c.and_then(|s| normalize_cell(&s)))
            .collect();

        let numbers: Option<Vec<Option<f64>>> = cells
            .iter()
            .map(|c| match c {
                None => Some(None),
                Some(s) => parse_number(s).map(Some),
            })
            .collect();
        if let Some(values) = numbers {
            return ColumnData::Numeric(values);
        }

        let dates: Option<Vec<Option<NaiveDateTime>>> = cells
            .iter()
            .map(|c| match c {
                None => Some(None),
                Some(s) => parse_datetime(s).map(Some),
            })
            .collect();
        if let Some(values) = dates {
            return ColumnData::Datetime(values);
        }

        ColumnData::Categorical(cells)
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            ColumnData::Numeric(_) => ColumnKind::Numeric,
            ColumnData::Categorical(_) => ColumnKind::Categorical,
            ColumnData::Datetime(_) => ColumnKind::Datetime,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Numeric(v) => v.len(),
            ColumnData::Categorical(v) => v.len(),
            ColumnData::Datetime(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_missing(&self, row: usize) -> bool {
        match self {
            ColumnData::Numeric(v) => !matches!(v.get(row), Some(Some(x)) if !x.is_nan()),
            ColumnData::Categorical(v) => !matches!(v.get(row), Some(Some(_))),
            ColumnData::Datetime(v) => !matches!(v.get(row), Some(Some(_))),
        }
    }

    pub fn missing_count(&self) -> usize {
        (0..self.len()).filter(|&i| self.is_missing(i)).count()
    }

    /// Distinct present values
    pub fn unique_count(&self) -> usize {
        let mut seen = HashSet::new();
        for i in 0..self.len() {
            if let Some(cell) = self.cell_string(i) {
                seen.insert(cell);
            }
        }
        seen.len()
    }

    /// Textual cell value, `None` when missing
    pub fn cell_string(&self, row: usize) -> Option<String> {
        if self.is_missing(row) {
            return None;
        }
        match self {
            ColumnData::Numeric(v) => v[row].map(format_number),
            ColumnData::Categorical(v) => v[row].clone(),
            ColumnData::Datetime(v) => v[row].map(format_datetime),
        }
    }

    /// JSON cell value; missing and non-finite numbers become `null`
    pub fn cell_json(&self, row: usize) -> Value {
        if self.is_missing(row) {
            return Value::Null;
        }
        match self {
            ColumnData::Numeric(v) => v[row]
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ColumnData::Categorical(v) => v[row].clone().map(Value::String).unwrap_or(Value::Null),
            ColumnData::Datetime(v) => v[row]
                .map(|d| Value::String(format_datetime(d)))
                .unwrap_or(Value::Null),
        }
    }

    /// Keep rows where `keep[i]` is true
    fn retain(&mut self, keep: &[bool]) {
        fn filter<T: Clone>(values: &[T], keep: &[bool]) -> Vec<T> {
            values
                .iter()
                .zip(keep)
                .filter(|(_, k)| **k)
                .map(|(v, _)| v.clone())
                .collect()
        }
        *self = match self {
            ColumnData::Numeric(v) => ColumnData::Numeric(filter(v, keep)),
            ColumnData::Categorical(v) => ColumnData::Categorical(filter(v, keep)),
            ColumnData::Datetime(v) => ColumnData::Datetime(filter(v, keep)),
        };
    }

    fn truncate(&mut self, rows: usize) {
        match self {
            ColumnData::Numeric(v) => v.truncate(rows),
            ColumnData::Categorical(v) => v.truncate(rows),
            ColumnData::Datetime(v) => v.truncate(rows),
        }
    }
}

/// A named column
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn numeric(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self::new(name, ColumnData::Numeric(values))
    }

    pub fn categorical(name: impl Into<String>, values: Vec<Option<String>>) -> Self {
        Self::new(name, ColumnData::Categorical(values))
    }

    pub fn kind(&self) -> ColumnKind {
        self.data.kind()
    }

    /// Numeric values, `None` for non-numeric columns
    pub fn as_numeric(&self) -> Option<&[Option<f64>]> {
        match &self.data {
            ColumnData::Numeric(v) => Some(v),
            _ => None,
        }
    }
}

/// Column-oriented table with a fixed row count
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<Column>,
    rows: usize,
}

impl Table {
    /// Build a table, checking column lengths and name uniqueness
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let rows = columns.first().map(|c| c.data.len()).unwrap_or(0);
        let mut names = HashSet::new();
        for column in &columns {
            if column.data.len() != rows {
                return Err(Error::validation(format!(
                    "Column '{}' has {} rows, expected {}",
                    column.name,
                    column.data.len(),
                    rows
                )));
            }
            if !names.insert(column.name.as_str()) {
                return Err(Error::validation(format!(
                    "Duplicate column name '{}'",
                    column.name
                )));
            }
        }
        Ok(Self { columns, rows })
    }

    /// Build a table from headers and raw text rows, inferring column kinds
    pub fn from_rows(headers: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Result<Self> {
        let mut raw: Vec<Vec<Option<String>>> = vec![Vec::with_capacity(rows.len()); headers.len()];
        for (index, row) in rows.into_iter().enumerate() {
            if row.len() > headers.len() {
                return Err(Error::validation(format!(
                    "Row {} has {} cells but there are {} columns",
                    index + 1,
                    row.len(),
                    headers.len()
                )));
            }
            let mut cells = row.into_iter();
            for column in raw.iter_mut() {
                column.push(cells.next().flatten());
            }
        }

        let columns = headers
            .into_iter()
            .zip(raw)
            .map(|(name, cells)| Column::new(name, ColumnData::infer(cells)))
            .collect();
        Self::new(columns)
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Names of all columns of one kind, in table order
    pub fn names_of_kind(&self, kind: ColumnKind) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.kind() == kind)
            .map(|c| c.name.clone())
            .collect()
    }

    /// Replace a same-named column in place, or append a new one
    pub fn set_column(&mut self, column: Column) -> Result<()> {
        if !self.columns.is_empty() && column.data.len() != self.rows {
            return Err(Error::validation(format!(
                "Column '{}' has {} rows, expected {}",
                column.name,
                column.data.len(),
                self.rows
            )));
        }
        if self.columns.is_empty() {
            self.rows = column.data.len();
        }
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
        Ok(())
    }

    /// Remove a column by name
    pub fn remove_column(&mut self, name: &str) -> Option<Column> {
        let index = self.columns.iter().position(|c| c.name == name)?;
        Some(self.columns.remove(index))
    }

    /// Keep rows where `keep[i]` is true
    pub fn retain_rows(&mut self, keep: &[bool]) -> Result<()> {
        if keep.len() != self.rows {
            return Err(Error::internal(format!(
                "Row mask has {} entries for {} rows",
                keep.len(),
                self.rows
            )));
        }
        for column in &mut self.columns {
            column.data.retain(keep);
        }
        self.rows = keep.iter().filter(|&&k| k).count();
        Ok(())
    }

    /// First `rows` rows
    pub fn head(&self, rows: usize) -> Table {
        let mut table = self.clone();
        let rows = rows.min(self.rows);
        for column in &mut table.columns {
            column.data.truncate(rows);
        }
        table.rows = rows;
        table
    }

    /// Whether every cell of a row is missing
    pub fn row_is_empty(&self, row: usize) -> bool {
        self.columns.iter().all(|c| c.data.is_missing(row))
    }

    /// Rows as JSON objects keyed by column name
    pub fn to_records(&self, limit: usize) -> Vec<Map<String, Value>> {
        (0..self.rows.min(limit))
            .map(|row| {
                self.columns
                    .iter()
                    .map(|c| (c.name.clone(), c.data.cell_json(row)))
                    .collect()
            })
            .collect()
    }

    /// Serialize as CSV with a header row. Output depends only on the
    /// table's contents.
    pub fn to_csv(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(self.columns.iter().map(|c| c.name.as_str()))?;
        for row in 0..self.rows {
            writer.write_record(
                self.columns
                    .iter()
                    .map(|c| c.data.cell_string(row).unwrap_or_default()),
            )?;
        }
        writer
            .into_inner()
            .map_err(|e| Error::internal(format!("Failed to flush CSV: {}", e)))
    }

    /// Read a table written by [`Table::to_csv`]
    pub fn from_csv(data: &[u8]) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(data);
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(|cell| Some(cell.to_string())).collect());
        }
        Self::from_rows(headers, rows)
    }
}

fn normalize_cell(cell: &str) -> Option<String> {
    let trimmed = cell.trim();
    if MISSING_TOKENS.contains(&trimmed.to_ascii_lowercase().as_str()) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_number(cell: &str) -> Option<f64> {
    let value: f64 = cell.parse().ok()?;
    value.is_finite().then_some(value)
}

/// Parse the date and datetime formats accepted in uploads
pub fn parse_datetime(cell: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(cell) {
        return Some(dt.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(cell, format) {
            return Some(dt);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(cell, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Shortest text that parses back to the same `f64`
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        // Normalizes -0.0
        return "0".to_string();
    }
    value.to_string()
}

pub fn format_datetime(value: NaiveDateTime) -> String {
    if value.nanosecond() != 0 {
        value.format("%Y-%m-%d %H:%M:%S%.f").to_string()
    } else if value.num_seconds_from_midnight() == 0 {
        value.format("%Y-%m-%d").to_string()
    } else {
        value.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Option<String> {
        Some(v.to_string())
    }

    #[test]
    fn test_kind_inference() {
        assert_eq!(
            ColumnData::infer(vec![s("1"), s(""), s("3.5")]),
            ColumnData::Numeric(vec![Some(1.0), None, Some(3.5)])
        );
        assert_eq!(
            ColumnData::infer(vec![s("2024-01-01"), s("NA")]).kind(),
            ColumnKind::Datetime
        );
        assert_eq!(
            ColumnData::infer(vec![s("red"), s("1")]).kind(),
            ColumnKind::Categorical
        );
        assert_eq!(ColumnData::infer(vec![None, s("nan")]).kind(), ColumnKind::Numeric);
    }

    #[test]
    fn test_from_rows_pads_short_rows() {
        let table = Table::from_rows(
            vec!["a".into(), "b".into()],
            vec![vec![s("1"), s("x")], vec![s("2")]],
        )
        .unwrap();

        assert_eq!(table.row_count(), 2);
        assert!(table.column("b").unwrap().data.is_missing(1));
        assert_eq!(table.names_of_kind(ColumnKind::Numeric), vec!["a".to_string()]);
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let result = Table::new(vec![
            Column::numeric("x", vec![Some(1.0)]),
            Column::numeric("x", vec![Some(2.0)]),
        ]);
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_csv_output() {
        let table = Table::new(vec![
            Column::numeric("x", vec![Some(1.0), None, Some(2.5)]),
            Column::categorical("c", vec![s("a,b"), s("z"), None]),
        ])
        .unwrap();

        let csv = String::from_utf8(table.to_csv().unwrap()).unwrap();
        assert_eq!(csv, "x,c\n1,\"a,b\"\n,z\n2.5,\n");

        let restored = Table::from_csv(csv.as_bytes()).unwrap();
        assert_eq!(restored, table);
    }

    #[test]
    fn test_csv_keeps_fractional_seconds() {
        let table = Table::new(vec![Column::new(
            "t",
            ColumnData::infer(vec![s("2024-01-01 10:00:00.250"), s("2024-01-01 10:00:00.750")]),
        )])
        .unwrap();
        assert_eq!(table.column("t").unwrap().kind(), ColumnKind::Datetime);

        let csv = String::from_utf8(table.to_csv().unwrap()).unwrap();
        assert_eq!(csv, "t\n2024-01-01 10:00:00.250\n2024-01-01 10:00:00.750\n");
        assert_eq!(Table::from_csv(csv.as_bytes()).unwrap(), table);
        assert_eq!(table.column("t").unwrap().data.unique_count(), 2);
    }

    #[test]
    fn test_retain_and_head() {
        let mut table = Table::new(vec![Column::numeric(
            "x",
            vec![Some(1.0), Some(2.0), Some(3.0)],
        )])
        .unwrap();

        table.retain_rows(&[true, false, true]).unwrap();
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.head(1).row_count(), 1);
        assert_eq!(
            table.column("x").unwrap().as_numeric().unwrap(),
            &[Some(1.0), Some(3.0)]
        );
    }

    #[test]
    fn test_records_use_null_for_missing() {
        let table = Table::new(vec![Column::numeric("x", vec![None, Some(f64::NAN)])]).unwrap();
        let records = table.to_records(10);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["x"], Value::Null);
        assert_eq!(records[1]["x"], Value::Null);
    }
}
