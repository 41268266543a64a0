//! Uploaded file parsing and validation

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Table;

/// Delimiters tried, in order, when none is given
const CANDIDATE_DELIMITERS: &[u8] = &[b',', b';', b'\t', b'|'];

/// Supported upload formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Csv,
    Excel,
}

impl FileFormat {
    /// Detect the format from a file name's extension
    pub fn from_filename(filename: &str) -> Result<Self> {
        let extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "csv" | "tsv" | "txt" => Ok(FileFormat::Csv),
            "xlsx" | "xlsm" | "xls" | "ods" => Ok(FileFormat::Excel),
            _ => Err(Error::validation(format!(
                "Unsupported file format '{}': upload CSV or Excel files",
                extension
            ))),
        }
    }
}

/// Options sent with an upload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    /// `utf-8` or `latin-1`
    pub encoding: String,
    /// CSV delimiter; sniffed when absent
    pub delimiter: Option<char>,
    /// Whether the first row holds column names
    pub has_header: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            encoding: "utf-8".to_string(),
            delimiter: None,
            has_header: true,
        }
    }
}

/// Turns uploaded bytes into a validated [`Table`]
#[derive(Debug, Clone)]
pub struct TableLoader {
    max_rows: usize,
}

impl TableLoader {
    pub fn new(max_rows: usize) -> Self {
        Self { max_rows }
    }

    /// Parse and validate an upload
    pub fn load(&self, filename: &str, data: &[u8], options: &LoadOptions) -> Result<Table> {
        let (headers, rows) = match FileFormat::from_filename(filename)? {
            FileFormat::Csv => {
                let text = decode(filename, data, &options.encoding)?;
                read_csv(filename, &text, options)?
            }
            FileFormat::Excel => read_excel(filename, data, options.has_header)?,
        };

        tracing::debug!(
            "Parsed {}: {} columns, {} rows",
            filename,
            headers.len(),
            rows.len()
        );

        self.validate_shape(&headers, rows.len())?;
        let table = Table::from_rows(headers, rows)?;
        self.validate_rows(&table)?;
        Ok(table)
    }

    fn validate_shape(&self, headers: &[String], rows: usize) -> Result<()> {
        if headers.is_empty() || rows == 0 {
            return Err(Error::validation("File contains no data"));
        }
        if rows > self.max_rows {
            return Err(Error::validation(format!(
                "File has {} rows, the limit is {}",
                rows, self.max_rows
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for header in headers {
            if !seen.insert(header.as_str()) {
                return Err(Error::validation(format!("Duplicate column name '{}'", header)));
            }
        }
        Ok(())
    }

    fn validate_rows(&self, table: &Table) -> Result<()> {
        if let Some(row) = (0..table.row_count()).find(|&row| table.row_is_empty(row)) {
            return Err(Error::validation(format!(
                "Row {} contains only missing values",
                row + 1
            )));
        }
        Ok(())
    }
}

fn decode(filename: &str, data: &[u8], encoding: &str) -> Result<String> {
    match encoding.to_ascii_lowercase().replace('_', "-").as_str() {
        "utf-8" | "utf8" => {
            let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);
            String::from_utf8(data.to_vec())
                .map_err(|e| Error::parse(filename, format!("File is not valid UTF-8: {}", e)))
        }
        "latin-1" | "latin1" | "iso-8859-1" => Ok(data.iter().map(|&b| b as char).collect()),
        other => Err(Error::validation(format!("Unsupported encoding '{}'", other))),
    }
}

type RawRows = (Vec<String>, Vec<Vec<Option<String>>>);

fn read_csv(filename: &str, text: &str, options: &LoadOptions) -> Result<RawRows> {
    if let Some(delimiter) = options.delimiter {
        let delimiter = u8::try_from(delimiter)
            .map_err(|_| Error::validation(format!("Delimiter '{}' must be a single-byte character", delimiter)))?;
        return read_delimited(text, delimiter, options.has_header)
            .map_err(|e| Error::parse(filename, e.to_string()));
    }

    // Take the first delimiter that splits the header into several columns
    for &delimiter in CANDIDATE_DELIMITERS {
        match read_delimited(text, delimiter, options.has_header) {
            Ok(parsed) if parsed.0.len() > 1 => {
                tracing::debug!("Detected delimiter {:?} for {}", delimiter as char, filename);
                return Ok(parsed);
            }
            Ok(_) => continue,
            Err(e) => tracing::debug!("Delimiter {:?} failed for {}: {}", delimiter as char, filename, e),
        }
    }

    Err(Error::parse(
        filename,
        "Could not split the file into columns; check the format and delimiter",
    ))
}

fn read_delimited(text: &str, delimiter: u8, has_header: bool) -> std::result::Result<RawRows, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record?;
        records.push(record.iter().map(|cell| Some(cell.to_string())).collect::<Vec<_>>());
    }
    Ok(split_header(records, has_header))
}

fn split_header(mut records: Vec<Vec<Option<String>>>, has_header: bool) -> RawRows {
    if records.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let headers = if has_header {
        records
            .remove(0)
            .into_iter()
            .enumerate()
            .map(|(i, cell)| match cell.map(|c| c.trim().to_string()) {
                Some(name) if !name.is_empty() => name,
                _ => format!("column_{}", i + 1),
            })
            .collect()
    } else {
        let width = records.iter().map(Vec::len).max().unwrap_or(0);
        (1..=width).map(|i| format!("column_{}", i)).collect()
    };
    (headers, records)
}

#[cfg(feature = "xlsx")]
fn read_excel(filename: &str, data: &[u8], has_header: bool) -> Result<RawRows> {
    use calamine::{Data, Reader};

    let cursor = std::io::Cursor::new(data);
    let mut workbook = calamine::open_workbook_auto_from_rs(cursor)
        .map_err(|e| Error::parse(filename, e.to_string()))?;

    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| Error::parse(filename, "Workbook has no sheets"))?;
    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| Error::parse(filename, e.to_string()))?;

    let records: Vec<Vec<Option<String>>> = range
        .rows()
        .map(|row| {
            row.iter()
                .map(|cell| match cell {
                    Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => Some(s.clone()),
                    Data::Float(f) => Some(crate::types::format_number(*f)),
                    Data::Int(i) => Some(i.to_string()),
                    Data::Bool(b) => Some(b.to_string()),
                    Data::DateTime(dt) => excel_serial_to_datetime(dt.as_f64()).map(crate::types::format_datetime),
                    _ => None,
                })
                .collect()
        })
        .collect();

    Ok(split_header(records, has_header))
}

#[cfg(not(feature = "xlsx"))]
fn read_excel(filename: &str, _data: &[u8], _has_header: bool) -> Result<RawRows> {
    Err(Error::parse(filename, "Excel support is disabled in this build"))
}

/// Convert a 1900-system Excel serial date
#[cfg(feature = "xlsx")]
fn excel_serial_to_datetime(serial: f64) -> Option<chrono::NaiveDateTime> {
    let epoch = chrono::NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (serial * 86_400_000.0).round();
    if !millis.is_finite() || millis.abs() > 1e15 {
        return None;
    }
    epoch.checked_add_signed(chrono::Duration::milliseconds(millis as i64))
}
