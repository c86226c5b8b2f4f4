//! CSV and JSON row mapping for bulk import and export.
//!
//! CSV is written with every cell quoted and `\n` line endings, and read back with full
//! quoting rules, so cells may contain commas, quotes and line breaks.

use crate::entities::Document;
use crate::{ConsoleError, ConsoleResult};
use serde_json::Value;

/// Tokenise CSV text into rows of cells. Blank lines are skipped; rows may differ in length.
pub fn parse_rows(text: &str) -> ConsoleResult<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

/// Render rows as CSV with every cell quoted.
pub fn to_csv<R, C>(rows: R) -> ConsoleResult<String>
where
    R: IntoIterator<Item = C>,
    C: IntoIterator,
    C::Item: AsRef<[u8]>,
{
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .terminator(csv::Terminator::Any(b'\n'))
        .flexible(true)
        .from_writer(Vec::new());
    for row in rows {
        writer.write_record(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| ConsoleError::Io(e.into_error()))?;
    let mut text = String::from_utf8(bytes)
        .map_err(|e| ConsoleError::InvalidInput(format!("CSV output is not UTF-8: {e}")))?;
    if text.ends_with('\n') {
        text.pop();
    }
    Ok(text)
}

/// Zip a row with its header; cells missing from a short row become empty strings.
pub fn to_record(headers: &[String], row: &[String]) -> Document {
    headers
        .iter()
        .enumerate()
        .map(|(i, header)| {
            let cell = row.get(i).cloned().unwrap_or_default();
            (header.clone(), Value::String(cell))
        })
        .collect()
}

/// Trimmed text, or `None` when absent or blank.
pub fn as_optional_string(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        other => other.to_string().trim().to_string(),
    };
    (!text.is_empty()).then_some(text)
}

/// A finite number, or `None` when absent, blank or unparsable.
pub fn as_optional_number(value: Option<&Value>) -> Option<f64> {
    let number = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) if s.trim().is_empty() => return None,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Bool(b) => f64::from(u8::from(*b)),
        _ => return None,
    };
    number.is_finite().then_some(number)
}

/// An array taken as-is, or a string split on `,` or `|`. Empty parts are dropped.
pub fn as_string_array(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split([',', '|'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Parse an uploaded import file into loosely typed rows.
///
/// `.json` files must hold an array (non-object items are dropped); `.csv` files use their
/// first row as the header.
///
/// # Errors
///
/// `ConsoleError::UnsupportedImport` for any other extension, `ConsoleError::InvalidInput`
/// when a JSON file is not an array, and parse errors from the JSON or CSV readers.
pub fn parse_import(file_name: &str, text: &str) -> ConsoleResult<Vec<Document>> {
    let lower = file_name.to_lowercase();

    if lower.ends_with(".json") {
        return match serde_json::from_str::<Value>(text)? {
            Value::Array(items) => Ok(items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(doc) => Some(doc),
                    _ => None,
                })
                .collect()),
            _ => Err(ConsoleError::InvalidInput(
                "JSON import must be an array".into(),
            )),
        };
    }

    if lower.ends_with(".csv") {
        let rows = parse_rows(text)?;
        let Some((headers, body)) = rows.split_first() else {
            return Ok(Vec::new());
        };
        return Ok(body.iter().map(|row| to_record(headers, row)).collect());
    }

    Err(ConsoleError::UnsupportedImport(format!(
        "{file_name}: use .json or .csv"
    )))
}
