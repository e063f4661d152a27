//! Row encodings for staged objects
//!
//! CSV files carry a header row holding the union of the table's columns in
//! first-seen order. Nested values are written as compact JSON and `null` as
//! an empty cell. JSON staging files are newline-delimited, one row per line.

use serde_json::{Number, Value};

use crate::config::FileType;
use crate::error::{IngestError, Result};
use crate::table::{Row, Table};

pub fn encode_rows(table: &Table, file_type: FileType) -> Result<Vec<u8>> {
    match file_type {
        FileType::Csv => encode_csv(table),
        FileType::Json => encode_ndjson(table),
    }
}

pub fn decode_rows(bytes: &[u8], file_type: FileType) -> Result<Vec<Row>> {
    match file_type {
        FileType::Csv => decode_csv(bytes),
        FileType::Json => decode_ndjson(bytes),
    }
}

fn encode_csv(table: &Table) -> Result<Vec<u8>> {
    let columns = table.columns();
    if columns.is_empty() {
        return Ok(Vec::new());
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&columns)?;
    for row in &table.rows {
        let record = columns.iter().map(|c| csv_cell(row.get(c)));
        writer.write_record(record)?;
    }
    writer
        .into_inner()
        .map_err(|e| IngestError::codec(format!("failed to flush CSV writer: {e}")))
}

fn csv_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn encode_ndjson(table: &Table) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for row in &table.rows {
        serde_json::to_writer(&mut out, row)?;
        out.push(b'\n');
    }
    Ok(out)
}

fn decode_csv(bytes: &[u8]) -> Result<Vec<Row>> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(bytes);
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: Row = headers
            .iter()
            .zip(record.iter())
            .map(|(header, cell)| (header.clone(), coerce_cell(cell)))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

/// Best-effort typing of a CSV cell
fn coerce_cell(cell: &str) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    match cell {
        "true" | "True" => return Value::Bool(true),
        "false" | "False" => return Value::Bool(false),
        _ => {},
    }
    if let Ok(i) = cell.parse::<i64>() {
        return Value::from(i);
    }
    if let Some(n) = cell.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(n);
    }
    if cell.starts_with('[') || cell.starts_with('{') {
        if let Ok(nested) = serde_json::from_str(cell) {
            return nested;
        }
    }
    Value::String(cell.to_string())
}

fn decode_ndjson(bytes: &[u8]) -> Result<Vec<Row>> {
    let text = std::str::from_utf8(bytes).map_err(IngestError::codec)?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(i, line)| match serde_json::from_str(line)? {
            Value::Object(row) => Ok(row),
            _ => Err(IngestError::codec(format!("line {} is not a JSON object", i + 1))),
        })
        .collect()
}
