//! Report export
//!
//! Writes a list of ordered column/value rows to CSV or XLSX, selected
//! by file extension. Timezone-aware timestamps are flattened to naive
//! UTC (`YYYY-MM-DD HH:MM:SS`) before writing.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use rust_xlsxwriter::Workbook;
use serde_json::Value;

use crate::error::{Error, Result};

/// One report row: ordered column → value
pub type ReportRow = serde_json::Map<String, Value>;

/// Write `rows` to `path`; the extension selects the format.
pub fn write_report(path: &Path, rows: &[ReportRow]) -> Result<()> {
    if rows.is_empty() {
        return Err(Error::Export(
            "Invalid input, unable to export empty data".to_string(),
        ));
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());
    match extension.as_deref() {
        Some("csv") => write_csv(path, rows),
        Some("xlsx") => write_xlsx(path, rows),
        _ => Err(Error::Export(
            "Invalid file format, please use either csv or xlsx".to_string(),
        )),
    }
}

/// Render one cell value; RFC 3339 timestamps become naive UTC
fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => match DateTime::parse_from_rfc3339(s) {
            Ok(dt) => dt
                .with_timezone(&Utc)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            Err(_) => s.clone(),
        },
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn write_csv(path: &Path, rows: &[ReportRow]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    let header: Vec<String> = rows[0].keys().map(|k| csv_escape(k)).collect();
    writeln!(writer, "{}", header.join(","))?;

    for row in rows {
        let line: Vec<String> = row.values().map(|v| csv_escape(&cell_text(v))).collect();
        writeln!(writer, "{}", line.join(","))?;
    }
    writer.flush()?;
    tracing::info!(path = %path.display(), rows = rows.len(), "Wrote CSV report");
    Ok(())
}

fn write_xlsx(path: &Path, rows: &[ReportRow]) -> Result<()> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();

    for (col, key) in rows[0].keys().enumerate() {
        worksheet.write_string(0, col as u16, key)?;
    }
    for (i, row) in rows.iter().enumerate() {
        for (col, value) in row.values().enumerate() {
            let r = (i + 1) as u32;
            let c = col as u16;
            match value {
                Value::Number(n) => {
                    worksheet.write_number(r, c, n.as_f64().unwrap_or(0.0))?;
                }
                other => {
                    worksheet.write_string(r, c, &cell_text(other))?;
                }
            }
        }
    }

    workbook.save(path)?;
    tracing::info!(path = %path.display(), rows = rows.len(), "Wrote XLSX report");
    Ok(())
}
