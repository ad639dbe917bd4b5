use crate::error::{ExtractError, Result};
use crate::models::{ResultRecord, ResultSet};
use calamine::{open_workbook_auto, DataType, Reader};
use chrono::{DateTime, Local};
use rust_xlsxwriter::{Color, Format, Workbook, Worksheet, XlsxError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SHEET_NAME: &str = "Results";
const FILE_PREFIX: &str = "Results";
const JOB_PREFIX_LEN: usize = 8;
const ERROR_COLUMN: &str = "error";

/// Short, filename-safe piece of a job id.
fn job_prefix(job_id: &str) -> String {
    let prefix: String = job_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(JOB_PREFIX_LEN)
        .collect();
    if prefix.is_empty() {
        "job".to_string()
    } else {
        prefix
    }
}

/// Downloads, else Desktop, else the working directory.
pub fn default_export_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(dirs::desktop_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// `Results_<job>_<YYYYMMDD_HHMMSS>.xlsx` in `dir`, with `_2`, `_3`... appended while taken.
pub fn default_export_path_in(dir: &Path, job_id: &str, now: DateTime<Local>) -> PathBuf {
    let stamp = now.format("%Y%m%d_%H%M%S");
    let job = job_prefix(job_id);
    let mut path = dir.join(format!("{}_{}_{}.xlsx", FILE_PREFIX, job, stamp));
    let mut counter = 2u32;
    while path.exists() {
        path = dir.join(format!("{}_{}_{}_{}.xlsx", FILE_PREFIX, job, stamp, counter));
        counter += 1;
    }
    path
}

/// Where a downloaded export goes: the explicit path (forced to `.xlsx`) or a fresh
/// default name.
pub fn resolve_export_path(explicit: Option<&Path>, job_id: &str) -> PathBuf {
    match explicit.filter(|p| !p.as_os_str().is_empty()) {
        Some(p) => {
            let mut path = p.to_path_buf();
            if path.extension().and_then(|e| e.to_str()) != Some("xlsx") {
                path.set_extension("xlsx");
            }
            path
        }
        None => default_export_path_in(&default_export_dir(), job_id, Local::now()),
    }
}

pub fn write_export_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, bytes)?;
    info!(path = %path.display(), bytes = bytes.len(), "export written");
    Ok(())
}

pub fn open_in_default_app(path: &Path) -> Result<()> {
    opener::open(path).map_err(|e| open_failure(path, e))
}

fn open_failure(path: &Path, reason: impl std::fmt::Display) -> ExtractError {
    ExtractError::Io {
        source: io::Error::new(
            io::ErrorKind::Other,
            format!("Could not open {}: {}", path.display(), reason),
        ),
    }
}

/// Drops control characters that break the sheet XML; tab and newlines survive.
fn sanitize_cell(s: &str) -> String {
    s.chars()
        .filter(|&c| {
            let u = c as u32;
            c == '\t' || c == '\n' || c == '\r' || !(u < 0x20 || u == 0x7F || u == 0xFFFE || u == 0xFFFF)
        })
        .collect()
}

/// Column width from text length (char count × 1.2, clamped 10–50).
fn estimate_text_width(text: &str) -> f64 {
    let w = text.chars().count() as f64 * 1.2;
    w.clamp(10.0, 50.0)
}

/// Every column seen across the records in first-seen order, plus `error` when any row failed.
pub fn export_columns(results: &ResultSet) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for record in results.records() {
        for column in record.columns() {
            if !columns.iter().any(|c| c == column) {
                columns.push(column.to_string());
            }
        }
    }
    if results.failed_count() > 0 && !columns.iter().any(|c| c == ERROR_COLUMN) {
        columns.push(ERROR_COLUMN.to_string());
    }
    columns
}

fn cell_value<'a>(record: &'a ResultRecord, column: &str) -> &'a str {
    if column == ERROR_COLUMN {
        record.error().or_else(|| record.get(column)).unwrap_or("")
    } else {
        record.get(column).unwrap_or("")
    }
}

fn write_text(worksheet: &mut Worksheet, row: u32, col: u16, text: &str, format: &Format) -> std::result::Result<(), XlsxError> {
    worksheet
        .write_string_with_format(row, col, sanitize_cell(text), format)
        .map(|_| ())
}

/// Writes the result set to a new workbook at `path`.
pub fn export_results_xlsx(results: &ResultSet, path: &Path) -> Result<()> {
    let columns = export_columns(results);
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME)?;

    let header_format = Format::new()
        .set_bold()
        .set_background_color(Color::RGB(0x2563EB))
        .set_font_color(Color::RGB(0xFFFFFF));
    let text_format = Format::new().set_text_wrap();

    let mut widths: Vec<f64> = columns.iter().map(|c| estimate_text_width(c)).collect();
    for (col, header) in columns.iter().enumerate() {
        write_text(worksheet, 0, col as u16, header, &header_format)?;
    }

    for (row_idx, record) in results.records().iter().enumerate() {
        let row = (row_idx + 1) as u32;
        for (col, column) in columns.iter().enumerate() {
            let value = cell_value(record, column);
            widths[col] = widths[col].max(estimate_text_width(value));
            write_text(worksheet, row, col as u16, value, &text_format)?;
        }
    }

    for (col, width) in widths.iter().enumerate() {
        worksheet.set_column_width(col as u16, *width)?;
    }
    worksheet.set_freeze_panes(1, 0)?;
    workbook.save(path)?;
    info!(path = %path.display(), rows = results.len(), columns = columns.len(), "results exported");
    Ok(())
}

fn csv_field(text: &str) -> String {
    if text.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

/// Writes the result set as comma-separated text, header first, same columns as the workbook.
pub fn export_results_csv(results: &ResultSet, path: &Path) -> Result<()> {
    let columns = export_columns(results);
    let mut lines = Vec::with_capacity(results.len() + 1);
    lines.push(columns.iter().map(|c| csv_field(c)).collect::<Vec<_>>().join(","));
    for record in results.records() {
        let row: Vec<String> = columns.iter().map(|c| csv_field(cell_value(record, c))).collect();
        lines.push(row.join(","));
    }
    let mut text = lines.join("\r\n");
    text.push_str("\r\n");
    fs::write(path, text)?;
    info!(path = %path.display(), rows = results.len(), "results exported as CSV");
    Ok(())
}

/// Writes the records as a pretty JSON array, the same shape the service returns.
pub fn export_results_json(results: &ResultSet, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(results.records())?;
    fs::write(path, json)?;
    info!(path = %path.display(), rows = results.len(), "results exported as JSON");
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetPreview {
    pub name: String,
    pub headers: Vec<String>,
    /// Non-empty rows below the header.
    pub row_count: usize,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkbookPreview {
    pub path: PathBuf,
    pub sheets: Vec<SheetPreview>,
}

/// Reads every sheet: header row, data row count and the first `max_rows` rows.
pub fn preview_workbook(path: &Path, max_rows: usize) -> Result<WorkbookPreview> {
    if !path.exists() {
        return Err(ExtractError::Validation(format!("File not found: {}", path.display())));
    }
    let mut workbook = open_workbook_auto(path)?;
    let names = workbook.sheet_names().to_vec();
    let mut sheets = Vec::with_capacity(names.len());
    for name in names {
        let range = workbook.worksheet_range(&name)?;
        let mut rows = range
            .rows()
            .map(|row| row.iter().map(|c| c.as_string().unwrap_or_default()).collect::<Vec<String>>());
        let headers = rows.next().unwrap_or_default();
        let data: Vec<Vec<String>> = rows.filter(|r| r.iter().any(|c| !c.is_empty())).collect();
        debug!(sheet = %name, rows = data.len(), "read sheet");
        sheets.push(SheetPreview {
            name,
            headers,
            row_count: data.len(),
            rows: data.into_iter().take(max_rows).collect(),
        });
    }
    Ok(WorkbookPreview {
        path: path.to_path_buf(),
        sheets,
    })
}

/// Plain-text rendering of a preview, one block per sheet.
pub fn render_preview(preview: &WorkbookPreview) -> String {
    let mut out = format!("{}\n", preview.path.display());
    for sheet in &preview.sheets {
        out.push_str(&format!("Sheet '{}': {} data row(s)\n", sheet.name, sheet.row_count));
        out.push_str(&format!("  {}\n", sheet.headers.join(" | ")));
        for row in &sheet.rows {
            out.push_str(&format!("  {}\n", row.join(" | ")));
        }
        if sheet.row_count > sheet.rows.len() {
            out.push_str(&format!("  ... {} more\n", sheet.row_count - sheet.rows.len()));
        }
    }
    out
}
