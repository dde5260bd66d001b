use calamine::{open_workbook_auto, Data, Reader};
use chrono::{SecondsFormat, Utc};
use rusqlite::params;
use serde::Deserialize;
use serde_json::{json, Value};
use sha1::{Digest, Sha1};
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::errors::{LedgerError, LedgerResult};
use crate::gviz::parse_gviz_response;
use crate::ledger_db::{inspect_status_at_path, open_ledger_connection};
use crate::series::{reconstruct, Reconstruction, SkipReason};
use crate::service::LedgerService;
use crate::sheet::{CellValue, RawCell, RawRow};
use crate::sheet_date::format_date_key;
use crate::sqlite_store::SqliteSheetStore;
use crate::subject::Subject;
use crate::upsert::Measurement;

const PREVIEW_LIMIT: usize = 10;
const ERROR_SAMPLE_LIMIT: usize = 20;

#[derive(Debug, Default, Deserialize)]
pub struct SheetPreviewRequest {
    pub source_path: Option<String>,
    pub header_sentinel: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SheetImportRequest {
    pub source_path: Option<String>,
    pub header_sentinel: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportKind {
    Csv,
    Xlsx,
    GvizJson,
}

impl ExportKind {
    fn from_path(path: &Path) -> LedgerResult<Self> {
        let suffix = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match suffix.as_str() {
            "csv" => Ok(ExportKind::Csv),
            "xlsx" | "xls" | "ods" => Ok(ExportKind::Xlsx),
            "json" | "js" => Ok(ExportKind::GvizJson),
            _ => Err(LedgerError::InvalidMeasurement(format!(
                "unsupported export format: .{suffix} (expected .csv, .xlsx or .json)"
            ))),
        }
    }

    fn source_type(self) -> &'static str {
        match self {
            ExportKind::Csv => "sheet_csv",
            ExportKind::Xlsx => "sheet_xlsx",
            ExportKind::GvizJson => "sheet_gviz_json",
        }
    }
}

fn text_cell(raw: &str) -> RawCell {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        RawCell::default()
    } else {
        RawCell::plain(CellValue::text(trimmed))
    }
}

fn read_csv_rows(path: &Path) -> LedgerResult<Vec<RawRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| LedgerError::store("failed to open csv export", e))?;

    let mut rows = Vec::new();
    for rec in reader.records() {
        let rec = rec.map_err(|e| LedgerError::store("failed to read csv row", e))?;
        rows.push(rec.iter().map(text_cell).collect());
    }
    Ok(rows)
}

fn cell_from_xlsx(cell: &Data) -> RawCell {
    let value = match cell {
        Data::Empty => CellValue::Empty,
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) => CellValue::Number(*f),
        Data::Bool(b) => CellValue::Bool(*b),
        // Serial days; the date parser reads them from the display text.
        Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => {
            return text_cell(s);
        }
        Data::Error(_) => CellValue::Empty,
    };
    RawCell::plain(value)
}

fn read_xlsx_rows(path: &Path) -> LedgerResult<Vec<RawRow>> {
    let mut workbook =
        open_workbook_auto(path).map_err(|e| LedgerError::store("failed to open workbook", e))?;
    let first_sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| LedgerError::StoreIo("workbook has no sheets".to_string()))?;
    let range = workbook
        .worksheet_range(&first_sheet)
        .map_err(|e| LedgerError::store("failed to read worksheet", e))?;

    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_from_xlsx).collect())
        .collect())
}

fn read_gviz_rows(path: &Path) -> LedgerResult<Vec<RawRow>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| LedgerError::store("failed to read gviz export", e))?;
    parse_gviz_response(&text)
}

struct ParsedExport {
    kind: ExportKind,
    sha1: String,
    recon: Reconstruction,
}

fn file_sha1(path: &Path) -> LedgerResult<String> {
    let bytes =
        std::fs::read(path).map_err(|e| LedgerError::store("failed to read export file", e))?;
    let mut hasher = Sha1::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

fn parse_export_file(path: &Path, header_sentinel: &str) -> LedgerResult<ParsedExport> {
    if !path.is_file() {
        return Err(LedgerError::StoreIo(format!(
            "export file not found: {}",
            path.to_string_lossy()
        )));
    }
    let kind = ExportKind::from_path(path)?;
    let rows = match kind {
        ExportKind::Csv => read_csv_rows(path)?,
        ExportKind::Xlsx => read_xlsx_rows(path)?,
        ExportKind::GvizJson => read_gviz_rows(path)?,
    };
    Ok(ParsedExport {
        kind,
        sha1: file_sha1(path)?,
        recon: reconstruct(&rows, header_sentinel),
    })
}

fn resolve_source_path(source_path: Option<&str>) -> LedgerResult<&Path> {
    source_path
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Path::new)
        .ok_or_else(|| LedgerError::InvalidMeasurement("source_path is required".to_string()))
}

fn resolve_header(header_sentinel: Option<&str>) -> String {
    header_sentinel
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| LedgerConfig::default().header_sentinel)
}

/// One measurement per non-empty subject cell, keyed by the canonical date.
fn measurements_of(recon: &Reconstruction) -> (Vec<Measurement>, Vec<String>) {
    let mut measurements = Vec::new();
    let mut errors = Vec::new();
    for point in &recon.series {
        let date_key = format_date_key(point.date);
        for subject in Subject::ALL {
            let Some(weight) = point.value(subject) else {
                continue;
            };
            match Measurement::new(&date_key, subject, weight) {
                Ok(m) => measurements.push(m),
                Err(err) => errors.push(format!("{}: {err}", point.date_key)),
            }
        }
    }
    (measurements, errors)
}

fn skipped_summary(recon: &Reconstruction) -> Value {
    let count = |reason: SkipReason| recon.skipped.iter().filter(|s| s.reason == reason).count();
    json!({
        "header": count(SkipReason::Header),
        "empty_date": count(SkipReason::EmptyDate),
        "malformed": count(SkipReason::UnparsableDate),
        "malformed_rows": recon
            .skipped
            .iter()
            .filter(|s| s.reason == SkipReason::UnparsableDate)
            .take(ERROR_SAMPLE_LIMIT)
            .collect::<Vec<_>>(),
    })
}

fn preview_rows(recon: &Reconstruction) -> Vec<Value> {
    recon
        .series
        .iter()
        .take(PREVIEW_LIMIT)
        .map(|p| {
            let mut row = serde_json::Map::new();
            row.insert("date".to_string(), json!(format_date_key(p.date)));
            for subject in Subject::ALL {
                row.insert(subject.name().to_string(), json!(p.value(subject)));
            }
            Value::Object(row)
        })
        .collect()
}

pub fn preview_export_at_path(req: &SheetPreviewRequest) -> LedgerResult<Value> {
    let path = resolve_source_path(req.source_path.as_deref())?;
    let header = resolve_header(req.header_sentinel.as_deref());
    let parsed = parse_export_file(path, &header)?;
    let (measurements, errors) = measurements_of(&parsed.recon);

    Ok(json!({
        "file": path.to_string_lossy().to_string(),
        "source_type": parsed.kind.source_type(),
        "source_sha1": parsed.sha1,
        "point_count": parsed.recon.series.len(),
        "measurement_count": measurements.len(),
        "error_count": errors.len(),
        "errors": errors.into_iter().take(ERROR_SAMPLE_LIMIT).collect::<Vec<_>>(),
        "skipped": skipped_summary(&parsed.recon),
        "preview_rows": preview_rows(&parsed.recon),
    }))
}

fn ensure_ledger_ready(db_path: &Path) -> LedgerResult<()> {
    let status = inspect_status_at_path(db_path)?;
    if !status.ready {
        return Err(LedgerError::StoreIo(format!(
            "ledger database is not ready, pending migrations: {}",
            status.pending_versions.join(", ")
        )));
    }
    Ok(())
}

/// Upserts every value of an export into the ledger table and records the run
/// in `import_jobs`. Importing the same file again rewrites the same cells.
pub fn import_export_at_db_path(db_path: &Path, req: &SheetImportRequest) -> LedgerResult<Value> {
    let path = resolve_source_path(req.source_path.as_deref())?;
    let header = resolve_header(req.header_sentinel.as_deref());
    let parsed = parse_export_file(path, &header)?;
    ensure_ledger_ready(db_path)?;

    let conn = open_ledger_connection(db_path)?;
    let job_id = Uuid::new_v4().to_string();
    let started_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let file_text = path.to_string_lossy().to_string();
    let source_type = parsed.kind.source_type();
    let metadata_json = serde_json::to_string(&json!({
        "source_type": source_type,
        "source_file": file_text,
        "header_sentinel": header,
    }))
    .map_err(|e| LedgerError::store("failed to serialise import metadata", e))?;

    conn.execute(
        r#"
        INSERT INTO import_jobs(id, source_type, source_file, source_sha1, status, started_at, metadata_json)
        VALUES (?1, ?2, ?3, ?4, 'running', ?5, ?6)
        "#,
        params![job_id, source_type, file_text, parsed.sha1, started_at, metadata_json],
    )
    .map_err(|e| LedgerError::store("failed to create import job", e))?;

    let outcome = run_import_job(&conn, db_path, &job_id, &header, &parsed);
    let mut outcome = match outcome {
        Ok(outcome) => outcome,
        Err(err) => {
            let finished_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
            if let Err(mark_err) = conn.execute(
                "UPDATE import_jobs SET status='failed', finished_at=?1, error_message=?2 WHERE id=?3",
                params![finished_at, err.to_string(), job_id],
            ) {
                warn!(job = %job_id, error = %mark_err, "failed to mark import job as failed");
            }
            warn!(job = %job_id, error = %err, "sheet import failed");
            return Err(err);
        }
    };

    info!(
        job = %job_id,
        file = %file_text,
        status = outcome.get("status").and_then(serde_json::Value::as_str).unwrap_or_default(),
        "sheet export imported"
    );
    if let Some(obj) = outcome.as_object_mut() {
        obj.insert("file".to_string(), json!(file_text));
        obj.insert("source_type".to_string(), json!(source_type));
        obj.insert("source_sha1".to_string(), json!(parsed.sha1));
    }
    Ok(outcome)
}

/// `partial` when any value of the export was rejected.
fn job_status(error_count: usize) -> &'static str {
    if error_count == 0 {
        "success"
    } else {
        "partial"
    }
}

fn run_import_job(
    conn: &rusqlite::Connection,
    db_path: &Path,
    job_id: &str,
    header: &str,
    parsed: &ParsedExport,
) -> LedgerResult<Value> {
    let config = LedgerConfig {
        db_path: db_path.to_path_buf(),
        header_sentinel: header.to_string(),
        ..LedgerConfig::default()
    };
    let service = LedgerService::new(SqliteSheetStore::new(db_path), config);

    let (measurements, mut errors) = measurements_of(&parsed.recon);
    let total_count = measurements.len() + errors.len();
    let mut appended_rows = 0_i64;
    let mut updated_cells = 0_i64;
    for m in &measurements {
        match service.record_measurement(m) {
            Ok(instruction) if instruction.is_append() => appended_rows += 1,
            Ok(_) => updated_cells += 1,
            Err(err) => errors.push(format!("{} {}: {err}", m.date_key, m.subject)),
        }
    }
    let imported_count = appended_rows + updated_cells;
    let skipped_count = parsed.recon.skipped.len();
    let status = job_status(errors.len());
    if !errors.is_empty() {
        warn!(job = %job_id, errors = errors.len(), "import finished with errors");
    }

    let finished_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let samples = errors
        .iter()
        .take(ERROR_SAMPLE_LIMIT)
        .cloned()
        .collect::<Vec<_>>();
    let error_message = if samples.is_empty() {
        None
    } else {
        Some(samples.join("\n"))
    };
    conn.execute(
        r#"
        UPDATE import_jobs
        SET status=?1,
            finished_at=?2,
            total_count=?3,
            imported_count=?4,
            skipped_count=?5,
            error_count=?6,
            error_message=?7
        WHERE id=?8
        "#,
        params![
            status,
            finished_at,
            total_count as i64,
            imported_count,
            skipped_count as i64,
            errors.len() as i64,
            error_message,
            job_id
        ],
    )
    .map_err(|e| LedgerError::store("failed to finish import job", e))?;

    Ok(json!({
        "db_path": db_path.to_string_lossy().to_string(),
        "import_job_id": job_id,
        "status": status,
        "imported_count": imported_count,
        "appended_rows": appended_rows,
        "updated_cells": updated_cells,
        "skipped_count": skipped_count,
        "error_count": errors.len(),
        "errors": samples,
        "skipped": skipped_summary(&parsed.recon),
    }))
}
