use serde::Serialize;

use crate::config::LedgerConfig;
use crate::errors::{LedgerError, LedgerResult};
use crate::sheet::{CellValue, SheetRow};
use crate::sheet_date::{canonical_date_key, parse_sheet_date};
use crate::subject::{Subject, DATE_COLUMN, SHEET_WIDTH};

/// A validated `(date, cat, weight)` triple.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    pub date_key: String,
    pub subject: Subject,
    pub weight: f64,
}

impl Measurement {
    /// The date is canonicalised to zero-padded `DD/MM/YYYY`. The weight only
    /// has to be finite here; positivity is a boundary rule.
    pub fn new(date: &str, subject: Subject, weight: f64) -> LedgerResult<Self> {
        let date_key = canonical_date_key(date)?;
        if !weight.is_finite() {
            return Err(LedgerError::InvalidMeasurement(format!(
                "weight must be a finite number, got: {weight}"
            )));
        }
        Ok(Self {
            date_key,
            subject,
            weight,
        })
    }

    pub fn from_parts(date: &str, cat: &str, weight: f64) -> LedgerResult<Self> {
        let subject = cat.parse::<Subject>()?;
        Self::new(date, subject, weight)
    }
}

/// The single write that brings the table in line with a measurement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteInstruction {
    UpdateCell {
        row_index: usize,
        column_index: usize,
        value: f64,
    },
    AppendRow {
        row: SheetRow,
    },
}

fn column_letter(index: usize) -> char {
    (b'A' + index as u8) as char
}

impl WriteInstruction {
    /// A1 address of the write. Rows are 1-based in A1 notation; appends
    /// target the configured ledger range.
    pub fn a1_range(&self, config: &LedgerConfig) -> String {
        match self {
            WriteInstruction::UpdateCell {
                row_index,
                column_index,
                ..
            } => format!(
                "{}!{}{}",
                config.sheet_name,
                column_letter(*column_index),
                row_index + 1
            ),
            WriteInstruction::AppendRow { .. } => config.sheet_range(),
        }
    }

    pub fn is_append(&self) -> bool {
        matches!(self, WriteInstruction::AppendRow { .. })
    }
}

fn row_matches_date(row: &SheetRow, date_key: &str) -> bool {
    let Some(cell) = row.get(DATE_COLUMN) else {
        return false;
    };
    let text = cell.as_text();
    if text == date_key {
        return true;
    }
    // Same reading of dates as the series reconstructor.
    match (parse_sheet_date(&text).date(), parse_sheet_date(date_key).date()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Index of the first row whose date cell names `date_key`. Later duplicates
/// are never considered.
pub fn find_date_row(rows: &[SheetRow], date_key: &str) -> Option<usize> {
    rows.iter().position(|row| row_matches_date(row, date_key))
}

pub fn new_row(date_key: &str, column_index: usize, value: f64) -> SheetRow {
    let mut row = vec![CellValue::Empty; SHEET_WIDTH];
    row[DATE_COLUMN] = CellValue::text(date_key);
    row[column_index] = CellValue::Number(value);
    row
}

/// Decide update vs append for `measurement` against the current snapshot.
/// Pure: the caller executes the returned instruction.
pub fn plan_upsert(rows: &[SheetRow], measurement: &Measurement) -> LedgerResult<WriteInstruction> {
    if measurement.date_key.trim().is_empty() {
        return Err(LedgerError::InvalidMeasurement("date is required".to_string()));
    }
    if !measurement.weight.is_finite() {
        return Err(LedgerError::InvalidMeasurement(format!(
            "weight must be a finite number, got: {}",
            measurement.weight
        )));
    }
    let column_index = measurement.subject.column_index();

    Ok(match find_date_row(rows, &measurement.date_key) {
        Some(row_index) => WriteInstruction::UpdateCell {
            row_index,
            column_index,
            value: measurement.weight,
        },
        None => WriteInstruction::AppendRow {
            row: new_row(&measurement.date_key, column_index, measurement.weight),
        },
    })
}

/// Executes an instruction against an in-memory table. Short rows are padded
/// with empty cells before an update.
pub fn apply_instruction(rows: &mut Vec<SheetRow>, instruction: &WriteInstruction) -> LedgerResult<()> {
    match instruction {
        WriteInstruction::UpdateCell {
            row_index,
            column_index,
            value,
        } => {
            let row = rows.get_mut(*row_index).ok_or_else(|| {
                LedgerError::StoreIo(format!("row {row_index} is outside the table"))
            })?;
            if row.len() <= *column_index {
                row.resize(column_index + 1, CellValue::Empty);
            }
            row[*column_index] = CellValue::Number(*value);
        }
        WriteInstruction::AppendRow { row } => rows.push(row.clone()),
    }
    Ok(())
}
