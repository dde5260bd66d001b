//! Reader for the Google Visualization (`gviz/tq?tqx=out:json`) export of the
//! ledger sheet.
//!
//! The endpoint answers with JavaScript, not JSON:
//! `/*O_o*/\ngoogle.visualization.Query.setResponse({...});`. Each data cell is
//! `{"v": raw, "f": "formatted"}` or `null`.

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::OnceLock;

use crate::errors::{LedgerError, LedgerResult};
use crate::sheet::{CellValue, RawCell, RawRow};

#[derive(Debug, Deserialize)]
struct GvizResponse {
    status: Option<String>,
    #[serde(default)]
    errors: Vec<GvizMessage>,
    table: Option<GvizTable>,
}

#[derive(Debug, Deserialize)]
struct GvizMessage {
    reason: Option<String>,
    message: Option<String>,
    detailed_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GvizTable {
    #[serde(default)]
    rows: Vec<GvizRow>,
}

#[derive(Debug, Deserialize)]
struct GvizRow {
    #[serde(default)]
    c: Vec<Option<GvizCell>>,
}

#[derive(Debug, Deserialize)]
struct GvizCell {
    #[serde(default)]
    v: Value,
    f: Option<String>,
}

fn set_response_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)setResponse\((.*)\)\s*;?\s*$").expect("static setResponse pattern")
    })
}

fn cell_from_json(v: Value) -> CellValue {
    match v {
        Value::Null => CellValue::Empty,
        Value::Bool(b) => CellValue::Bool(b),
        Value::Number(n) => n.as_f64().map(CellValue::Number).unwrap_or_default(),
        Value::String(s) => CellValue::Text(s),
        other => CellValue::Text(other.to_string()),
    }
}

/// Strip the JavaScript wrapper, if present, and return the JSON body.
pub fn unwrap_payload(text: &str) -> LedgerResult<&str> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        return Ok(trimmed);
    }
    set_response_regex()
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| LedgerError::StoreIo("gviz response has no setResponse payload".to_string()))
}

pub fn parse_gviz_response(text: &str) -> LedgerResult<Vec<RawRow>> {
    let body = unwrap_payload(text)?;
    let resp = serde_json::from_str::<GvizResponse>(body)
        .map_err(|e| LedgerError::store("gviz payload is not valid JSON", e))?;

    if resp.status.as_deref() == Some("error") {
        let detail = resp
            .errors
            .iter()
            .map(|m| {
                m.detailed_message
                    .clone()
                    .or_else(|| m.message.clone())
                    .or_else(|| m.reason.clone())
                    .unwrap_or_default()
            })
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(LedgerError::StoreIo(format!("gviz query failed: {detail}")));
    }

    let table = resp
        .table
        .ok_or_else(|| LedgerError::StoreIo("gviz response has no table".to_string()))?;
    Ok(table
        .rows
        .into_iter()
        .map(|row| {
            row.c
                .into_iter()
                .map(|cell| match cell {
                    Some(cell) => RawCell {
                        value: cell_from_json(cell.v),
                        formatted: cell.f,
                    },
                    None => RawCell::default(),
                })
                .collect()
        })
        .collect())
}
