use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::LedgerConfig;
use crate::dashboard::{dashboard_payload, parse_today, DashboardQueryRequest};
use crate::errors::LedgerResult;
use crate::proxy::{save_weight, SaveWeightRequest, SaveWeightResponse};
use crate::series::{filter_range, today, SeriesWindow};
use crate::service::LedgerService;
use crate::sqlite_store::SqliteSheetStore;
use crate::subject::Subject;

#[derive(Debug, Serialize)]
pub struct HealthPing {
    pub status: &'static str,
    pub unix_ts: u64,
    pub mode: &'static str,
}

#[derive(Debug, Serialize)]
pub struct AppMetadata {
    pub app_name: String,
    pub app_version: String,
    pub target_os: String,
    pub target_arch: String,
    pub debug: bool,
    pub cats: Vec<Subject>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SeriesQueryRequest {
    pub range: Option<String>,
    pub today: Option<String>,
}

fn now_unix_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub fn health_ping() -> HealthPing {
    HealthPing {
        status: "ok",
        unix_ts: now_unix_ts(),
        mode: "local",
    }
}

pub fn app_metadata() -> AppMetadata {
    AppMetadata {
        app_name: env!("CARGO_PKG_NAME").to_string(),
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        target_os: std::env::consts::OS.to_string(),
        target_arch: std::env::consts::ARCH.to_string(),
        debug: cfg!(debug_assertions),
        cats: Subject::ALL.to_vec(),
    }
}

/// Read-side service: no migrations run, a missing database is an error.
fn reader_service(config: &LedgerConfig) -> LedgerResult<LedgerService<SqliteSheetStore>> {
    config.validate()?;
    Ok(LedgerService::new(
        SqliteSheetStore::new(&config.db_path),
        config.clone(),
    ))
}

pub fn save_weight_command(
    config: &LedgerConfig,
    req: &SaveWeightRequest,
) -> LedgerResult<SaveWeightResponse> {
    let service = LedgerService::open(config.clone())?;
    Ok(save_weight(&service, req))
}

/// Where the ledger rows live: the local table and, when a sheet id is
/// configured, the spreadsheet's gviz export it mirrors.
pub fn ledger_source(config: &LedgerConfig) -> Value {
    json!({
        "db_path": config.db_path.to_string_lossy().to_string(),
        "sheet_range": config.sheet_range(),
        "sheet_id": config.sheet_id,
        "gviz_url": config.gviz_url(),
    })
}

pub fn dashboard_query(config: &LedgerConfig, req: &DashboardQueryRequest) -> LedgerResult<Value> {
    let recon = reader_service(config)?.load_series()?;
    let mut payload = dashboard_payload(&recon, req, today())?;
    if let Some(obj) = payload.as_object_mut() {
        obj.insert("source".to_string(), ledger_source(config));
    }
    Ok(payload)
}

pub fn series_query(config: &LedgerConfig, req: &SeriesQueryRequest) -> LedgerResult<Value> {
    let window = req
        .range
        .as_deref()
        .unwrap_or("all")
        .parse::<SeriesWindow>()?;
    let today = parse_today(req.today.as_deref(), today())?;
    let recon = reader_service(config)?.load_series()?;
    let points = filter_range(&recon.series, window, today)
        .iter()
        .map(|p| {
            json!({
                "date": p.date_key,
                "iso_date": p.date.format("%Y-%m-%d").to_string(),
                "values": Subject::ALL
                    .iter()
                    .map(|s| (s.name().to_string(), json!(p.value(*s))))
                    .collect::<serde_json::Map<_, _>>(),
            })
        })
        .collect::<Vec<_>>();

    Ok(json!({
        "range": window,
        "point_count": points.len(),
        "malformed_count": recon.malformed_count(),
        "source": ledger_source(config),
        "points": points,
    }))
}
