use catweight_ledger_lib::{
    app_metadata, apply_embedded_migrations, dashboard_query, health_ping,
    import_export_at_db_path, init_tracing, inspect_status_at_path, preview_export_at_path,
    save_weight_command, series_query, DashboardQueryRequest, LedgerConfig, LedgerError,
    SaveWeightRequest, SeriesQueryRequest, SheetImportRequest, SheetPreviewRequest,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::env;
use std::io::{self, Read};
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct AdapterRequest {
    schema_version: u64,
    case: Option<AdapterCaseMeta>,
    endpoint: AdapterEndpoint,
    #[serde(default)]
    query: Value,
    #[serde(default)]
    dataset: AdapterDataset,
}

#[derive(Debug, Deserialize)]
struct AdapterCaseMeta {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AdapterEndpoint {
    path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AdapterDataset {
    db_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct AdapterErrorBody {
    category: String,
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status")]
enum AdapterResponse {
    #[serde(rename = "success")]
    Success { payload: Value },
    #[serde(rename = "error")]
    Error { error: AdapterErrorBody },
}

enum AdapterFailure {
    Protocol(String),
    UnsupportedEndpoint(String),
    Ledger(LedgerError),
    /// A boundary reply with `success: false`, passed through with its category.
    Rejected { category: String, message: String },
}

impl From<LedgerError> for AdapterFailure {
    fn from(err: LedgerError) -> Self {
        AdapterFailure::Ledger(err)
    }
}

impl AdapterFailure {
    fn into_response(self) -> AdapterResponse {
        let (category, message, error_type) = match self {
            AdapterFailure::Protocol(msg) => ("ADAPTER_PROTOCOL_ERROR".to_string(), msg, "AdapterError"),
            AdapterFailure::UnsupportedEndpoint(msg) => {
                ("UNSUPPORTED_ENDPOINT".to_string(), msg, "AdapterError")
            }
            AdapterFailure::Ledger(err) => (err.kind().to_string(), err.to_string(), "LedgerError"),
            AdapterFailure::Rejected { category, message } => (category, message, "LedgerError"),
        };
        AdapterResponse::Error {
            error: AdapterErrorBody {
                category,
                message,
                error_type: error_type.to_string(),
            },
        }
    }
}

fn parse_bool_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|arg| arg == flag)
}

fn read_stdin_json() -> Result<Value, AdapterFailure> {
    let mut raw = String::new();
    io::stdin()
        .read_to_string(&mut raw)
        .map_err(|e| AdapterFailure::Protocol(format!("failed to read stdin: {e}")))?;
    if raw.trim().is_empty() {
        return Err(AdapterFailure::Protocol("empty stdin request".to_string()));
    }
    serde_json::from_str::<Value>(&raw)
        .map_err(|e| AdapterFailure::Protocol(format!("invalid JSON request: {e}")))
}

fn query_as<T: DeserializeOwned + Default>(query: Value, endpoint: &str) -> Result<T, AdapterFailure> {
    if query.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(query).map_err(|e| {
        AdapterFailure::Protocol(format!("request.query invalid for {endpoint}: {e}"))
    })
}

fn to_payload<T: Serialize>(value: T) -> Result<Value, AdapterFailure> {
    serde_json::to_value(value)
        .map_err(|e| AdapterFailure::Protocol(format!("serialize payload failed: {e}")))
}

fn dispatch(req: AdapterRequest) -> Result<Value, AdapterFailure> {
    if req.schema_version != 1 {
        return Err(AdapterFailure::Protocol(format!(
            "unsupported schema_version: {}",
            req.schema_version
        )));
    }

    let path = req
        .endpoint
        .path
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AdapterFailure::Protocol("request.endpoint.path missing".to_string()))?
        .to_string();

    let mut config = LedgerConfig::from_env()?;
    if let Some(db_path) = req
        .dataset
        .db_path
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        config.db_path = PathBuf::from(db_path);
    }
    debug!(endpoint = %path, db = %config.db_path.to_string_lossy(), "dispatching adapter request");

    match path.as_str() {
        "/api/health" => to_payload(json!({
            "ping": health_ping(),
            "metadata": app_metadata(),
        })),
        "/api/save-weight" => {
            let query: SaveWeightRequest = query_as(req.query, &path)?;
            let resp = save_weight_command(&config, &query)?;
            if !resp.success {
                return Err(AdapterFailure::Rejected {
                    category: resp.category.unwrap_or("UNKNOWN_ERROR").to_string(),
                    message: resp.error.unwrap_or_default(),
                });
            }
            to_payload(resp)
        }
        "/api/dashboard" => {
            let query: DashboardQueryRequest = query_as(req.query, &path)?;
            Ok(dashboard_query(&config, &query)?)
        }
        "/api/series" => {
            let query: SeriesQueryRequest = query_as(req.query, &path)?;
            Ok(series_query(&config, &query)?)
        }
        "/api/db/status" => to_payload(inspect_status_at_path(&config.db_path)?),
        "/api/db/migrate" => to_payload(apply_embedded_migrations(&config.db_path)?),
        "/api/preview" => {
            let query: SheetPreviewRequest = query_as(req.query, &path)?;
            Ok(preview_export_at_path(&query)?)
        }
        "/api/import" => {
            let query: SheetImportRequest = query_as(req.query, &path)?;
            Ok(import_export_at_db_path(&config.db_path, &query)?)
        }
        _ => Err(AdapterFailure::UnsupportedEndpoint(format!(
            "unsupported endpoint path: {path}"
        ))),
    }
}

fn main() {
    init_tracing();
    let args = env::args().skip(1).collect::<Vec<_>>();
    let pretty = parse_bool_flag(&args, "--pretty");

    let resp = match read_stdin_json()
        .and_then(|v| {
            serde_json::from_value::<AdapterRequest>(v)
                .map_err(|e| AdapterFailure::Protocol(format!("request root invalid: {e}")))
        })
        .and_then(|req| {
            if let Some(case_id) = req.case.as_ref().and_then(|c| c.id.as_deref()) {
                info!(case = case_id, "adapter case");
            }
            dispatch(req)
        }) {
        Ok(payload) => AdapterResponse::Success { payload },
        Err(failure) => failure.into_response(),
    };

    let out = if pretty {
        serde_json::to_string_pretty(&resp)
    } else {
        serde_json::to_string(&resp)
    }
    .unwrap_or_else(|e| {
        json!({
            "status": "error",
            "error": {
                "category": "ADAPTER_PROTOCOL_ERROR",
                "message": format!("serialize response failed: {e}"),
                "type": "SerializeError",
            }
        })
        .to_string()
    });

    print!("{out}");
}
