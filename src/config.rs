use serde::Deserialize;
use std::env;
use std::path::PathBuf;

use crate::errors::{LedgerError, LedgerResult};

const DEFAULT_LEDGER_DB_RELATIVE_PATH: &str = "data/ledger/catweight.db";
const DEFAULT_SHEET_NAME: &str = "Hoja 1";
const DEFAULT_SHEET_RANGE: &str = "A:E";
const DEFAULT_HEADER_SENTINEL: &str = "Fecha";

/// Where the ledger lives and how its sheet is addressed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub db_path: PathBuf,
    pub sheet_id: Option<String>,
    pub sheet_name: String,
    pub range: String,
    pub header_sentinel: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_LEDGER_DB_RELATIVE_PATH),
            sheet_id: None,
            sheet_name: DEFAULT_SHEET_NAME.to_string(),
            range: DEFAULT_SHEET_RANGE.to_string(),
            header_sentinel: DEFAULT_HEADER_SENTINEL.to_string(),
        }
    }
}

fn env_text(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl LedgerConfig {
    /// Reads `.env` (if any) and the `CATWEIGHT_*` variables on top of the defaults.
    pub fn from_env() -> LedgerResult<Self> {
        dotenv::dotenv().ok();
        let mut cfg = Self::default();
        if let Some(path) = env_text("CATWEIGHT_DB_PATH") {
            cfg.db_path = PathBuf::from(path);
        }
        cfg.sheet_id = env_text("CATWEIGHT_SHEET_ID");
        if let Some(name) = env_text("CATWEIGHT_SHEET_NAME") {
            cfg.sheet_name = name;
        }
        if let Some(range) = env_text("CATWEIGHT_RANGE") {
            cfg.range = range;
        }
        if let Some(header) = env_text("CATWEIGHT_HEADER") {
            cfg.header_sentinel = header;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json(raw: &str) -> LedgerResult<Self> {
        let cfg = serde_json::from_str::<Self>(raw)
            .map_err(|e| LedgerError::Config(format!("invalid config JSON: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.db_path.as_os_str().is_empty() {
            return Err(LedgerError::Config("db_path must not be empty".to_string()));
        }
        if self.sheet_name.trim().is_empty() {
            return Err(LedgerError::Config("sheet_name must not be empty".to_string()));
        }
        if self.range.trim().is_empty() {
            return Err(LedgerError::Config("range must not be empty".to_string()));
        }
        Ok(())
    }

    /// Full A1 range of the ledger, e.g. `Hoja 1!A:E`.
    pub fn sheet_range(&self) -> String {
        format!("{}!{}", self.sheet_name, self.range)
    }

    /// gviz JSON export URL for the configured sheet, when a sheet id is set.
    pub fn gviz_url(&self) -> Option<String> {
        self.sheet_id.as_ref().map(|id| {
            format!(
                "https://docs.google.com/spreadsheets/d/{id}/gviz/tq?tqx=out:json&sheet={}",
                self.sheet_name.replace(' ', "%20")
            )
        })
    }
}
