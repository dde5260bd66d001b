use thiserror::Error;

pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
pub const STORE_IO_ERROR: &str = "STORE_IO_ERROR";
pub const CONFIG_ERROR: &str = "CONFIG_ERROR";

/// Failures surfaced by the ledger core and its store adapters.
///
/// Validation variants are raised before any store access. `StoreIo` carries
/// the store's (or upstream proxy's) own message so the caller can decide on
/// retries.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("invalid cat: {0}")]
    InvalidSubject(String),
    #[error("invalid measurement: {0}")]
    InvalidMeasurement(String),
    #[error("store error: {0}")]
    StoreIo(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::InvalidSubject(_) | LedgerError::InvalidMeasurement(_) => VALIDATION_ERROR,
            LedgerError::StoreIo(_) => STORE_IO_ERROR,
            LedgerError::Config(_) => CONFIG_ERROR,
        }
    }

    pub fn is_validation(&self) -> bool {
        self.kind() == VALIDATION_ERROR
    }

    pub(crate) fn store(context: &str, err: impl std::fmt::Display) -> Self {
        LedgerError::StoreIo(format!("{context}: {err}"))
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
