pub mod commands;
pub mod config;
pub mod dashboard;
pub mod errors;
pub mod gviz;
pub mod ledger_db;
pub mod proxy;
pub mod series;
pub mod service;
pub mod sheet;
pub mod sheet_date;
pub mod sheet_import;
pub mod sqlite_store;
pub mod store;
pub mod subject;
pub mod upsert;

pub use commands::{
    app_metadata, dashboard_query, health_ping, ledger_source, save_weight_command, series_query,
    SeriesQueryRequest,
};
pub use config::LedgerConfig;
pub use dashboard::{dashboard_payload, DashboardQueryRequest};
pub use errors::{LedgerError, LedgerResult};
pub use ledger_db::{apply_embedded_migrations, inspect_status_at_path};
pub use proxy::{parse_upstream_reply, save_weight, SaveWeightRequest, SaveWeightResponse};
pub use series::{delta, filter_range, latest, reconstruct, Reconstruction, SeriesWindow};
pub use service::LedgerService;
pub use sheet_import::{
    import_export_at_db_path, preview_export_at_path, SheetImportRequest, SheetPreviewRequest,
};
pub use sqlite_store::SqliteSheetStore;
pub use store::{LedgerStore, MemorySheetStore};
pub use subject::Subject;
pub use upsert::{plan_upsert, Measurement, WriteInstruction};

/// Installs the `tracing` subscriber used by the binaries. `RUST_LOG`
/// overrides the default `info` level. Logs go to stderr so stdout stays
/// machine-readable.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
