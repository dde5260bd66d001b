use std::sync::Mutex;
use tracing::{info, warn};

use crate::config::LedgerConfig;
use crate::errors::{LedgerError, LedgerResult};
use crate::ledger_db::apply_embedded_migrations;
use crate::series::{reconstruct, Reconstruction};
use crate::sheet::raw_rows_from_sheet;
use crate::sqlite_store::SqliteSheetStore;
use crate::store::LedgerStore;
use crate::upsert::{Measurement, WriteInstruction};

/// Ledger operations over one store. Writes go through a single lock so at
/// most one upsert is in flight per service.
pub struct LedgerService<S> {
    store: S,
    config: LedgerConfig,
    write_lock: Mutex<()>,
}

impl<S: LedgerStore> LedgerService<S> {
    pub fn new(store: S, config: LedgerConfig) -> Self {
        Self {
            store,
            config,
            write_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn record_measurement(&self, measurement: &Measurement) -> LedgerResult<WriteInstruction> {
        // The guarded value is (), so a poisoned lock carries no broken state.
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let instruction = self.store.upsert(measurement).map_err(|err| {
            warn!(date = %measurement.date_key, cat = %measurement.subject, error = %err, "upsert failed");
            err
        })?;
        info!(
            date = %measurement.date_key,
            cat = %measurement.subject,
            weight = measurement.weight,
            range = %instruction.a1_range(&self.config),
            "weight recorded"
        );
        Ok(instruction)
    }

    pub fn load_series(&self) -> LedgerResult<Reconstruction> {
        let rows = self.store.read_rows()?;
        Ok(reconstruct(
            &raw_rows_from_sheet(&rows),
            &self.config.header_sentinel,
        ))
    }
}

impl LedgerService<SqliteSheetStore> {
    /// Opens the configured SQLite ledger, applying pending migrations first.
    pub fn open(config: LedgerConfig) -> LedgerResult<Self> {
        config.validate()?;
        let migrated = apply_embedded_migrations(&config.db_path)?;
        if !migrated.applied_now.is_empty() {
            info!(applied = ?migrated.applied_now, db = %migrated.db_path, "ledger database migrated");
        }
        if migrated.pending_total > 0 {
            return Err(LedgerError::StoreIo(format!(
                "{} migrations still pending for {}",
                migrated.pending_total, migrated.db_path
            )));
        }
        Ok(Self::new(SqliteSheetStore::new(&config.db_path), config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger_db::test_support::create_temp_path;
    use crate::sheet::CellValue;
    use crate::store::MemorySheetStore;
    use crate::subject::Subject;
    use std::fs;

    fn header() -> Vec<CellValue> {
        ["Fecha", "Gaudí", "Maite", "Benito", "Cleopatra"]
            .into_iter()
            .map(CellValue::text)
            .collect()
    }

    #[test]
    fn recorded_weights_show_up_in_the_series() {
        let service = LedgerService::new(
            MemorySheetStore::new(vec![header()]),
            LedgerConfig::default(),
        );
        for (date, cat, weight) in [
            ("08/01/2025", "Maite", 4.2),
            ("01/01/2025", "Maite", 4.0),
            ("08/01/2025", "Benito", 6.1),
        ] {
            let m = Measurement::from_parts(date, cat, weight).expect("measurement");
            service.record_measurement(&m).expect("record");
        }

        let out = service.load_series().expect("series");
        assert_eq!(out.series.len(), 2);
        assert_eq!(out.series[0].date_key, "01/01/2025");
        assert_eq!(out.series[1].value(Subject::Maite), Some(4.2));
        assert_eq!(out.series[1].value(Subject::Benito), Some(6.1));
        assert_eq!(out.skipped.len(), 1);
    }

    #[test]
    fn open_migrates_and_serves_sqlite_ledger() {
        let db_path = create_temp_path("catweight_service_test", "db");
        let config = LedgerConfig {
            db_path: db_path.clone(),
            ..LedgerConfig::default()
        };
        let service = LedgerService::open(config.clone()).expect("open service");
        let m = Measurement::new("2025-02-01", Subject::Cleopatra, 2.4).expect("measurement");
        let instruction = service.record_measurement(&m).expect("record");
        assert!(instruction.is_append());

        let reopened = LedgerService::open(config).expect("reopen service");
        let out = reopened.load_series().expect("series");
        assert_eq!(out.series.len(), 1);
        assert_eq!(out.series[0].date_key, "01/02/2025");
        assert_eq!(out.series[0].value(Subject::Cleopatra), Some(2.4));

        let _ = fs::remove_file(&db_path);
    }
}
