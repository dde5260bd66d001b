use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, Connection, TransactionBehavior};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::errors::{LedgerError, LedgerResult};
use crate::ledger_db::open_ledger_connection;
use crate::sheet::{CellValue, SheetRow};
use crate::store::LedgerStore;
use crate::subject::SHEET_WIDTH;
use crate::upsert::{plan_upsert, Measurement, WriteInstruction};

/// The ledger sheet kept in the `sheet_rows` table of a SQLite file.
#[derive(Debug, Clone)]
pub struct SqliteSheetStore {
    db_path: PathBuf,
}

fn cell_from_sql(value: ValueRef<'_>) -> CellValue {
    match value {
        ValueRef::Null => CellValue::Empty,
        ValueRef::Integer(i) => CellValue::Number(i as f64),
        ValueRef::Real(f) => CellValue::Number(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            CellValue::Text(String::from_utf8_lossy(bytes).to_string())
        }
    }
}

fn cell_to_sql(cell: &CellValue) -> SqlValue {
    match cell {
        CellValue::Empty => SqlValue::Null,
        CellValue::Bool(b) => SqlValue::Integer(i64::from(*b)),
        CellValue::Number(n) => SqlValue::Real(*n),
        CellValue::Text(s) => SqlValue::Text(s.clone()),
    }
}

fn load_rows(conn: &Connection) -> LedgerResult<Vec<SheetRow>> {
    let mut stmt = conn
        .prepare("SELECT c0, c1, c2, c3, c4 FROM sheet_rows ORDER BY row_index ASC")
        .map_err(|e| LedgerError::store("failed to query sheet_rows", e))?;
    let iter = stmt
        .query_map([], |row| {
            let mut cells = Vec::with_capacity(SHEET_WIDTH);
            for idx in 0..SHEET_WIDTH {
                cells.push(cell_from_sql(row.get_ref(idx)?));
            }
            Ok(cells)
        })
        .map_err(|e| LedgerError::store("failed to query sheet_rows", e))?;
    let mut out = Vec::new();
    for row in iter {
        out.push(row.map_err(|e| LedgerError::store("failed to read sheet row", e))?);
    }
    Ok(out)
}

fn write_instruction(conn: &Connection, instruction: &WriteInstruction) -> LedgerResult<()> {
    match instruction {
        WriteInstruction::UpdateCell {
            row_index,
            column_index,
            value,
        } => {
            if *column_index >= SHEET_WIDTH {
                return Err(LedgerError::StoreIo(format!(
                    "column {column_index} is outside the sheet"
                )));
            }
            // Snapshot positions map onto stored rows in row_index order.
            let stored_index = conn
                .query_row(
                    "SELECT row_index FROM sheet_rows ORDER BY row_index ASC LIMIT 1 OFFSET ?1",
                    [*row_index as i64],
                    |row| row.get::<_, i64>(0),
                )
                .map_err(|_| LedgerError::StoreIo(format!("row {row_index} is outside the table")))?;
            let sql = format!(
                "UPDATE sheet_rows SET c{column_index} = ?1, updated_at = datetime('now') WHERE row_index = ?2"
            );
            conn.execute(&sql, params![value, stored_index])
                .map_err(|e| LedgerError::store("failed to update sheet cell", e))?;
        }
        WriteInstruction::AppendRow { row } => {
            let mut cells = row.iter().map(cell_to_sql).collect::<Vec<_>>();
            if cells.len() > SHEET_WIDTH {
                return Err(LedgerError::StoreIo(format!(
                    "row has {} cells, the sheet has {SHEET_WIDTH} columns",
                    cells.len()
                )));
            }
            cells.resize(SHEET_WIDTH, SqlValue::Null);
            conn.execute(
                r#"
                INSERT INTO sheet_rows(row_index, c0, c1, c2, c3, c4)
                VALUES ((SELECT COALESCE(MAX(row_index) + 1, 0) FROM sheet_rows), ?1, ?2, ?3, ?4, ?5)
                "#,
                params![cells[0], cells[1], cells[2], cells[3], cells[4]],
            )
            .map_err(|e| LedgerError::store("failed to append sheet row", e))?;
        }
    }
    Ok(())
}

impl SqliteSheetStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn open(&self) -> LedgerResult<Connection> {
        if !self.db_path.exists() {
            return Err(LedgerError::StoreIo(format!(
                "database not found: {} (run migrate first)",
                self.db_path.to_string_lossy()
            )));
        }
        open_ledger_connection(&self.db_path)
    }
}

impl LedgerStore for SqliteSheetStore {
    fn read_rows(&self) -> LedgerResult<Vec<SheetRow>> {
        let conn = self.open()?;
        let rows = load_rows(&conn)?;
        debug!(rows = rows.len(), "read ledger sheet");
        Ok(rows)
    }

    fn execute(&self, instruction: &WriteInstruction) -> LedgerResult<()> {
        let conn = self.open()?;
        write_instruction(&conn, instruction)
    }

    /// Read, plan and write inside one IMMEDIATE transaction, so two writers
    /// can never both decide to append the same date.
    fn upsert(&self, measurement: &Measurement) -> LedgerResult<WriteInstruction> {
        let mut conn = self.open()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| LedgerError::store("failed to begin upsert transaction", e))?;
        let rows = load_rows(&tx)?;
        let instruction = plan_upsert(&rows, measurement)?;
        write_instruction(&tx, &instruction)?;
        tx.commit()
            .map_err(|e| LedgerError::store("failed to commit upsert", e))?;
        info!(
            date = %measurement.date_key,
            cat = %measurement.subject,
            weight = measurement.weight,
            appended = instruction.is_append(),
            "ledger upsert committed"
        );
        Ok(instruction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger_db::apply_embedded_migrations;
    use crate::ledger_db::test_support::create_temp_path;
    use crate::subject::Subject;
    use std::fs;

    fn migrated_store(prefix: &str) -> SqliteSheetStore {
        let db_path = create_temp_path(prefix, "db");
        apply_embedded_migrations(&db_path).expect("migrate temp db");
        SqliteSheetStore::new(db_path)
    }

    #[test]
    fn append_then_update_against_sqlite() {
        let store = migrated_store("catweight_sqlite_store_test");
        let m = Measurement::new("01/01/2025", Subject::Maite, 4.0).expect("measurement");
        let first = store.upsert(&m).expect("first upsert");
        assert!(first.is_append());

        let m2 = Measurement::new("01/01/2025", Subject::Gaudi, 5.5).expect("measurement");
        let second = store.upsert(&m2).expect("second upsert");
        assert_eq!(
            second,
            WriteInstruction::UpdateCell {
                row_index: 1,
                column_index: 1,
                value: 5.5
            }
        );

        let rows = store.read_rows().expect("read rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], CellValue::text("Fecha"));
        assert_eq!(rows[1][0], CellValue::text("01/01/2025"));
        assert_eq!(rows[1][1], CellValue::Number(5.5));
        assert_eq!(rows[1][2], CellValue::Number(4.0));
        assert_eq!(rows[1][3], CellValue::Empty);

        let _ = fs::remove_file(store.db_path());
    }

    #[test]
    fn update_addresses_snapshot_position_not_stored_index() {
        let store = migrated_store("catweight_sqlite_gap_test");
        let conn = Connection::open(store.db_path()).expect("open db");
        conn.execute_batch(
            r#"
            INSERT INTO sheet_rows(row_index, c0, c1) VALUES (10, '03/01/2025', 5.0);
            INSERT INTO sheet_rows(row_index, c0, c1) VALUES (20, '04/01/2025', 5.1);
            "#,
        )
        .expect("seed rows with gaps");

        let m = Measurement::new("04/01/2025", Subject::Gaudi, 5.3).expect("measurement");
        let instruction = store.upsert(&m).expect("upsert");
        assert_eq!(
            instruction,
            WriteInstruction::UpdateCell {
                row_index: 2,
                column_index: 1,
                value: 5.3
            }
        );
        let stored: f64 = conn
            .query_row("SELECT c1 FROM sheet_rows WHERE row_index = 20", [], |row| row.get(0))
            .expect("updated cell");
        assert_eq!(stored, 5.3);

        let _ = fs::remove_file(store.db_path());
    }

    #[test]
    fn missing_database_is_a_store_error() {
        let store = SqliteSheetStore::new(create_temp_path("catweight_missing", "db"));
        let err = store.read_rows().expect_err("missing db");
        assert_eq!(err.kind(), crate::errors::STORE_IO_ERROR);
    }
}
