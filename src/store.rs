use std::sync::Mutex;

use crate::errors::{LedgerError, LedgerResult};
use crate::sheet::SheetRow;
use crate::upsert::{apply_instruction, plan_upsert, Measurement, WriteInstruction};

/// Backing table of the ledger: column 0 holds the date, columns 1..=4 the
/// cats. Row indexes are positions in the snapshot returned by `read_rows`.
pub trait LedgerStore {
    fn read_rows(&self) -> LedgerResult<Vec<SheetRow>>;

    fn execute(&self, instruction: &WriteInstruction) -> LedgerResult<()>;

    /// Read, plan and write. The default is not atomic against other writers
    /// of the same table; stores with transactions override it.
    fn upsert(&self, measurement: &Measurement) -> LedgerResult<WriteInstruction> {
        let rows = self.read_rows()?;
        let instruction = plan_upsert(&rows, measurement)?;
        self.execute(&instruction)?;
        Ok(instruction)
    }
}

/// Table held in memory, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySheetStore {
    rows: Mutex<Vec<SheetRow>>,
}

impl MemorySheetStore {
    pub fn new(rows: Vec<SheetRow>) -> Self {
        Self {
            rows: Mutex::new(rows),
        }
    }

    fn guard(&self) -> LedgerResult<std::sync::MutexGuard<'_, Vec<SheetRow>>> {
        self.rows
            .lock()
            .map_err(|_| LedgerError::StoreIo("in-memory sheet lock poisoned".to_string()))
    }
}

impl LedgerStore for MemorySheetStore {
    fn read_rows(&self) -> LedgerResult<Vec<SheetRow>> {
        Ok(self.guard()?.clone())
    }

    fn execute(&self, instruction: &WriteInstruction) -> LedgerResult<()> {
        let mut rows = self.guard()?;
        apply_instruction(&mut rows, instruction)
    }

    fn upsert(&self, measurement: &Measurement) -> LedgerResult<WriteInstruction> {
        let mut rows = self.guard()?;
        let instruction = plan_upsert(&rows, measurement)?;
        apply_instruction(&mut rows, &instruction)?;
        Ok(instruction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::CellValue;
    use crate::subject::Subject;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn memory_store_upserts_in_place() {
        let store = MemorySheetStore::default();
        let m = Measurement::new("01/01/2025", Subject::Maite, 4.0).expect("measurement");
        assert!(store.upsert(&m).expect("append").is_append());
        let again = Measurement::new("01/01/2025", Subject::Benito, 6.0).expect("measurement");
        assert!(!store.upsert(&again).expect("update").is_append());

        let rows = store.read_rows().expect("read");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][2], CellValue::Number(4.0));
        assert_eq!(rows[0][3], CellValue::Number(6.0));
    }

    #[test]
    fn concurrent_upserts_for_one_date_leave_one_row() {
        let store = Arc::new(MemorySheetStore::default());
        let handles = Subject::ALL
            .into_iter()
            .map(|subject| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let m = Measurement::new("02/02/2025", subject, 3.0).expect("measurement");
                    store.upsert(&m).expect("upsert");
                })
            })
            .collect::<Vec<_>>();
        for h in handles {
            h.join().expect("join writer");
        }

        let rows = store.read_rows().expect("read");
        assert_eq!(rows.len(), 1);
        assert!(rows[0][1..].iter().all(|c| *c == CellValue::Number(3.0)));
    }
}
