use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use crate::errors::{LedgerError, LedgerResult};

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_init.sql",
        include_str!("../db/migrations/0001_init.sql"),
    ),
    (
        "0002_seed_sheet_header.sql",
        include_str!("../db/migrations/0002_seed_sheet_header.sql"),
    ),
];

#[derive(Debug, Serialize)]
pub struct LedgerDbStatus {
    pub db_path: String,
    pub exists: bool,
    pub migration_files: Vec<String>,
    pub applied_versions: Vec<String>,
    pub pending_versions: Vec<String>,
    pub schema_migrations_table_exists: bool,
    pub row_count: i64,
    pub ready: bool,
}

#[derive(Debug, Serialize)]
pub struct LedgerDbMigrateResult {
    pub db_path: String,
    pub created: bool,
    pub applied_now: Vec<String>,
    pub skipped: Vec<String>,
    pub applied_total: usize,
    pub pending_total: usize,
}

pub(crate) fn open_ledger_connection(db_path: &Path) -> LedgerResult<Connection> {
    let conn = Connection::open(db_path).map_err(|e| LedgerError::store("failed to open database", e))?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(|e| LedgerError::store("failed to set busy timeout", e))?;
    Ok(conn)
}

fn ensure_schema_migrations_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        "#,
    )
}

fn has_table(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1)",
        [table],
        |row| row.get::<_, i64>(0),
    )
    .map(|v| v != 0)
}

fn load_applied_versions(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version ASC")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut versions = Vec::new();
    for row in rows {
        versions.push(row?);
    }
    Ok(versions)
}

pub fn inspect_status_at_path(db_path: &Path) -> LedgerResult<LedgerDbStatus> {
    let migration_files = MIGRATIONS
        .iter()
        .map(|(v, _)| (*v).to_string())
        .collect::<Vec<_>>();
    if !db_path.exists() {
        return Ok(LedgerDbStatus {
            db_path: db_path.to_string_lossy().to_string(),
            exists: false,
            migration_files: migration_files.clone(),
            applied_versions: Vec::new(),
            pending_versions: migration_files,
            schema_migrations_table_exists: false,
            row_count: 0,
            ready: false,
        });
    }

    let conn = open_ledger_connection(db_path)?;
    let schema_table_exists = has_table(&conn, "schema_migrations")
        .map_err(|e| LedgerError::store("failed to check schema_migrations", e))?;
    let applied_versions = if schema_table_exists {
        load_applied_versions(&conn)
            .map_err(|e| LedgerError::store("failed to read schema_migrations", e))?
    } else {
        Vec::new()
    };
    let applied_set = applied_versions.iter().cloned().collect::<HashSet<_>>();
    let pending_versions = migration_files
        .iter()
        .filter(|v| !applied_set.contains(*v))
        .cloned()
        .collect::<Vec<_>>();

    let row_count = if has_table(&conn, "sheet_rows")
        .map_err(|e| LedgerError::store("failed to check sheet_rows", e))?
    {
        conn.query_row("SELECT COUNT(*) FROM sheet_rows", [], |row| row.get::<_, i64>(0))
            .map_err(|e| LedgerError::store("failed to count sheet_rows", e))?
    } else {
        0
    };

    Ok(LedgerDbStatus {
        db_path: db_path.to_string_lossy().to_string(),
        exists: true,
        migration_files,
        applied_versions,
        pending_versions: pending_versions.clone(),
        schema_migrations_table_exists: schema_table_exists,
        row_count,
        ready: pending_versions.is_empty(),
    })
}

pub fn apply_embedded_migrations(db_path: &Path) -> LedgerResult<LedgerDbMigrateResult> {
    let created = !db_path.exists();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| LedgerError::store("failed to create database directory", e))?;
    }

    let mut conn = open_ledger_connection(db_path)?;
    ensure_schema_migrations_table(&conn)
        .map_err(|e| LedgerError::store("failed to create schema_migrations", e))?;

    let already = load_applied_versions(&conn)
        .map_err(|e| LedgerError::store("failed to read applied migrations", e))?
        .into_iter()
        .collect::<HashSet<_>>();

    let mut applied_now = Vec::new();
    let mut skipped = Vec::new();

    for (version, sql) in MIGRATIONS {
        if already.contains(*version) {
            skipped.push((*version).to_string());
            continue;
        }
        let tx = conn
            .transaction()
            .map_err(|e| LedgerError::store(&format!("failed to begin migration {version}"), e))?;
        tx.execute_batch(sql)
            .map_err(|e| LedgerError::store(&format!("migration {version} failed"), e))?;
        tx.execute(
            "INSERT INTO schema_migrations(version) VALUES (?1)",
            [*version],
        )
        .map_err(|e| LedgerError::store(&format!("failed to record migration {version}"), e))?;
        tx.commit()
            .map_err(|e| LedgerError::store(&format!("failed to commit migration {version}"), e))?;
        info!(version, "applied ledger migration");
        applied_now.push((*version).to_string());
    }

    let final_applied_total = load_applied_versions(&conn)
        .map_err(|e| LedgerError::store("failed to read migration result", e))?
        .len();
    let pending_total = MIGRATIONS.len().saturating_sub(final_applied_total);

    Ok(LedgerDbMigrateResult {
        db_path: db_path.to_string_lossy().to_string(),
        created,
        applied_now,
        skipped,
        applied_total: final_applied_total,
        pending_total,
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::create_temp_path;
    use super::*;
    use std::fs;

    #[test]
    fn migrate_is_idempotent_and_seeds_the_header_row() {
        let db_path = create_temp_path("catweight_ledger_db_test", "db");

        let before = inspect_status_at_path(&db_path).expect("status before");
        assert!(!before.exists);
        assert_eq!(before.pending_versions.len(), MIGRATIONS.len());

        let first = apply_embedded_migrations(&db_path).expect("first migrate");
        assert!(first.created);
        assert_eq!(first.applied_now.len(), MIGRATIONS.len());
        let second = apply_embedded_migrations(&db_path).expect("second migrate");
        assert!(second.applied_now.is_empty());
        assert_eq!(second.skipped.len(), MIGRATIONS.len());
        assert_eq!(second.pending_total, 0);

        let status = inspect_status_at_path(&db_path).expect("status after");
        assert!(status.ready);
        assert_eq!(status.row_count, 1);

        let conn = Connection::open(&db_path).expect("open migrated db");
        let header: String = conn
            .query_row("SELECT c0 FROM sheet_rows WHERE row_index = 0", [], |row| row.get(0))
            .expect("header row");
        assert_eq!(header, "Fecha");

        let _ = fs::remove_file(&db_path);
    }
}
