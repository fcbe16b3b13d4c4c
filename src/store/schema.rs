use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};

use crate::error::PipelineResult;
use crate::util::now_utc_string;

pub(crate) const DB_SCHEMA_VERSION: &str = "0.3.0";

pub(super) fn configure_connection(connection: &Connection) -> PipelineResult<()> {
    // In-memory databases answer "memory" here; that is fine.
    let _mode: String =
        connection.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    connection.pragma_update(None, "synchronous", "NORMAL")?;
    connection.pragma_update(None, "foreign_keys", "ON")?;
    connection.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}

pub(super) fn ensure_schema(connection: &Connection) -> PipelineResult<()> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS records (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          slug TEXT NOT NULL UNIQUE,
          name TEXT NOT NULL,
          fields_json TEXT NOT NULL DEFAULT '{}',
          created_at TEXT NOT NULL,
          updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS record_backups (
          backup_id TEXT PRIMARY KEY,
          created_at TEXT NOT NULL,
          reason TEXT NOT NULL,
          record_count INTEGER NOT NULL,
          snapshot_json TEXT NOT NULL,
          changesets_json TEXT NOT NULL,
          checksum TEXT NOT NULL,
          status TEXT NOT NULL DEFAULT 'active'
            CHECK (status IN ('active', 'rolled_back', 'expired')),
          rolled_back_at TEXT
        );

        CREATE TABLE IF NOT EXISTS job_progress (
          job_id TEXT PRIMARY KEY,
          progress_json TEXT NOT NULL,
          updated_at TEXT NOT NULL,
          expires_at_epoch INTEGER NOT NULL
        );

        CREATE TRIGGER IF NOT EXISTS records_identity_immutable
        BEFORE UPDATE OF id, slug, created_at ON records
        BEGIN
          SELECT RAISE(ABORT, 'record identity columns are immutable');
        END;

        CREATE TRIGGER IF NOT EXISTS record_backups_snapshot_immutable
        BEFORE UPDATE OF backup_id, created_at, reason, record_count, snapshot_json, changesets_json, checksum
        ON record_backups
        BEGIN
          SELECT RAISE(ABORT, 'backup snapshots are immutable');
        END;

        CREATE TRIGGER IF NOT EXISTS record_backups_no_delete
        BEFORE DELETE ON record_backups
        BEGIN
          SELECT RAISE(ABORT, 'backup snapshots cannot be deleted');
        END;
        ",
    )?;

    // Added after the first release; older databases lack it.
    ensure_column_exists(connection, "record_backups", "expired_at TEXT")?;

    connection.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_record_backups_created ON record_backups(created_at);
        CREATE INDEX IF NOT EXISTS idx_record_backups_status ON record_backups(status);
        CREATE INDEX IF NOT EXISTS idx_job_progress_expiry ON job_progress(expires_at_epoch);
        ",
    )?;

    set_metadata(connection, "db_schema_version", DB_SCHEMA_VERSION)?;
    set_metadata(connection, "db_updated_at", &now_utc_string())?;

    Ok(())
}

fn ensure_column_exists(
    connection: &Connection,
    table_name: &str,
    column_definition: &str,
) -> PipelineResult<()> {
    let column_name = column_definition
        .split_whitespace()
        .next()
        .unwrap_or(column_definition);

    let pragma_sql = format!("PRAGMA table_info({table_name})");
    let mut statement = connection.prepare(&pragma_sql)?;

    let mut rows = statement.query([])?;
    while let Some(row) = rows.next()? {
        let existing_name: String = row.get(1)?;
        if existing_name == column_name {
            return Ok(());
        }
    }

    let alter_sql = format!("ALTER TABLE {table_name} ADD COLUMN {column_definition}");
    connection.execute(&alter_sql, [])?;

    Ok(())
}

pub(super) fn set_metadata(connection: &Connection, key: &str, value: &str) -> PipelineResult<()> {
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES(?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        params![key, value],
    )?;
    Ok(())
}

pub(super) fn get_metadata(connection: &Connection, key: &str) -> PipelineResult<Option<String>> {
    let value = connection
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            [key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}
