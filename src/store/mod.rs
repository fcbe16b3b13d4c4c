use std::path::Path;

use rusqlite::{Connection, OpenFlags};

use crate::error::PipelineResult;
use crate::model::{
    BackupSnapshot, BackupStatus, BackupSummary, FieldMap, NewRecord, Record, RecordSelector,
};

mod progress;
mod records;
mod schema;
mod snapshots;
#[cfg(test)]
pub(crate) mod testing;

pub use progress::SqliteProgressStore;
pub(crate) use records::missing_slugs;
pub(crate) use schema::DB_SCHEMA_VERSION;

pub const ADMIN_DIGEST_KEY: &str = "admin_secret_sha256";

/// Record and snapshot persistence used by the validation and update pipeline.
pub trait RecordStore {
    fn insert_record(&self, record: &NewRecord) -> PipelineResult<Record>;

    /// `RecordSelector::Slugs` fails with `NotFound` when any slug is unknown.
    fn select_records(&self, selector: &RecordSelector) -> PipelineResult<Vec<Record>>;

    /// Found records in request order; unknown slugs are skipped.
    fn get_by_slugs(&self, slugs: &[String]) -> PipelineResult<Vec<Record>>;

    /// Merges `changes` into the record; a null value removes the field.
    fn update_by_slug(&self, slug: &str, changes: &FieldMap) -> PipelineResult<Record>;

    /// Writes name and fields of a snapshot row back; id and created_at are left alone.
    fn restore_record(&self, snapshot_row: &Record) -> PipelineResult<()>;

    fn insert_snapshot(&self, snapshot: &BackupSnapshot) -> PipelineResult<()>;

    fn get_snapshot(&self, backup_id: &str) -> PipelineResult<Option<BackupSnapshot>>;

    /// Newest first.
    fn list_snapshots(&self) -> PipelineResult<Vec<BackupSummary>>;

    /// Conditional `active -> to` transition; false when the backup was not active.
    fn transition_snapshot(
        &self,
        backup_id: &str,
        to: BackupStatus,
        at: &str,
    ) -> PipelineResult<bool>;
}

pub struct SqliteStore {
    connection: Connection,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> PipelineResult<Self> {
        let connection = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::initialize(connection)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> PipelineResult<Self> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(connection: Connection) -> PipelineResult<Self> {
        schema::configure_connection(&connection)?;
        schema::ensure_schema(&connection)?;
        Ok(Self { connection })
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn count_records(&self) -> PipelineResult<i64> {
        records::count_records(&self.connection)
    }

    pub fn metadata(&self, key: &str) -> PipelineResult<Option<String>> {
        schema::get_metadata(&self.connection, key)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> PipelineResult<()> {
        schema::set_metadata(&self.connection, key, value)
    }
}

impl RecordStore for SqliteStore {
    fn insert_record(&self, record: &NewRecord) -> PipelineResult<Record> {
        records::insert_record(&self.connection, record)
    }

    fn select_records(&self, selector: &RecordSelector) -> PipelineResult<Vec<Record>> {
        records::select_records(&self.connection, selector)
    }

    fn get_by_slugs(&self, slugs: &[String]) -> PipelineResult<Vec<Record>> {
        records::load_records_by_slugs(&self.connection, slugs)
    }

    fn update_by_slug(&self, slug: &str, changes: &FieldMap) -> PipelineResult<Record> {
        records::update_record(&self.connection, slug, changes)
    }

    fn restore_record(&self, snapshot_row: &Record) -> PipelineResult<()> {
        records::restore_record(&self.connection, snapshot_row)
    }

    fn insert_snapshot(&self, snapshot: &BackupSnapshot) -> PipelineResult<()> {
        snapshots::insert_snapshot(&self.connection, snapshot)
    }

    fn get_snapshot(&self, backup_id: &str) -> PipelineResult<Option<BackupSnapshot>> {
        snapshots::load_snapshot(&self.connection, backup_id)
    }

    fn list_snapshots(&self) -> PipelineResult<Vec<BackupSummary>> {
        snapshots::list_snapshots(&self.connection)
    }

    fn transition_snapshot(
        &self,
        backup_id: &str,
        to: BackupStatus,
        at: &str,
    ) -> PipelineResult<bool> {
        snapshots::transition_snapshot(&self.connection, backup_id, to, at)
    }
}
