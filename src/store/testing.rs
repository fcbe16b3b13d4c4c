use std::cell::{Cell, RefCell};
use std::collections::HashSet;

use super::{RecordStore, SqliteStore};
use crate::error::{PipelineError, PipelineResult};
use crate::model::{
    BackupSnapshot, BackupStatus, BackupSummary, FieldMap, FieldValue, NewRecord, Record,
    RecordSelector,
};

pub(crate) fn seeded_store(entries: Vec<(&str, &str, Vec<(&str, FieldValue)>)>) -> SqliteStore {
    let store = SqliteStore::open_in_memory().expect("in-memory store should open");
    for (slug, name, fields) in entries {
        let record = NewRecord {
            slug: slug.to_string(),
            name: name.to_string(),
            fields: fields
                .into_iter()
                .map(|(key, value)| (key.to_string(), value))
                .collect(),
        };
        store.insert_record(&record).expect("seed record should insert");
    }
    store
}

pub(crate) fn text(value: &str) -> FieldValue {
    FieldValue::Text(value.to_string())
}

/// Full dump of both tables, used to prove a call left the store untouched.
pub(crate) fn dump(store: &SqliteStore) -> String {
    let mut out = String::new();
    for sql in [
        "SELECT id || '|' || slug || '|' || name || '|' || fields_json || '|' || created_at || '|' || updated_at FROM records ORDER BY id",
        "SELECT backup_id || '|' || status FROM record_backups ORDER BY backup_id",
    ] {
        let mut statement = store.connection().prepare(sql).expect("dump query should prepare");
        let rows = statement
            .query_map([], |row| row.get::<_, String>(0))
            .expect("dump query should run");
        for row in rows {
            out.push_str(&row.expect("dump row should decode"));
            out.push('\n');
        }
    }
    out
}

/// Wraps a real store and injects failures into selected operations.
pub(crate) struct FaultyStore<'a> {
    pub(crate) inner: &'a SqliteStore,
    pub(crate) fail_update_slugs: HashSet<String>,
    pub(crate) fail_restore_slugs: HashSet<String>,
    pub(crate) fail_snapshot_insert: bool,
    /// Simulates a crash right after the backup is written: every update fails.
    pub(crate) crash_after_snapshot: bool,
    pub(crate) update_calls: Cell<usize>,
    pub(crate) events: RefCell<Vec<String>>,
}

impl<'a> FaultyStore<'a> {
    pub(crate) fn new(inner: &'a SqliteStore) -> Self {
        Self {
            inner,
            fail_update_slugs: HashSet::new(),
            fail_restore_slugs: HashSet::new(),
            fail_snapshot_insert: false,
            crash_after_snapshot: false,
            update_calls: Cell::new(0),
            events: RefCell::new(Vec::new()),
        }
    }
}

impl RecordStore for FaultyStore<'_> {
    fn insert_record(&self, record: &NewRecord) -> PipelineResult<Record> {
        self.inner.insert_record(record)
    }

    fn select_records(&self, selector: &RecordSelector) -> PipelineResult<Vec<Record>> {
        self.inner.select_records(selector)
    }

    fn get_by_slugs(&self, slugs: &[String]) -> PipelineResult<Vec<Record>> {
        self.events.borrow_mut().push("get_by_slugs".to_string());
        self.inner.get_by_slugs(slugs)
    }

    fn update_by_slug(&self, slug: &str, changes: &FieldMap) -> PipelineResult<Record> {
        self.update_calls.set(self.update_calls.get() + 1);
        self.events.borrow_mut().push(format!("update:{slug}"));
        if self.crash_after_snapshot || self.fail_update_slugs.contains(slug) {
            return Err(PipelineError::RecordWrite {
                slug: slug.to_string(),
                reason: "injected write failure".to_string(),
            });
        }
        self.inner.update_by_slug(slug, changes)
    }

    fn restore_record(&self, snapshot_row: &Record) -> PipelineResult<()> {
        self.events
            .borrow_mut()
            .push(format!("restore:{}", snapshot_row.slug));
        if self.fail_restore_slugs.contains(&snapshot_row.slug) {
            return Err(PipelineError::RecordWrite {
                slug: snapshot_row.slug.clone(),
                reason: "injected restore failure".to_string(),
            });
        }
        self.inner.restore_record(snapshot_row)
    }

    fn insert_snapshot(&self, snapshot: &BackupSnapshot) -> PipelineResult<()> {
        self.events.borrow_mut().push("insert_snapshot".to_string());
        if self.fail_snapshot_insert {
            return Err(PipelineError::BackupPersistence("injected disk full".to_string()));
        }
        self.inner.insert_snapshot(snapshot)
    }

    fn get_snapshot(&self, backup_id: &str) -> PipelineResult<Option<BackupSnapshot>> {
        self.inner.get_snapshot(backup_id)
    }

    fn list_snapshots(&self) -> PipelineResult<Vec<BackupSummary>> {
        self.inner.list_snapshots()
    }

    fn transition_snapshot(
        &self,
        backup_id: &str,
        to: BackupStatus,
        at: &str,
    ) -> PipelineResult<bool> {
        self.inner.transition_snapshot(backup_id, to, at)
    }
}
