use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::{PipelineError, PipelineResult};
use crate::model::{FieldMap, NAME_KEY, NewRecord, Record, RecordSelector};
use crate::util::now_utc_string;

const RECORD_COLUMNS: &str = "id, slug, name, fields_json, created_at, updated_at";

struct RecordRow {
    id: i64,
    slug: String,
    name: String,
    fields_json: String,
    created_at: String,
    updated_at: String,
}

impl RecordRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            slug: row.get(1)?,
            name: row.get(2)?,
            fields_json: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn into_record(self) -> PipelineResult<Record> {
        let fields: FieldMap = serde_json::from_str(&self.fields_json)?;
        Ok(Record {
            id: self.id,
            slug: self.slug,
            name: self.name,
            fields,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub(super) fn insert_record(connection: &Connection, record: &NewRecord) -> PipelineResult<Record> {
    let now = now_utc_string();
    let fields = without_nulls(&record.fields);
    let fields_json = serde_json::to_string(&fields)?;

    connection.execute(
        "
        INSERT INTO records(slug, name, fields_json, created_at, updated_at)
        VALUES(?1, ?2, ?3, ?4, ?4)
        ",
        params![record.slug, record.name, fields_json, now],
    )?;

    load_record(connection, &record.slug)?
        .ok_or_else(|| PipelineError::not_found("record", record.slug.clone()))
}

pub(super) fn load_record(connection: &Connection, slug: &str) -> PipelineResult<Option<Record>> {
    let row = connection
        .query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM records WHERE slug = ?1"),
            [slug],
            RecordRow::from_row,
        )
        .optional()?;

    row.map(RecordRow::into_record).transpose()
}

pub(super) fn load_records_by_slugs(
    connection: &Connection,
    slugs: &[String],
) -> PipelineResult<Vec<Record>> {
    let mut out = Vec::with_capacity(slugs.len());
    for slug in slugs {
        if let Some(record) = load_record(connection, slug)? {
            out.push(record);
        }
    }
    Ok(out)
}

pub(super) fn select_records(
    connection: &Connection,
    selector: &RecordSelector,
) -> PipelineResult<Vec<Record>> {
    let (sql, limit) = match selector {
        RecordSelector::All => (
            format!("SELECT {RECORD_COLUMNS} FROM records ORDER BY slug ASC"),
            None,
        ),
        RecordSelector::First(limit) => (
            format!("SELECT {RECORD_COLUMNS} FROM records ORDER BY slug ASC LIMIT ?1"),
            Some(*limit as i64),
        ),
        RecordSelector::Slugs(slugs) => {
            let records = load_records_by_slugs(connection, slugs)?;
            let missing = missing_slugs(slugs, &records);
            if !missing.is_empty() {
                return Err(PipelineError::NotFound {
                    entity: "record",
                    keys: missing,
                });
            }
            return Ok(records);
        }
    };

    let mut statement = connection.prepare(&sql)?;
    let mut rows = match limit {
        Some(limit) => statement.query([limit])?,
        None => statement.query([])?,
    };

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(RecordRow::from_row(row)?.into_record()?);
    }

    Ok(out)
}

pub(super) fn update_record(
    connection: &Connection,
    slug: &str,
    changes: &FieldMap,
) -> PipelineResult<Record> {
    let tx = connection.unchecked_transaction()?;

    let Some(current) = load_record(&tx, slug)? else {
        return Err(PipelineError::not_found("record", slug));
    };

    let mut name = current.name.clone();
    let mut fields = current.fields.clone();
    for (key, value) in changes {
        if key == NAME_KEY {
            name = value.to_string();
            continue;
        }
        if value.is_null() {
            fields.remove(key);
        } else {
            fields.insert(key.clone(), value.clone());
        }
    }

    let fields_json = serde_json::to_string(&fields)?;
    tx.execute(
        "UPDATE records SET name = ?2, fields_json = ?3, updated_at = ?4 WHERE slug = ?1",
        params![slug, name, fields_json, now_utc_string()],
    )?;

    let updated = load_record(&tx, slug)?.ok_or_else(|| PipelineError::not_found("record", slug))?;
    tx.commit()?;

    Ok(updated)
}

pub(super) fn restore_record(connection: &Connection, snapshot_row: &Record) -> PipelineResult<()> {
    let fields_json = serde_json::to_string(&without_nulls(&snapshot_row.fields))?;
    let changed = connection.execute(
        "UPDATE records SET name = ?2, fields_json = ?3, updated_at = ?4 WHERE slug = ?1",
        params![
            snapshot_row.slug,
            snapshot_row.name,
            fields_json,
            snapshot_row.updated_at
        ],
    )?;

    if changed == 0 {
        return Err(PipelineError::not_found("record", snapshot_row.slug.clone()));
    }

    Ok(())
}

pub(super) fn count_records(connection: &Connection) -> PipelineResult<i64> {
    let count = connection.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
    Ok(count)
}

pub(crate) fn missing_slugs(requested: &[String], found: &[Record]) -> Vec<String> {
    let mut missing = Vec::new();
    for slug in requested {
        if !found.iter().any(|record| &record.slug == slug) && !missing.contains(slug) {
            missing.push(slug.clone());
        }
    }
    missing
}

fn without_nulls(fields: &FieldMap) -> FieldMap {
    fields
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
