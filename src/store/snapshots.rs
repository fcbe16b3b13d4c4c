use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{PipelineError, PipelineResult};
use crate::model::{BackupSnapshot, BackupStatus, BackupSummary, Changeset, Record};

pub(super) fn insert_snapshot(
    connection: &Connection,
    snapshot: &BackupSnapshot,
) -> PipelineResult<()> {
    let snapshot_json = serde_json::to_string(&snapshot.records)?;
    let changesets_json = serde_json::to_string(&snapshot.changesets)?;

    connection.execute(
        "
        INSERT INTO record_backups(
          backup_id, created_at, reason, record_count, snapshot_json,
          changesets_json, checksum, status, rolled_back_at, expired_at
        )
        VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ",
        params![
            snapshot.id,
            snapshot.created_at,
            snapshot.reason,
            snapshot.record_count as i64,
            snapshot_json,
            changesets_json,
            snapshot.checksum,
            snapshot.status.as_str(),
            snapshot.rolled_back_at,
            snapshot.expired_at,
        ],
    )?;

    Ok(())
}

pub(super) fn load_snapshot(
    connection: &Connection,
    backup_id: &str,
) -> PipelineResult<Option<BackupSnapshot>> {
    let row = connection
        .query_row(
            "
            SELECT backup_id, created_at, reason, record_count, snapshot_json,
                   changesets_json, checksum, status, rolled_back_at, expired_at
            FROM record_backups
            WHERE backup_id = ?1
            ",
            [backup_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, Option<String>>(9)?,
                ))
            },
        )
        .optional()?;

    let Some((
        id,
        created_at,
        reason,
        record_count,
        snapshot_json,
        changesets_json,
        checksum,
        status,
        rolled_back_at,
        expired_at,
    )) = row
    else {
        return Ok(None);
    };

    let records: Vec<Record> = serde_json::from_str(&snapshot_json)?;
    let changesets: Vec<Changeset> = serde_json::from_str(&changesets_json)?;
    let status = status
        .parse::<BackupStatus>()
        .map_err(|_| PipelineError::SnapshotCorrupt(id.clone()))?;

    Ok(Some(BackupSnapshot {
        id,
        created_at,
        reason,
        record_count: record_count.max(0) as usize,
        records,
        changesets,
        checksum,
        status,
        rolled_back_at,
        expired_at,
    }))
}

pub(super) fn list_snapshots(connection: &Connection) -> PipelineResult<Vec<BackupSummary>> {
    let mut statement = connection.prepare(
        "
        SELECT backup_id, created_at, reason, record_count, status
        FROM record_backups
        ORDER BY created_at DESC, rowid DESC
        ",
    )?;

    let mut rows = statement.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let id: String = row.get(0)?;
        let status: String = row.get(4)?;
        let status = status
            .parse::<BackupStatus>()
            .map_err(|_| PipelineError::SnapshotCorrupt(id.clone()))?;

        out.push(BackupSummary {
            id,
            created_at: row.get(1)?,
            reason: row.get(2)?,
            record_count: row.get::<_, i64>(3)?.max(0) as usize,
            status,
        });
    }

    Ok(out)
}

/// Moves an `active` backup to `to`. Returns false when the backup was not active.
pub(super) fn transition_snapshot(
    connection: &Connection,
    backup_id: &str,
    to: BackupStatus,
    at: &str,
) -> PipelineResult<bool> {
    let changed = match to {
        BackupStatus::RolledBack => connection.execute(
            "
            UPDATE record_backups SET status = 'rolled_back', rolled_back_at = ?2
            WHERE backup_id = ?1 AND status = 'active'
            ",
            params![backup_id, at],
        )?,
        BackupStatus::Expired => connection.execute(
            "
            UPDATE record_backups SET status = 'expired', expired_at = ?2
            WHERE backup_id = ?1 AND status = 'active'
            ",
            params![backup_id, at],
        )?,
        BackupStatus::Active => 0,
    };

    Ok(changed == 1)
}
