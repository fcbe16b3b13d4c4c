use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::auth::AdminContext;
use super::batch_update::{RecordWriteResult, snapshot_checksum};
use crate::error::{PipelineError, PipelineResult};
use crate::model::{BackupSnapshot, BackupStatus};
use crate::store::RecordStore;
use crate::util::now_utc_string;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackTarget {
    pub slug: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackReport {
    pub backup_id: String,
    pub restored_count: usize,
    pub failed_count: usize,
    pub rolled_back_at: String,
    pub per_record_results: Vec<RecordWriteResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RollbackOutcome {
    DryRun {
        backup_id: String,
        records: Vec<RollbackTarget>,
    },
    RolledBack(RollbackReport),
}

/// Loads an `active` backup whose checksum still matches its contents.
fn load_restorable(store: &dyn RecordStore, backup_id: &str) -> PipelineResult<BackupSnapshot> {
    let snapshot = store
        .get_snapshot(backup_id)?
        .ok_or_else(|| PipelineError::not_found("backup", backup_id))?;

    match snapshot.status {
        BackupStatus::Active => {}
        BackupStatus::RolledBack => return Err(PipelineError::AlreadyRolledBack(snapshot.id)),
        BackupStatus::Expired => return Err(PipelineError::Expired(snapshot.id)),
    }

    let checksum = snapshot_checksum(&snapshot.records, &snapshot.changesets)?;
    if checksum != snapshot.checksum || snapshot.records.len() != snapshot.record_count {
        return Err(PipelineError::SnapshotCorrupt(snapshot.id));
    }

    Ok(snapshot)
}

pub fn rollback(
    store: &dyn RecordStore,
    admin: &AdminContext,
    backup_id: &str,
    dry_run: bool,
) -> PipelineResult<RollbackOutcome> {
    let snapshot = load_restorable(store, backup_id)?;

    if dry_run {
        return Ok(RollbackOutcome::DryRun {
            backup_id: snapshot.id,
            records: snapshot
                .records
                .iter()
                .map(|record| RollbackTarget {
                    slug: record.slug.clone(),
                    name: record.name.clone(),
                })
                .collect(),
        });
    }

    let mut per_record_results = Vec::with_capacity(snapshot.records.len());
    for record in &snapshot.records {
        match store.restore_record(record) {
            Ok(()) => per_record_results.push(RecordWriteResult {
                slug: record.slug.clone(),
                success: true,
                error_kind: None,
                error: None,
            }),
            Err(error) => {
                warn!(backup_id, slug = %record.slug, error = %error, "record restore failed");
                per_record_results.push(RecordWriteResult {
                    slug: record.slug.clone(),
                    success: false,
                    error_kind: Some("per_record_write_failure".to_string()),
                    error: Some(error.to_string()),
                });
            }
        }
    }

    let rolled_back_at = now_utc_string();
    if !store.transition_snapshot(&snapshot.id, BackupStatus::RolledBack, &rolled_back_at)? {
        return Err(PipelineError::AlreadyRolledBack(snapshot.id));
    }

    let restored_count = per_record_results.iter().filter(|r| r.success).count();
    info!(
        backup_id,
        actor = admin.actor(),
        restored = restored_count,
        failed = per_record_results.len() - restored_count,
        "backup rolled back"
    );

    Ok(RollbackOutcome::RolledBack(RollbackReport {
        backup_id: snapshot.id,
        restored_count,
        failed_count: per_record_results.len() - restored_count,
        rolled_back_at,
        per_record_results,
    }))
}

/// Administrative `active -> expired`; an expired backup can never be rolled back.
pub fn expire_backup(
    store: &dyn RecordStore,
    admin: &AdminContext,
    backup_id: &str,
) -> PipelineResult<String> {
    let snapshot = store
        .get_snapshot(backup_id)?
        .ok_or_else(|| PipelineError::not_found("backup", backup_id))?;

    match snapshot.status {
        BackupStatus::Active => {}
        BackupStatus::RolledBack => return Err(PipelineError::AlreadyRolledBack(snapshot.id)),
        BackupStatus::Expired => return Err(PipelineError::Expired(snapshot.id)),
    }

    let expired_at = now_utc_string();
    if !store.transition_snapshot(backup_id, BackupStatus::Expired, &expired_at)? {
        return Err(PipelineError::Expired(snapshot.id));
    }

    info!(backup_id, actor = admin.actor(), "backup expired");
    Ok(expired_at)
}

/// Expires every active backup created before `now - max_age`. Returns the expired ids.
pub fn expire_older_than(
    store: &dyn RecordStore,
    admin: &AdminContext,
    max_age: Duration,
    now: DateTime<Utc>,
) -> PipelineResult<Vec<String>> {
    let cutoff = now - max_age;
    let mut expired = Vec::new();

    for summary in store.list_snapshots()? {
        if summary.status != BackupStatus::Active {
            continue;
        }
        let created = match DateTime::parse_from_rfc3339(&summary.created_at) {
            Ok(created) => created.with_timezone(&Utc),
            Err(error) => {
                warn!(backup_id = %summary.id, error = %error, "skipping backup with unreadable timestamp");
                continue;
            }
        };
        if created < cutoff {
            expire_backup(store, admin, &summary.id)?;
            expired.push(summary.id);
        }
    }

    Ok(expired)
}
