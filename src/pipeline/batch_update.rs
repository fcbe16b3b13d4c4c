use std::collections::BTreeSet;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use super::auth::AdminContext;
use crate::error::{PipelineError, PipelineResult};
use crate::model::{BackupSnapshot, BackupStatus, Changeset, FieldValue, Record, change_rejection};
use crate::store::{RecordStore, missing_slugs};
use crate::util::{sha256_hex, utc_compact_string};

pub const BIN_NAME: &str = "foundry-steward";

const MAX_BACKUP_ID_ATTEMPTS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldPreview {
    pub field: String,
    pub current: FieldValue,
    pub proposed: FieldValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesetPreview {
    pub slug: String,
    pub name: String,
    pub reason: String,
    pub fields: Vec<FieldPreview>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordWriteResult {
    pub slug: String,
    pub success: bool,
    pub error_kind: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    pub applied_count: usize,
    pub failed_count: usize,
    pub backup_id: String,
    pub per_record_results: Vec<RecordWriteResult>,
    pub rollback_reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ApplyOutcome {
    DryRun { previews: Vec<ChangesetPreview> },
    Applied(ApplyReport),
}

pub fn rollback_reference(backup_id: &str) -> String {
    format!("{BIN_NAME} rollback --backup-id {backup_id}")
}

/// Checksum over the serialized pre-change rows and the triggering changesets.
pub fn snapshot_checksum(records: &[Record], changesets: &[Changeset]) -> PipelineResult<String> {
    let mut payload = serde_json::to_vec(records)?;
    payload.push(b'\n');
    payload.extend(serde_json::to_vec(changesets)?);
    Ok(sha256_hex(&payload))
}

pub fn validate_changesets(changesets: &[Changeset]) -> PipelineResult<()> {
    if changesets.is_empty() {
        return Err(PipelineError::InvalidChangeset(
            "batch contains no changesets".to_string(),
        ));
    }

    let mut seen = BTreeSet::new();
    for changeset in changesets {
        if !seen.insert(changeset.slug.as_str()) {
            return Err(PipelineError::InvalidChangeset(format!(
                "slug `{}` appears more than once in the batch",
                changeset.slug
            )));
        }
        if changeset.changes.is_empty() {
            return Err(PipelineError::InvalidChangeset(format!(
                "changeset for `{}` has no changes",
                changeset.slug
            )));
        }
        for (key, value) in &changeset.changes {
            if let Some(rejection) = change_rejection(key, value) {
                return Err(PipelineError::InvalidChangeset(format!(
                    "changeset for `{}` {rejection}",
                    changeset.slug
                )));
            }
        }
    }

    Ok(())
}

/// Existence check, backup, then isolated per-record writes.
pub fn apply_changesets(
    store: &dyn RecordStore,
    admin: &AdminContext,
    changesets: &[Changeset],
    dry_run: bool,
    reason: &str,
) -> PipelineResult<ApplyOutcome> {
    validate_changesets(changesets)?;

    let slugs: Vec<String> = changesets.iter().map(|c| c.slug.clone()).collect();
    let records = store.get_by_slugs(&slugs)?;
    let missing = missing_slugs(&slugs, &records);
    if !missing.is_empty() {
        warn!(missing = ?missing, "batch rejected: unknown slugs");
        return Err(PipelineError::NotFound {
            entity: "record",
            keys: missing,
        });
    }

    if dry_run {
        let previews = changesets
            .iter()
            .zip(records.iter())
            .map(|(changeset, record)| preview(changeset, record))
            .collect();
        return Ok(ApplyOutcome::DryRun { previews });
    }

    let backup_id = persist_backup(store, &records, changesets, reason)?;
    info!(
        backup_id = %backup_id,
        actor = admin.actor(),
        records = records.len(),
        "backup persisted; applying changesets"
    );

    let mut per_record_results = Vec::with_capacity(changesets.len());
    for changeset in changesets {
        match store.update_by_slug(&changeset.slug, &changeset.changes) {
            Ok(_) => per_record_results.push(RecordWriteResult {
                slug: changeset.slug.clone(),
                success: true,
                error_kind: None,
                error: None,
            }),
            Err(error) => {
                warn!(slug = %changeset.slug, error = %error, "record write failed");
                let error = match error {
                    PipelineError::RecordWrite { .. } => error,
                    other => PipelineError::RecordWrite {
                        slug: changeset.slug.clone(),
                        reason: other.to_string(),
                    },
                };
                per_record_results.push(RecordWriteResult {
                    slug: changeset.slug.clone(),
                    success: false,
                    error_kind: Some(error.kind().to_string()),
                    error: Some(error.to_string()),
                });
            }
        }
    }

    let applied_count = per_record_results.iter().filter(|r| r.success).count();
    Ok(ApplyOutcome::Applied(ApplyReport {
        applied_count,
        failed_count: per_record_results.len() - applied_count,
        rollback_reference: rollback_reference(&backup_id),
        backup_id,
        per_record_results,
    }))
}

fn persist_backup(
    store: &dyn RecordStore,
    records: &[Record],
    changesets: &[Changeset],
    reason: &str,
) -> PipelineResult<String> {
    let now = Utc::now();
    let checksum = snapshot_checksum(records, changesets)?;
    let backup_id = unused_backup_id(
        store,
        &format!("backup-{}-{}", utc_compact_string(now), &checksum[..8]),
    )?;

    let snapshot = BackupSnapshot {
        id: backup_id.clone(),
        created_at: now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        reason: reason.to_string(),
        record_count: records.len(),
        records: records.to_vec(),
        changesets: changesets.to_vec(),
        checksum,
        status: BackupStatus::Active,
        rolled_back_at: None,
        expired_at: None,
    };

    store.insert_snapshot(&snapshot).map_err(|error| match error {
        PipelineError::BackupPersistence(_) => error,
        other => PipelineError::BackupPersistence(other.to_string()),
    })?;

    match store.get_snapshot(&backup_id) {
        Ok(Some(stored)) if stored.checksum == snapshot.checksum => Ok(backup_id),
        Ok(Some(_)) => Err(PipelineError::BackupPersistence(format!(
            "backup {backup_id} read back with a different checksum"
        ))),
        Ok(None) => Err(PipelineError::BackupPersistence(format!(
            "backup {backup_id} was not found after insert"
        ))),
        Err(error) => Err(PipelineError::BackupPersistence(error.to_string())),
    }
}

/// Same rows and changesets within one second share a base id; later ones get `-2`, `-3`, ...
fn unused_backup_id(store: &dyn RecordStore, base: &str) -> PipelineResult<String> {
    for attempt in 1..=MAX_BACKUP_ID_ATTEMPTS {
        let candidate = if attempt == 1 {
            base.to_string()
        } else {
            format!("{base}-{attempt}")
        };
        match store.get_snapshot(&candidate) {
            Ok(None) => return Ok(candidate),
            Ok(Some(_)) => continue,
            Err(error) => return Err(PipelineError::BackupPersistence(error.to_string())),
        }
    }

    Err(PipelineError::BackupPersistence(format!(
        "no free backup id after {MAX_BACKUP_ID_ATTEMPTS} attempts for {base}"
    )))
}

fn preview(changeset: &Changeset, record: &Record) -> ChangesetPreview {
    ChangesetPreview {
        slug: record.slug.clone(),
        name: record.name.clone(),
        reason: changeset.reason.clone(),
        fields: changeset
            .changes
            .iter()
            .map(|(field, proposed)| FieldPreview {
                field: field.clone(),
                current: record.value_of(field),
                proposed: proposed.clone(),
            })
            .collect(),
    }
}
