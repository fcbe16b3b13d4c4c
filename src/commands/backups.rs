use std::io::Write;

use anyhow::Result;
use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::info;

use super::output;
use crate::cli::{BackupsArgs, BackupsCommand, BackupsExpireArgs, BackupsListArgs};
use crate::pipeline::rollback::{expire_backup, expire_older_than};
use crate::store::RecordStore;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExpireSummary {
    expired: Vec<String>,
}

pub fn run(args: BackupsArgs) -> Result<()> {
    match args.command {
        BackupsCommand::List(args) => list(args),
        BackupsCommand::Expire(args) => expire(args),
    }
}

fn list(args: BackupsListArgs) -> Result<()> {
    let store = super::open_store(&args.store)?;
    let backups = store.list_snapshots()?;

    if args.json {
        return output::write_json(&backups);
    }

    let mut out = output::stdout();
    if backups.is_empty() {
        writeln!(out, "No backups")?;
    }
    for backup in &backups {
        writeln!(
            out,
            "{}\t{}\t{}\t{} records\t{}",
            backup.id, backup.created_at, backup.status, backup.record_count, backup.reason
        )?;
    }
    out.flush()?;
    Ok(())
}

fn expire(args: BackupsExpireArgs) -> Result<()> {
    let store = super::open_store(&args.store)?;
    let admin = super::authorize(&store, &args.admin)?;

    let expired = match (&args.backup_id, args.older_than_days) {
        (Some(backup_id), _) => {
            expire_backup(&store, &admin, backup_id)?;
            vec![backup_id.clone()]
        }
        (None, Some(days)) => {
            expire_older_than(&store, &admin, Duration::days(i64::from(days)), Utc::now())?
        }
        (None, None) => anyhow::bail!("either --backup-id or --older-than-days is required"),
    };

    info!(expired = expired.len(), "backup expiry completed");

    if args.json {
        return output::write_json(&ExpireSummary { expired });
    }

    let mut out = output::stdout();
    writeln!(out, "Expired {} backups", expired.len())?;
    for id in &expired {
        writeln!(out, "  {id}")?;
    }
    out.flush()?;
    Ok(())
}
