use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use super::output;
use crate::cli::StatusArgs;
use crate::pipeline::progress::{JobProgress, JobProgressStore};
use crate::store::{ADMIN_DIGEST_KEY, RecordStore, SqliteProgressStore};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport {
    db_path: String,
    schema_version: Option<String>,
    records: i64,
    backups: BTreeMap<String, usize>,
    admin_secret_configured: bool,
    job: Option<JobProgress>,
}

pub fn run(args: StatusArgs) -> Result<()> {
    let db_path = args.store.db_path();
    info!(data_root = %args.store.data_root.display(), "status requested");

    if !db_path.exists() {
        warn!(path = %db_path.display(), "database file missing");
        return Ok(());
    }

    let store = super::open_store(&args.store)?;

    let mut backups = BTreeMap::new();
    for summary in store.list_snapshots()? {
        *backups.entry(summary.status.to_string()).or_insert(0) += 1;
    }

    let job = match &args.job_id {
        Some(job_id) => {
            // Expiry is stored per row, so the reader TTL is irrelevant.
            let progress = SqliteProgressStore::new(&store, Duration::ZERO).get(job_id)?;
            if progress.is_none() {
                warn!(job_id = %job_id, "no progress recorded for job (unknown or expired)");
            }
            progress
        }
        None => None,
    };

    let report = StatusReport {
        db_path: db_path.display().to_string(),
        schema_version: store.metadata("db_schema_version")?,
        records: store.count_records()?,
        backups,
        admin_secret_configured: store.metadata(ADMIN_DIGEST_KEY)?.is_some(),
        job,
    };

    info!(
        path = %report.db_path,
        records = report.records,
        backups = report.backups.values().sum::<usize>(),
        "database status"
    );

    if args.json {
        return output::write_json(&report);
    }

    let mut out = output::stdout();
    writeln!(out, "Database: {}", report.db_path)?;
    writeln!(
        out,
        "Schema: {}",
        output::or_dash(report.schema_version.as_deref())
    )?;
    writeln!(out, "Records: {}", report.records)?;
    if report.backups.is_empty() {
        writeln!(out, "Backups: none")?;
    } else {
        let counts = report
            .backups
            .iter()
            .map(|(status, count)| format!("{status}={count}"))
            .collect::<Vec<String>>()
            .join(" ");
        writeln!(out, "Backups: {counts}")?;
    }
    writeln!(
        out,
        "Admin secret: {}",
        if report.admin_secret_configured { "configured" } else { "not set" }
    )?;
    if let Some(job) = &report.job {
        writeln!(
            out,
            "Job {}: {:?} {}/{} processed, {} errors, current {}",
            job.job_id,
            job.status,
            job.processed,
            job.total,
            job.errors,
            output::or_dash(job.current_slug.as_deref())
        )?;
        if let Some(path) = &job.report_path {
            writeln!(out, "  report: {path}")?;
        }
    }
    out.flush()?;
    Ok(())
}
