use std::io::Write;

use anyhow::Result;
use tracing::warn;

use super::output;
use crate::cli::RollbackArgs;
use crate::pipeline::rollback::{RollbackOutcome, rollback};

pub fn run(args: RollbackArgs) -> Result<()> {
    let store = super::open_store(&args.store)?;
    let admin = super::authorize(&store, &args.admin)?;

    let outcome = rollback(&store, &admin, &args.backup_id, args.dry_run)?;

    if let RollbackOutcome::RolledBack(report) = &outcome {
        if report.failed_count > 0 {
            warn!(
                backup_id = %report.backup_id,
                failed = report.failed_count,
                "some records could not be restored"
            );
        }
    }

    if args.json {
        return output::write_json(&outcome);
    }

    let mut out = output::stdout();
    match &outcome {
        RollbackOutcome::DryRun { backup_id, records } => {
            writeln!(out, "Dry run: backup {backup_id} would restore {} records", records.len())?;
            for record in records {
                writeln!(out, "  {}\t{}", record.slug, record.name)?;
            }
        }
        RollbackOutcome::RolledBack(report) => {
            writeln!(
                out,
                "Rolled back {}: restored {}, failed {}",
                report.backup_id, report.restored_count, report.failed_count
            )?;
            for result in report.per_record_results.iter().filter(|r| !r.success) {
                writeln!(
                    out,
                    "  FAILED {}\t{}",
                    result.slug,
                    output::or_dash(result.error.as_deref())
                )?;
            }
        }
    }
    out.flush()?;
    Ok(())
}
