use std::io::Write;

use anyhow::{Result, bail};
use tracing::{info, warn};

use super::output;
use crate::cli::ApplyArgs;
use crate::model::{Changeset, FixPlan, ValidationReport};
use crate::pipeline::batch_update::{ApplyOutcome, apply_changesets};
use crate::pipeline::planner;
use crate::util::read_json;

pub fn run(args: ApplyArgs) -> Result<()> {
    let (changesets, source) = load_changesets(&args)?;
    if changesets.is_empty() {
        info!(source = %source, "no changesets to apply");
        let mut out = output::stdout();
        writeln!(out, "Nothing to apply from {source}")?;
        out.flush()?;
        return Ok(());
    }

    let store = super::open_store(&args.store)?;
    let admin = super::authorize(&store, &args.admin)?;
    let reason = args
        .reason
        .clone()
        .unwrap_or_else(|| format!("apply {source}"));

    let outcome = apply_changesets(&store, &admin, &changesets, args.dry_run, &reason)?;

    if let ApplyOutcome::Applied(report) = &outcome {
        info!(
            backup_id = %report.backup_id,
            applied = report.applied_count,
            failed = report.failed_count,
            "batch applied"
        );
        if report.failed_count > 0 {
            warn!(
                backup_id = %report.backup_id,
                failed = report.failed_count,
                rollback = %report.rollback_reference,
                "some records failed to update"
            );
        }
    }

    if args.json {
        return output::write_json(&outcome);
    }

    let mut out = output::stdout();
    match &outcome {
        ApplyOutcome::DryRun { previews } => {
            writeln!(out, "Dry run: {} changesets, nothing written", previews.len())?;
            for preview in previews {
                writeln!(out, "  {} ({})\t{}", preview.name, preview.slug, preview.reason)?;
                for field in &preview.fields {
                    writeln!(out, "\t{}: {} -> {}", field.field, field.current, field.proposed)?;
                }
            }
        }
        ApplyOutcome::Applied(report) => {
            writeln!(
                out,
                "Applied {} of {} changesets (backup {})",
                report.applied_count,
                report.per_record_results.len(),
                report.backup_id
            )?;
            for result in report.per_record_results.iter().filter(|r| !r.success) {
                writeln!(
                    out,
                    "  FAILED {}\t{}",
                    result.slug,
                    output::or_dash(result.error.as_deref())
                )?;
            }
            if report.failed_count > 0 {
                writeln!(out, "\n!! {} records failed. To undo this batch run:", report.failed_count)?;
            } else {
                writeln!(out, "To undo this batch run:")?;
            }
            writeln!(out, "  {}", report.rollback_reference)?;
        }
    }
    out.flush()?;
    Ok(())
}

fn load_changesets(args: &ApplyArgs) -> Result<(Vec<Changeset>, String)> {
    match (&args.plan, &args.report) {
        (Some(path), None) => {
            let plan: FixPlan = read_json(path)?;
            Ok((plan.changesets, path.display().to_string()))
        }
        (None, Some(path)) => {
            let report: ValidationReport = read_json(path)?;
            Ok((planner::plan(&report), path.display().to_string()))
        }
        _ => bail!("exactly one of --plan or --report is required"),
    }
}
