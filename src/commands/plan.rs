use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use tracing::info;

use super::output;
use crate::cli::PlanArgs;
use crate::model::{Changeset, FixPlan, ValidationReport};
use crate::pipeline::planner;
use crate::util::{now_utc_string, read_json, utc_compact_string, write_json_new};

pub const PLAN_MANIFEST_VERSION: u32 = 1;

pub fn run(args: PlanArgs) -> Result<()> {
    let report: ValidationReport = read_json(&args.report)?;
    let changesets = planner::plan(&report);

    let plan_path = args
        .output
        .clone()
        .unwrap_or_else(|| default_plan_path(&args.store.plans_dir(), "fix_plan"));
    let plan = fix_plan(Some(&args.report), changesets);
    write_json_new(&plan_path, &plan)?;

    info!(
        report = %args.report.display(),
        path = %plan_path.display(),
        changesets = plan.changesets.len(),
        "wrote fix plan"
    );

    if args.json {
        return output::write_json(&plan);
    }

    let mut out = output::stdout();
    writeln!(out, "Plan: {}", plan_path.display())?;
    write_changesets(&mut out, &plan.changesets)?;
    out.flush()?;
    Ok(())
}

pub(super) fn fix_plan(source_report: Option<&Path>, changesets: Vec<Changeset>) -> FixPlan {
    FixPlan {
        manifest_version: PLAN_MANIFEST_VERSION,
        generated_at: now_utc_string(),
        source_report: source_report.map(|path| path.display().to_string()),
        changesets,
    }
}

pub(super) fn default_plan_path(plans_dir: &Path, prefix: &str) -> PathBuf {
    plans_dir.join(format!("{prefix}_{}.json", utc_compact_string(Utc::now())))
}

pub(super) fn write_changesets(out: &mut impl Write, changesets: &[Changeset]) -> Result<()> {
    if changesets.is_empty() {
        writeln!(out, "No changesets: nothing qualifies for unattended application.")?;
        return Ok(());
    }

    writeln!(out, "Changesets: {}", changesets.len())?;
    for changeset in changesets {
        writeln!(out, "  {}\t{}", changeset.slug, changeset.reason)?;
        for (field, value) in &changeset.changes {
            writeln!(out, "\t{field} -> {value}")?;
        }
    }
    Ok(())
}
