use std::collections::HashSet;
use std::io::Write;

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use super::output;
use crate::cli::ImportArgs;
use crate::model::{IMMUTABLE_RECORD_KEYS, NAME_KEY, NewRecord};
use crate::store::RecordStore;
use crate::util::read_json;

pub const SLUG_PATTERN: &str = r"^[a-z0-9]+(?:-[a-z0-9]+)*$";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportSummary {
    total: usize,
    created: usize,
    skipped_existing: Vec<String>,
    dry_run: bool,
}

pub fn run(args: ImportArgs) -> Result<()> {
    let records: Vec<NewRecord> = read_json(&args.input)?;
    let pattern = Regex::new(SLUG_PATTERN).context("failed to compile slug regex")?;
    check_seed(&records, &pattern)?;

    let store = super::open_store(&args.store)?;
    let mut summary = ImportSummary {
        total: records.len(),
        created: 0,
        skipped_existing: Vec::new(),
        dry_run: args.dry_run,
    };

    for record in &records {
        if !store.get_by_slugs(&[record.slug.clone()])?.is_empty() {
            warn!(slug = %record.slug, "record already exists; skipping");
            summary.skipped_existing.push(record.slug.clone());
            continue;
        }
        if !args.dry_run {
            store
                .insert_record(record)
                .with_context(|| format!("failed to insert record {}", record.slug))?;
        }
        summary.created += 1;
    }

    info!(
        input = %args.input.display(),
        total = summary.total,
        created = summary.created,
        skipped = summary.skipped_existing.len(),
        dry_run = args.dry_run,
        "import completed"
    );

    if args.json {
        return output::write_json(&summary);
    }

    let mut out = output::stdout();
    writeln!(
        out,
        "{} {} of {} records ({} already present)",
        if args.dry_run { "Would import" } else { "Imported" },
        summary.created,
        summary.total,
        summary.skipped_existing.len()
    )?;
    out.flush()?;
    Ok(())
}

fn check_seed(records: &[NewRecord], pattern: &Regex) -> Result<()> {
    let mut seen = HashSet::new();

    for record in records {
        if !pattern.is_match(&record.slug) {
            bail!("invalid slug `{}`: expected lowercase words joined by hyphens", record.slug);
        }
        if !seen.insert(record.slug.as_str()) {
            bail!("slug `{}` appears more than once in the input", record.slug);
        }
        if record.name.trim().is_empty() {
            bail!("record `{}` has an empty name", record.slug);
        }
        if let Some(key) = record
            .fields
            .keys()
            .find(|key| key.as_str() == NAME_KEY || IMMUTABLE_RECORD_KEYS.contains(&key.as_str()))
        {
            bail!("record `{}` sets reserved key `{key}` inside fields", record.slug);
        }
    }

    Ok(())
}
