use std::collections::BTreeSet;
use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use super::output;
use crate::cli::{FetchMode, ProgressBackend, ValidateArgs};
use crate::model::{RecordSelector, ValidationReport};
use crate::pipeline::analyzer::DiscrepancyAnalyzer;
use crate::pipeline::fetcher::{ContentFetcher, HttpFetcher};
use crate::pipeline::generator::{GeneratorConfig, MessagesApiGenerator};
use crate::pipeline::progress::{CancelToken, InMemoryProgressStore, JobProgressStore};
use crate::pipeline::rendered::RenderedFetcher;
use crate::pipeline::runner::{RunOptions, ValidationRunner, validated_slugs};
use crate::store::SqliteProgressStore;
use crate::util::{read_json, utc_compact_string, write_json_new};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidateSummary<'a> {
    report_path: String,
    job_id: &'a str,
    total_records: usize,
    validated: usize,
    errors: usize,
    total_issues: usize,
    total_suggestions: usize,
    high_confidence_fixes: usize,
    cancelled: bool,
}

pub fn run(args: ValidateArgs) -> Result<()> {
    let store = super::open_store(&args.store)?;

    let selector = if !args.slugs.is_empty() {
        RecordSelector::Slugs(args.slugs.clone())
    } else if let Some(limit) = args.limit {
        RecordSelector::First(limit)
    } else {
        RecordSelector::All
    };

    let skip_slugs = match &args.skip_validated {
        Some(path) => {
            let previous: ValidationReport = read_json(path)?;
            let slugs = validated_slugs(&previous);
            info!(path = %path.display(), skipped = slugs.len(), "resuming from earlier report");
            slugs
        }
        None => BTreeSet::new(),
    };

    let stamp = utc_compact_string(Utc::now());
    let job_id = format!("validate-{stamp}");
    let report_path = args.report_path.clone().unwrap_or_else(|| {
        args.store
            .reports_dir()
            .join(format!("validation_report_{stamp}.json"))
    });
    if report_path.exists() {
        bail!("report already exists: {}", report_path.display());
    }

    let fetch_timeout = Duration::from_millis(args.fetch_timeout_ms);
    let fetcher: Box<dyn ContentFetcher> = match args.fetch_mode {
        FetchMode::Http => Box::new(HttpFetcher::new(fetch_timeout)?),
        FetchMode::Rendered => Box::new(RenderedFetcher::new(
            args.browser_bin.clone(),
            fetch_timeout,
        )?),
    };

    let generator = MessagesApiGenerator::new(&GeneratorConfig {
        base_url: args.llm_base_url.clone(),
        api_key: args.llm_api_key.clone(),
        model: args.llm_model.clone(),
        timeout: Duration::from_millis(args.llm_timeout_ms),
    })?;

    let ttl = Duration::from_secs(args.progress_ttl_secs);
    let progress: Box<dyn JobProgressStore + '_> = match args.progress_backend {
        ProgressBackend::Sqlite => Box::new(SqliteProgressStore::new(&store, ttl)),
        ProgressBackend::Memory => Box::new(InMemoryProgressStore::new(ttl)),
    };

    let cancel = match &args.stop_file {
        Some(path) => CancelToken::with_stop_file(path.clone()),
        None => CancelToken::default(),
    };

    let runner = ValidationRunner {
        store: &store,
        fetcher: fetcher.as_ref(),
        analyzer: DiscrepancyAnalyzer::new(&generator),
        progress: progress.as_ref(),
        cancel,
    };

    info!(
        job_id = %job_id,
        fetch_mode = ?args.fetch_mode,
        model = %args.llm_model,
        delay_ms = args.delay_ms,
        "starting validation"
    );

    let report = runner.run(
        &selector,
        &RunOptions {
            job_id: job_id.clone(),
            delay: Duration::from_millis(args.delay_ms),
            skip_slugs,
            report_path: Some(report_path.display().to_string()),
        },
    )?;

    write_json_new(&report_path, &report)
        .with_context(|| format!("failed to write report for job {job_id}"))?;
    info!(path = %report_path.display(), "wrote validation report");

    if report.meta.cancelled {
        warn!(job_id = %job_id, "run was cancelled; report is partial");
    }

    let summary = ValidateSummary {
        report_path: report_path.display().to_string(),
        job_id: &job_id,
        total_records: report.meta.total_records,
        validated: report.meta.validated,
        errors: report.meta.errors,
        total_issues: report.summary.total_issues,
        total_suggestions: report.summary.total_suggestions,
        high_confidence_fixes: report.summary.high_confidence_fixes,
        cancelled: report.meta.cancelled,
    };

    if args.json {
        return output::write_json(&summary);
    }

    let mut out = output::stdout();
    writeln!(out, "Report: {}", summary.report_path)?;
    writeln!(
        out,
        "Validated {}/{} records ({} errors){}",
        summary.validated,
        summary.total_records,
        summary.errors,
        if summary.cancelled { ", cancelled" } else { "" }
    )?;
    writeln!(
        out,
        "Issues: {}  Suggestions: {}  High-confidence fixes: {}",
        summary.total_issues, summary.total_suggestions, summary.high_confidence_fixes
    )?;
    for result in report.results.iter().filter(|r| r.error.is_some()) {
        if let Some(error) = &result.error {
            writeln!(out, "  {}\t{}\t{}", result.slug, error.kind, error.message)?;
        }
    }
    out.flush()?;
    Ok(())
}
