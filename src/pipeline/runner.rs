use std::collections::BTreeSet;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::analyzer::DiscrepancyAnalyzer;
use super::fetcher::ContentFetcher;
use super::planner;
use super::progress::{CancelToken, JobProgress, JobProgressStore, JobStatus};
use crate::error::PipelineResult;
use crate::model::{
    Confidence, Record, RecordError, RecordSelector, RecordValidation, ReportMeta, ReportSummary,
    ValidationReport,
};
use crate::store::RecordStore;
use crate::util::now_utc_string;

pub struct RunOptions {
    pub job_id: String,
    pub delay: Duration,
    /// Slugs already validated by an earlier run.
    pub skip_slugs: BTreeSet<String>,
    pub report_path: Option<String>,
}

pub struct ValidationRunner<'a> {
    pub store: &'a dyn RecordStore,
    pub fetcher: &'a dyn ContentFetcher,
    pub analyzer: DiscrepancyAnalyzer<'a>,
    pub progress: &'a dyn JobProgressStore,
    pub cancel: CancelToken,
}

impl ValidationRunner<'_> {
    pub fn run(
        &self,
        selector: &RecordSelector,
        options: &RunOptions,
    ) -> PipelineResult<ValidationReport> {
        let started = Instant::now();
        let records: Vec<Record> = self
            .store
            .select_records(selector)?
            .into_iter()
            .filter(|record| !options.skip_slugs.contains(&record.slug))
            .collect();

        info!(
            job_id = %options.job_id,
            records = records.len(),
            skipped = options.skip_slugs.len(),
            "validation run started"
        );

        let mut progress = JobProgress {
            job_id: options.job_id.clone(),
            status: JobStatus::Running,
            total: records.len(),
            processed: 0,
            errors: 0,
            current_slug: None,
            updated_at: now_utc_string(),
            report_path: options.report_path.clone(),
        };
        self.publish(&progress);

        let mut results = Vec::with_capacity(records.len());
        let mut cancelled = false;

        for (index, record) in records.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!(job_id = %options.job_id, processed = index, "validation run cancelled");
                cancelled = true;
                break;
            }

            if index > 0 && !options.delay.is_zero() {
                thread::sleep(options.delay);
            }

            progress.current_slug = Some(record.slug.clone());
            let result = self.validate_record(record);
            if result.error.is_some() {
                progress.errors += 1;
            }
            progress.processed += 1;
            progress.updated_at = now_utc_string();
            self.publish(&progress);

            results.push(result);
        }

        let errors = results.iter().filter(|result| result.error.is_some()).count();
        let report = ValidationReport {
            meta: ReportMeta {
                generated_at: now_utc_string(),
                job_id: options.job_id.clone(),
                total_records: records.len(),
                validated: results.len() - errors,
                errors,
                duration: started.elapsed().as_millis() as u64,
                cancelled,
            },
            summary: summarize(&results),
            auto_fix_plan: planner::plan_results(&results),
            results,
        };

        progress.status = if cancelled {
            JobStatus::Cancelled
        } else {
            JobStatus::Completed
        };
        progress.current_slug = None;
        progress.updated_at = now_utc_string();
        self.publish(&progress);

        info!(
            job_id = %options.job_id,
            validated = report.meta.validated,
            errors = report.meta.errors,
            issues = report.summary.total_issues,
            suggestions = report.summary.total_suggestions,
            cancelled,
            "validation run finished"
        );

        Ok(report)
    }

    fn validate_record(&self, record: &Record) -> RecordValidation {
        let mut result = RecordValidation {
            slug: record.slug.clone(),
            name: record.name.clone(),
            website: record.website().map(str::to_string),
            fetched_url: None,
            error: None,
            issues: Vec::new(),
            suggestions: Default::default(),
            verified: Vec::new(),
            unrecognized_fields: Vec::new(),
        };

        let Some(website) = record.website() else {
            warn!(slug = %record.slug, "record has no website");
            result.error = Some(RecordError {
                kind: "missing_website".to_string(),
                message: "record has no website field".to_string(),
            });
            return result;
        };

        let page = match self.fetcher.fetch(website) {
            Ok(page) => page,
            Err(error) => {
                warn!(slug = %record.slug, error = %error, "content fetch failed");
                result.error = Some(record_error(&error));
                return result;
            }
        };
        result.fetched_url = Some(page.url.clone());

        match self.analyzer.analyze(record, &page) {
            Ok(outcome) => {
                result.issues = outcome.issues;
                result.suggestions = outcome.suggestions;
                result.verified = outcome.verified;
                result.unrecognized_fields = outcome.unrecognized_fields;
            }
            Err(error) => {
                warn!(slug = %record.slug, error = %error, "analysis failed");
                result.error = Some(record_error(&error));
            }
        }

        result
    }

    fn publish(&self, progress: &JobProgress) {
        if let Err(error) = self.progress.set(&progress.job_id, progress) {
            warn!(job_id = %progress.job_id, error = %error, "failed to publish job progress");
        }
    }
}

fn record_error(error: &crate::error::PipelineError) -> RecordError {
    RecordError {
        kind: error.kind().to_string(),
        message: error.to_string(),
    }
}

pub fn summarize(results: &[RecordValidation]) -> ReportSummary {
    let mut summary = ReportSummary::default();
    for result in results {
        summary.total_issues += result.issues.len();
        summary.total_suggestions += result.suggestions.len();
        for suggestion in result.suggestions.values() {
            match suggestion.confidence {
                Confidence::High => summary.high_confidence_fixes += 1,
                Confidence::Medium => summary.medium_confidence_fixes += 1,
                Confidence::Low => summary.low_confidence_fixes += 1,
            }
        }
    }
    summary
}

/// Slugs that completed without error in an earlier report.
pub fn validated_slugs(report: &ValidationReport) -> BTreeSet<String> {
    report
        .results
        .iter()
        .filter(|result| result.error.is_none())
        .map(|result| result.slug.clone())
        .collect()
}
