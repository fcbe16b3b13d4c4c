use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use super::analyzer::DiscrepancyAnalyzer;
use super::auth::AdminContext;
use super::batch_update::{ApplyOutcome, ApplyReport, apply_changesets};
use super::fetcher::{ContentFetcher, FetchedPage};
use super::generator::TextGenerator;
use super::planner::plan_results;
use super::progress::{CancelToken, InMemoryProgressStore, JobProgressStore, JobStatus};
use super::rollback::{RollbackOutcome, expire_backup, expire_older_than, rollback};
use super::runner::{RunOptions, ValidationRunner};
use crate::error::{PipelineError, PipelineResult};
use crate::model::{
    BackupSnapshot, BackupStatus, Changeset, Confidence, FieldMap, FieldValue, Record,
    RecordSelector, RecordValidation, Suggestion,
};
use crate::store::testing::{FaultyStore, dump, seeded_store, text};
use crate::store::{RecordStore, SqliteStore};

fn changeset(slug: &str, changes: Vec<(&str, FieldValue)>, reason: &str) -> Changeset {
    Changeset {
        slug: slug.to_string(),
        changes: changes
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect(),
        reason: reason.to_string(),
    }
}

fn applied(outcome: ApplyOutcome) -> ApplyReport {
    match outcome {
        ApplyOutcome::Applied(report) => report,
        ApplyOutcome::DryRun { .. } => panic!("expected a real apply"),
    }
}

fn record(store: &SqliteStore, slug: &str) -> Record {
    store
        .get_by_slugs(&[slug.to_string()])
        .expect("lookup should succeed")
        .pop()
        .expect("record should exist")
}

fn content(records: &[Record]) -> Vec<(String, String, FieldMap)> {
    records
        .iter()
        .map(|r| (r.slug.clone(), r.name.clone(), r.fields.clone()))
        .collect()
}

fn three_foundries() -> SqliteStore {
    seeded_store(vec![
        ("alpha", "Alpha Type", vec![("founder", text("A. Person"))]),
        ("beta", "Beta Foundry", vec![("location", text("Paris"))]),
        ("gamma", "Gamma Letters", vec![("founded", FieldValue::Integer(2001))]),
    ])
}

fn three_changesets() -> Vec<Changeset> {
    vec![
        changeset("alpha", vec![("founder", text("Ada Person"))], "about page"),
        changeset("beta", vec![("location", text("Lyon"))], "contact page"),
        changeset(
            "gamma",
            vec![("founded", FieldValue::Integer(1999)), ("name", text("Gamma Type"))],
            "imprint",
        ),
    ]
}

#[test]
fn acme_founder_correction_is_applied_with_backup() {
    let store = seeded_store(vec![(
        "acme",
        "Acme Type",
        vec![("founder", text("Unknown")), ("website", text("acme.type"))],
    )]);
    let admin = AdminContext::for_tests();

    let report = applied(
        apply_changesets(
            &store,
            &admin,
            &[changeset("acme", vec![("founder", text("Jane Doe"))], "About page names Jane Doe")],
            false,
            "validation fixes",
        )
        .expect("apply should succeed"),
    );

    assert_eq!(report.applied_count, 1);
    assert_eq!(report.failed_count, 0);
    assert!(report.rollback_reference.ends_with(&report.backup_id));
    assert_eq!(record(&store, "acme").fields["founder"], text("Jane Doe"));

    let snapshot = store
        .get_snapshot(&report.backup_id)
        .expect("snapshot lookup should succeed")
        .expect("backup should exist");
    assert_eq!(snapshot.status, BackupStatus::Active);
    assert_eq!(snapshot.records.len(), 1);
    assert_eq!(snapshot.records[0].fields["founder"], text("Unknown"));
    assert_eq!(snapshot.reason, "validation fixes");
}

#[test]
fn rollback_restores_acme_and_marks_backup_consumed() {
    let store = seeded_store(vec![("acme", "Acme Type", vec![("founder", text("Unknown"))])]);
    let admin = AdminContext::for_tests();
    let report = applied(
        apply_changesets(
            &store,
            &admin,
            &[changeset("acme", vec![("founder", text("Jane Doe"))], "fix")],
            false,
            "fixes",
        )
        .expect("apply should succeed"),
    );

    let outcome = rollback(&store, &admin, &report.backup_id, false).expect("rollback should succeed");
    let RollbackOutcome::RolledBack(rolled) = outcome else {
        panic!("expected a real rollback");
    };

    assert_eq!(rolled.restored_count, 1);
    assert_eq!(rolled.failed_count, 0);
    assert_eq!(record(&store, "acme").fields["founder"], text("Unknown"));

    let snapshot = store
        .get_snapshot(&report.backup_id)
        .expect("snapshot lookup should succeed")
        .expect("backup should exist");
    assert_eq!(snapshot.status, BackupStatus::RolledBack);
    assert_eq!(snapshot.rolled_back_at.as_deref(), Some(rolled.rolled_back_at.as_str()));
}

#[test]
fn rollback_is_the_inverse_of_apply() {
    let store = three_foundries();
    store
        .connection()
        .execute("UPDATE records SET updated_at = '2020-01-01T00:00:00Z'", [])
        .expect("seed timestamps should be backdated");
    let admin = AdminContext::for_tests();
    let before = store
        .select_records(&RecordSelector::All)
        .expect("select should succeed");

    let report = applied(
        apply_changesets(&store, &admin, &three_changesets(), false, "batch")
            .expect("apply should succeed"),
    );
    assert_eq!(report.applied_count, 3);
    assert_eq!(record(&store, "gamma").name, "Gamma Type");

    assert_ne!(record(&store, "alpha").updated_at, "2020-01-01T00:00:00Z");

    rollback(&store, &admin, &report.backup_id, false).expect("rollback should succeed");

    let after = store
        .select_records(&RecordSelector::All)
        .expect("select should succeed");
    assert_eq!(before, after);
}

#[test]
fn reapplying_after_rollback_gets_a_fresh_backup() {
    let store = seeded_store(vec![("acme", "Acme Type", vec![("founder", text("Unknown"))])]);
    let admin = AdminContext::for_tests();
    let batch = [changeset("acme", vec![("founder", text("Jane Doe"))], "fix")];

    let first = applied(
        apply_changesets(&store, &admin, &batch, false, "fixes").expect("apply should succeed"),
    );
    rollback(&store, &admin, &first.backup_id, false).expect("rollback should succeed");
    let second = applied(
        apply_changesets(&store, &admin, &batch, false, "fixes").expect("re-apply should succeed"),
    );

    assert_ne!(first.backup_id, second.backup_id);
    assert_eq!(second.applied_count, 1);
    assert_eq!(record(&store, "acme").fields["founder"], text("Jane Doe"));
    assert_eq!(store.list_snapshots().expect("list should succeed").len(), 2);
    rollback(&store, &admin, &second.backup_id, false).expect("second rollback should succeed");
    assert_eq!(record(&store, "acme").fields["founder"], text("Unknown"));
}

#[test]
fn planned_report_applies_valid_fixes_next_to_an_immutable_suggestion() {
    let store = seeded_store(vec![
        ("acme", "Acme Type", vec![("founder", text("Unknown"))]),
        ("beta", "Beta Foundry", vec![]),
    ]);
    let admin = AdminContext::for_tests();
    let high = |value: &str| Suggestion {
        current: FieldValue::Null,
        suggested: text(value),
        confidence: Confidence::High,
        reasoning: "about page".to_string(),
    };
    let validation = |slug: &str, field: &str, value: &str| RecordValidation {
        slug: slug.to_string(),
        name: slug.to_string(),
        website: None,
        fetched_url: None,
        error: None,
        issues: Vec::new(),
        suggestions: BTreeMap::from([(field.to_string(), high(value))]),
        verified: Vec::new(),
        unrecognized_fields: Vec::new(),
    };

    let changesets = plan_results(&[
        validation("acme", "founder", "Jane Doe"),
        validation("beta", "slug", "beta-type"),
    ]);
    let report = applied(
        apply_changesets(&store, &admin, &changesets, false, "planned")
            .expect("planned batch should apply"),
    );

    assert_eq!(report.applied_count, 1);
    assert_eq!(record(&store, "acme").fields["founder"], text("Jane Doe"));
    assert_eq!(record(&store, "beta").slug, "beta");
}

#[test]
fn second_rollback_is_rejected_without_touching_records() {
    let store = three_foundries();
    let admin = AdminContext::for_tests();
    let report = applied(
        apply_changesets(&store, &admin, &three_changesets(), false, "batch")
            .expect("apply should succeed"),
    );
    rollback(&store, &admin, &report.backup_id, false).expect("first rollback should succeed");

    let faulty = FaultyStore::new(&store);
    let error = rollback(&faulty, &admin, &report.backup_id, false)
        .expect_err("second rollback should be rejected");

    assert!(matches!(error, PipelineError::AlreadyRolledBack(_)));
    assert!(
        faulty
            .events
            .borrow()
            .iter()
            .all(|event| !event.starts_with("restore:"))
    );
}

#[test]
fn backup_is_persisted_before_any_write_and_replay_restores() {
    let store = three_foundries();
    let admin = AdminContext::for_tests();
    let before = dump(&store);

    let mut faulty = FaultyStore::new(&store);
    faulty.crash_after_snapshot = true;

    let report = applied(
        apply_changesets(&faulty, &admin, &three_changesets(), false, "batch")
            .expect("apply should return per-record failures"),
    );
    assert_eq!(report.applied_count, 0);
    assert_eq!(report.failed_count, 3);

    let events = faulty.events.borrow().clone();
    let snapshot_at = events
        .iter()
        .position(|event| event == "insert_snapshot")
        .expect("backup should be written");
    let first_update = events
        .iter()
        .position(|event| event.starts_with("update:"))
        .expect("updates should be attempted");
    assert!(snapshot_at < first_update);

    let snapshot = store
        .get_snapshot(&report.backup_id)
        .expect("snapshot lookup should succeed")
        .expect("backup should survive the crash");
    assert_eq!(snapshot.record_count, 3);

    rollback(&store, &admin, &report.backup_id, false).expect("replay should succeed");
    let restored = store
        .select_records(&RecordSelector::All)
        .expect("select should succeed");
    assert_eq!(content(&restored), content(&snapshot.records));
    assert_ne!(before, dump(&store), "backup row status should have changed");
}

#[test]
fn one_failing_record_does_not_block_the_others() {
    let store = three_foundries();
    let admin = AdminContext::for_tests();
    let mut faulty = FaultyStore::new(&store);
    faulty.fail_update_slugs.insert("beta".to_string());

    let report = applied(
        apply_changesets(&faulty, &admin, &three_changesets(), false, "batch")
            .expect("apply should succeed overall"),
    );

    assert_eq!(report.applied_count, 2);
    assert_eq!(report.failed_count, 1);
    let beta = report
        .per_record_results
        .iter()
        .find(|result| result.slug == "beta")
        .expect("beta result should be reported");
    assert!(!beta.success);
    assert_eq!(beta.error_kind.as_deref(), Some("per_record_write_failure"));
    assert_eq!(record(&store, "alpha").fields["founder"], text("Ada Person"));
    assert_eq!(record(&store, "beta").fields["location"], text("Paris"));
}

#[test]
fn failed_backup_aborts_before_any_write() {
    let store = three_foundries();
    let admin = AdminContext::for_tests();
    let before = dump(&store);
    let mut faulty = FaultyStore::new(&store);
    faulty.fail_snapshot_insert = true;

    let error = apply_changesets(&faulty, &admin, &three_changesets(), false, "batch")
        .expect_err("backup failure should abort");

    assert_eq!(error.kind(), "backup_persistence");
    assert_eq!(faulty.update_calls.get(), 0);
    assert_eq!(before, dump(&store));
}

#[test]
fn dry_run_leaves_store_byte_identical() {
    let store = three_foundries();
    let admin = AdminContext::for_tests();
    let before = dump(&store);

    let outcome = apply_changesets(&store, &admin, &three_changesets(), true, "preview")
        .expect("dry run should succeed");

    assert_eq!(before, dump(&store));
    assert!(store.list_snapshots().expect("list should succeed").is_empty());

    let ApplyOutcome::DryRun { previews } = outcome else {
        panic!("expected a dry-run preview");
    };
    assert_eq!(previews.len(), 3);
    let gamma = &previews[2];
    let name = gamma
        .fields
        .iter()
        .find(|field| field.field == "name")
        .expect("name change should be previewed");
    assert_eq!(name.current, text("Gamma Letters"));
    assert_eq!(name.proposed, text("Gamma Type"));
}

#[test]
fn missing_slug_fails_whole_batch_before_backup() {
    let store = seeded_store(vec![("a", "A", vec![]), ("c", "C", vec![])]);
    let admin = AdminContext::for_tests();
    let before = dump(&store);
    let faulty = FaultyStore::new(&store);

    let error = apply_changesets(
        &faulty,
        &admin,
        &[
            changeset("a", vec![("founder", text("x"))], "r"),
            changeset("b", vec![("founder", text("y"))], "r"),
            changeset("c", vec![("founder", text("z"))], "r"),
        ],
        false,
        "batch",
    )
    .expect_err("missing slug should fail the batch");

    match error {
        PipelineError::NotFound { keys, .. } => assert_eq!(keys, vec!["b".to_string()]),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(*faulty.events.borrow(), vec!["get_by_slugs".to_string()]);
    assert_eq!(before, dump(&store));
}

#[test]
fn malformed_batches_are_rejected_before_reads() {
    let store = three_foundries();
    let admin = AdminContext::for_tests();
    let faulty = FaultyStore::new(&store);

    let cases = vec![
        Vec::new(),
        vec![changeset("alpha", vec![], "empty")],
        vec![changeset("alpha", vec![("slug", text("omega"))], "rename")],
        vec![changeset("alpha", vec![("name", FieldValue::Null)], "blank name")],
        vec![
            changeset("alpha", vec![("founder", text("x"))], "one"),
            changeset("alpha", vec![("founder", text("y"))], "two"),
        ],
    ];

    for batch in cases {
        let error = apply_changesets(&faulty, &admin, &batch, false, "batch")
            .expect_err("malformed batch should be rejected");
        assert_eq!(error.kind(), "invalid_changeset");
    }
    assert!(faulty.events.borrow().is_empty());
}

#[test]
fn expired_backup_blocks_rollback_permanently() {
    let store = three_foundries();
    let admin = AdminContext::for_tests();
    let report = applied(
        apply_changesets(&store, &admin, &three_changesets(), false, "batch")
            .expect("apply should succeed"),
    );

    expire_backup(&store, &admin, &report.backup_id).expect("expire should succeed");

    let error = rollback(&store, &admin, &report.backup_id, true)
        .expect_err("expired backup should not roll back");
    assert!(matches!(error, PipelineError::Expired(_)));
    let error = expire_backup(&store, &admin, &report.backup_id)
        .expect_err("expire is a one-way transition");
    assert!(matches!(error, PipelineError::Expired(_)));
}

#[test]
fn rollback_dry_run_lists_targets_and_writes_nothing() {
    let store = three_foundries();
    let admin = AdminContext::for_tests();
    let report = applied(
        apply_changesets(&store, &admin, &three_changesets(), false, "batch")
            .expect("apply should succeed"),
    );
    let before = dump(&store);

    let outcome = rollback(&store, &admin, &report.backup_id, true).expect("dry run should succeed");

    let RollbackOutcome::DryRun { records, .. } = outcome else {
        panic!("expected a dry-run listing");
    };
    let names: Vec<&str> = records.iter().map(|target| target.name.as_str()).collect();
    assert_eq!(names, vec!["Alpha Type", "Beta Foundry", "Gamma Letters"]);
    assert_eq!(before, dump(&store));
}

#[test]
fn unknown_or_tampered_backups_are_refused() {
    let store = three_foundries();
    let admin = AdminContext::for_tests();

    let error = rollback(&store, &admin, "backup-missing", false).expect_err("unknown id");
    assert_eq!(error.kind(), "not_found");

    store
        .insert_snapshot(&BackupSnapshot {
            id: "backup-tampered".to_string(),
            created_at: "2025-01-01T00:00:00Z".to_string(),
            reason: "manual".to_string(),
            record_count: 1,
            records: vec![record(&store, "alpha")],
            changesets: Vec::new(),
            checksum: "0".repeat(64),
            status: BackupStatus::Active,
            rolled_back_at: None,
            expired_at: None,
        })
        .expect("snapshot insert should succeed");

    let error = rollback(&store, &admin, "backup-tampered", false).expect_err("bad checksum");
    assert_eq!(error.kind(), "snapshot_corrupt");
}

#[test]
fn expire_by_age_only_touches_old_active_backups() {
    let store = three_foundries();
    let admin = AdminContext::for_tests();
    let old = BackupSnapshot {
        id: "backup-old".to_string(),
        created_at: "2020-01-01T00:00:00Z".to_string(),
        reason: "old".to_string(),
        record_count: 0,
        records: Vec::new(),
        changesets: Vec::new(),
        checksum: "0".repeat(64),
        status: BackupStatus::Active,
        rolled_back_at: None,
        expired_at: None,
    };
    store.insert_snapshot(&old).expect("snapshot insert should succeed");
    let recent = applied(
        apply_changesets(&store, &admin, &three_changesets(), false, "batch")
            .expect("apply should succeed"),
    );

    let expired = expire_older_than(&store, &admin, chrono::Duration::days(30), chrono::Utc::now())
        .expect("expire by age should succeed");

    assert_eq!(expired, vec!["backup-old".to_string()]);
    let recent = store
        .get_snapshot(&recent.backup_id)
        .expect("lookup should succeed")
        .expect("recent backup should exist");
    assert_eq!(recent.status, BackupStatus::Active);
}

struct StubFetcher {
    pages: HashMap<String, String>,
    cancel_on_fetch: Option<CancelToken>,
}

impl ContentFetcher for StubFetcher {
    fn fetch(&self, base_url: &str) -> PipelineResult<FetchedPage> {
        if let Some(token) = &self.cancel_on_fetch {
            token.cancel();
        }
        match self.pages.get(base_url) {
            Some(text) => Ok(FetchedPage {
                url: format!("https://{base_url}/about"),
                text: text.clone(),
            }),
            None => Err(PipelineError::FetchUnavailable {
                base_url: base_url.to_string(),
                reason: "connection refused".to_string(),
            }),
        }
    }
}

struct StubGenerator {
    replies: Vec<(&'static str, &'static str)>,
    calls: RefCell<usize>,
}

impl TextGenerator for StubGenerator {
    fn generate(&self, prompt: &str) -> PipelineResult<String> {
        *self.calls.borrow_mut() += 1;
        self.replies
            .iter()
            .find(|(slug, _)| prompt.contains(&format!("Record {slug} (")))
            .map(|(_, reply)| reply.to_string())
            .ok_or_else(|| PipelineError::GenerationFailed("no canned reply".to_string()))
    }
}

fn runner_store() -> SqliteStore {
    seeded_store(vec![
        (
            "acme",
            "Acme Type",
            vec![("founder", text("Unknown")), ("website", text("acme.type"))],
        ),
        ("bold", "Bold Works", vec![("website", text("bold.works"))]),
        ("down", "Down Foundry", vec![("website", text("down.example"))]),
        ("quiet", "Quiet Type", vec![]),
    ])
}

fn runner_generator() -> StubGenerator {
    StubGenerator {
        replies: vec![
            (
                "acme",
                r#"Here you go: {"issues": ["Founder is listed as Unknown"], "suggestions": {"founder": {"suggested": "Jane Doe", "confidence": "high", "reasoning": "About page names Jane Doe"}, "location": {"suggested": "Berlin", "confidence": "medium", "reasoning": "Footer address"}}, "verified": ["name", "website"]}"#,
            ),
            ("bold", "I'm sorry, I cannot determine anything from this page."),
        ],
        calls: RefCell::new(0),
    }
}

fn runner_pages() -> HashMap<String, String> {
    HashMap::from([
        ("acme.type".to_string(), "Acme Type was founded by Jane Doe in Berlin.".to_string()),
        ("bold.works".to_string(), "Bold Works makes display faces.".to_string()),
    ])
}

fn options(job_id: &str) -> RunOptions {
    RunOptions {
        job_id: job_id.to_string(),
        delay: Duration::ZERO,
        skip_slugs: BTreeSet::new(),
        report_path: Some("reports/validation_report_test.json".to_string()),
    }
}

#[test]
fn runner_records_every_failure_and_keeps_going() {
    let store = runner_store();
    let fetcher = StubFetcher {
        pages: runner_pages(),
        cancel_on_fetch: None,
    };
    let generator = runner_generator();
    let progress = InMemoryProgressStore::new(Duration::from_secs(60));
    let runner = ValidationRunner {
        store: &store,
        fetcher: &fetcher,
        analyzer: DiscrepancyAnalyzer::new(&generator),
        progress: &progress,
        cancel: CancelToken::default(),
    };

    let report = runner
        .run(&RecordSelector::All, &options("validate-test"))
        .expect("run should succeed");

    let kinds: Vec<(&str, Option<&str>)> = report
        .results
        .iter()
        .map(|r| (r.slug.as_str(), r.error.as_ref().map(|e| e.kind.as_str())))
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("acme", None),
            ("bold", Some("analysis_parse_failure")),
            ("down", Some("fetch_unavailable")),
            ("quiet", Some("missing_website")),
        ]
    );
    assert_eq!(*generator.calls.borrow(), 2);

    assert_eq!(report.meta.total_records, 4);
    assert_eq!(report.meta.validated, 1);
    assert_eq!(report.meta.errors, 3);
    assert!(!report.meta.cancelled);
    assert_eq!(report.summary.total_issues, 1);
    assert_eq!(report.summary.total_suggestions, 2);
    assert_eq!(report.summary.high_confidence_fixes, 1);
    assert_eq!(report.summary.medium_confidence_fixes, 1);

    assert_eq!(report.auto_fix_plan.len(), 1);
    assert_eq!(report.auto_fix_plan[0].changes["founder"], text("Jane Doe"));
    assert_eq!(
        report.results[0].suggestions["founder"].current,
        text("Unknown")
    );

    let job = progress
        .get("validate-test")
        .expect("progress lookup should succeed")
        .expect("progress should be published");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed, 4);
    assert_eq!(job.errors, 3);
}

#[test]
fn runner_stops_between_records_when_cancelled() {
    let store = runner_store();
    let cancel = CancelToken::default();
    let fetcher = StubFetcher {
        pages: runner_pages(),
        cancel_on_fetch: Some(cancel.clone()),
    };
    let generator = runner_generator();
    let progress = InMemoryProgressStore::new(Duration::from_secs(60));
    let runner = ValidationRunner {
        store: &store,
        fetcher: &fetcher,
        analyzer: DiscrepancyAnalyzer::new(&generator),
        progress: &progress,
        cancel,
    };

    let report = runner
        .run(&RecordSelector::All, &options("validate-cancel"))
        .expect("cancelled run should still report");

    assert!(report.meta.cancelled);
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].slug, "acme");
    let job = progress
        .get("validate-cancel")
        .expect("progress lookup should succeed")
        .expect("progress should be published");
    assert_eq!(job.status, JobStatus::Cancelled);
}

#[test]
fn runner_skips_previously_validated_and_rejects_unknown_slugs() {
    let store = runner_store();
    let fetcher = StubFetcher {
        pages: runner_pages(),
        cancel_on_fetch: None,
    };
    let generator = runner_generator();
    let progress = InMemoryProgressStore::new(Duration::from_secs(60));
    let runner = ValidationRunner {
        store: &store,
        fetcher: &fetcher,
        analyzer: DiscrepancyAnalyzer::new(&generator),
        progress: &progress,
        cancel: CancelToken::default(),
    };

    let mut resume = options("validate-resume");
    resume.skip_slugs.insert("acme".to_string());
    let report = runner
        .run(&RecordSelector::First(2), &resume)
        .expect("run should succeed");
    let slugs: Vec<&str> = report.results.iter().map(|r| r.slug.as_str()).collect();
    assert_eq!(slugs, vec!["bold"]);

    let error = runner
        .run(
            &RecordSelector::Slugs(vec!["acme".to_string(), "ghost".to_string()]),
            &options("validate-unknown"),
        )
        .expect_err("unknown slug should fail before any fetch");
    assert_eq!(error.kind(), "not_found");
}
