use tracing::warn;

use crate::model::{
    Changeset, Confidence, FieldMap, RecordValidation, ValidationReport, change_rejection,
};

/// Keeps only high-confidence suggestions, one merged changeset per slug, ordered by slug.
/// Suggestions that could never be written (immutable keys, a blank `name`) are dropped.
pub fn plan(report: &ValidationReport) -> Vec<Changeset> {
    plan_results(&report.results)
}

pub fn plan_results(results: &[RecordValidation]) -> Vec<Changeset> {
    let mut changesets: Vec<Changeset> = Vec::new();

    for result in results.iter().filter(|result| result.error.is_none()) {
        let mut changes = FieldMap::new();
        let mut reasons = Vec::new();

        for (field, suggestion) in &result.suggestions {
            if suggestion.confidence != Confidence::High {
                continue;
            }
            if let Some(rejection) = change_rejection(field, &suggestion.suggested) {
                warn!(
                    slug = %result.slug,
                    field = %field,
                    reason = %rejection,
                    "dropping unwritable suggestion"
                );
                continue;
            }
            changes.insert(field.clone(), suggestion.suggested.clone());
            if !suggestion.reasoning.is_empty() {
                reasons.push(suggestion.reasoning.as_str());
            }
        }

        if changes.is_empty() {
            continue;
        }

        match changesets.iter_mut().find(|existing| existing.slug == result.slug) {
            Some(existing) => {
                existing.changes.extend(changes);
                if !reasons.is_empty() {
                    if !existing.reason.is_empty() {
                        existing.reason.push_str("; ");
                    }
                    existing.reason.push_str(&reasons.join("; "));
                }
            }
            None => changesets.push(Changeset {
                slug: result.slug.clone(),
                changes,
                reason: reasons.join("; "),
            }),
        }
    }

    changesets.sort_by(|left, right| left.slug.cmp(&right.slug));
    changesets
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::model::{
        FieldValue, RecordError, ReportMeta, ReportSummary, Suggestion, ValidationReport,
    };

    fn suggestion(value: &str, confidence: Confidence, reasoning: &str) -> Suggestion {
        Suggestion {
            current: FieldValue::Null,
            suggested: FieldValue::Text(value.to_string()),
            confidence,
            reasoning: reasoning.to_string(),
        }
    }

    fn result(slug: &str, suggestions: Vec<(&str, Suggestion)>) -> RecordValidation {
        RecordValidation {
            slug: slug.to_string(),
            name: slug.to_string(),
            website: Some(format!("{slug}.example")),
            fetched_url: None,
            error: None,
            issues: Vec::new(),
            suggestions: suggestions
                .into_iter()
                .map(|(field, suggestion)| (field.to_string(), suggestion))
                .collect::<BTreeMap<_, _>>(),
            verified: Vec::new(),
            unrecognized_fields: Vec::new(),
        }
    }

    fn report(results: Vec<RecordValidation>) -> ValidationReport {
        ValidationReport {
            meta: ReportMeta {
                generated_at: "2025-01-01T00:00:00Z".to_string(),
                job_id: "validate-20250101T000000Z".to_string(),
                total_records: results.len(),
                validated: results.len(),
                errors: 0,
                duration: 0,
                cancelled: false,
            },
            summary: ReportSummary::default(),
            auto_fix_plan: Vec::new(),
            results,
        }
    }

    #[test]
    fn only_high_confidence_suggestions_are_planned() {
        let input = report(vec![
            result(
                "zeta",
                vec![
                    ("founder", suggestion("Z. Doe", Confidence::High, "About page")),
                    ("location", suggestion("Oslo", Confidence::Medium, "Footer")),
                ],
            ),
            result(
                "acme",
                vec![
                    ("founder", suggestion("Jane Doe", Confidence::High, "Named on about page")),
                    ("founded", suggestion("1998", Confidence::High, "Since 1998 banner")),
                ],
            ),
            result("mid", vec![("country", suggestion("NO", Confidence::Low, "Guess"))]),
        ]);

        let changesets = plan(&input);

        let slugs: Vec<&str> = changesets.iter().map(|c| c.slug.as_str()).collect();
        assert_eq!(slugs, vec!["acme", "zeta"]);
        assert_eq!(changesets[0].changes.len(), 2);
        assert_eq!(changesets[0].reason, "Since 1998 banner; Named on about page");
        assert!(!changesets[1].changes.contains_key("location"));
    }

    #[test]
    fn medium_only_report_yields_empty_plan() {
        let input = report(vec![result(
            "acme",
            vec![("founder", suggestion("Jane Doe", Confidence::Medium, "Probably"))],
        )]);
        assert!(plan(&input).is_empty());
    }

    #[test]
    fn errored_results_are_ignored_and_plan_is_pure() {
        let mut errored = result(
            "broken",
            vec![("founder", suggestion("X", Confidence::High, "n/a"))],
        );
        errored.error = Some(RecordError {
            kind: "fetch_unavailable".to_string(),
            message: "timeout".to_string(),
        });
        let input = report(vec![
            errored,
            result("acme", vec![("founder", suggestion("Jane Doe", Confidence::High, "About"))]),
        ]);
        let before = input.clone();

        let first = plan(&input);
        let second = plan(&input);

        assert_eq!(first, second);
        assert_eq!(input, before);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].slug, "acme");
    }

    #[test]
    fn unwritable_suggestions_do_not_block_valid_fixes() {
        let mut blank_name = suggestion("", Confidence::High, "Header is empty");
        blank_name.suggested = FieldValue::Text("  ".to_string());
        let input = report(vec![
            result("acme", vec![("founder", suggestion("Jane Doe", Confidence::High, "About"))]),
            result(
                "beta",
                vec![
                    ("slug", suggestion("beta-type", Confidence::High, "Domain name")),
                    ("name", blank_name),
                    ("id", suggestion("7", Confidence::High, "Footer")),
                ],
            ),
        ]);

        let changesets = plan(&input);

        assert_eq!(changesets.len(), 1);
        assert_eq!(changesets[0].slug, "acme");
        assert!(crate::pipeline::batch_update::validate_changesets(&changesets).is_ok());
    }
}

