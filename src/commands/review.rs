use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use tracing::info;

use super::output;
use super::plan::{default_plan_path, fix_plan, write_changesets};
use crate::cli::ReviewArgs;
use crate::model::{
    Changeset, FieldMap, FieldValue, IMMUTABLE_RECORD_KEYS, Suggestion, ValidationReport,
    change_rejection,
};
use crate::util::{read_json, write_json_new};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Decision {
    Accept,
    Skip,
    Replace(FieldValue),
    Quit,
}

pub fn run(args: ReviewArgs) -> Result<()> {
    let report: ValidationReport = read_json(&args.report)?;

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut out = output::stdout();
    let changesets = review_suggestions(&report, &mut input, &mut out)?;

    let plan_path = args
        .output
        .clone()
        .unwrap_or_else(|| default_plan_path(&args.store.plans_dir(), "reviewed_plan"));
    let plan = fix_plan(Some(&args.report), changesets);
    write_json_new(&plan_path, &plan)?;

    info!(
        path = %plan_path.display(),
        changesets = plan.changesets.len(),
        "wrote reviewed plan"
    );

    writeln!(out, "\nPlan: {}", plan_path.display())?;
    write_changesets(&mut out, &plan.changesets)?;
    out.flush()?;
    Ok(())
}

/// Walks every suggestion, high confidence first, and keeps the accepted ones.
fn review_suggestions<R: BufRead, W: Write>(
    report: &ValidationReport,
    input: &mut R,
    out: &mut W,
) -> Result<Vec<Changeset>> {
    let mut changesets: Vec<Changeset> = Vec::new();

    'records: for result in report.results.iter().filter(|r| r.error.is_none()) {
        let mut ordered: Vec<(&String, &Suggestion)> = result.suggestions.iter().collect();
        ordered.sort_by(|left, right| {
            left.1
                .confidence
                .cmp(&right.1.confidence)
                .then(left.0.cmp(right.0))
        });

        let mut changes = FieldMap::new();
        let mut reasons = Vec::new();

        for (field, suggestion) in ordered {
            if IMMUTABLE_RECORD_KEYS.contains(&field.as_str()) {
                writeln!(
                    out,
                    "\n{} ({}): skipping suggestion for immutable `{field}`",
                    result.name, result.slug
                )?;
                continue;
            }

            writeln!(out, "\n{} ({})", result.name, result.slug)?;
            writeln!(out, "  field:      {field}")?;
            writeln!(out, "  current:    {}", suggestion.current)?;
            writeln!(out, "  suggested:  {}", suggestion.suggested)?;
            writeln!(out, "  confidence: {}", suggestion.confidence.as_str())?;
            writeln!(
                out,
                "  reasoning:  {}",
                output::or_dash(Some(suggestion.reasoning.as_str()))
            )?;

            let (value, reason) = match prompt(input, out)? {
                Decision::Accept => (suggestion.suggested.clone(), suggestion.reasoning.clone()),
                Decision::Replace(value) => (value, format!("{field} edited during review")),
                Decision::Skip => continue,
                Decision::Quit => {
                    push_changeset(&mut changesets, &result.slug, changes, &reasons);
                    break 'records;
                }
            };

            if let Some(rejection) = change_rejection(field, &value) {
                writeln!(out, "Not kept: `{field}` {rejection}")?;
                continue;
            }
            changes.insert(field.clone(), value);
            reasons.push(reason);
        }

        push_changeset(&mut changesets, &result.slug, changes, &reasons);
    }

    changesets.sort_by(|left, right| left.slug.cmp(&right.slug));
    Ok(changesets)
}

fn push_changeset(
    changesets: &mut Vec<Changeset>,
    slug: &str,
    changes: FieldMap,
    reasons: &[String],
) {
    if changes.is_empty() {
        return;
    }
    let reason = reasons
        .iter()
        .filter(|reason| !reason.is_empty())
        .cloned()
        .collect::<Vec<String>>()
        .join("; ");
    changesets.push(Changeset {
        slug: slug.to_string(),
        changes,
        reason,
    });
}

fn prompt<R: BufRead, W: Write>(input: &mut R, out: &mut W) -> Result<Decision> {
    loop {
        write!(out, "Accept? [y]es / [n]o / [e]dit / [q]uit: ")?;
        out.flush()?;

        let Some(line) = read_line(input)? else {
            return Ok(Decision::Quit);
        };

        match line.to_ascii_lowercase().as_str() {
            "y" | "yes" => return Ok(Decision::Accept),
            "n" | "no" | "" => return Ok(Decision::Skip),
            "q" | "quit" => return Ok(Decision::Quit),
            "e" | "edit" => {
                write!(out, "New value (empty clears the field): ")?;
                out.flush()?;
                let Some(value) = read_line(input)? else {
                    return Ok(Decision::Quit);
                };
                return Ok(Decision::Replace(parse_edited_value(&value)));
            }
            other => writeln!(out, "Unrecognized answer `{other}`")?,
        }
    }
}

fn read_line<R: BufRead>(input: &mut R) -> Result<Option<String>> {
    let mut line = String::new();
    let read = input
        .read_line(&mut line)
        .context("failed to read review answer")?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn parse_edited_value(raw: &str) -> FieldValue {
    if raw.is_empty() {
        return FieldValue::Null;
    }
    match raw.parse::<i64>() {
        Ok(integer) => FieldValue::Integer(integer),
        Err(_) => FieldValue::Text(raw.to_string()),
    }
}
