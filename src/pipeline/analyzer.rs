use std::fmt::Write as _;

use tracing::debug;

use super::fetcher::FetchedPage;
use super::generator::TextGenerator;
use super::response::parse_analysis_response;
use crate::error::PipelineResult;
use crate::model::{AnalysisOutcome, FOUNDRY_SCHEMA_FIELDS, FieldValue, Record};

pub const MAX_CONTENT_CHARS: usize = 8000;

pub struct DiscrepancyAnalyzer<'a> {
    generator: &'a dyn TextGenerator,
}

impl<'a> DiscrepancyAnalyzer<'a> {
    pub fn new(generator: &'a dyn TextGenerator) -> Self {
        Self { generator }
    }

    pub fn analyze(&self, record: &Record, page: &FetchedPage) -> PipelineResult<AnalysisOutcome> {
        let prompt = build_prompt(record, page);
        let raw = self.generator.generate(&prompt)?;
        let mut outcome = parse_analysis_response(&raw, FOUNDRY_SCHEMA_FIELDS)?;

        for (field, suggestion) in &mut outcome.suggestions {
            if suggestion.current.is_null() {
                suggestion.current = record.value_of(field);
            }
        }

        debug!(
            slug = %record.slug,
            issues = outcome.issues.len(),
            suggestions = outcome.suggestions.len(),
            verified = outcome.verified.len(),
            "analysis parsed"
        );

        Ok(outcome)
    }
}

pub fn build_prompt(record: &Record, page: &FetchedPage) -> String {
    let mut prompt = String::new();

    prompt.push_str(
        "You verify type-foundry directory listings against the foundry's own website.\n\
         Compare the stored record with the website text and respond with one JSON object only:\n\
         {\"issues\": [string], \"suggestions\": {field: {\"current\": value, \"suggested\": value, \
         \"confidence\": \"high\"|\"medium\"|\"low\", \"reasoning\": string}}, \"verified\": [field]}\n\
         Use \"high\" only when the website states the value explicitly.\n\n",
    );

    let _ = writeln!(prompt, "Known fields: {}", FOUNDRY_SCHEMA_FIELDS.join(", "));
    prompt.push('\n');

    let _ = writeln!(prompt, "Record {} ({})", record.slug, record.name);
    let _ = writeln!(prompt, "- name: {}", record.name);
    for field in FOUNDRY_SCHEMA_FIELDS.iter().filter(|field| **field != "name") {
        let value = record
            .fields
            .get(*field)
            .cloned()
            .unwrap_or(FieldValue::Null);
        let _ = writeln!(prompt, "- {field}: {value}");
    }
    for (field, value) in record
        .fields
        .iter()
        .filter(|(field, _)| !FOUNDRY_SCHEMA_FIELDS.contains(&field.as_str()))
    {
        let _ = writeln!(prompt, "- {field}: {value}");
    }

    let _ = writeln!(prompt, "\nWebsite text from {}:", page.url);
    prompt.push_str(truncate_chars(&page.text, MAX_CONTENT_CHARS));
    prompt.push('\n');

    prompt
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_offset, _)) => &text[..byte_offset],
        None => text,
    }
}
