use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::{PipelineError, PipelineResult};
use crate::model::{AnalysisOutcome, Confidence, FieldValue, Suggestion};

const EXCERPT_CHARS: usize = 200;

/// How the JSON object was located in the model's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonSource {
    Strict,
    Embedded,
}

pub fn locate_json_object(raw: &str) -> PipelineResult<(Map<String, Value>, JsonSource)> {
    if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(raw.trim()) {
        return Ok((object, JsonSource::Strict));
    }

    let Some(candidate) = first_balanced_object(raw) else {
        return Err(parse_failure("no JSON object found in response", raw));
    };

    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(object)) => Ok((object, JsonSource::Embedded)),
        Ok(_) => Err(parse_failure("embedded JSON is not an object", raw)),
        Err(error) => Err(parse_failure(&format!("embedded JSON is invalid: {error}"), raw)),
    }
}

/// First `{...}` span whose braces balance, skipping braces inside strings.
pub fn first_balanced_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0_usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in raw[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

pub fn parse_analysis_response(
    raw: &str,
    known_fields: &[&str],
) -> PipelineResult<AnalysisOutcome> {
    let (object, _) = locate_json_object(raw)?;

    if !["issues", "suggestions", "verified"]
        .iter()
        .any(|key| object.contains_key(*key))
    {
        return Err(parse_failure(
            "JSON object has none of issues, suggestions, verified",
            raw,
        ));
    }

    let mut issues = string_list(object.get("issues"));
    let verified = string_list(object.get("verified"));
    let mut suggestions = BTreeMap::new();

    match object.get("suggestions") {
        None | Some(Value::Null) => {}
        Some(Value::Object(entries)) => {
            for (field, entry) in entries {
                match suggestion_from_json(entry) {
                    Some(suggestion) => {
                        suggestions.insert(field.clone(), suggestion);
                    }
                    None => issues.push(format!(
                        "suggestion for `{field}` had no suggested value: {entry}"
                    )),
                }
            }
        }
        Some(other) => {
            return Err(parse_failure(
                &format!("suggestions must be an object, got {}", json_kind(other)),
                raw,
            ));
        }
    }

    let unrecognized_fields = suggestions
        .keys()
        .chain(verified.iter())
        .filter(|field| !known_fields.contains(&field.as_str()))
        .cloned()
        .collect::<std::collections::BTreeSet<String>>()
        .into_iter()
        .collect();

    Ok(AnalysisOutcome {
        issues,
        suggestions,
        verified,
        unrecognized_fields,
    })
}

fn suggestion_from_json(entry: &Value) -> Option<Suggestion> {
    let Value::Object(fields) = entry else {
        return None;
    };
    let suggested = fields.get("suggested")?;

    Some(Suggestion {
        current: fields
            .get("current")
            .map(FieldValue::from_json)
            .unwrap_or(FieldValue::Null),
        suggested: FieldValue::from_json(suggested),
        confidence: fields
            .get("confidence")
            .and_then(Value::as_str)
            .map(Confidence::parse_lenient)
            .unwrap_or(Confidence::Low),
        reasoning: fields
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string(),
    })
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(Value::String(text)) if !text.trim().is_empty() => vec![text.clone()],
        _ => Vec::new(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn parse_failure(reason: &str, raw: &str) -> PipelineError {
    PipelineError::AnalysisParseFailure {
        reason: reason.to_string(),
        excerpt: raw.chars().take(EXCERPT_CHARS).collect(),
    }
}
