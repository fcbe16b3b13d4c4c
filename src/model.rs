use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Keys a changeset may never target.
pub const IMMUTABLE_RECORD_KEYS: &[&str] = &["id", "slug", "created_at", "updated_at"];

/// Changeset key that addresses the record's display name instead of the field set.
pub const NAME_KEY: &str = "name";

/// Why a single change can never be written, or `None` when it can.
pub fn change_rejection(key: &str, value: &FieldValue) -> Option<String> {
    if IMMUTABLE_RECORD_KEYS.contains(&key) {
        return Some(format!("targets immutable key `{key}`"));
    }
    if key == NAME_KEY && !matches!(value, FieldValue::Text(name) if !name.trim().is_empty()) {
        return Some(format!("must set `{NAME_KEY}` to non-empty text"));
    }
    None
}

/// Fields the directory keeps for a foundry listing. Records may carry others.
pub const FOUNDRY_SCHEMA_FIELDS: &[&str] = &[
    "name",
    "website",
    "location",
    "country",
    "founded",
    "founder",
    "description",
    "specialties",
    "notable_typefaces",
    "team_size",
    "contact_email",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn from_json(value: &serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => Self::Null,
            Value::String(text) => Self::Text(text.clone()),
            Value::Number(number) => match number.as_i64() {
                Some(integer) => Self::Integer(integer),
                None => match number.as_f64() {
                    Some(float) if float.fract() == 0.0 && float.abs() < i64::MAX as f64 => {
                        Self::Integer(float as i64)
                    }
                    _ => Self::Text(number.to_string()),
                },
            },
            Value::Array(items) => Self::List(
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(text) => text.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            Value::Bool(flag) => Self::Text(flag.to_string()),
            Value::Object(_) => Self::Text(value.to_string()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "(empty)"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value}"),
            Self::List(values) => write!(f, "{}", values.join(", ")),
        }
    }
}

pub type FieldMap = BTreeMap<String, FieldValue>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub fields: FieldMap,
    pub created_at: String,
    pub updated_at: String,
}

impl Record {
    pub fn website(&self) -> Option<&str> {
        match self.fields.get("website") {
            Some(FieldValue::Text(url)) if !url.trim().is_empty() => Some(url.trim()),
            _ => None,
        }
    }

    /// Value of a changeset key on this record; `name` reads the display name.
    pub fn value_of(&self, key: &str) -> FieldValue {
        if key == NAME_KEY {
            return FieldValue::Text(self.name.clone());
        }
        self.fields.get(key).cloned().unwrap_or(FieldValue::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordSelector {
    All,
    First(usize),
    Slugs(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRecord {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub fields: FieldMap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changeset {
    pub slug: String,
    pub changes: FieldMap,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Active,
    RolledBack,
    Expired,
}

impl BackupStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::RolledBack => "rolled_back",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(Self::Active),
            "rolled_back" => Ok(Self::RolledBack),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown backup status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSnapshot {
    pub id: String,
    pub created_at: String,
    pub reason: String,
    pub record_count: usize,
    pub records: Vec<Record>,
    pub changesets: Vec<Changeset>,
    pub checksum: String,
    pub status: BackupStatus,
    pub rolled_back_at: Option<String>,
    pub expired_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSummary {
    pub id: String,
    pub created_at: String,
    pub reason: String,
    pub record_count: usize,
    pub status: BackupStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn parse_lenient(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "high" => Self::High,
            "medium" => Self::Medium,
            _ => Self::Low,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub current: FieldValue,
    pub suggested: FieldValue,
    pub confidence: Confidence,
    pub reasoning: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOutcome {
    pub issues: Vec<String>,
    pub suggestions: BTreeMap<String, Suggestion>,
    pub verified: Vec<String>,
    pub unrecognized_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordValidation {
    pub slug: String,
    pub name: String,
    pub website: Option<String>,
    #[serde(default)]
    pub fetched_url: Option<String>,
    #[serde(default)]
    pub error: Option<RecordError>,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: BTreeMap<String, Suggestion>,
    #[serde(default)]
    pub verified: Vec<String>,
    #[serde(default)]
    pub unrecognized_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMeta {
    pub generated_at: String,
    pub job_id: String,
    pub total_records: usize,
    pub validated: usize,
    pub errors: usize,
    pub duration: u64,
    #[serde(default)]
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub high_confidence_fixes: usize,
    pub medium_confidence_fixes: usize,
    pub low_confidence_fixes: usize,
    pub total_issues: usize,
    pub total_suggestions: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub meta: ReportMeta,
    pub summary: ReportSummary,
    #[serde(default)]
    pub auto_fix_plan: Vec<Changeset>,
    pub results: Vec<RecordValidation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixPlan {
    pub manifest_version: u32,
    pub generated_at: String,
    pub source_report: Option<String>,
    pub changesets: Vec<Changeset>,
}
