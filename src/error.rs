#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no usable content at {base_url}: {reason}")]
    FetchUnavailable { base_url: String, reason: String },

    #[error("text generation failed: {0}")]
    GenerationFailed(String),

    #[error("could not parse analysis response: {reason} (response began: {excerpt})")]
    AnalysisParseFailure { reason: String, excerpt: String },

    #[error("{entity} not found: {}", keys.join(", "))]
    NotFound {
        entity: &'static str,
        keys: Vec<String>,
    },

    #[error("backup {0} has already been rolled back")]
    AlreadyRolledBack(String),

    #[error("backup {0} has expired")]
    Expired(String),

    #[error("failed to persist backup snapshot: {0}")]
    BackupPersistence(String),

    #[error("backup {0} failed its integrity check")]
    SnapshotCorrupt(String),

    #[error("invalid changeset: {0}")]
    InvalidChangeset(String),

    #[error("write failed for {slug}: {reason}")]
    RecordWrite { slug: String, reason: String },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error(transparent)]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            keys: vec![key.into()],
        }
    }

    /// Stable label written into reports and per-record results.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FetchUnavailable { .. } => "fetch_unavailable",
            Self::GenerationFailed(_) => "analysis_unavailable",
            Self::AnalysisParseFailure { .. } => "analysis_parse_failure",
            Self::NotFound { .. } => "not_found",
            Self::AlreadyRolledBack(_) => "already_rolled_back",
            Self::Expired(_) => "expired",
            Self::BackupPersistence(_) => "backup_persistence",
            Self::SnapshotCorrupt(_) => "snapshot_corrupt",
            Self::InvalidChangeset(_) => "invalid_changeset",
            Self::RecordWrite { .. } => "per_record_write_failure",
            Self::Unauthorized(_) => "unauthorized",
            Self::Database(_) => "database",
            Self::Serialization(_) => "serialization",
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
