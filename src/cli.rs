use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "foundry-steward",
    version,
    about = "Validation and safe batch updates for the type-foundry directory"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Init(InitArgs),
    Import(ImportArgs),
    Validate(ValidateArgs),
    Plan(PlanArgs),
    Review(ReviewArgs),
    Apply(ApplyArgs),
    Rollback(RollbackArgs),
    Backups(BackupsArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    #[arg(long, default_value = ".cache/foundry")]
    pub data_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,
}

impl StoreArgs {
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_root.join("foundry_directory.sqlite"))
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.data_root.join("reports")
    }

    pub fn plans_dir(&self) -> PathBuf {
        self.data_root.join("plans")
    }
}

#[derive(Args, Debug, Clone)]
pub struct AdminArgs {
    #[arg(long, env = "FOUNDRY_ADMIN_SECRET", hide_env_values = true)]
    pub admin_secret: Option<String>,

    /// Recorded in logs next to privileged operations.
    #[arg(long, default_value = "admin")]
    pub actor: String,
}

#[derive(Args, Debug, Clone)]
pub struct InitArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// New admin secret; only its SHA-256 digest is stored.
    #[arg(long)]
    pub admin_secret: Option<String>,

    /// Required to replace an existing admin secret.
    #[arg(long, env = "FOUNDRY_ADMIN_SECRET", hide_env_values = true)]
    pub current_admin_secret: Option<String>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ImportArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// JSON array of `{slug, name, fields}` objects.
    #[arg(long)]
    pub input: PathBuf,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum FetchMode {
    Http,
    Rendered,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ProgressBackend {
    Sqlite,
    Memory,
}

#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Validate the first N records by slug order.
    #[arg(long, conflicts_with = "slugs")]
    pub limit: Option<usize>,

    #[arg(long = "slug")]
    pub slugs: Vec<String>,

    /// Skip slugs that completed without error in this earlier report.
    #[arg(long)]
    pub skip_validated: Option<PathBuf>,

    #[arg(long)]
    pub report_path: Option<PathBuf>,

    /// Creating this file stops the run before the next record.
    #[arg(long)]
    pub stop_file: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = FetchMode::Http)]
    pub fetch_mode: FetchMode,

    #[arg(long, env = "FOUNDRY_BROWSER_BIN", default_value = "chromium")]
    pub browser_bin: PathBuf,

    #[arg(long, env = "FOUNDRY_LLM_API_KEY", hide_env_values = true)]
    pub llm_api_key: String,

    #[arg(long, env = "FOUNDRY_LLM_BASE_URL", default_value = "https://api.anthropic.com")]
    pub llm_base_url: String,

    #[arg(long, env = "FOUNDRY_LLM_MODEL")]
    pub llm_model: String,

    #[arg(long, default_value_t = 2000)]
    pub delay_ms: u64,

    #[arg(long, default_value_t = 15000)]
    pub fetch_timeout_ms: u64,

    #[arg(long, default_value_t = 60000)]
    pub llm_timeout_ms: u64,

    #[arg(long, value_enum, default_value_t = ProgressBackend::Sqlite)]
    pub progress_backend: ProgressBackend,

    #[arg(long, default_value_t = 86400)]
    pub progress_ttl_secs: u64,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long)]
    pub report: PathBuf,

    #[arg(long)]
    pub output: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ReviewArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long)]
    pub report: PathBuf,

    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub admin: AdminArgs,

    #[arg(long, conflicts_with = "report", required_unless_present = "report")]
    pub plan: Option<PathBuf>,

    /// Plan high-confidence fixes from this report on the fly.
    #[arg(long)]
    pub report: Option<PathBuf>,

    #[arg(long)]
    pub reason: Option<String>,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RollbackArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub admin: AdminArgs,

    #[arg(long)]
    pub backup_id: String,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct BackupsArgs {
    #[command(subcommand)]
    pub command: BackupsCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum BackupsCommand {
    List(BackupsListArgs),
    Expire(BackupsExpireArgs),
}

#[derive(Args, Debug, Clone)]
pub struct BackupsListArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct BackupsExpireArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub admin: AdminArgs,

    #[arg(
        long,
        conflicts_with = "older_than_days",
        required_unless_present = "older_than_days"
    )]
    pub backup_id: Option<String>,

    #[arg(long)]
    pub older_than_days: Option<u32>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long)]
    pub job_id: Option<String>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}
