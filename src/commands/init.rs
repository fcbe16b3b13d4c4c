use std::io::Write;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::info;

use super::output;
use crate::cli::InitArgs;
use crate::pipeline::auth::AdminCredential;
use crate::store::{ADMIN_DIGEST_KEY, DB_SCHEMA_VERSION, SqliteStore};
use crate::util::ensure_directory;

const MIN_SECRET_CHARS: usize = 12;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitSummary {
    db_path: String,
    schema_version: &'static str,
    records: i64,
    admin_secret_configured: bool,
}

pub fn run(args: InitArgs) -> Result<()> {
    let db_path = args.store.db_path();
    if let Some(parent) = db_path.parent() {
        ensure_directory(parent)?;
    }
    ensure_directory(&args.store.reports_dir())?;
    ensure_directory(&args.store.plans_dir())?;

    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;

    if let Some(secret) = args.admin_secret.as_deref() {
        set_admin_secret(&store, secret, args.current_admin_secret.as_deref())?;
    }

    let summary = InitSummary {
        db_path: db_path.display().to_string(),
        schema_version: DB_SCHEMA_VERSION,
        records: store.count_records()?,
        admin_secret_configured: store.metadata(ADMIN_DIGEST_KEY)?.is_some(),
    };

    info!(
        path = %summary.db_path,
        schema_version = summary.schema_version,
        records = summary.records,
        admin_secret_configured = summary.admin_secret_configured,
        "store initialized"
    );

    if args.json {
        return output::write_json(&summary);
    }

    let mut out = output::stdout();
    writeln!(out, "Store:        {}", summary.db_path)?;
    writeln!(out, "Schema:       v{}", summary.schema_version)?;
    writeln!(out, "Records:      {}", summary.records)?;
    writeln!(
        out,
        "Admin secret: {}",
        if summary.admin_secret_configured {
            "configured"
        } else {
            "not configured"
        }
    )?;
    out.flush()?;
    Ok(())
}

fn set_admin_secret(store: &SqliteStore, secret: &str, current: Option<&str>) -> Result<()> {
    if secret.chars().count() < MIN_SECRET_CHARS {
        bail!("admin secret must be at least {MIN_SECRET_CHARS} characters");
    }

    if let Some(existing) = store.metadata(ADMIN_DIGEST_KEY)? {
        AdminCredential::from_hex_digest(&existing)?
            .authorize(current, "init")
            .context("replacing the admin secret requires the current one")?;
        info!("replacing existing admin secret");
    }

    store.set_metadata(
        ADMIN_DIGEST_KEY,
        &AdminCredential::from_secret(secret).digest_hex(),
    )?;
    info!("admin secret digest stored");
    Ok(())
}
