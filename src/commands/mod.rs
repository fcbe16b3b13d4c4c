use anyhow::{Context, Result, bail};

use crate::cli::{AdminArgs, StoreArgs};
use crate::pipeline::auth::{AdminContext, AdminCredential};
use crate::store::{ADMIN_DIGEST_KEY, SqliteStore};

pub mod apply;
pub mod backups;
pub mod import;
pub mod init;
mod output;
pub mod plan;
pub mod review;
pub mod rollback;
pub mod status;
pub mod validate;

fn open_store(args: &StoreArgs) -> Result<SqliteStore> {
    let db_path = args.db_path();
    if !db_path.exists() {
        bail!(
            "database not found at {}; run `foundry-steward init` first",
            db_path.display()
        );
    }
    SqliteStore::open(&db_path).with_context(|| format!("failed to open {}", db_path.display()))
}

fn authorize(store: &SqliteStore, args: &AdminArgs) -> Result<AdminContext> {
    let Some(digest) = store.metadata(ADMIN_DIGEST_KEY)? else {
        bail!("no admin secret configured; run `foundry-steward init --admin-secret <secret>`");
    };

    let credential = AdminCredential::from_hex_digest(&digest)?;
    let context = credential.authorize(args.admin_secret.as_deref(), &args.actor)?;
    Ok(context)
}
