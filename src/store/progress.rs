use std::time::Duration;

use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use super::SqliteStore;
use crate::error::PipelineResult;
use crate::pipeline::progress::{JobProgress, JobProgressStore};

/// Job progress kept in the `job_progress` table so other processes can read it.
pub struct SqliteProgressStore<'a> {
    store: &'a SqliteStore,
    ttl: Duration,
}

impl<'a> SqliteProgressStore<'a> {
    pub fn new(store: &'a SqliteStore, ttl: Duration) -> Self {
        Self { store, ttl }
    }
}

fn expires_at_epoch(now: i64, ttl: Duration) -> i64 {
    now.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX))
}

impl JobProgressStore for SqliteProgressStore<'_> {
    fn set(&self, job_id: &str, progress: &JobProgress) -> PipelineResult<()> {
        let progress_json = serde_json::to_string(progress)?;
        let expires_at = expires_at_epoch(Utc::now().timestamp(), self.ttl);

        self.store.connection().execute(
            "
            INSERT INTO job_progress(job_id, progress_json, updated_at, expires_at_epoch)
            VALUES(?1, ?2, ?3, ?4)
            ON CONFLICT(job_id) DO UPDATE SET
              progress_json=excluded.progress_json,
              updated_at=excluded.updated_at,
              expires_at_epoch=excluded.expires_at_epoch
            ",
            params![job_id, progress_json, progress.updated_at, expires_at],
        )?;

        Ok(())
    }

    fn get(&self, job_id: &str) -> PipelineResult<Option<JobProgress>> {
        let connection = self.store.connection();
        connection.execute(
            "DELETE FROM job_progress WHERE expires_at_epoch <= ?1",
            [Utc::now().timestamp()],
        )?;

        let raw: Option<String> = connection
            .query_row(
                "SELECT progress_json FROM job_progress WHERE job_id = ?1",
                [job_id],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|json| serde_json::from_str(&json).map_err(Into::into))
            .transpose()
    }
}
