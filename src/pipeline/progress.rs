use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::PipelineResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub job_id: String,
    pub status: JobStatus,
    pub total: usize,
    pub processed: usize,
    pub errors: usize,
    pub current_slug: Option<String>,
    pub updated_at: String,
    pub report_path: Option<String>,
}

/// Where long-running jobs publish progress. Entries expire after the store's TTL.
pub trait JobProgressStore {
    fn set(&self, job_id: &str, progress: &JobProgress) -> PipelineResult<()>;
    fn get(&self, job_id: &str) -> PipelineResult<Option<JobProgress>>;
}

pub struct InMemoryProgressStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, (JobProgress, Instant)>>,
}

impl InMemoryProgressStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl JobProgressStore for InMemoryProgressStore {
    fn set(&self, job_id: &str, progress: &JobProgress) -> PipelineResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|poison| poison.into_inner());
        entries.insert(job_id.to_string(), (progress.clone(), Instant::now()));
        Ok(())
    }

    fn get(&self, job_id: &str) -> PipelineResult<Option<JobProgress>> {
        let mut entries = self.entries.lock().unwrap_or_else(|poison| poison.into_inner());
        let ttl = self.ttl;
        entries.retain(|_, (_, written)| written.elapsed() < ttl);
        Ok(entries.get(job_id).map(|(progress, _)| progress.clone()))
    }
}

/// Checked between records; either the flag or the stop file cancels a run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    stop_file: Option<PathBuf>,
}

impl CancelToken {
    pub fn with_stop_file(stop_file: PathBuf) -> Self {
        Self {
            flag: Arc::default(),
            stop_file: Some(stop_file),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        if self.stop_file.as_ref().is_some_and(|path| path.exists()) {
            self.cancel();
            return true;
        }
        false
    }
}
