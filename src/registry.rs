//! Process-wide job store polled by external callers.
//!
//! One record per generation request. The driver and stages are the only
//! writers; anyone may read. Updates are partial merges so that concurrent
//! writers touching different fields never clobber each other, and reads
//! hand out cloned snapshots so nobody observes a record mid-mutation.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::{ImagePrompt, QaVerdict, RenderedImage, Storyboard};

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "QUEUED"),
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::Succeeded => write!(f, "SUCCEEDED"),
            JobStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// The full record external pollers see.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    /// 0–100. Non-decreasing on the successful path; held at 100 once
    /// terminal, including FAILED.
    pub progress: u8,
    pub error: Option<String>,
    pub storyboard: Option<Storyboard>,
    pub prompts: Option<Vec<ImagePrompt>>,
    pub images: Option<Vec<RenderedImage>>,
    pub qa_results: Option<Vec<QaVerdict>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    fn new(id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: JobStatus::Queued,
            progress: 0,
            error: None,
            storyboard: None,
            prompts: None,
            images: None,
            qa_results: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A partial update. Fields left as `None` keep their current value.
///
/// `error` is doubly optional: `Some(None)` clears a previous message
/// (a restarted job drops its stale error), `None` leaves it alone.
#[derive(Debug, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub error: Option<Option<String>>,
    pub storyboard: Option<Storyboard>,
    pub prompts: Option<Vec<ImagePrompt>>,
    pub images: Option<Vec<RenderedImage>>,
    pub qa_results: Option<Vec<QaVerdict>>,
}

/// Concurrency-safe keyed store of job records. Process-lifetime only; no
/// persistence guarantee.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh QUEUED record. An existing record under the same id
    /// is left untouched: clobbering a live job would orphan its driver.
    pub fn create(&self, id: &str) {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        if jobs.contains_key(id) {
            tracing::warn!(job_id = id, "create ignored, job already registered");
            return;
        }
        jobs.insert(id.to_string(), Job::new(id.to_string()));
    }

    /// Snapshot of a record, or `None` for unknown ids.
    pub fn get(&self, id: &str) -> Option<Job> {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        jobs.get(id).cloned()
    }

    /// Merge a partial update into a record. Unknown ids warn and no-op.
    pub fn update(&self, id: &str, update: JobUpdate) {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(job) = jobs.get_mut(id) else {
            tracing::warn!(job_id = id, "update for unknown job ignored");
            return;
        };
        if let Some(status) = update.status {
            job.status = status;
        }
        if let Some(progress) = update.progress {
            job.progress = progress;
        }
        if let Some(error) = update.error {
            job.error = error;
        }
        if let Some(storyboard) = update.storyboard {
            job.storyboard = Some(storyboard);
        }
        if let Some(prompts) = update.prompts {
            job.prompts = Some(prompts);
        }
        if let Some(images) = update.images {
            job.images = Some(images);
        }
        if let Some(qa_results) = update.qa_results {
            job.qa_results = Some(qa_results);
        }
        job.updated_at = Utc::now();
    }
}
