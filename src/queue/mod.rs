//! Durable job queue for asynchronous batch processing.
//!
//! # Job Lifecycle
//!
//! ```text
//! waiting → active → completed
//!             ↓
//!          delayed (attempts left, backoff) → active → ...
//!             ↓
//!           failed (attempts exhausted)
//! ```
//!
//! Jobs are keyed by a caller-chosen string (`batch-{id}` for the initial
//! submission, `batch-{id}-retry-{millis}` for manual retries). Enqueueing an
//! existing key returns the existing job. At most one job per batch is active
//! at any time.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

use crate::error::AppError;

pub mod memory;
pub mod postgres;
pub mod worker;

pub use memory::MemoryJobQueue;
pub use postgres::PgJobQueue;
pub use worker::BatchWorker;

/// Queue key of the initial processing job of a batch.
pub fn batch_job_key(batch_id: i64) -> String {
    format!("batch-{}", batch_id)
}

/// Queue key of a manual retry.
pub fn retry_job_key(batch_id: i64, at: DateTime<Utc>) -> String {
    format!("batch-{}-retry-{}", batch_id, at.timestamp_millis())
}

/// State of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_state", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Delayed => "delayed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delay before a failed attempt is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackoffPolicy {
    /// Same delay after every failure
    Fixed { delay_ms: u64 },

    /// `delay_ms * 2^(attempt - 1)`
    Exponential { delay_ms: u64 },
}

impl BackoffPolicy {
    /// Longest delay the exponential policy will produce.
    const MAX_DELAY: Duration = Duration::from_secs(60 * 60);

    /// Delay after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match *self {
            BackoffPolicy::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            BackoffPolicy::Exponential { delay_ms } => {
                let exponent = attempt.saturating_sub(1).min(31);
                let delay = delay_ms.saturating_mul(1u64 << exponent);
                Duration::from_millis(delay).min(Self::MAX_DELAY)
            }
        }
    }
}

/// Retry settings attached to a job when it is enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOptions {
    pub attempts: u32,
    pub backoff: BackoffPolicy,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: BackoffPolicy::Exponential { delay_ms: 2000 },
        }
    }
}

/// Work description carried by a batch job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJobPayload {
    pub batch_id: i64,
    pub pending_ids: Vec<i64>,
}

/// A job as stored in the `batch_jobs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRecord {
    pub id: Uuid,
    pub job_key: String,
    pub batch_id: i64,
    pub state: JobState,
    pub payload: Json<BatchJobPayload>,
    pub progress: i16,

    /// Attempts started so far, including the one in flight
    pub attempts_made: i32,
    pub max_attempts: i32,
    pub backoff: Json<BackoffPolicy>,

    pub failed_reason: Option<String>,
    pub result: Option<Json<serde_json::Value>>,

    /// Earliest time the job may be reserved
    pub run_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// A fresh `waiting` job.
    pub fn new(key: &str, payload: &BatchJobPayload, options: &JobOptions) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_key: key.to_string(),
            batch_id: payload.batch_id,
            state: JobState::Waiting,
            payload: Json(payload.clone()),
            progress: 0,
            attempts_made: 0,
            max_attempts: options.attempts.max(1) as i32,
            backoff: Json(options.backoff),
            failed_reason: None,
            result: None,
            run_at: now,
            created_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// State and next run time after the current attempt failed.
    pub fn next_after_failure(&self, now: DateTime<Utc>) -> (JobState, DateTime<Utc>) {
        if self.attempts_made >= self.max_attempts {
            return (JobState::Failed, now);
        }

        let delay = self.backoff.0.delay_after(self.attempts_made.max(1) as u32);
        let run_at = now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
        (JobState::Delayed, run_at)
    }
}

/// Job status as exposed by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobInfo {
    pub job_id: String,
    pub status: JobState,
    pub progress: i16,
    pub attempts_made: i32,
    pub failed_reason: Option<String>,
}

impl From<&JobRecord> for JobInfo {
    fn from(job: &JobRecord) -> Self {
        Self {
            job_id: job.job_key.clone(),
            status: job.state,
            progress: job.progress,
            attempts_made: job.attempts_made,
            failed_reason: job.failed_reason.clone(),
        }
    }
}

/// Job counts per state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub waiting: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
    pub delayed: i64,
}

impl QueueStats {
    pub fn add(&mut self, state: JobState, count: i64) {
        match state {
            JobState::Waiting => self.waiting += count,
            JobState::Active => self.active += count,
            JobState::Completed => self.completed += count,
            JobState::Failed => self.failed += count,
            JobState::Delayed => self.delayed += count,
        }
    }
}

/// Queue operations used by the API (enqueue, inspect) and by the worker
/// (reserve, progress, complete, fail).
#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
    /// Add a job, or return the existing job with the same key.
    async fn enqueue(
        &self,
        key: &str,
        payload: &BatchJobPayload,
        options: &JobOptions,
    ) -> Result<JobRecord, AppError>;

    async fn get_job(&self, key: &str) -> Result<Option<JobRecord>, AppError>;

    /// Most recently created job of a batch (initial or retry).
    async fn latest_for_batch(&self, batch_id: i64) -> Result<Option<JobRecord>, AppError>;

    async fn stats(&self) -> Result<QueueStats, AppError>;

    /// Claim the next runnable job, skipping batches that already have an
    /// active job. The returned job is `active` with `attempts_made`
    /// incremented.
    async fn reserve_next(&self) -> Result<Option<JobRecord>, AppError>;

    async fn report_progress(&self, job_id: Uuid, progress: u8) -> Result<(), AppError>;

    async fn complete(&self, job_id: Uuid, result: serde_json::Value) -> Result<(), AppError>;

    /// Record a failed attempt. The job becomes `delayed` if attempts remain,
    /// `failed` otherwise. Returns the updated job.
    async fn fail(&self, job_id: Uuid, reason: &str) -> Result<JobRecord, AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_per_attempt() {
        let backoff = BackoffPolicy::Exponential { delay_ms: 2000 };
        assert_eq!(backoff.delay_after(1), Duration::from_millis(2000));
        assert_eq!(backoff.delay_after(2), Duration::from_millis(4000));
        assert_eq!(backoff.delay_after(3), Duration::from_millis(8000));
        assert_eq!(backoff.delay_after(40), BackoffPolicy::MAX_DELAY);
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let backoff = BackoffPolicy::Fixed { delay_ms: 500 };
        assert_eq!(backoff.delay_after(1), backoff.delay_after(5));
    }

    #[test]
    fn failure_delays_until_attempts_are_exhausted() {
        let payload = BatchJobPayload {
            batch_id: 7,
            pending_ids: vec![1, 2],
        };
        let mut job = JobRecord::new("batch-7", &payload, &JobOptions::default());
        let now = Utc::now();

        job.attempts_made = 1;
        let (state, run_at) = job.next_after_failure(now);
        assert_eq!(state, JobState::Delayed);
        assert_eq!(run_at - now, chrono::Duration::milliseconds(2000));

        job.attempts_made = 3;
        assert_eq!(job.next_after_failure(now).0, JobState::Failed);
    }

    #[test]
    fn job_keys_are_derived_from_batch_id() {
        assert_eq!(batch_job_key(12), "batch-12");
        let at = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        assert_eq!(retry_job_key(12, at), "batch-12-retry-1700000000123");
    }

    #[test]
    fn backoff_serializes_with_type_tag() {
        let json = serde_json::to_value(BackoffPolicy::Exponential { delay_ms: 2000 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "exponential", "delay_ms": 2000}));
    }
}
