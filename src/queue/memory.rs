//! In-memory job queue with the same semantics as the PostgreSQL queue.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    error::AppError,
    queue::{BatchJobPayload, JobOptions, JobQueue, JobRecord, JobState, QueueStats},
};

#[derive(Clone, Default)]
pub struct MemoryJobQueue {
    jobs: Arc<Mutex<HashMap<Uuid, JobRecord>>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every job, oldest first.
    pub async fn jobs(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<JobRecord> = self.jobs.lock().await.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(
        &self,
        key: &str,
        payload: &BatchJobPayload,
        options: &JobOptions,
    ) -> Result<JobRecord, AppError> {
        let mut jobs = self.jobs.lock().await;
        if let Some(existing) = jobs.values().find(|j| j.job_key == key) {
            return Ok(existing.clone());
        }

        let job = JobRecord::new(key, payload, options);
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, key: &str) -> Result<Option<JobRecord>, AppError> {
        let jobs = self.jobs.lock().await;
        Ok(jobs.values().find(|j| j.job_key == key).cloned())
    }

    async fn latest_for_batch(&self, batch_id: i64) -> Result<Option<JobRecord>, AppError> {
        let jobs = self.jobs.lock().await;
        Ok(jobs
            .values()
            .filter(|j| j.batch_id == batch_id)
            .max_by_key(|j| j.created_at)
            .cloned())
    }

    async fn stats(&self) -> Result<QueueStats, AppError> {
        let jobs = self.jobs.lock().await;
        let mut stats = QueueStats::default();
        for job in jobs.values() {
            stats.add(job.state, 1);
        }
        Ok(stats)
    }

    async fn reserve_next(&self) -> Result<Option<JobRecord>, AppError> {
        let mut jobs = self.jobs.lock().await;
        let now = Utc::now();

        let next_id = jobs
            .values()
            .filter(|j| matches!(j.state, JobState::Waiting | JobState::Delayed))
            .filter(|j| j.run_at <= now)
            .filter(|j| {
                !jobs
                    .values()
                    .any(|a| a.batch_id == j.batch_id && a.state == JobState::Active)
            })
            .min_by_key(|j| (j.run_at, j.created_at))
            .map(|j| j.id);

        let Some(id) = next_id else {
            return Ok(None);
        };
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        job.state = JobState::Active;
        job.attempts_made += 1;
        job.progress = 0;
        job.started_at = Some(now);
        Ok(Some(job.clone()))
    }

    async fn report_progress(&self, job_id: Uuid, progress: u8) -> Result<(), AppError> {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.get_mut(&job_id) {
            job.progress = i16::from(progress.min(100));
        }
        Ok(())
    }

    async fn complete(&self, job_id: Uuid, result: serde_json::Value) -> Result<(), AppError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| AppError::not_found("Job", job_id))?;
        job.state = JobState::Completed;
        job.progress = 100;
        job.result = Some(Json(result));
        job.failed_reason = None;
        job.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, reason: &str) -> Result<JobRecord, AppError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| AppError::not_found("Job", job_id))?;

        let now = Utc::now();
        let (state, run_at) = job.next_after_failure(now);
        job.state = state;
        job.run_at = run_at;
        job.failed_reason = Some(reason.to_string());
        job.finished_at = (state == JobState::Failed).then_some(now);
        Ok(job.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::BackoffPolicy;

    fn payload(batch_id: i64) -> BatchJobPayload {
        BatchJobPayload {
            batch_id,
            pending_ids: vec![1],
        }
    }

    fn no_delay(attempts: u32) -> JobOptions {
        JobOptions {
            attempts,
            backoff: BackoffPolicy::Fixed { delay_ms: 0 },
        }
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_by_key() {
        let queue = MemoryJobQueue::new();
        let first = queue.enqueue("batch-1", &payload(1), &no_delay(3)).await.unwrap();
        let second = queue.enqueue("batch-1", &payload(1), &no_delay(3)).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(queue.stats().await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn one_active_job_per_batch() {
        let queue = MemoryJobQueue::new();
        queue.enqueue("batch-1", &payload(1), &no_delay(3)).await.unwrap();
        queue.enqueue("batch-1-retry-1", &payload(1), &no_delay(3)).await.unwrap();
        queue.enqueue("batch-2", &payload(2), &no_delay(3)).await.unwrap();

        let a = queue.reserve_next().await.unwrap().unwrap();
        let b = queue.reserve_next().await.unwrap().unwrap();
        assert_ne!(a.batch_id, b.batch_id);
        assert!(queue.reserve_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failures_delay_then_fail() {
        let queue = MemoryJobQueue::new();
        queue.enqueue("batch-1", &payload(1), &no_delay(2)).await.unwrap();

        let job = queue.reserve_next().await.unwrap().unwrap();
        let after_first = queue.fail(job.id, "boom").await.unwrap();
        assert_eq!(after_first.state, JobState::Delayed);

        let job = queue.reserve_next().await.unwrap().unwrap();
        assert_eq!(job.attempts_made, 2);
        let after_second = queue.fail(job.id, "boom again").await.unwrap();
        assert_eq!(after_second.state, JobState::Failed);
        assert_eq!(after_second.failed_reason.as_deref(), Some("boom again"));

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert!(queue.reserve_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delayed_job_waits_for_backoff() {
        let queue = MemoryJobQueue::new();
        let options = JobOptions {
            attempts: 3,
            backoff: BackoffPolicy::Exponential { delay_ms: 60_000 },
        };
        queue.enqueue("batch-1", &payload(1), &options).await.unwrap();

        let job = queue.reserve_next().await.unwrap().unwrap();
        queue.fail(job.id, "boom").await.unwrap();

        assert!(queue.reserve_next().await.unwrap().is_none());
        assert_eq!(queue.stats().await.unwrap().delayed, 1);
    }
}
