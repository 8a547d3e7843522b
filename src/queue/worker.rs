//! Background worker that drains the batch job queue.
//!
//! # Process
//!
//! For every reserved job:
//!
//! 1. Mark the batch `IN_PROCESS` unless it is already `PROCESSED`
//!    (duplicate or late job); this also clears a previous attempt's error
//! 2. Run the batch processor, forwarding progress to the queue
//! 3. Complete the job with the outcome, or fail it so the queue can
//!    reschedule it with backoff
//!
//! The polling loop runs until its cancellation token fires and never runs
//! more than `concurrency` jobs at once.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    error::AppError,
    queue::{JobQueue, JobRecord, JobState},
    services::batch_processor::{BatchProcessor, ProgressReporter},
    store::BillingStore,
};

/// Writes processor progress onto the job row.
struct QueueProgress {
    queue: Arc<dyn JobQueue>,
    job_id: Uuid,
}

#[async_trait]
impl ProgressReporter for QueueProgress {
    async fn report(&self, percent: u8) {
        if let Err(e) = self.queue.report_progress(self.job_id, percent).await {
            tracing::warn!("Could not record progress for job {}: {}", self.job_id, e);
        }
    }
}

pub struct BatchWorker {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn BillingStore>,
    processor: Arc<BatchProcessor>,
    concurrency: usize,
    poll_interval: Duration,
}

impl BatchWorker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn BillingStore>,
        processor: Arc<BatchProcessor>,
        concurrency: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            store,
            processor,
            concurrency: concurrency.max(1),
            poll_interval,
        }
    }

    /// Poll the queue until `shutdown` is cancelled.
    ///
    /// Jobs already running when shutdown is requested are allowed to finish.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        tracing::info!(
            "Batch worker started (concurrency {}, poll every {:?})",
            self.concurrency,
            self.poll_interval
        );
        let permits = Arc::new(Semaphore::new(self.concurrency));

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self.queue.reserve_next().await {
                Ok(Some(job)) => {
                    let worker = self.clone();
                    tokio::spawn(async move {
                        worker.handle(job).await;
                        drop(permit);
                    });
                    continue;
                }
                Ok(None) => drop(permit),
                Err(e) => {
                    drop(permit);
                    tracing::error!("Failed to reserve job: {}", e);
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        // Wait for in-flight jobs
        let _ = permits.acquire_many(self.concurrency as u32).await;
        tracing::info!("Batch worker stopped");
    }

    /// Process every job that is ready now, one at a time.
    ///
    /// Returns the number of jobs handled. Jobs rescheduled with a non-zero
    /// backoff are not waited for.
    pub async fn drain(&self) -> Result<usize, AppError> {
        let mut handled = 0;
        while let Some(job) = self.queue.reserve_next().await? {
            self.handle(job).await;
            handled += 1;
        }
        Ok(handled)
    }

    /// Run one reserved job to completion or failure.
    pub async fn handle(&self, job: JobRecord) {
        let batch_id = job.batch_id;
        tracing::info!(
            job = %job.job_key,
            batch_id,
            attempt = job.attempts_made,
            max_attempts = job.max_attempts,
            "Job active"
        );

        match self.run_job(&job).await {
            Ok(result) => {
                if let Err(e) = self.queue.complete(job.id, result).await {
                    tracing::error!("Could not complete job {}: {}", job.job_key, e);
                    return;
                }
                tracing::info!(job = %job.job_key, batch_id, "Job completed");
            }
            Err(err) => self.fail_job(&job, &err).await,
        }
    }

    async fn run_job(&self, job: &JobRecord) -> Result<serde_json::Value, AppError> {
        let batch_id = job.batch_id;
        if !self.store.mark_batch_in_process(batch_id, Utc::now()).await? {
            tracing::debug!(batch_id, "Batch already processed, left as is");
        }

        let progress = QueueProgress {
            queue: self.queue.clone(),
            job_id: job.id,
        };
        let outcome = self
            .processor
            .process(batch_id, &job.payload.pending_ids, &progress)
            .await?;

        Ok(serde_json::to_value(&outcome)?)
    }

    async fn fail_job(&self, job: &JobRecord, err: &AppError) {
        let reason = match err {
            AppError::BatchProcessing {
                detail: Some(detail),
                ..
            } => detail.clone(),
            other => other.to_string(),
        };

        match self.queue.fail(job.id, &reason).await {
            Ok(updated) if updated.state == JobState::Delayed => tracing::warn!(
                job = %job.job_key,
                attempt = updated.attempts_made,
                max_attempts = updated.max_attempts,
                retry_at = %updated.run_at,
                "Job failed, will retry: {}",
                reason
            ),
            Ok(updated) => tracing::error!(
                job = %job.job_key,
                attempts = updated.attempts_made,
                "Job failed permanently: {}",
                reason
            ),
            Err(e) => tracing::error!("Could not record failure of job {}: {}", job.job_key, e),
        }
    }
}
