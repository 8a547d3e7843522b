//! PostgreSQL-backed job queue (`batch_jobs` table).
//!
//! Reservation uses `FOR UPDATE SKIP LOCKED` so several workers can poll the
//! same table. A partial unique index on `batch_id WHERE state = 'active'`
//! guarantees one in-flight job per batch even when two workers race for
//! different jobs of the same batch; the loser sees no job this round.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    queue::{BatchJobPayload, JobOptions, JobQueue, JobRecord, JobState, QueueStats},
};

#[derive(Clone)]
pub struct PgJobQueue {
    pool: DbPool,
}

impl PgJobQueue {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn find(&self, job_id: Uuid) -> Result<JobRecord, AppError> {
        sqlx::query_as::<_, JobRecord>("SELECT * FROM batch_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found("Job", job_id))
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(
        &self,
        key: &str,
        payload: &BatchJobPayload,
        options: &JobOptions,
    ) -> Result<JobRecord, AppError> {
        let job = JobRecord::new(key, payload, options);

        // ON CONFLICT keeps the first job registered under this key
        let inserted = sqlx::query_as::<_, JobRecord>(
            r#"
            INSERT INTO batch_jobs (
                id, job_key, batch_id, state, payload, progress,
                attempts_made, max_attempts, backoff, run_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, 0, 0, $6, $7, $8, $8)
            ON CONFLICT (job_key) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(&job.job_key)
        .bind(job.batch_id)
        .bind(JobState::Waiting)
        .bind(&job.payload)
        .bind(job.max_attempts)
        .bind(&job.backoff)
        .bind(job.created_at)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(job) => Ok(job),
            None => self
                .get_job(key)
                .await?
                .ok_or_else(|| AppError::Internal(format!("Job {} vanished after enqueue", key))),
        }
    }

    async fn get_job(&self, key: &str) -> Result<Option<JobRecord>, AppError> {
        let job = sqlx::query_as::<_, JobRecord>("SELECT * FROM batch_jobs WHERE job_key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }

    async fn latest_for_batch(&self, batch_id: i64) -> Result<Option<JobRecord>, AppError> {
        let job = sqlx::query_as::<_, JobRecord>(
            "SELECT * FROM batch_jobs WHERE batch_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(batch_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn stats(&self) -> Result<QueueStats, AppError> {
        let rows = sqlx::query_as::<_, (JobState, i64)>(
            "SELECT state, COUNT(*) FROM batch_jobs GROUP BY state",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = QueueStats::default();
        for (state, count) in rows {
            stats.add(state, count);
        }
        Ok(stats)
    }

    async fn reserve_next(&self) -> Result<Option<JobRecord>, AppError> {
        let reserved = sqlx::query_as::<_, JobRecord>(
            r#"
            UPDATE batch_jobs
            SET state = 'active',
                attempts_made = attempts_made + 1,
                progress = 0,
                started_at = NOW()
            WHERE id = (
                SELECT j.id FROM batch_jobs j
                WHERE j.state IN ('waiting', 'delayed')
                  AND j.run_at <= NOW()
                  AND NOT EXISTS (
                      SELECT 1 FROM batch_jobs a
                      WHERE a.batch_id = j.batch_id AND a.state = 'active'
                  )
                ORDER BY j.run_at, j.created_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .fetch_optional(&self.pool)
        .await;

        match reserved {
            Ok(job) => Ok(job),
            // Another worker activated a job of the same batch first
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn report_progress(&self, job_id: Uuid, progress: u8) -> Result<(), AppError> {
        sqlx::query("UPDATE batch_jobs SET progress = $2 WHERE id = $1")
            .bind(job_id)
            .bind(i16::from(progress.min(100)))
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn complete(&self, job_id: Uuid, result: serde_json::Value) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE batch_jobs
            SET state = $2,
                progress = 100,
                result = $3,
                failed_reason = NULL,
                finished_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(JobState::Completed)
        .bind(Json(result))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fail(&self, job_id: Uuid, reason: &str) -> Result<JobRecord, AppError> {
        let job = self.find(job_id).await?;
        let now = Utc::now();
        let (state, run_at) = job.next_after_failure(now);
        let finished_at = (state == JobState::Failed).then_some(now);

        let updated = sqlx::query_as::<_, JobRecord>(
            r#"
            UPDATE batch_jobs
            SET state = $2,
                run_at = $3,
                failed_reason = $4,
                finished_at = $5
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(state)
        .bind(run_at)
        .bind(reason)
        .bind(finished_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(updated)
    }
}
