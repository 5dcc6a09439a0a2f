//! Durable delayed jobs: enqueue with key-based identity, poll, retry.

use super::{parse_column, Store};
use haven_core::{error::HavenError, model::MS_PER_MINUTE};
use std::str::FromStr;
use uuid::Uuid;

/// How far a failed job is pushed before its next attempt.
const RETRY_DELAY_MS: i64 = 2 * MS_PER_MINUTE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Done,
    Skipped,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Done => "done",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "done" => Ok(Self::Done),
            "skipped" => Ok(Self::Skipped),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A job to enqueue.
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Identity: at most one pending job per key.
    pub job_key: String,
    pub kind: String,
    pub user_id: String,
    pub alert_id: Option<String>,
    pub payload: serde_json::Value,
    pub fire_at: i64,
}

/// A stored job.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub job_key: String,
    pub kind: String,
    pub user_id: String,
    pub alert_id: Option<String>,
    pub payload: serde_json::Value,
    pub fire_at: i64,
    pub status: JobStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
}

type JobRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    i64,
    String,
    i64,
    Option<String>,
);

const JOB_COLUMNS: &str =
    "id, job_key, kind, user_id, alert_id, payload, fire_at, status, attempts, last_error";

fn job_from_row(row: JobRow) -> Result<Job, HavenError> {
    let (id, job_key, kind, user_id, alert_id, payload, fire_at, status, attempts, last_error) =
        row;
    Ok(Job {
        id,
        job_key,
        kind,
        user_id,
        alert_id,
        payload: serde_json::from_str(&payload)?,
        fire_at,
        status: parse_column(&status, "job")?,
        attempts: attempts.max(0) as u32,
        last_error,
    })
}

impl Store {
    /// Enqueue a job. A pending job with the same key is reused.
    ///
    /// Returns `(id, created)`.
    pub async fn enqueue_job(&self, job: &NewJob, now: i64) -> Result<(String, bool), HavenError> {
        let id = Uuid::new_v4().to_string();
        let result = sqlx::query(
            "INSERT OR IGNORE INTO jobs \
             (id, job_key, kind, user_id, alert_id, payload, fire_at, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?)",
        )
        .bind(&id)
        .bind(&job.job_key)
        .bind(&job.kind)
        .bind(&job.user_id)
        .bind(&job.alert_id)
        .bind(serde_json::to_string(&job.payload)?)
        .bind(job.fire_at)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| HavenError::Memory(format!("enqueue job failed: {e}")))?;

        if result.rows_affected() == 1 {
            return Ok((id, true));
        }

        let existing: Option<(String,)> =
            sqlx::query_as("SELECT id FROM jobs WHERE job_key = ? AND status = 'pending' LIMIT 1")
                .bind(&job.job_key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| HavenError::Memory(format!("job dedup check failed: {e}")))?;

        match existing {
            Some((existing_id,)) => {
                tracing::info!("scheduler: job dedup, reusing {existing_id} for {}", job.job_key);
                Ok((existing_id, false))
            }
            None => Err(HavenError::Memory(format!(
                "job {} changed concurrently",
                job.job_key
            ))),
        }
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<Job>, HavenError> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| HavenError::Memory(format!("get job failed: {e}")))?;
        row.map(job_from_row).transpose()
    }

    /// Pending jobs for a user, soonest first.
    pub async fn pending_jobs_for_user(&self, user_id: &str) -> Result<Vec<Job>, HavenError> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE user_id = ? AND status = 'pending' \
             ORDER BY fire_at ASC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HavenError::Memory(format!("pending jobs failed: {e}")))?;
        rows.into_iter().map(job_from_row).collect()
    }

    /// Pending jobs whose fire time has passed, oldest first.
    pub async fn due_jobs(&self, now: i64, limit: i64) -> Result<Vec<Job>, HavenError> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'pending' AND fire_at <= ? \
             ORDER BY fire_at ASC LIMIT ?"
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HavenError::Memory(format!("get due jobs failed: {e}")))?;
        rows.into_iter().map(job_from_row).collect()
    }

    pub async fn complete_job(&self, id: &str, now: i64) -> Result<(), HavenError> {
        self.finish_job(id, JobStatus::Done, None, now).await
    }

    /// Close a job without running it, keeping the reason.
    pub async fn skip_job(&self, id: &str, reason: &str, now: i64) -> Result<(), HavenError> {
        self.finish_job(id, JobStatus::Skipped, Some(reason), now)
            .await
    }

    async fn finish_job(
        &self,
        id: &str,
        status: JobStatus,
        detail: Option<&str>,
        now: i64,
    ) -> Result<(), HavenError> {
        sqlx::query(
            "UPDATE jobs SET status = ?, last_error = COALESCE(?, last_error), updated_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(detail)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| HavenError::Memory(format!("finish job failed: {e}")))?;
        Ok(())
    }

    /// Keep the job pending with a new fire time.
    pub async fn reschedule_job(&self, id: &str, fire_at: i64, now: i64) -> Result<(), HavenError> {
        sqlx::query(
            "UPDATE jobs SET fire_at = ?, updated_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(fire_at)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| HavenError::Memory(format!("reschedule job failed: {e}")))?;
        Ok(())
    }

    /// Fail a job: increment attempts and either push it two minutes out or
    /// mark it permanently failed.
    ///
    /// Returns `true` if the job will be retried.
    pub async fn fail_job(
        &self,
        id: &str,
        error: &str,
        max_attempts: u32,
        now: i64,
    ) -> Result<bool, HavenError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT attempts FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| HavenError::Memory(format!("fail_job fetch failed: {e}")))?;

        let attempts = row.map(|r| r.0).unwrap_or(0) + 1;

        if attempts < i64::from(max_attempts) {
            sqlx::query(
                "UPDATE jobs SET attempts = ?, last_error = ?, fire_at = ?, updated_at = ? \
                 WHERE id = ?",
            )
            .bind(attempts)
            .bind(error)
            .bind(now + RETRY_DELAY_MS)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| HavenError::Memory(format!("fail_job retry update failed: {e}")))?;
            Ok(true)
        } else {
            sqlx::query(
                "UPDATE jobs SET status = 'failed', attempts = ?, last_error = ?, updated_at = ? \
                 WHERE id = ?",
            )
            .bind(attempts)
            .bind(error)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| HavenError::Memory(format!("fail_job final update failed: {e}")))?;
            Ok(false)
        }
    }
}
