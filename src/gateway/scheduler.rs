//! Scheduler poll loop: due follow-up jobs and escalation runs awaiting retry.

use super::escalation::{FOLLOWUP_JOB, STEP_LEASE_MS};
use super::followup::FollowUpOutcome;
use super::Gateway;
use chrono::{DateTime, Utc};
use haven_core::clock::to_ms;
use haven_memory::Job;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// What one poll did.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickSummary {
    pub escalations_resumed: usize,
    pub followups_sent: usize,
    pub followups_skipped: usize,
    pub followups_deferred: usize,
    pub jobs_failed: usize,
}

impl Gateway {
    /// Background task: poll for due work every `poll_interval_secs`.
    pub(super) async fn scheduler_loop(self: Arc<Self>) {
        let poll_secs = self.scheduler_config.poll_interval_secs.max(1);
        info!("scheduler: polling every {poll_secs}s");
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(poll_secs)).await;
            let summary = self.run_scheduler_tick(Utc::now()).await;
            if summary != TickSummary::default() {
                info!("scheduler: tick {summary:?}");
            }
        }
    }

    /// Resume due escalation runs, then fire due jobs.
    pub async fn run_scheduler_tick(&self, now: DateTime<Utc>) -> TickSummary {
        let mut summary = TickSummary::default();
        let now_ms = to_ms(now);
        let limit = self.scheduler_config.batch_size.max(1);

        match self.memory.due_escalations(now_ms, limit).await {
            Ok(runs) => {
                for run in runs {
                    let id = run.id.clone();
                    match self.drive_escalation(run, now).await {
                        Ok(_) => summary.escalations_resumed += 1,
                        Err(e) => error!("scheduler: resuming escalation {id} failed: {e}"),
                    }
                }
            }
            Err(e) => error!("scheduler: failed to load due escalations: {e}"),
        }

        match self.memory.due_jobs(now_ms, limit).await {
            Ok(jobs) => {
                for job in &jobs {
                    self.run_job(job, now, &mut summary).await;
                }
            }
            Err(e) => error!("scheduler: failed to load due jobs: {e}"),
        }

        summary
    }

    async fn run_job(&self, job: &Job, now: DateTime<Utc>, summary: &mut TickSummary) {
        let now_ms = to_ms(now);
        if job.kind != FOLLOWUP_JOB {
            warn!("scheduler: unknown job kind {} ({})", job.kind, job.id);
            if let Err(e) = self.memory.skip_job(&job.id, "unknown kind", now_ms).await {
                error!("scheduler: failed to skip job {}: {e}", job.id);
            }
            return;
        }

        let result = match self.fire_followup(job, now).await {
            Ok(FollowUpOutcome::Sent) => {
                summary.followups_sent += 1;
                self.memory.complete_job(&job.id, now_ms).await
            }
            Ok(FollowUpOutcome::Skipped(reason)) => {
                summary.followups_skipped += 1;
                info!("scheduler: job {} skipped: {}", job.id, reason.as_str());
                self.memory.skip_job(&job.id, reason.as_str(), now_ms).await
            }
            Ok(FollowUpOutcome::Deferred(fire_at)) => {
                summary.followups_deferred += 1;
                self.memory.reschedule_job(&job.id, fire_at, now_ms).await
            }
            Err(e) => {
                summary.jobs_failed += 1;
                let max = self.scheduler_config.max_job_attempts;
                match self.memory.fail_job(&job.id, &e.to_string(), max, now_ms).await {
                    Ok(true) => {
                        warn!("scheduler: job {} failed, will retry: {e}", job.id);
                        Ok(())
                    }
                    Ok(false) => {
                        error!("scheduler: job {} failed permanently: {e}", job.id);
                        Ok(())
                    }
                    Err(store_err) => Err(store_err),
                }
            }
        };

        if let Err(e) = result {
            error!("scheduler: failed to record outcome of job {}: {e}", job.id);
        }
    }
}
