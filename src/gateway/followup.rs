//! Guarded follow-up check-ins (T+24h, T+72h) and answer handling.
//!
//! Guards run when the job fires, never when it is scheduled, so a stale job
//! degrades to a recorded skip.

use super::escalation::followup_job;
use super::{hours_ms, messages, Gateway};
use chrono::{DateTime, Utc};
use haven_channels::SMS;
use haven_core::{
    clock::{is_within_send_window, next_window_open, resolve_timezone, to_ms},
    config::QuietHoursPolicy,
    error::HavenError,
    message::OutgoingMessage,
    model::{AwaitingFollowUp, FollowUpAnswer, FollowUpStage, User},
};
use haven_memory::{audit::AuditKind, Job};
use tracing::{info, warn};

/// Why a follow-up did not go out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The user wrote in during the activity window.
    RecentActivity,
    /// Outside the local send window under the drop policy.
    QuietHours,
    AlertResolved,
    NoContact,
    UserMissing,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecentActivity => "recent_activity",
            Self::QuietHours => "quiet_hours",
            Self::AlertResolved => "alert_resolved",
            Self::NoContact => "no_contact",
            Self::UserMissing => "user_missing",
        }
    }
}

/// Result of firing one follow-up job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUpOutcome {
    Sent,
    Skipped(SkipReason),
    /// Re-queued at this epoch-ms instant (quiet hours, defer policy).
    Deferred(i64),
}

fn job_stage(job: &Job) -> Result<FollowUpStage, HavenError> {
    job.payload
        .get("stage")
        .and_then(|s| s.as_str())
        .ok_or_else(|| HavenError::Workflow(format!("follow-up job {} has no stage", job.id)))?
        .parse()
        .map_err(HavenError::Workflow)
}

impl Gateway {
    /// Evaluate the guards for a due follow-up job and send the check-in.
    ///
    /// A send failure is an error so the scheduler retries the job.
    pub(super) async fn fire_followup(
        &self,
        job: &Job,
        now: DateTime<Utc>,
    ) -> Result<FollowUpOutcome, HavenError> {
        let stage = job_stage(job)?;
        let now_ms = to_ms(now);
        let alert_id = job
            .alert_id
            .as_deref()
            .ok_or_else(|| HavenError::Workflow(format!("follow-up job {} has no alert", job.id)))?;

        if let Some(alert) = self.memory.get_alert(alert_id).await? {
            if alert.is_resolved() {
                return Ok(FollowUpOutcome::Skipped(SkipReason::AlertResolved));
            }
        }

        let Some(user) = self.memory.get_user(&job.user_id).await? else {
            return Ok(FollowUpOutcome::Skipped(SkipReason::UserMissing));
        };

        let activity_cutoff = now_ms - hours_ms(self.safety.activity_window_hours);
        if user.has_inbound_after(activity_cutoff) {
            info!("followup: {} active recently, skipping {}", user.id, stage.as_str());
            return Ok(FollowUpOutcome::Skipped(SkipReason::RecentActivity));
        }

        let tz = resolve_timezone(user.timezone.as_deref(), &self.safety.fallback_timezone);
        let (start, end) = (self.safety.send_window_start, self.safety.send_window_end);
        if !is_within_send_window(now, tz, start, end) {
            return Ok(match self.safety.quiet_hours_policy {
                QuietHoursPolicy::Drop => {
                    warn!(
                        "followup: {} {} fired in quiet hours ({tz}), dropping",
                        user.id,
                        stage.as_str()
                    );
                    FollowUpOutcome::Skipped(SkipReason::QuietHours)
                }
                QuietHoursPolicy::Defer => {
                    let open = to_ms(next_window_open(now, tz, start, end));
                    info!("followup: {} {} deferred to {open}", user.id, stage.as_str());
                    FollowUpOutcome::Deferred(open)
                }
            });
        }

        let Some(phone) = user.reachable_phone() else {
            return Ok(FollowUpOutcome::Skipped(SkipReason::NoContact));
        };

        let marker = AwaitingFollowUp {
            alert_id: alert_id.to_string(),
            stage,
        };
        // The marker is written before the send, so a marker that already
        // names this check-in means an earlier attempt delivered it.
        if user.awaiting_followup.as_ref() == Some(&marker) {
            info!("followup: {} {} check-in already sent", user.id, stage.as_str());
            return Ok(FollowUpOutcome::Sent);
        }
        self.memory.set_awaiting_followup(&user.id, &marker, now_ms).await?;

        let kind = match stage {
            FollowUpStage::T24h => AuditKind::FollowUpCheckIn,
            FollowUpStage::T72h => AuditKind::FollowUpNudge,
        };
        let body = messages::followup_checkin(&user, stage);
        if let Err(e) = self
            .deliver(SMS, &user.id, kind, OutgoingMessage::text(phone, &body), now)
            .await
        {
            if let Err(clear) = self.memory.clear_awaiting_followup(&user.id, now_ms).await {
                warn!("followup: could not clear marker for {} after failed send: {clear}", user.id);
            }
            return Err(e);
        }
        self.remember_outbound(&user.id, &body, now).await;
        info!("followup: sent {} check-in to {}", stage.as_str(), user.id);
        Ok(FollowUpOutcome::Sent)
    }

    /// Handle a YES / NO / UNSURE answer to a pending check-in.
    ///
    /// YES closes the alert. NO or UNSURE sends resources and, after the
    /// first check-in, schedules the final nudge.
    pub(super) async fn handle_followup_answer(
        &self,
        user: &User,
        marker: &AwaitingFollowUp,
        answer: FollowUpAnswer,
        now: DateTime<Utc>,
    ) -> Result<(), HavenError> {
        let now_ms = to_ms(now);
        // Every write below is idempotent and the marker is cleared last, so
        // a repeated answer for the same check-in finishes the same work.
        if !self
            .memory
            .record_followup_feedback(&user.id, &marker.alert_id, marker.stage, answer, now_ms)
            .await?
        {
            info!(
                "followup: {} answer for alert {} {} already recorded",
                user.id,
                marker.alert_id,
                marker.stage.as_str()
            );
        }

        let (kind, body) = match answer {
            FollowUpAnswer::Yes => {
                self.memory.resolve_alert(&marker.alert_id, now_ms).await?;
                info!("followup: {} connected with support, alert {} resolved", user.id, marker.alert_id);
                (AuditKind::FollowUpClosing, messages::followup_closing(user))
            }
            FollowUpAnswer::No | FollowUpAnswer::Unsure => {
                let more_to_come = marker.stage == FollowUpStage::T24h;
                if more_to_come {
                    let fire_at = now_ms + hours_ms(self.safety.nudge_delay_hours);
                    let job = followup_job(&user.id, &marker.alert_id, FollowUpStage::T72h, fire_at);
                    let (job_id, _) = self.memory.enqueue_job(&job, now_ms).await?;
                    info!("followup: {} answered {}, nudge {job_id} scheduled", user.id, answer.as_str());
                }
                (AuditKind::FollowUpReminder, messages::followup_reminder(user, more_to_come))
            }
        };
        self.memory.clear_awaiting_followup(&user.id, now_ms).await?;

        let to = user.reachable_phone().unwrap_or(&user.id).to_string();
        match self
            .deliver(SMS, &user.id, kind, OutgoingMessage::text(&to, &body), now)
            .await
        {
            Ok(()) => self.remember_outbound(&user.id, &body, now).await,
            Err(e) => warn!("followup: {} reply to {} failed: {e}", kind.as_str(), user.id),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{at, caregiver, Harness};
    use super::*;
    use haven_core::config::Config;
    use haven_core::model::{AlertPattern, AlertType, NewAlert, Severity, MS_PER_HOUR};
    use haven_memory::JobStatus;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    /// Seed a user with an open crisis alert and a pending t24h job.
    async fn seed(h: &Harness, user: User, created: DateTime<Utc>) -> (String, Job) {
        let ms = to_ms(created);
        h.store().upsert_user(&user, ms).await.unwrap();
        let alert = h
            .store()
            .insert_alert_if_absent(&NewAlert {
                user_id: user.id.clone(),
                alert_type: AlertType::CrisisDetected,
                pattern: AlertPattern::CrisisTerms,
                severity: Severity::Critical,
                message: "crisis".into(),
                context: json!({}),
                created_at: ms,
            })
            .await
            .unwrap()
            .alert;
        let (job_id, _) = h
            .store()
            .enqueue_job(
                &followup_job(&user.id, &alert.id, FollowUpStage::T24h, ms + 24 * MS_PER_HOUR),
                ms,
            )
            .await
            .unwrap();
        let job = h.store().get_job(&job_id).await.unwrap().unwrap();
        (alert.id, job)
    }

    #[tokio::test]
    async fn test_sends_checkin_and_marks_awaiting() {
        let h = Harness::new().await;
        let (alert_id, job) = seed(&h, caregiver("u1"), at(2026, 3, 1, 14, 0)).await;

        let outcome = h.gateway.fire_followup(&job, at(2026, 3, 2, 14, 0)).await.unwrap();
        assert_eq!(outcome, FollowUpOutcome::Sent);
        assert!(h.sms_bodies()[0].contains("Reply YES, NO, or UNSURE"));

        let user = h.store().get_user("u1").await.unwrap().unwrap();
        assert_eq!(
            user.awaiting_followup,
            Some(AwaitingFollowUp { alert_id, stage: FollowUpStage::T24h })
        );
    }

    #[tokio::test]
    async fn test_recent_activity_skips() {
        let h = Harness::new().await;
        let (_, job) = seed(&h, caregiver("u1"), at(2026, 3, 1, 14, 0)).await;
        let fire = at(2026, 3, 2, 14, 0);
        h.store()
            .record_inbound("u1", "doing a bit better", to_ms(fire) - 3 * MS_PER_HOUR)
            .await
            .unwrap();

        let outcome = h.gateway.fire_followup(&job, fire).await.unwrap();
        assert_eq!(outcome, FollowUpOutcome::Skipped(SkipReason::RecentActivity));
        assert!(h.sms_bodies().is_empty());
    }

    #[tokio::test]
    async fn test_message_exactly_one_window_ago_is_not_recent() {
        let h = Harness::new().await;
        let created = at(2026, 3, 1, 14, 0);
        let (_, job) = seed(&h, caregiver("u1"), created).await;
        h.store().record_inbound("u1", "I want to die", to_ms(created)).await.unwrap();

        let outcome = h.gateway.fire_followup(&job, at(2026, 3, 2, 14, 0)).await.unwrap();
        assert_eq!(outcome, FollowUpOutcome::Sent);
    }

    #[tokio::test]
    async fn test_quiet_hours_boundaries() {
        for (hour, minute, eligible) in [(8, 59, false), (9, 0, true), (19, 59, true), (20, 0, false)] {
            let h = Harness::new().await;
            let (_, job) = seed(&h, caregiver("u1"), at(2026, 3, 1, 2, 0)).await;
            let outcome = h.gateway.fire_followup(&job, at(2026, 3, 2, hour, minute)).await.unwrap();
            if eligible {
                assert_eq!(outcome, FollowUpOutcome::Sent, "{hour}:{minute:02}");
            } else {
                assert_eq!(
                    outcome,
                    FollowUpOutcome::Skipped(SkipReason::QuietHours),
                    "{hour}:{minute:02}"
                );
            }
        }
    }

    #[tokio::test]
    async fn test_quiet_hours_use_user_zone() {
        let h = Harness::new().await;
        let mut user = caregiver("u1");
        user.timezone = Some("America/New_York".into());
        let (_, job) = seed(&h, user, at(2026, 1, 10, 2, 0)).await;
        // 13:30 UTC is 08:30 in New York (EST).
        let outcome = h.gateway.fire_followup(&job, at(2026, 1, 11, 13, 30)).await.unwrap();
        assert_eq!(outcome, FollowUpOutcome::Skipped(SkipReason::QuietHours));
    }

    #[tokio::test]
    async fn test_unknown_zone_falls_back() {
        let h = Harness::new().await;
        let mut user = caregiver("u1");
        user.timezone = Some("Mars/Olympus".into());
        let (_, job) = seed(&h, user, at(2026, 1, 10, 2, 0)).await;
        // 20:00 UTC is 12:00 in Los Angeles (PST).
        let outcome = h.gateway.fire_followup(&job, at(2026, 1, 11, 20, 0)).await.unwrap();
        assert_eq!(outcome, FollowUpOutcome::Sent);
    }

    #[tokio::test]
    async fn test_defer_policy_requeues_at_window_open() {
        let mut config = Config::default();
        config.safety.quiet_hours_policy = QuietHoursPolicy::Defer;
        let h = Harness::with_config(config, None).await;
        let (_, job) = seed(&h, caregiver("u1"), at(2026, 3, 1, 21, 30)).await;

        let outcome = h.gateway.fire_followup(&job, at(2026, 3, 2, 21, 30)).await.unwrap();
        assert_eq!(outcome, FollowUpOutcome::Deferred(to_ms(at(2026, 3, 3, 9, 0))));
    }

    #[tokio::test]
    async fn test_resolved_alert_and_missing_contact() {
        let h = Harness::new().await;
        let (alert_id, job) = seed(&h, caregiver("u1"), at(2026, 3, 1, 14, 0)).await;
        h.store().resolve_alert(&alert_id, to_ms(at(2026, 3, 1, 18, 0))).await.unwrap();
        let outcome = h.gateway.fire_followup(&job, at(2026, 3, 2, 14, 0)).await.unwrap();
        assert_eq!(outcome, FollowUpOutcome::Skipped(SkipReason::AlertResolved));

        let mut user = caregiver("u2");
        user.phone_number = None;
        let (_, job) = seed(&h, user, at(2026, 3, 1, 14, 0)).await;
        let outcome = h.gateway.fire_followup(&job, at(2026, 3, 2, 14, 0)).await.unwrap();
        assert_eq!(outcome, FollowUpOutcome::Skipped(SkipReason::NoContact));
    }

    #[tokio::test]
    async fn test_send_failure_is_an_error() {
        let h = Harness::new().await;
        h.sms_fail.store(true, Ordering::SeqCst);
        let (_, job) = seed(&h, caregiver("u1"), at(2026, 3, 1, 14, 0)).await;
        assert!(h.gateway.fire_followup(&job, at(2026, 3, 2, 14, 0)).await.is_err());
        let user = h.store().get_user("u1").await.unwrap().unwrap();
        assert!(user.awaiting_followup.is_none());
    }

    #[tokio::test]
    async fn test_retried_job_does_not_resend_checkin() {
        let h = Harness::new().await;
        let (_, job) = seed(&h, caregiver("u1"), at(2026, 3, 1, 14, 0)).await;
        let fire = at(2026, 3, 2, 14, 0);

        assert_eq!(h.gateway.fire_followup(&job, fire).await.unwrap(), FollowUpOutcome::Sent);
        // As if completing the job failed and the scheduler fired it again.
        let again = h
            .gateway
            .fire_followup(&job, fire + chrono::Duration::minutes(2))
            .await
            .unwrap();
        assert_eq!(again, FollowUpOutcome::Sent);
        assert_eq!(h.sms_bodies().len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_answer_is_recorded_once() {
        let h = Harness::new().await;
        let (alert_id, first_job) = seed(&h, caregiver("u1"), at(2026, 3, 1, 14, 0)).await;
        h.store().complete_job(&first_job.id, 0).await.unwrap();
        let user = h.store().get_user("u1").await.unwrap().unwrap();
        let marker = AwaitingFollowUp { alert_id: alert_id.clone(), stage: FollowUpStage::T24h };
        let answered = at(2026, 3, 2, 15, 0);

        for offset in [0, 5] {
            h.gateway
                .handle_followup_answer(&user, &marker, FollowUpAnswer::No, answered + chrono::Duration::minutes(offset))
                .await
                .unwrap();
        }
        let feedback = h.store().followup_feedback_for_alert(&alert_id).await.unwrap();
        assert_eq!(feedback, vec![("t24h".to_string(), "no".to_string(), false)]);
        assert_eq!(h.store().pending_jobs_for_user("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_yes_resolves_alert() {
        let h = Harness::new().await;
        let (alert_id, _) = seed(&h, caregiver("u1"), at(2026, 3, 1, 14, 0)).await;
        let marker = AwaitingFollowUp { alert_id: alert_id.clone(), stage: FollowUpStage::T24h };
        h.store().set_awaiting_followup("u1", &marker, 0).await.unwrap();
        let user = h.store().get_user("u1").await.unwrap().unwrap();

        h.gateway
            .handle_followup_answer(&user, &marker, FollowUpAnswer::Yes, at(2026, 3, 2, 15, 0))
            .await
            .unwrap();

        let alert = h.store().get_alert(&alert_id).await.unwrap().unwrap();
        assert!(alert.is_resolved());
        let feedback = h.store().followup_feedback_for_alert(&alert_id).await.unwrap();
        assert_eq!(feedback, vec![("t24h".to_string(), "yes".to_string(), true)]);
        assert!(h.sms_bodies()[0].contains("glad you connected"));
        let user = h.store().get_user("u1").await.unwrap().unwrap();
        assert!(user.awaiting_followup.is_none());
    }

    #[tokio::test]
    async fn test_no_schedules_nudge_then_stops() {
        let h = Harness::new().await;
        let (alert_id, first_job) = seed(&h, caregiver("u1"), at(2026, 3, 1, 14, 0)).await;
        h.store().complete_job(&first_job.id, 0).await.unwrap();
        let user = h.store().get_user("u1").await.unwrap().unwrap();
        let answered = at(2026, 3, 2, 15, 0);

        let marker = AwaitingFollowUp { alert_id: alert_id.clone(), stage: FollowUpStage::T24h };
        h.gateway
            .handle_followup_answer(&user, &marker, FollowUpAnswer::No, answered)
            .await
            .unwrap();
        let jobs = h.store().pending_jobs_for_user("u1").await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_key, format!("followup:{alert_id}:t72h"));
        assert_eq!(jobs[0].fire_at, to_ms(answered) + 48 * MS_PER_HOUR);
        assert!(!h.gateway.memory.get_alert(&alert_id).await.unwrap().unwrap().is_resolved());

        let marker = AwaitingFollowUp { alert_id: alert_id.clone(), stage: FollowUpStage::T72h };
        h.gateway
            .handle_followup_answer(&user, &marker, FollowUpAnswer::Unsure, at(2026, 3, 5, 15, 0))
            .await
            .unwrap();
        assert_eq!(h.store().pending_jobs_for_user("u1").await.unwrap().len(), 1);
        let sms = h.sms_bodies();
        assert!(sms[0].contains("again soon"));
        assert!(!sms[1].contains("again soon"));

        let feedback = h.store().followup_feedback_for_alert(&alert_id).await.unwrap();
        assert_eq!(feedback.len(), 2);
        assert!(feedback.iter().all(|(_, _, connected)| !connected));
        let job = h.store().get_job(&jobs[0].id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }
}
