//! Durable crisis escalation: log alert -> respond -> notify contact ->
//! schedule follow-up.
//!
//! Each run is persisted with a step cursor. A failed step stores the error,
//! backs off, and is resumed by the scheduler loop from the same step.

use super::{hours_ms, messages, Gateway};
use chrono::{DateTime, Utc};
use haven_channels::{EMAIL, SMS};
use haven_core::{
    clock::to_ms,
    context::Context,
    crisis::CrisisScan,
    error::HavenError,
    message::OutgoingMessage,
    model::{
        AlertPattern, AlertType, CrisisSeverity, EscalationRun, EscalationState, FollowUpStage,
        NewAlert, User, MS_PER_MINUTE,
    },
};
use haven_memory::{
    audit::{truncate, AuditKind},
    NewJob,
};
use serde_json::json;
use tracing::{debug, error, info, warn};

/// How long a run being driven is hidden from the scheduler's resume query.
pub(super) const STEP_LEASE_MS: i64 = 5 * MS_PER_MINUTE;

/// Job kind for guarded follow-up check-ins.
pub(super) const FOLLOWUP_JOB: &str = "followup";

/// A follow-up job for one alert and stage. The key makes re-scheduling idempotent.
pub(super) fn followup_job(
    user_id: &str,
    alert_id: &str,
    stage: FollowUpStage,
    fire_at: i64,
) -> NewJob {
    NewJob {
        job_key: format!("{FOLLOWUP_JOB}:{alert_id}:{}", stage.as_str()),
        kind: FOLLOWUP_JOB.to_string(),
        user_id: user_id.to_string(),
        alert_id: Some(alert_id.to_string()),
        payload: json!({ "stage": stage.as_str() }),
        fire_at,
    }
}

impl Gateway {
    /// Create the run for a crisis event and drive it as far as it goes.
    ///
    /// `event_id` is the idempotency key: a second call with the same id
    /// returns the existing run without executing anything.
    pub async fn start_escalation(
        &self,
        event_id: &str,
        user: &User,
        text: &str,
        scan: &CrisisScan,
        now: DateTime<Utc>,
    ) -> Result<EscalationRun, HavenError> {
        let now_ms = to_ms(now);
        let severity = scan.severity.unwrap_or(CrisisSeverity::High);
        let mut run = EscalationRun::new(
            event_id,
            &user.id,
            user.thread_id.as_deref(),
            text,
            scan.terms.clone(),
            severity,
            now_ms,
        );
        // Leased from birth: if this process dies mid-drive the scheduler picks it up.
        run.next_attempt_at = Some(now_ms + STEP_LEASE_MS);

        let (run, created) = self.memory.create_escalation(&run).await?;
        if !created {
            info!(
                "escalation: {event_id} already exists in state {}",
                run.state.as_str()
            );
            return Ok(run);
        }

        info!(
            "escalation: started {event_id} for {} (severity {}, terms {:?})",
            user.id,
            severity.as_str(),
            run.terms
        );
        self.drive_escalation(run, now).await
    }

    /// Advance a run step by step until it is terminal or a step fails.
    pub async fn drive_escalation(
        &self,
        mut run: EscalationRun,
        now: DateTime<Utc>,
    ) -> Result<EscalationRun, HavenError> {
        if run.state.is_terminal() {
            return Ok(run);
        }
        let now_ms = to_ms(now);
        run.next_attempt_at = Some(now_ms + STEP_LEASE_MS);
        run.updated_at = now_ms;
        self.memory.save_escalation(&run).await?;

        while !run.state.is_terminal() {
            let from = run.state;
            match self.run_step(&mut run, now).await {
                Ok(next) => {
                    debug!("escalation: {} {} -> {}", run.id, from.as_str(), next.as_str());
                    run.state = next;
                    run.attempts = 0;
                    run.last_error = None;
                    run.next_attempt_at = (!next.is_terminal()).then_some(now_ms + STEP_LEASE_MS);
                    run.updated_at = now_ms;
                    self.memory.save_escalation(&run).await?;
                }
                Err(e) => return self.step_failed(run, e, now).await,
            }
        }

        info!("escalation: {} complete for {}", run.id, run.user_id);
        Ok(run)
    }

    /// Record a step failure: back off, or give up after the attempt budget.
    async fn step_failed(
        &self,
        mut run: EscalationRun,
        err: HavenError,
        now: DateTime<Utc>,
    ) -> Result<EscalationRun, HavenError> {
        let now_ms = to_ms(now);
        run.attempts += 1;
        run.last_error = Some(err.to_string());
        run.updated_at = now_ms;

        if run.attempts >= self.safety.max_step_attempts.max(1) {
            let replied = !matches!(run.state, EscalationState::Detected | EscalationState::Logged);
            error!(
                "escalation: {} failed at {} after {} attempts: {err}",
                run.id,
                run.state.as_str(),
                run.attempts
            );
            run.state = EscalationState::Failed;
            run.next_attempt_at = None;
            self.memory.save_escalation(&run).await?;
            if !replied {
                self.send_canned_safety(&run.user_id, now).await;
            }
            return Ok(run);
        }

        let delay = i64::try_from(self.safety.backoff_ms(run.attempts)).unwrap_or(i64::MAX);
        run.next_attempt_at = Some(now_ms.saturating_add(delay));
        warn!(
            "escalation: {} step {} failed (attempt {}/{}), retry in {delay}ms: {err}",
            run.id,
            run.state.as_str(),
            run.attempts,
            self.safety.max_step_attempts
        );
        self.memory.save_escalation(&run).await?;
        Ok(run)
    }

    /// Execute the step after `run.state` and return the state it reaches.
    async fn run_step(
        &self,
        run: &mut EscalationRun,
        now: DateTime<Utc>,
    ) -> Result<EscalationState, HavenError> {
        match run.state {
            EscalationState::Detected => {
                self.log_crisis_alert(run, now).await?;
                Ok(EscalationState::Logged)
            }
            EscalationState::Logged => {
                self.respond_to_crisis(run, now).await?;
                Ok(EscalationState::Responded)
            }
            EscalationState::Responded => {
                self.notify_emergency_contact(run, now).await?;
                Ok(EscalationState::Notified)
            }
            EscalationState::Notified => {
                self.schedule_first_followup(run, now).await?;
                Ok(EscalationState::FollowUpScheduled)
            }
            EscalationState::FollowUpScheduled | EscalationState::Failed => Ok(run.state),
        }
    }

    async fn log_crisis_alert(
        &self,
        run: &mut EscalationRun,
        now: DateTime<Utc>,
    ) -> Result<(), HavenError> {
        let alert = NewAlert {
            user_id: run.user_id.clone(),
            alert_type: AlertType::CrisisDetected,
            pattern: AlertPattern::CrisisTerms,
            severity: run.severity.to_alert_severity(),
            message: format!("Crisis terms detected: {}", run.terms.join(", ")),
            context: json!({
                "terms": run.terms,
                "severity": run.severity.as_str(),
                "escalationId": run.id,
                "threadId": run.thread_id,
                "messagePreview": truncate(&run.message_text, 200),
            }),
            created_at: to_ms(now),
        };

        let inserted = self.memory.insert_escalation_alert(&run.id, &alert).await?;
        if inserted.created {
            info!(
                "escalation: {} logged alert {} ({})",
                run.id,
                inserted.alert.id,
                inserted.alert.severity.as_str()
            );
        }
        self.supersede_followups(&run.user_id, &inserted.alert.id, now)
            .await?;
        run.alert_id = Some(inserted.alert.id);
        Ok(())
    }

    /// Retire the follow-up state of earlier crises once a new one is logged:
    /// the pending check-in marker and any queued check-ins for older alerts.
    async fn supersede_followups(
        &self,
        user_id: &str,
        alert_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), HavenError> {
        let now_ms = to_ms(now);
        let user = self.require_user(user_id).await?;
        if let Some(marker) = user.awaiting_followup {
            if marker.alert_id != alert_id {
                info!(
                    "escalation: {user_id} no longer awaiting {} answer for alert {}",
                    marker.stage.as_str(),
                    marker.alert_id
                );
                self.memory.clear_awaiting_followup(user_id, now_ms).await?;
            }
        }

        for job in self.memory.pending_jobs_for_user(user_id).await? {
            if job.kind == FOLLOWUP_JOB && job.alert_id.as_deref() != Some(alert_id) {
                self.memory.skip_job(&job.id, "superseded", now_ms).await?;
                info!("escalation: follow-up {} superseded by alert {alert_id}", job.id);
            }
        }
        Ok(())
    }

    /// Generate (or reuse) the reply and send it by SMS.
    ///
    /// On the last attempt a generation failure falls back to canned text.
    async fn respond_to_crisis(
        &self,
        run: &mut EscalationRun,
        now: DateTime<Utc>,
    ) -> Result<(), HavenError> {
        let user = self.require_user(&run.user_id).await?;
        let last_attempt = run.attempts + 1 >= self.safety.max_step_attempts;

        let text = match run.reply_text.clone() {
            Some(text) => text,
            None => match self.generate_crisis_reply(run, &user).await {
                Ok(text) => text,
                Err(e) if last_attempt => {
                    warn!("escalation: {} reply generation failed, using canned text: {e}", run.id);
                    messages::CRISIS_RESOURCES.to_string()
                }
                Err(e) => return Err(e),
            },
        };
        // Kept across retries so a failed send does not regenerate.
        run.reply_text = Some(text.clone());

        let kind = if text == messages::CRISIS_RESOURCES {
            AuditKind::CannedSafety
        } else {
            AuditKind::CrisisReply
        };
        let to = user.reachable_phone().unwrap_or(&user.id).to_string();
        self.deliver(SMS, &user.id, kind, OutgoingMessage::text(&to, &text), now)
            .await?;
        self.remember_outbound(&user.id, &text, now).await;
        Ok(())
    }

    async fn generate_crisis_reply(
        &self,
        run: &EscalationRun,
        user: &User,
    ) -> Result<String, HavenError> {
        let context = Context::for_crisis(user, run.thread_id.as_deref(), &run.message_text, &run.terms);
        let reply = tokio::time::timeout(self.provider_timeout, self.provider.complete(&context))
            .await
            .map_err(|_| {
                HavenError::Provider(format!(
                    "reply generation timed out after {}s",
                    self.provider_timeout.as_secs()
                ))
            })??;

        let text = reply.text.trim();
        if text.is_empty() {
            return Err(HavenError::Provider("empty crisis reply".to_string()));
        }
        Ok(text.to_string())
    }

    /// Email the emergency contact once per alert, and so once per run. No
    /// consent or no contact is a no-op; a send failure is an error so the
    /// step retries.
    async fn notify_emergency_contact(
        &self,
        run: &EscalationRun,
        now: DateTime<Utc>,
    ) -> Result<(), HavenError> {
        let alert_id = run
            .alert_id
            .as_deref()
            .ok_or_else(|| HavenError::Workflow(format!("escalation {} has no alert", run.id)))?;

        if let Some(alert) = self.memory.get_alert(alert_id).await? {
            if alert.notified_at.is_some() {
                info!("escalation: contact already notified for alert {alert_id}");
                return Ok(());
            }
        }

        let user = self.require_user(&run.user_id).await?;
        let Some(email) = user.notifiable_contact() else {
            debug!("escalation: {} has no consented emergency contact", user.id);
            self.audit_skipped(EMAIL, &user.id, AuditKind::EmergencyNotification, "no consent or contact", now)
                .await;
            return Ok(());
        };

        let (subject, body) = messages::emergency_notification(&user);
        self.deliver(
            EMAIL,
            &user.id,
            AuditKind::EmergencyNotification,
            OutgoingMessage::email(email, &subject, &body),
            now,
        )
        .await?;
        self.memory.mark_alert_notified(alert_id, to_ms(now)).await?;
        info!("escalation: notified emergency contact for alert {alert_id}");
        Ok(())
    }

    async fn schedule_first_followup(
        &self,
        run: &EscalationRun,
        now: DateTime<Utc>,
    ) -> Result<(), HavenError> {
        let alert_id = run
            .alert_id
            .as_deref()
            .ok_or_else(|| HavenError::Workflow(format!("escalation {} has no alert", run.id)))?;
        let now_ms = to_ms(now);
        let fire_at = now_ms + hours_ms(self.safety.followup_delay_hours);
        let job = followup_job(&run.user_id, alert_id, FollowUpStage::T24h, fire_at);
        let (job_id, created) = self.memory.enqueue_job(&job, now_ms).await?;
        if created {
            info!("escalation: follow-up {job_id} scheduled for alert {alert_id}");
        }
        Ok(())
    }

    /// Best-effort canned safety message. Never fails the caller.
    pub(super) async fn send_canned_safety(&self, user_id: &str, now: DateTime<Utc>) {
        let to = match self.memory.get_user(user_id).await {
            Ok(Some(user)) => user.reachable_phone().unwrap_or(user_id).to_string(),
            Ok(None) => user_id.to_string(),
            Err(e) => {
                warn!("escalation: user lookup failed before canned reply: {e}");
                user_id.to_string()
            }
        };
        let message = OutgoingMessage::text(&to, messages::CRISIS_RESOURCES);
        match self
            .deliver(SMS, user_id, AuditKind::CannedSafety, message, now)
            .await
        {
            Ok(()) => self.remember_outbound(user_id, messages::CRISIS_RESOURCES, now).await,
            Err(e) => error!("escalation: canned safety message to {user_id} failed: {e}"),
        }
    }

    pub(super) async fn require_user(&self, user_id: &str) -> Result<User, HavenError> {
        self.memory
            .get_user(user_id)
            .await?
            .ok_or_else(|| HavenError::Workflow(format!("user {user_id} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{at, caregiver, Harness, GENERATED_REPLY};
    use super::*;
    use haven_core::{
        config::Config,
        crisis::detect_crisis,
        model::{AwaitingFollowUp, Severity},
    };
    use haven_memory::{audit::AuditStatus, JobStatus};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    async fn crisis_user(h: &Harness, text: &str) -> User {
        let now = at(2026, 3, 2, 15, 0);
        h.store().upsert_user(&caregiver("u1"), to_ms(now)).await.unwrap();
        h.store()
            .record_inbound("u1", text, to_ms(now))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_full_escalation() {
        let h = Harness::new().await;
        let now = at(2026, 3, 2, 15, 0);
        let user = crisis_user(&h, "I want to die").await;
        let scan = detect_crisis("I want to die");

        let run = h
            .gateway
            .start_escalation("evt-1", &user, "I want to die", &scan, now)
            .await
            .unwrap();
        assert_eq!(run.state, EscalationState::FollowUpScheduled);
        assert_eq!(run.next_attempt_at, None);

        let alert = h.store().get_alert(run.alert_id.as_deref().unwrap()).await.unwrap().unwrap();
        assert_eq!(alert.alert_type, AlertType::CrisisDetected);
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.context["terms"][0], "want to die");
        assert!(alert.notified_at.is_some());

        assert_eq!(h.sms_bodies(), vec![GENERATED_REPLY.to_string()]);
        assert_eq!(h.email_count(), 1);
        assert_eq!(h.email.lock().unwrap()[0].to, "sam@example.com");

        let jobs = h.store().pending_jobs_for_user("u1").await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].kind, FOLLOWUP_JOB);
        assert_eq!(jobs[0].payload["stage"], "t24h");
        assert_eq!(jobs[0].fire_at, to_ms(now) + 24 * haven_core::model::MS_PER_HOUR);

        let user = h.store().get_user("u1").await.unwrap().unwrap();
        let last = user.recent_messages.last().unwrap();
        assert!(!last.is_inbound());
        assert_eq!(last.content, GENERATED_REPLY);
    }

    #[tokio::test]
    async fn test_same_event_runs_once() {
        let h = Harness::new().await;
        let now = at(2026, 3, 2, 15, 0);
        let user = crisis_user(&h, "I can't go on").await;
        let scan = detect_crisis("I can't go on");

        let first = h.gateway.start_escalation("evt-1", &user, "I can't go on", &scan, now).await.unwrap();
        let second = h.gateway.start_escalation("evt-1", &user, "I can't go on", &scan, now).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.state, EscalationState::FollowUpScheduled);
        assert_eq!(h.sms_bodies().len(), 1);
        assert_eq!(h.email_count(), 1);
    }

    #[tokio::test]
    async fn test_new_crisis_supersedes_earlier_followups() {
        let h = Harness::new().await;
        let now = at(2026, 3, 20, 15, 0);
        let user = crisis_user(&h, "I want to die").await;
        let earlier = h
            .gateway
            .start_escalation("evt-1", &user, "I want to die", &detect_crisis("I want to die"), now)
            .await
            .unwrap();
        let old_alert = earlier.alert_id.clone().unwrap();
        let old_jobs = h.store().pending_jobs_for_user("u1").await.unwrap();
        let marker = AwaitingFollowUp { alert_id: old_alert.clone(), stage: FollowUpStage::T24h };
        h.store().set_awaiting_followup("u1", &marker, to_ms(now)).await.unwrap();

        let later = now + chrono::Duration::days(3);
        let user = h.store().get_user("u1").await.unwrap().unwrap();
        let run = h
            .gateway
            .start_escalation("evt-2", &user, "end it all", &detect_crisis("end it all"), later)
            .await
            .unwrap();
        let new_alert = run.alert_id.clone().unwrap();
        assert_ne!(new_alert, old_alert);
        assert_eq!(h.email_count(), 2);

        let user = h.store().get_user("u1").await.unwrap().unwrap();
        assert!(user.awaiting_followup.is_none());
        let old_job = h.store().get_job(&old_jobs[0].id).await.unwrap().unwrap();
        assert_eq!(old_job.status, JobStatus::Skipped);
        assert_eq!(old_job.last_error.as_deref(), Some("superseded"));
        let pending = h.store().pending_jobs_for_user("u1").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].alert_id.as_deref(), Some(new_alert.as_str()));
        // The earlier alert stays open until it is answered or resolved.
        assert!(!h.store().get_alert(&old_alert).await.unwrap().unwrap().is_resolved());
    }

    #[tokio::test]
    async fn test_no_consent_skips_notification() {
        let h = Harness::new().await;
        let now = at(2026, 3, 2, 15, 0);
        let mut profile = caregiver("u1");
        profile.consent.emergency = false;
        h.store().upsert_user(&profile, to_ms(now)).await.unwrap();
        let user = h.store().record_inbound("u1", "give up", to_ms(now)).await.unwrap().unwrap();

        let run = h
            .gateway
            .start_escalation("evt-1", &user, "give up", &detect_crisis("give up"), now)
            .await
            .unwrap();
        assert_eq!(run.state, EscalationState::FollowUpScheduled);
        assert_eq!(h.email_count(), 0);
        let alert = h.store().get_alert(run.alert_id.as_deref().unwrap()).await.unwrap().unwrap();
        assert_eq!(alert.severity, Severity::High);
        assert!(alert.notified_at.is_none());
        assert_eq!(
            h.gateway.audit.count("u1", AuditKind::EmergencyNotification, AuditStatus::Skipped).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_provider_failure_backs_off_then_falls_back_to_canned_text() {
        let h = Harness::new().await;
        h.provider_fail.store(true, Ordering::SeqCst);
        let now = at(2026, 3, 2, 15, 0);
        let user = crisis_user(&h, "I want to die").await;

        let run = h
            .gateway
            .start_escalation("evt-1", &user, "I want to die", &detect_crisis("I want to die"), now)
            .await
            .unwrap();
        assert_eq!(run.state, EscalationState::Logged);
        assert_eq!(run.attempts, 1);
        assert_eq!(run.next_attempt_at, Some(to_ms(now) + 1_000));
        assert!(run.last_error.as_deref().unwrap().contains("overloaded"));
        assert!(h.sms_bodies().is_empty());

        let later = now + chrono::Duration::seconds(5);
        let run = h.gateway.drive_escalation(run, later).await.unwrap();
        assert_eq!(run.attempts, 2);
        assert_eq!(run.next_attempt_at, Some(to_ms(later) + 2_000));

        let last = later + chrono::Duration::seconds(5);
        let run = h.gateway.drive_escalation(run, last).await.unwrap();
        assert_eq!(run.state, EscalationState::FollowUpScheduled);
        assert_eq!(h.sms_bodies(), vec![messages::CRISIS_RESOURCES.to_string()]);
        assert_eq!(h.provider_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_notify_failure_retries_without_resending_reply() {
        let h = Harness::new().await;
        h.email_fail.store(true, Ordering::SeqCst);
        let now = at(2026, 3, 2, 15, 0);
        let user = crisis_user(&h, "suicide").await;

        let run = h
            .gateway
            .start_escalation("evt-1", &user, "suicide", &detect_crisis("suicide"), now)
            .await
            .unwrap();
        assert_eq!(run.state, EscalationState::Responded);
        assert_eq!(run.attempts, 1);

        h.email_fail.store(false, Ordering::SeqCst);
        let stored = h.store().get_escalation("evt-1").await.unwrap().unwrap();
        let run = h
            .gateway
            .drive_escalation(stored, now + chrono::Duration::seconds(2))
            .await
            .unwrap();
        assert_eq!(run.state, EscalationState::FollowUpScheduled);
        assert_eq!(h.sms_bodies().len(), 1);
        assert_eq!(h.email_count(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_send_fails_run_and_attempts_canned_text() {
        let h = Harness::new().await;
        h.sms_fail.store(true, Ordering::SeqCst);
        let now = at(2026, 3, 2, 15, 0);
        let user = crisis_user(&h, "kill myself").await;

        let mut run = h
            .gateway
            .start_escalation("evt-1", &user, "kill myself", &detect_crisis("kill myself"), now)
            .await
            .unwrap();
        for i in 1..5 {
            run = h
                .gateway
                .drive_escalation(run, now + chrono::Duration::minutes(i))
                .await
                .unwrap();
        }
        assert_eq!(run.state, EscalationState::Failed);
        assert_eq!(run.attempts, 3);
        assert_eq!(run.next_attempt_at, None);
        // The generated reply survives retries.
        assert_eq!(run.reply_text.as_deref(), Some(GENERATED_REPLY));
        assert_eq!(h.provider_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            h.gateway.audit.count("u1", AuditKind::CannedSafety, AuditStatus::Error).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_slow_provider_times_out_to_canned_text() {
        let mut config = Config::default();
        config.provider.timeout_secs = 1;
        config.safety.max_step_attempts = 1;
        let h = Harness::with_config(config, Some(Duration::from_secs(5))).await;
        let now = at(2026, 3, 2, 15, 0);
        let user = crisis_user(&h, "end my life").await;

        let run = h
            .gateway
            .start_escalation("evt-1", &user, "end my life", &detect_crisis("end my life"), now)
            .await
            .unwrap();
        assert_eq!(run.state, EscalationState::FollowUpScheduled);
        assert_eq!(h.sms_bodies(), vec![messages::CRISIS_RESOURCES.to_string()]);
    }

    #[test]
    fn test_followup_job_key() {
        let job = followup_job("u1", "a1", FollowUpStage::T72h, 5);
        assert_eq!(job.job_key, "followup:a1:t72h");
        assert_eq!(job.payload["stage"], "t72h");
        assert_eq!(job.alert_id.as_deref(), Some("a1"));
    }
}
