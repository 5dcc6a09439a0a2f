//! Inbound message intake: idempotency, signup gate, follow-up answers,
//! crisis detection and routing.

use super::{messages, Gateway};
use chrono::{DateTime, Utc};
use haven_channels::SMS;
use haven_core::{
    clock::to_ms,
    crisis::{detect_crisis, CrisisScan},
    error::HavenError,
    message::{Agent, InboundMessage, OutgoingMessage, RoutingDecision},
    model::{FollowUpAnswer, User},
};
use haven_memory::audit::AuditKind;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

impl Gateway {
    /// Process one inbound message and decide which agent owns the turn.
    ///
    /// A redelivered `external_id` replays the stored decision without
    /// side effects.
    pub async fn handle_inbound(
        &self,
        msg: &InboundMessage,
        now: DateTime<Utc>,
    ) -> Result<RoutingDecision, HavenError> {
        let external_id = msg.external_id.trim();
        if !external_id.is_empty()
            && !self
                .memory
                .claim_inbound(external_id, &msg.user_id, to_ms(now))
                .await?
        {
            return self.redelivered_decision(external_id, msg).await;
        }

        match self.route_inbound(msg, now).await {
            Ok(decision) => {
                if !external_id.is_empty() {
                    self.memory.complete_inbound(external_id, &decision).await?;
                }
                Ok(decision)
            }
            Err(e) => {
                if !external_id.is_empty() {
                    if let Err(release) = self.memory.release_inbound(external_id).await {
                        warn!("intake: could not release {external_id}: {release}");
                    }
                }
                Err(e)
            }
        }
    }

    async fn redelivered_decision(
        &self,
        external_id: &str,
        msg: &InboundMessage,
    ) -> Result<RoutingDecision, HavenError> {
        if let Some(decision) = self
            .memory
            .get_inbound_receipt(external_id)
            .await?
            .and_then(|r| r.decision)
        {
            info!("intake: {external_id} redelivered, replaying decision");
            return Ok(decision);
        }

        // First delivery still in flight: answer without touching anything.
        info!("intake: {external_id} redelivered while in flight");
        let thread_id = self
            .memory
            .get_user(&msg.user_id)
            .await?
            .and_then(|u| u.thread_id);
        let agent = if detect_crisis(&msg.text).has_crisis_terms {
            Agent::Crisis
        } else {
            Agent::Main
        };
        Ok(RoutingDecision { agent, thread_id })
    }

    async fn route_inbound(
        &self,
        msg: &InboundMessage,
        now: DateTime<Utc>,
    ) -> Result<RoutingDecision, HavenError> {
        let known = match self.memory.get_user(&msg.user_id).await? {
            Some(user) if user.subscribed => user,
            other => {
                self.prompt_signup(other.as_ref(), msg, now).await;
                return Ok(RoutingDecision {
                    agent: Agent::SignupRequired,
                    thread_id: None,
                });
            }
        };

        let user = match self
            .memory
            .record_inbound(&msg.user_id, &msg.text, to_ms(now))
            .await
        {
            Ok(Some(user)) => user,
            Ok(None) => {
                return Err(HavenError::Workflow(format!("user {} vanished", msg.user_id)));
            }
            Err(e) => {
                let scan = detect_crisis(&msg.text);
                if !scan.has_crisis_terms {
                    return Err(e);
                }
                error!("intake: could not record message from {}, escalating anyway: {e}", known.id);
                self.escalate(msg, &known, &scan, now).await;
                return Ok(RoutingDecision {
                    agent: Agent::Crisis,
                    thread_id: known.thread_id,
                });
            }
        };
        let thread_id = user.thread_id.clone();

        if let Some(marker) = user.awaiting_followup.clone() {
            if let Some(answer) = FollowUpAnswer::parse(&msg.text) {
                info!(
                    "intake: {} answered {} check-in: {}",
                    user.id,
                    marker.stage.as_str(),
                    answer.as_str()
                );
                // The turn is already recorded; a failed answer keeps the
                // marker so the next answer completes it.
                if let Err(e) = self.handle_followup_answer(&user, &marker, answer, now).await {
                    error!("intake: follow-up answer from {} not fully handled: {e}", user.id);
                }
                return Ok(RoutingDecision {
                    agent: Agent::Crisis,
                    thread_id,
                });
            }
        }

        let scan = detect_crisis(&msg.text);
        if !scan.has_crisis_terms {
            debug!("intake: {} routed to main", user.id);
            return Ok(RoutingDecision {
                agent: Agent::Main,
                thread_id,
            });
        }

        self.escalate(msg, &user, &scan, now).await;
        Ok(RoutingDecision {
            agent: Agent::Crisis,
            thread_id,
        })
    }

    /// Start the escalation for a crisis message. If no run could be
    /// persisted the canned resources go out now.
    async fn escalate(
        &self,
        msg: &InboundMessage,
        user: &User,
        scan: &CrisisScan,
        now: DateTime<Utc>,
    ) {
        let event_id = match msg.external_id.trim() {
            "" => Uuid::new_v4().to_string(),
            id => id.to_string(),
        };
        if let Err(e) = self
            .start_escalation(&event_id, user, &msg.text, scan, now)
            .await
        {
            error!("intake: escalation {event_id} for {} failed to start: {e}", user.id);
            // A persisted run is resumed by the scheduler.
            if !matches!(self.memory.get_escalation(&event_id).await, Ok(Some(_))) {
                self.send_canned_safety(&user.id, now).await;
            }
        }
    }

    /// Point an unknown or unsubscribed sender at signup. Crisis language
    /// still gets the canned resources.
    async fn prompt_signup(&self, user: Option<&User>, msg: &InboundMessage, now: DateTime<Utc>) {
        let phone = match user {
            Some(u) => u.reachable_phone().map(str::to_string),
            None if msg.channel == SMS => Some(msg.user_id.clone()),
            None => None,
        };
        let Some(phone) = phone else {
            debug!("intake: no phone for {}, signup prompt not sent", msg.user_id);
            return;
        };

        if detect_crisis(&msg.text).has_crisis_terms {
            warn!("intake: crisis language from unregistered sender {}", msg.user_id);
            let canned = OutgoingMessage::text(&phone, messages::CRISIS_RESOURCES);
            if let Err(e) = self
                .deliver(SMS, &msg.user_id, AuditKind::CannedSafety, canned, now)
                .await
            {
                error!("intake: canned safety message to {} failed: {e}", msg.user_id);
            }
        }

        let prompt = OutgoingMessage::text(&phone, &messages::signup_prompt());
        if let Err(e) = self
            .deliver(SMS, &msg.user_id, AuditKind::SignupPrompt, prompt, now)
            .await
        {
            warn!("intake: signup prompt to {} failed: {e}", msg.user_id);
        }
    }
}
