//! Wellness trend watcher: four strictly worsening burnout scores raise a
//! decline alert and an SMS check-in.

use super::dedup::AlertIndex;
use super::{messages, Gateway};
use chrono::{DateTime, Utc};
use haven_channels::SMS;
use haven_core::{
    clock::to_ms,
    error::HavenError,
    message::OutgoingMessage,
    model::{AlertPattern, AlertType, NewAlert, Severity, User, WellnessScore},
};
use haven_memory::audit::AuditKind;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Points that make up a trend.
pub(super) const TREND_POINTS: usize = 4;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WellnessSummary {
    pub users_monitored: usize,
    pub declines: usize,
    pub messages_sent: usize,
    pub errors: usize,
}

/// Whether the last four scores (oldest first) rise at every step and by at
/// least `min_total_increase` overall.
pub(super) fn is_worsening_trend(scores: &[WellnessScore], min_total_increase: f64) -> bool {
    if scores.len() < TREND_POINTS {
        return false;
    }
    let recent = &scores[scores.len() - TREND_POINTS..];
    let rising = recent
        .windows(2)
        .all(|pair| pair[1].overall_score > pair[0].overall_score);
    rising && recent[TREND_POINTS - 1].overall_score - recent[0].overall_score >= min_total_increase
}

impl Gateway {
    /// Background task: run the wellness watch on its cadence.
    pub(super) async fn wellness_loop(self: Arc<Self>) {
        let hours = self.watchers.wellness_interval_hours.max(1);
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(hours * 3600));
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = self.run_wellness_watch(Utc::now()).await {
                warn!("watcher: wellness run failed: {e}");
            }
        }
    }

    /// Scan score history for every active user. Scores and open alerts are
    /// each loaded with one batched query.
    pub async fn run_wellness_watch(
        &self,
        now: DateTime<Utc>,
    ) -> Result<WellnessSummary, HavenError> {
        let users = self.memory.list_active_users().await?;
        let ids: Vec<String> = users.iter().map(|u| u.id.clone()).collect();
        let scores = self
            .memory
            .latest_wellness_scores(&ids, TREND_POINTS as i64)
            .await?;
        let mut index = AlertIndex::load(&self.memory, &ids, &[AlertType::WellnessDecline]).await?;

        let mut summary = WellnessSummary {
            users_monitored: users.len(),
            ..Default::default()
        };

        for user in &users {
            let Some(series) = scores.get(&user.id) else {
                continue;
            };
            if !is_worsening_trend(series, self.watchers.wellness_min_total_increase) {
                continue;
            }
            match self.raise_wellness_decline(user, series, &mut index, now).await {
                Ok(None) => {}
                Ok(Some(sent)) => {
                    summary.declines += 1;
                    summary.messages_sent += usize::from(sent);
                }
                Err(e) => {
                    summary.errors += 1;
                    warn!("watcher: wellness check for {} failed: {e}", user.id);
                }
            }
        }

        info!(
            "watcher: wellness monitored={} declines={} messages_sent={} errors={}",
            summary.users_monitored, summary.declines, summary.messages_sent, summary.errors
        );
        Ok(summary)
    }

    /// `None` when an open alert already covers the decline, otherwise
    /// whether the check-in went out.
    async fn raise_wellness_decline(
        &self,
        user: &User,
        series: &[WellnessScore],
        index: &mut AlertIndex,
        now: DateTime<Utc>,
    ) -> Result<Option<bool>, HavenError> {
        let points: Vec<f64> = series.iter().map(|s| s.overall_score).collect();
        let alert = NewAlert {
            user_id: user.id.clone(),
            alert_type: AlertType::WellnessDecline,
            pattern: AlertPattern::WorseningScores,
            severity: Severity::Medium,
            message: "Wellness scores worsening".to_string(),
            context: json!({
                "scores": points,
                "latestBand": series.last().map(|s| s.band.as_str()),
            }),
            created_at: to_ms(now),
        };
        if index.raise(&self.memory, alert).await?.is_none() {
            return Ok(None);
        }

        let Some(phone) = user.reachable_phone() else {
            debug!("watcher: {} has no phone, wellness check-in skipped", user.id);
            self.audit_skipped(SMS, &user.id, AuditKind::WellnessCheckIn, "no contact", now)
                .await;
            return Ok(Some(false));
        };

        let body = messages::wellness_checkin(user);
        match self
            .deliver(SMS, &user.id, AuditKind::WellnessCheckIn, OutgoingMessage::text(phone, &body), now)
            .await
        {
            Ok(()) => {
                self.remember_outbound(&user.id, &body, now).await;
                Ok(Some(true))
            }
            // The alert stands; a lost check-in is not retried.
            Err(e) => {
                warn!("watcher: wellness check-in to {} failed: {e}", user.id);
                Ok(Some(false))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{at, caregiver, Harness};
    use super::*;
    use haven_core::model::{AlertKey, MS_PER_DAY};

    fn series(user_id: &str, points: &[f64]) -> Vec<WellnessScore> {
        points
            .iter()
            .enumerate()
            .map(|(i, score)| WellnessScore {
                user_id: user_id.into(),
                overall_score: *score,
                band: "moderate".into(),
                pressure_zones: vec!["emotional".into()],
                recorded_at: (i as i64 + 1) * 7 * MS_PER_DAY,
            })
            .collect()
    }

    #[test]
    fn test_trend_needs_four_points() {
        assert!(!is_worsening_trend(&series("u1", &[50.0, 70.0]), 0.0));
        assert!(!is_worsening_trend(&series("u1", &[50.0, 70.0, 85.0]), 0.0));
        assert!(is_worsening_trend(&series("u1", &[30.0, 50.0, 70.0, 85.0]), 0.0));
    }

    #[test]
    fn test_trend_must_rise_at_every_step() {
        assert!(!is_worsening_trend(&series("u1", &[30.0, 50.0, 50.0, 85.0]), 0.0));
        assert!(!is_worsening_trend(&series("u1", &[30.0, 60.0, 50.0, 85.0]), 0.0));
        // Only the last four count.
        assert!(is_worsening_trend(&series("u1", &[90.0, 30.0, 50.0, 70.0, 85.0]), 0.0));
    }

    #[test]
    fn test_minimum_total_increase() {
        let small = series("u1", &[50.0, 51.0, 52.0, 53.0]);
        assert!(is_worsening_trend(&small, 3.0));
        assert!(!is_worsening_trend(&small, 5.0));
    }

    async fn record(h: &Harness, user_id: &str, points: &[f64]) {
        for score in series(user_id, points) {
            h.store().record_wellness_score(&score).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_decline_alerts_and_checks_in_once() {
        let h = Harness::new().await;
        h.store().upsert_user(&caregiver("u1"), 0).await.unwrap();
        h.store().upsert_user(&caregiver("u2"), 0).await.unwrap();
        record(&h, "u1", &[30.0, 50.0, 70.0, 85.0]).await;
        record(&h, "u2", &[50.0, 70.0, 85.0]).await;
        let now = at(2026, 3, 2, 12, 0);

        let summary = h.gateway.run_wellness_watch(now).await.unwrap();
        assert_eq!(summary.users_monitored, 2);
        assert_eq!(summary.declines, 1);
        assert_eq!(summary.messages_sent, 1);
        assert!(h.sms_bodies()[0].contains("stress levels"));

        let key = AlertKey::new("u1", AlertType::WellnessDecline, AlertPattern::WorseningScores);
        let alert = h.store().find_unresolved_alert(&key).await.unwrap().unwrap();
        assert_eq!(alert.severity, Severity::Medium);
        assert_eq!(alert.context["scores"][3], 85.0);

        let again = h.gateway.run_wellness_watch(now).await.unwrap();
        assert_eq!(again.declines, 0);
        assert_eq!(h.sms_bodies().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_phone_skips_send_only() {
        let h = Harness::new().await;
        let mut user = caregiver("u1");
        user.phone_number = None;
        h.store().upsert_user(&user, 0).await.unwrap();
        record(&h, "u1", &[30.0, 50.0, 70.0, 85.0]).await;

        let summary = h.gateway.run_wellness_watch(at(2026, 3, 2, 12, 0)).await.unwrap();
        assert_eq!(summary.declines, 1);
        assert_eq!(summary.messages_sent, 0);
        assert_eq!(summary.errors, 0);
        assert!(h.sms_bodies().is_empty());
    }
}
