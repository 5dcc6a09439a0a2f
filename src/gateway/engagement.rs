//! Engagement watcher: sudden drop-off and crisis-keyword bursts across the
//! active population.

use super::dedup::AlertIndex;
use super::{hours_ms, Gateway};
use chrono::{DateTime, Utc};
use haven_core::{
    clock::to_ms,
    config::WatcherConfig,
    crisis::is_burst_message,
    error::HavenError,
    model::{AlertPattern, AlertType, NewAlert, Severity, User, MS_PER_DAY},
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementSummary {
    pub users_monitored: usize,
    pub sudden_drops: usize,
    pub crisis_bursts: usize,
    pub errors: usize,
}

/// Lifetime messages per day since the conversation started. Users younger
/// than one day average 0.
pub(super) fn average_messages_per_day(user: &User, now_ms: i64) -> f64 {
    let Some(start) = user.conversation_start_at else {
        return 0.0;
    };
    let days = (now_ms - start) as f64 / MS_PER_DAY as f64;
    if days < 1.0 {
        return 0.0;
    }
    user.total_interaction_count as f64 / days
}

/// A usually chatty user who has gone silent.
pub(super) fn is_sudden_drop(user: &User, now_ms: i64, config: &WatcherConfig) -> bool {
    let average = average_messages_per_day(user, now_ms);
    let since = now_ms - hours_ms(config.activity_window_hours);
    average > config.sudden_drop_min_daily_average && user.inbound_since(since).next().is_none()
}

/// Inbound messages inside the burst window that contain a burst keyword.
pub(super) fn burst_count(user: &User, now_ms: i64, config: &WatcherConfig) -> usize {
    let since = now_ms - hours_ms(config.burst_window_hours);
    user.inbound_since(since)
        .filter(|m| is_burst_message(&m.content))
        .count()
}

impl Gateway {
    /// Background task: run the engagement watch on its cadence.
    pub(super) async fn engagement_loop(self: Arc<Self>) {
        let minutes = self.watchers.engagement_interval_minutes.max(1);
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(minutes * 60));
        // The first tick completes immediately; wait a full period after startup.
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = self.run_engagement_watch(Utc::now()).await {
                warn!("watcher: engagement run failed: {e}");
            }
        }
    }

    /// Scan every active user once. A failure for one user is counted and
    /// the batch continues.
    pub async fn run_engagement_watch(
        &self,
        now: DateTime<Utc>,
    ) -> Result<EngagementSummary, HavenError> {
        let now_ms = to_ms(now);
        let users = self.memory.list_active_users().await?;
        let ids: Vec<String> = users.iter().map(|u| u.id.clone()).collect();
        let mut index = AlertIndex::load(
            &self.memory,
            &ids,
            &[AlertType::Disengagement, AlertType::HighStress],
        )
        .await?;

        let mut summary = EngagementSummary {
            users_monitored: users.len(),
            ..Default::default()
        };

        for user in &users {
            match self.check_engagement(user, &mut index, now_ms).await {
                Ok((dropped, burst)) => {
                    summary.sudden_drops += usize::from(dropped);
                    summary.crisis_bursts += usize::from(burst);
                }
                Err(e) => {
                    summary.errors += 1;
                    warn!("watcher: engagement check for {} failed: {e}", user.id);
                }
            }
        }

        info!(
            "watcher: engagement monitored={} sudden_drops={} crisis_bursts={} errors={}",
            summary.users_monitored, summary.sudden_drops, summary.crisis_bursts, summary.errors
        );
        Ok(summary)
    }

    /// Returns whether a new sudden-drop and a new burst alert were raised.
    async fn check_engagement(
        &self,
        user: &User,
        index: &mut AlertIndex,
        now_ms: i64,
    ) -> Result<(bool, bool), HavenError> {
        let mut dropped = false;
        if is_sudden_drop(user, now_ms, &self.watchers) {
            let average = average_messages_per_day(user, now_ms);
            let alert = NewAlert {
                user_id: user.id.clone(),
                alert_type: AlertType::Disengagement,
                pattern: AlertPattern::SuddenDrop,
                severity: Severity::Medium,
                message: "Sudden drop in engagement".to_string(),
                context: json!({
                    "averageMessagesPerDay": (average * 100.0).round() / 100.0,
                    "recentMessageCount": 0,
                    "windowHours": self.watchers.activity_window_hours,
                }),
                created_at: now_ms,
            };
            dropped = index.raise(&self.memory, alert).await?.is_some();
        }

        let mut burst = false;
        let count = burst_count(user, now_ms, &self.watchers);
        if count >= self.watchers.burst_threshold.max(1) {
            let alert = NewAlert {
                user_id: user.id.clone(),
                alert_type: AlertType::HighStress,
                pattern: AlertPattern::CrisisBurst,
                severity: Severity::Urgent,
                message: "Burst of crisis keywords".to_string(),
                context: json!({
                    "keywordMessages": count,
                    "windowHours": self.watchers.burst_window_hours,
                }),
                created_at: now_ms,
            };
            burst = index.raise(&self.memory, alert).await?.is_some();
        }

        Ok((dropped, burst))
    }
}
