//! Gateway: connects inbound intake, the escalation engine, follow-ups,
//! watchers, and the scheduler loop to the store and collaborators.
//!
//! Every time-dependent operation takes `now` explicitly so the loops pass
//! the wall clock and tests pass a fixed instant.

mod dedup;
mod engagement;
mod escalation;
mod followup;
mod intake;
mod messages;
mod scheduler;
mod wellness;

#[cfg(test)]
pub(crate) mod testing;

use chrono::{DateTime, Utc};
use haven_core::{
    clock::to_ms,
    config::{ApiConfig, Config, SafetyConfig, SchedulerConfig, WatcherConfig},
    error::HavenError,
    message::OutgoingMessage,
    model::{RecentMessage, MS_PER_HOUR},
    traits::{Channel, Provider},
};
use haven_memory::{
    audit::{AuditEntry, AuditKind, AuditLogger, AuditStatus},
    Store,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Hours from config as epoch-ms, saturating.
pub(super) fn hours_ms(hours: u64) -> i64 {
    i64::try_from(hours)
        .unwrap_or(i64::MAX)
        .saturating_mul(MS_PER_HOUR)
}

/// The central gateway of the safety monitor.
pub struct Gateway {
    pub(super) provider: Arc<dyn Provider>,
    pub(super) channels: HashMap<String, Arc<dyn Channel>>,
    pub(super) memory: Store,
    pub(super) audit: AuditLogger,
    pub(super) safety: SafetyConfig,
    pub(super) watchers: WatcherConfig,
    pub(super) scheduler_config: SchedulerConfig,
    pub(super) api_config: ApiConfig,
    /// Upper bound on one reply-generation call.
    pub(super) provider_timeout: Duration,
    pub(super) uptime: Instant,
}

impl Gateway {
    /// Create a new gateway.
    pub fn new(
        provider: Arc<dyn Provider>,
        channels: HashMap<String, Arc<dyn Channel>>,
        memory: Store,
        config: &Config,
    ) -> Self {
        let audit = AuditLogger::new(memory.pool().clone());
        Self {
            provider,
            channels,
            memory,
            audit,
            safety: config.safety.clone(),
            watchers: config.watchers.clone(),
            scheduler_config: config.scheduler.clone(),
            api_config: config.api.clone(),
            provider_timeout: Duration::from_secs(config.provider.timeout_secs.max(1)),
            uptime: Instant::now(),
        }
    }

    pub fn has_channel(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    pub fn store(&self) -> &Store {
        &self.memory
    }

    pub fn uptime_secs(&self) -> u64 {
        self.uptime.elapsed().as_secs()
    }

    /// Run the background loops and the HTTP API until ctrl-c.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        info!(
            "Haven gateway running | provider: {} | channels: {}",
            self.provider.name(),
            self.channels.keys().cloned().collect::<Vec<_>>().join(", "),
        );

        if !self.provider.is_available().await {
            warn!("provider {} is not available; crisis replies will use canned text", self.provider.name());
        }

        let mut handles = Vec::new();

        if self.scheduler_config.enabled {
            let gw = self.clone();
            handles.push(tokio::spawn(async move { gw.scheduler_loop().await }));
        }

        if self.watchers.enabled {
            let gw = self.clone();
            handles.push(tokio::spawn(async move { gw.engagement_loop().await }));
            let gw = self.clone();
            handles.push(tokio::spawn(async move { gw.wellness_loop().await }));
        }

        if self.api_config.enabled {
            let gw = self.clone();
            let cfg = self.api_config.clone();
            handles.push(tokio::spawn(async move { crate::api::serve(cfg, gw).await }));
        }

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for shutdown signal: {e}");
        }
        info!("Received shutdown signal");

        for handle in &handles {
            handle.abort();
        }
        info!("Shutdown complete");
        Ok(())
    }

    /// Send through a named channel and write the audit row.
    ///
    /// Audit failures are logged and never change the send result.
    pub(super) async fn deliver(
        &self,
        channel_name: &str,
        user_id: &str,
        kind: AuditKind,
        message: OutgoingMessage,
        now: DateTime<Utc>,
    ) -> Result<(), HavenError> {
        let recipient = message.to.clone();
        let body = message.body.clone();

        let result = match self.channels.get(channel_name) {
            Some(channel) => channel.send(message).await,
            None => Err(HavenError::Channel(format!(
                "channel {channel_name} is not configured"
            ))),
        };

        let entry = AuditEntry {
            channel: channel_name.to_string(),
            user_id: user_id.to_string(),
            kind,
            recipient: Some(recipient),
            body,
            status: if result.is_ok() {
                AuditStatus::Ok
            } else {
                AuditStatus::Error
            },
            detail: result.as_ref().err().map(|e| e.to_string()),
        };
        if let Err(e) = self.audit.log(&entry, to_ms(now)).await {
            warn!("audit: failed to record {}: {e}", kind.as_str());
        }
        result
    }

    /// Record a send that was suppressed on purpose.
    pub(super) async fn audit_skipped(
        &self,
        channel_name: &str,
        user_id: &str,
        kind: AuditKind,
        reason: &str,
        now: DateTime<Utc>,
    ) {
        let entry = AuditEntry {
            channel: channel_name.to_string(),
            user_id: user_id.to_string(),
            kind,
            recipient: None,
            body: String::new(),
            status: AuditStatus::Skipped,
            detail: Some(reason.to_string()),
        };
        if let Err(e) = self.audit.log(&entry, to_ms(now)).await {
            warn!("audit: failed to record skipped {}: {e}", kind.as_str());
        }
    }

    /// Append an outbound turn to the user's ring; failures only log.
    pub(super) async fn remember_outbound(&self, user_id: &str, body: &str, now: DateTime<Utc>) {
        let now_ms = to_ms(now);
        if let Err(e) = self
            .memory
            .append_recent_message(user_id, RecentMessage::outbound(body, now_ms), now_ms)
            .await
        {
            warn!("failed to record outbound turn for {user_id}: {e}");
        }
    }
}
