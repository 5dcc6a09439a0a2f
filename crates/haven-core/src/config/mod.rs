mod channels;
mod defaults;

#[cfg(test)]
mod tests;

pub use channels::*;

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::HavenError;
use defaults::*;

/// Top-level Haven configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub haven: HavenConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub watchers: WatcherConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// General service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HavenConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for HavenConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

/// Memory config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Capacity of each user's recent-message ring.
    #[serde(default = "default_recent_message_limit")]
    pub recent_message_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            recent_message_limit: default_recent_message_limit(),
        }
    }
}

/// What a follow-up does when it fires outside the local send window.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuietHoursPolicy {
    /// Record the job as skipped and send nothing.
    #[default]
    Drop,
    /// Re-queue the job at the next window opening.
    Defer,
}

/// Escalation workflow and follow-up settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_followup_delay_hours")]
    pub followup_delay_hours: u64,
    /// Delay between a NO/UNSURE answer and the terminal nudge.
    #[serde(default = "default_nudge_delay_hours")]
    pub nudge_delay_hours: u64,
    /// Any inbound message inside this window suppresses a follow-up.
    #[serde(default = "default_activity_window_hours")]
    pub activity_window_hours: u64,
    /// First local hour a follow-up may go out (inclusive).
    #[serde(default = "default_send_window_start")]
    pub send_window_start: u32,
    /// First local hour a follow-up may no longer go out (exclusive).
    #[serde(default = "default_send_window_end")]
    pub send_window_end: u32,
    #[serde(default = "default_fallback_timezone")]
    pub fallback_timezone: String,
    #[serde(default)]
    pub quiet_hours_policy: QuietHoursPolicy,
    #[serde(default = "default_max_step_attempts")]
    pub max_step_attempts: u32,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            followup_delay_hours: default_followup_delay_hours(),
            nudge_delay_hours: default_nudge_delay_hours(),
            activity_window_hours: default_activity_window_hours(),
            send_window_start: default_send_window_start(),
            send_window_end: default_send_window_end(),
            fallback_timezone: default_fallback_timezone(),
            quiet_hours_policy: QuietHoursPolicy::default(),
            max_step_attempts: default_max_step_attempts(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl SafetyConfig {
    /// Retry delay after the `attempts`-th failure: doubling from the initial
    /// delay, capped at the maximum.
    pub fn backoff_ms(&self, attempts: u32) -> u64 {
        let exp = attempts.saturating_sub(1).min(32);
        self.backoff_initial_ms
            .saturating_mul(1u64 << exp)
            .min(self.backoff_max_ms)
    }
}

/// Periodic watcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_engagement_interval")]
    pub engagement_interval_minutes: u64,
    #[serde(default = "default_wellness_interval")]
    pub wellness_interval_hours: u64,
    /// Sudden drop needs a strictly greater daily average than this.
    #[serde(default = "default_sudden_drop_average")]
    pub sudden_drop_min_daily_average: f64,
    #[serde(default = "default_activity_window_hours")]
    pub activity_window_hours: u64,
    #[serde(default = "default_burst_window_hours")]
    pub burst_window_hours: u64,
    #[serde(default = "default_burst_threshold")]
    pub burst_threshold: usize,
    /// Minimum rise between the oldest and newest of the four scores.
    #[serde(default)]
    pub wellness_min_total_increase: f64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            engagement_interval_minutes: default_engagement_interval(),
            wellness_interval_hours: default_wellness_interval(),
            sudden_drop_min_daily_average: default_sudden_drop_average(),
            activity_window_hours: default_activity_window_hours(),
            burst_window_hours: default_burst_window_hours(),
            burst_threshold: default_burst_threshold(),
            wellness_min_total_increase: 0.0,
        }
    }
}

/// Scheduler configuration: durable follow-up jobs and workflow resumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    #[serde(default = "default_max_job_attempts")]
    pub max_job_attempts: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
            max_job_attempts: default_max_job_attempts(),
        }
    }
}

/// HTTP API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Bearer token for API authentication. Empty = no auth (for local-only use).
    #[serde(default)]
    pub api_key: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_api_host(),
            port: default_api_port(),
            api_key: String::new(),
        }
    }
}

impl Config {
    /// Overlay secrets from the environment (or any lookup) onto the file values.
    ///
    /// Non-empty values win; provider and channel sections are created on demand.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("OPENAI_API_KEY") {
            self.provider.openai.get_or_insert_with(Default::default).api_key = key;
        }
        if let Some(key) = get("ANTHROPIC_API_KEY") {
            self.provider
                .anthropic
                .get_or_insert_with(Default::default)
                .api_key = key;
        }

        let sid = get("TWILIO_ACCOUNT_SID");
        let token = get("TWILIO_AUTH_TOKEN");
        let from = get("TWILIO_FROM_NUMBER");
        if sid.is_some() || token.is_some() || from.is_some() {
            let twilio = self.channel.twilio.get_or_insert_with(Default::default);
            if let Some(v) = sid {
                twilio.account_sid = v;
            }
            if let Some(v) = token {
                twilio.auth_token = v;
            }
            if let Some(v) = from {
                twilio.from_number = v;
            }
        }

        if let Some(key) = get("RESEND_API_KEY") {
            self.channel.resend.get_or_insert_with(Default::default).api_key = key;
        }
        if let Some(key) = get("HAVEN_API_KEY") {
            self.api.api_key = key;
        }
    }
}

/// Expand `~` to home directory.
pub fn shellexpand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{rest}", home.to_string_lossy());
        }
    }
    path.to_string()
}

/// Parse configuration from TOML text.
pub fn parse(content: &str) -> Result<Config, HavenError> {
    toml::from_str(content).map_err(|e| HavenError::Config(format!("failed to parse config: {e}")))
}

/// Load configuration from a TOML file and apply environment overrides.
///
/// Falls back to defaults if the file does not exist.
pub fn load(path: &str) -> Result<Config, HavenError> {
    let path = Path::new(path);
    let mut config = if !path.exists() {
        info!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        Config::default()
    } else {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HavenError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        parse(&content)?
    };

    config.apply_env(|key| std::env::var(key).ok());
    Ok(config)
}
