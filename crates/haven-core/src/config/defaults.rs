// --- Default value functions ---

pub(super) fn default_name() -> String {
    "Haven".to_string()
}
pub(super) fn default_data_dir() -> String {
    "~/.haven".to_string()
}
pub(super) fn default_log_level() -> String {
    "info".to_string()
}
pub(super) fn default_db_path() -> String {
    "~/.haven/data/haven.db".to_string()
}
pub(super) fn default_recent_message_limit() -> usize {
    50
}
pub(super) fn default_provider() -> String {
    "openai".to_string()
}
pub(super) fn default_provider_timeout() -> u64 {
    20
}
pub(super) fn default_true() -> bool {
    true
}
pub(super) fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}
pub(super) fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
pub(super) fn default_anthropic_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}
pub(super) fn default_resend_from() -> String {
    "Haven <alerts@haven.care>".to_string()
}
pub(super) fn default_followup_delay_hours() -> u64 {
    24
}
pub(super) fn default_nudge_delay_hours() -> u64 {
    48
}
pub(super) fn default_activity_window_hours() -> u64 {
    24
}
pub(super) fn default_send_window_start() -> u32 {
    9
}
pub(super) fn default_send_window_end() -> u32 {
    20
}
pub(super) fn default_fallback_timezone() -> String {
    "America/Los_Angeles".to_string()
}
pub(super) fn default_max_step_attempts() -> u32 {
    3
}
pub(super) fn default_backoff_initial_ms() -> u64 {
    1_000
}
pub(super) fn default_backoff_max_ms() -> u64 {
    30_000
}
pub(super) fn default_engagement_interval() -> u64 {
    360
}
pub(super) fn default_wellness_interval() -> u64 {
    168
}
pub(super) fn default_sudden_drop_average() -> f64 {
    3.0
}
pub(super) fn default_burst_window_hours() -> u64 {
    6
}
pub(super) fn default_burst_threshold() -> usize {
    3
}
pub(super) fn default_poll_interval() -> u64 {
    30
}
pub(super) fn default_batch_size() -> i64 {
    25
}
pub(super) fn default_max_job_attempts() -> u32 {
    3
}
pub(super) fn default_api_host() -> String {
    "127.0.0.1".to_string()
}
pub(super) fn default_api_port() -> u16 {
    3777
}
