use super::*;
use std::collections::HashMap;

#[test]
fn test_empty_file_yields_defaults() {
    let config = parse("").unwrap();
    assert_eq!(config.haven.data_dir, "~/.haven");
    assert_eq!(config.memory.recent_message_limit, 50);
    assert_eq!(config.provider.default, "openai");
    assert_eq!(config.provider.timeout_secs, 20);
    assert_eq!(config.safety.send_window_start, 9);
    assert_eq!(config.safety.send_window_end, 20);
    assert_eq!(config.safety.quiet_hours_policy, QuietHoursPolicy::Drop);
    assert_eq!(config.watchers.burst_threshold, 3);
    assert_eq!(config.watchers.sudden_drop_min_daily_average, 3.0);
    assert!(config.scheduler.enabled);
    assert!(!config.api.enabled);
    assert_eq!(config.api.port, 3777);
}

#[test]
fn test_partial_sections_keep_field_defaults() {
    let config = parse(
        r#"
        [safety]
        quiet_hours_policy = "defer"
        fallback_timezone = "America/Chicago"

        [provider.openai]
        api_key = "sk-test"

        [channel.twilio]
        enabled = true
        account_sid = "AC123"
        "#,
    )
    .unwrap();

    assert_eq!(config.safety.quiet_hours_policy, QuietHoursPolicy::Defer);
    assert_eq!(config.safety.fallback_timezone, "America/Chicago");
    assert_eq!(config.safety.followup_delay_hours, 24);
    let openai = config.provider.openai.unwrap();
    assert_eq!(openai.model, "gpt-4o-mini");
    assert_eq!(openai.base_url, "https://api.openai.com/v1");
    let twilio = config.channel.twilio.unwrap();
    assert!(twilio.enabled);
    assert!(twilio.from_number.is_empty());
}

#[test]
fn test_invalid_policy_is_a_config_error() {
    let err = parse("[safety]\nquiet_hours_policy = \"maybe\"").unwrap_err();
    assert!(matches!(err, HavenError::Config(_)));
}

#[test]
fn test_backoff_doubles_and_caps() {
    let safety = SafetyConfig::default();
    assert_eq!(safety.backoff_ms(1), 1_000);
    assert_eq!(safety.backoff_ms(2), 2_000);
    assert_eq!(safety.backoff_ms(3), 4_000);
    assert_eq!(safety.backoff_ms(6), 30_000);
    assert_eq!(safety.backoff_ms(200), 30_000);
}

#[test]
fn test_env_overrides_fill_secrets() {
    let env: HashMap<&str, &str> = [
        ("OPENAI_API_KEY", "sk-env"),
        ("TWILIO_AUTH_TOKEN", "tok"),
        ("RESEND_API_KEY", "re_123"),
        ("HAVEN_API_KEY", "  "),
    ]
    .into_iter()
    .collect();

    let mut config = parse("[api]\napi_key = \"from-file\"").unwrap();
    config.apply_env(|k| env.get(k).map(|v| v.to_string()));

    assert_eq!(config.provider.openai.unwrap().api_key, "sk-env");
    assert!(config.provider.anthropic.is_none());
    let twilio = config.channel.twilio.unwrap();
    assert_eq!(twilio.auth_token, "tok");
    assert!(twilio.account_sid.is_empty());
    assert_eq!(config.channel.resend.unwrap().api_key, "re_123");
    // Blank env values do not clobber the file.
    assert_eq!(config.api.api_key, "from-file");
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let config = load("/nonexistent/haven/config.toml").unwrap();
    assert_eq!(config.haven.name, "Haven");
}
