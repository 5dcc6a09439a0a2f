//! # haven-providers
//!
//! Reply-generation providers used to draft crisis responses.

pub mod anthropic;
pub mod openai;

use haven_core::{config::ProviderConfig, error::HavenError, traits::Provider};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on reply length; crisis replies go out by SMS.
pub(crate) const MAX_REPLY_TOKENS: u32 = 400;

/// Build the configured default provider.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn Provider>, HavenError> {
    let timeout = Duration::from_secs(config.timeout_secs.max(1));
    match config.default.as_str() {
        "openai" => {
            let cfg = config.openai.clone().unwrap_or_default();
            Ok(Arc::new(openai::OpenAiProvider::from_config(&cfg, timeout)?))
        }
        "anthropic" => {
            let cfg = config.anthropic.clone().unwrap_or_default();
            Ok(Arc::new(anthropic::AnthropicProvider::from_config(
                &cfg, timeout,
            )?))
        }
        other => Err(HavenError::Config(format!("unknown provider: {other}"))),
    }
}

/// Build a reqwest client with a request timeout.
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, HavenError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| HavenError::Provider(format!("failed to build http client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_provider_by_name() {
        let mut config = ProviderConfig::default();
        assert_eq!(build_provider(&config).unwrap().name(), "openai");

        config.default = "anthropic".into();
        assert_eq!(build_provider(&config).unwrap().name(), "anthropic");

        config.default = "ollama".into();
        assert!(matches!(build_provider(&config), Err(HavenError::Config(_))));
    }
}
