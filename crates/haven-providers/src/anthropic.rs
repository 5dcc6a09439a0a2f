//! Anthropic Messages API provider.

use crate::{http_client, MAX_REPLY_TOKENS};
use async_trait::async_trait;
use haven_core::{
    config::AnthropicConfig,
    context::Context,
    error::HavenError,
    message::{GeneratedReply, ReplyMetadata},
    traits::Provider,
};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API provider.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl AnthropicProvider {
    /// Create from config values.
    pub fn from_config(config: &AnthropicConfig, timeout: Duration) -> Result<Self, HavenError> {
        Ok(Self {
            client: http_client(timeout)?,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    system: String,
    messages: Vec<AnthropicMessage>,
}

#[derive(Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Option<Vec<AnthropicContentBlock>>,
    model: Option<String>,
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Concatenated text blocks, or `None` when nothing usable came back.
fn reply_text(resp: &AnthropicResponse) -> Option<String> {
    let text: String = resp
        .content
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter(|b| b.kind.is_empty() || b.kind == "text")
        .map(|b| b.text.as_str())
        .collect::<Vec<_>>()
        .join("");
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn requires_api_key(&self) -> bool {
        true
    }

    async fn complete(&self, context: &Context) -> Result<GeneratedReply, HavenError> {
        let (system, api_messages) = context.to_api_messages();
        let start = Instant::now();

        let body = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: MAX_REPLY_TOKENS,
            system,
            messages: api_messages
                .into_iter()
                .map(|m| AnthropicMessage {
                    role: m.role,
                    content: m.content,
                })
                .collect(),
        };

        debug!("anthropic: POST {ANTHROPIC_API_URL} model={}", self.model);

        let resp = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| HavenError::Provider(format!("anthropic request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(HavenError::Provider(format!(
                "anthropic returned {status}: {text}"
            )));
        }

        let parsed: AnthropicResponse = resp.json().await.map_err(|e| {
            HavenError::Provider(format!("anthropic: failed to parse response: {e}"))
        })?;

        let text = reply_text(&parsed)
            .ok_or_else(|| HavenError::Provider("anthropic returned an empty reply".to_string()))?;

        Ok(GeneratedReply {
            text,
            thread_id: context.thread_id.clone(),
            metadata: ReplyMetadata {
                provider_used: "anthropic".to_string(),
                tokens_used: parsed
                    .usage
                    .as_ref()
                    .map(|u| u.input_tokens + u.output_tokens),
                processing_time_ms: start.elapsed().as_millis() as u64,
                model: parsed.model,
            },
        })
    }

    async fn is_available(&self) -> bool {
        if self.api_key.is_empty() {
            warn!("anthropic: no API key configured");
            return false;
        }
        // No lightweight health endpoint; we trust the key is valid.
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anthropic_provider_name() {
        let p = AnthropicProvider::from_config(&AnthropicConfig::default(), Duration::from_secs(5))
            .unwrap();
        assert_eq!(p.name(), "anthropic");
        assert!(p.requires_api_key());
    }

    #[tokio::test]
    async fn test_unavailable_without_key() {
        let p = AnthropicProvider::from_config(&AnthropicConfig::default(), Duration::from_secs(5))
            .unwrap();
        assert!(!p.is_available().await);
    }

    #[test]
    fn test_request_empty_system_omitted() {
        let body = AnthropicRequest {
            model: "claude-sonnet-4-20250514".into(),
            max_tokens: MAX_REPLY_TOKENS,
            system: String::new(),
            messages: vec![AnthropicMessage {
                role: "user".into(),
                content: "I want to give up".into(),
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("system").is_none());
        assert_eq!(json["messages"][0]["content"], "I want to give up");
    }

    #[test]
    fn test_response_joins_text_blocks() {
        let json = r#"{"content":[{"type":"text","text":"I hear you. "},{"type":"text","text":"Call 988."}],"model":"claude","usage":{"input_tokens":10,"output_tokens":5}}"#;
        let resp: AnthropicResponse = serde_json::from_str(json).unwrap();
        assert_eq!(reply_text(&resp).as_deref(), Some("I hear you. Call 988."));
    }

    #[test]
    fn test_empty_content_has_no_text() {
        let resp: AnthropicResponse = serde_json::from_str(r#"{"content":[]}"#).unwrap();
        assert!(reply_text(&resp).is_none());
        let resp: AnthropicResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert!(reply_text(&resp).is_none());
    }
}
