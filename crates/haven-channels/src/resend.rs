//! Resend email channel, used for emergency-contact notifications.
//!
//! Docs: <https://resend.com/docs/api-reference/emails/send-email>

use async_trait::async_trait;
use haven_core::{
    config::ResendConfig, error::HavenError, message::OutgoingMessage, traits::Channel,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

const RESEND_API_URL: &str = "https://api.resend.com/emails";
const DEFAULT_SUBJECT: &str = "A message from Haven";

/// Email channel backed by Resend.
pub struct ResendChannel {
    config: ResendConfig,
    client: reqwest::Client,
}

impl ResendChannel {
    pub fn new(config: ResendConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct SendEmailResponse {
    id: Option<String>,
}

fn build_request<'a>(from: &'a str, message: &'a OutgoingMessage) -> SendEmailRequest<'a> {
    SendEmailRequest {
        from,
        to: vec![message.to.as_str()],
        subject: message.subject.as_deref().unwrap_or(DEFAULT_SUBJECT),
        text: &message.body,
    }
}

#[async_trait]
impl Channel for ResendChannel {
    fn name(&self) -> &str {
        crate::EMAIL
    }

    async fn send(&self, message: OutgoingMessage) -> Result<(), HavenError> {
        if !message.to.contains('@') {
            return Err(HavenError::Channel(format!(
                "resend: invalid recipient '{}'",
                message.to
            )));
        }

        let body = build_request(&self.config.from_address, &message);
        let resp = self
            .client
            .post(RESEND_API_URL)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| HavenError::Channel(format!("resend send failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(HavenError::Channel(format!(
                "resend returned {status}: {text}"
            )));
        }

        let sent: SendEmailResponse = resp
            .json()
            .await
            .map_err(|e| HavenError::Channel(format!("resend: failed to parse response: {e}")))?;
        debug!("resend: sent {}", sent.id.as_deref().unwrap_or("?"));
        Ok(())
    }
}
