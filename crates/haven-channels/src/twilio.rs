//! Twilio Programmable Messaging channel.
//!
//! Sends SMS through the REST API (`Messages.json`, form-encoded, basic auth).
//! Docs: <https://www.twilio.com/docs/messaging/api/message-resource>

use async_trait::async_trait;
use haven_core::{
    config::TwilioConfig, error::HavenError, message::OutgoingMessage, traits::Channel,
};
use serde::Deserialize;
use tracing::{debug, info};

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// Twilio concatenates segments up to this many characters.
const MAX_SMS_CHARS: usize = 1600;

/// SMS channel backed by Twilio.
pub struct TwilioChannel {
    config: TwilioConfig,
    client: reqwest::Client,
    base_url: String,
}

impl TwilioChannel {
    /// Create a new Twilio channel from config.
    pub fn new(config: TwilioConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            base_url: TWILIO_API_BASE.to_string(),
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/Accounts/{}/Messages.json",
            self.base_url, self.config.account_sid
        )
    }
}

#[derive(Deserialize)]
struct TwilioMessage {
    sid: Option<String>,
    status: Option<String>,
}

#[derive(Deserialize)]
struct TwilioError {
    code: Option<i64>,
    message: Option<String>,
}

/// Cut the body to the concatenated-SMS limit on a char boundary.
fn sms_body(body: &str) -> &str {
    match body.char_indices().nth(MAX_SMS_CHARS) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[async_trait]
impl Channel for TwilioChannel {
    fn name(&self) -> &str {
        crate::SMS
    }

    async fn send(&self, message: OutgoingMessage) -> Result<(), HavenError> {
        if message.to.trim().is_empty() {
            return Err(HavenError::Channel("twilio: empty recipient".into()));
        }

        let params = [
            ("To", message.to.as_str()),
            ("From", self.config.from_number.as_str()),
            ("Body", sms_body(&message.body)),
        ];

        let resp = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&params)
            .send()
            .await
            .map_err(|e| HavenError::Channel(format!("twilio send failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let detail = match resp.json::<TwilioError>().await {
                Ok(err) => format!(
                    "{} ({})",
                    err.message.unwrap_or_default(),
                    err.code.unwrap_or_default()
                ),
                Err(_) => String::new(),
            };
            return Err(HavenError::Channel(format!(
                "twilio returned {status}: {detail}"
            )));
        }

        let sent: TwilioMessage = resp
            .json()
            .await
            .map_err(|e| HavenError::Channel(format!("twilio: failed to parse response: {e}")))?;

        debug!(
            "twilio: queued {} status={}",
            sent.sid.as_deref().unwrap_or("?"),
            sent.status.as_deref().unwrap_or("?")
        );
        Ok(())
    }
}

/// Log the channel's readiness at startup.
pub fn describe(config: &TwilioConfig) {
    info!(
        "twilio: sms from {} (account {})",
        config.from_number,
        config
            .account_sid
            .get(..6)
            .unwrap_or(config.account_sid.as_str())
    );
}
