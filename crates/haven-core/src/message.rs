use serde::{Deserialize, Serialize};

/// An inbound message from the messaging gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    /// User key as known to the gateway (usually the phone number).
    pub user_id: String,
    /// Message text content.
    pub text: String,
    /// Channel name (e.g. "sms").
    #[serde(default = "default_inbound_channel")]
    pub channel: String,
    /// Gateway-assigned message id. Redeliveries carry the same id.
    pub external_id: String,
}

fn default_inbound_channel() -> String {
    "sms".to_string()
}

/// An outgoing message handed to a channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Recipient address (phone number or email).
    pub to: String,
    /// Subject line, used by email channels only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
}

impl OutgoingMessage {
    pub fn text(to: &str, body: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: None,
            body: body.to_string(),
        }
    }

    pub fn email(to: &str, subject: &str, body: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: Some(subject.to_string()),
            body: body.to_string(),
        }
    }
}

/// Which agent should own the conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Agent {
    Crisis,
    Main,
    SignupRequired,
}

impl Agent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crisis => "crisis",
            Self::Main => "main",
            Self::SignupRequired => "signup_required",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "crisis" => Some(Self::Crisis),
            "main" => Some(Self::Main),
            "signup_required" => Some(Self::SignupRequired),
            _ => None,
        }
    }
}

/// Result of inbound intake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    pub agent: Agent,
    pub thread_id: Option<String>,
}

/// Metadata about how a reply was generated.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReplyMetadata {
    /// Which provider produced this reply.
    pub provider_used: String,
    /// Token count (if available from the provider).
    pub tokens_used: Option<u64>,
    /// Wall-clock processing time in milliseconds.
    pub processing_time_ms: u64,
    /// Model identifier (if applicable).
    pub model: Option<String>,
}

/// Text produced by the reply-generation collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneratedReply {
    pub text: String,
    pub thread_id: Option<String>,
    pub metadata: ReplyMetadata,
}
