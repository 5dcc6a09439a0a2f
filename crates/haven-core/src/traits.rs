use crate::{
    context::Context,
    error::HavenError,
    message::{GeneratedReply, OutgoingMessage},
};
use async_trait::async_trait;

/// Reply-generation collaborator.
///
/// Every LLM backend (OpenAI-compatible, Anthropic) implements this trait so
/// the escalation workflow can draft crisis replies without knowing which
/// one is configured.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Human-readable provider name.
    fn name(&self) -> &str;

    /// Whether this provider requires an API key to function.
    fn requires_api_key(&self) -> bool;

    /// Draft a reply for the given context.
    async fn complete(&self, context: &Context) -> Result<GeneratedReply, HavenError>;

    /// Check if the provider is configured and ready.
    async fn is_available(&self) -> bool;
}

/// Outbound messaging collaborator (SMS, email).
///
/// Sends are fire-and-forget from the caller's point of view, but errors are
/// surfaced so workflow steps can retry.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name ("sms", "email").
    fn name(&self) -> &str;

    /// Deliver one message.
    async fn send(&self, message: OutgoingMessage) -> Result<(), HavenError>;
}
