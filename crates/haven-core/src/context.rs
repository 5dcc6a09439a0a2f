use crate::model::{RecentMessage, User, ROLE_USER};
use serde::{Deserialize, Serialize};

/// A single entry in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    /// "user" or "assistant".
    pub role: String,
    /// The message content.
    pub content: String,
}

impl From<&RecentMessage> for ContextEntry {
    fn from(m: &RecentMessage) -> Self {
        Self {
            role: m.role.clone(),
            content: m.content.clone(),
        }
    }
}

/// Conversation context passed to a reply provider for a crisis turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    /// System prompt prepended to every request.
    pub system_prompt: String,
    /// Conversation history (oldest first).
    pub history: Vec<ContextEntry>,
    /// The current user message.
    pub current_message: String,
    pub user_id: String,
    pub thread_id: Option<String>,
}

/// A structured message for API-based providers (OpenAI, Anthropic).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiMessage {
    /// "user" or "assistant".
    pub role: String,
    /// The message content.
    pub content: String,
}

/// How many prior turns a crisis reply sees.
const CRISIS_HISTORY_TURNS: usize = 6;

impl Context {
    /// Build the context for answering a crisis message. The matched terms
    /// are named in the system prompt.
    ///
    /// History excludes the current message when the ring already holds it.
    pub fn for_crisis(user: &User, thread_id: Option<&str>, text: &str, terms: &[String]) -> Self {
        let mut prior: Vec<&RecentMessage> = user.recent_messages.iter().collect();
        if prior
            .last()
            .is_some_and(|m| m.role == ROLE_USER && m.content == text)
        {
            prior.pop();
        }
        let skip = prior.len().saturating_sub(CRISIS_HISTORY_TURNS);
        let history = prior.into_iter().skip(skip).map(ContextEntry::from).collect();

        Self {
            system_prompt: crisis_system_prompt(user.first_name.as_deref(), terms),
            history,
            current_message: text.to_string(),
            user_id: user.id.clone(),
            thread_id: thread_id.map(str::to_string),
        }
    }

    /// Convert context to structured API messages.
    ///
    /// Returns `(system_prompt, messages)`; the system prompt is separated
    /// because Anthropic requires it outside the messages array.
    pub fn to_api_messages(&self) -> (String, Vec<ApiMessage>) {
        let mut messages = Vec::with_capacity(self.history.len() + 1);

        for entry in &self.history {
            messages.push(ApiMessage {
                role: entry.role.clone(),
                content: entry.content.clone(),
            });
        }

        messages.push(ApiMessage {
            role: "user".to_string(),
            content: self.current_message.clone(),
        });

        (self.system_prompt.clone(), messages)
    }
}

fn crisis_system_prompt(first_name: Option<&str>, terms: &[String]) -> String {
    let name = first_name.unwrap_or("the caregiver");
    let flagged = if terms.is_empty() {
        String::new()
    } else {
        let quoted: Vec<String> = terms.iter().map(|t| format!("\"{t}\"")).collect();
        format!(
            "- Their message was flagged for: {}. Respond to that directly.\n",
            quoted.join(", ")
        )
    };
    format!(
        "You are a calm, compassionate support companion for family caregivers. \
         You are talking with {name}, who just wrote something that suggests they may be \
         in crisis.\n\
         {flagged}\
         - Acknowledge what they said in plain, warm language. Do not judge or lecture.\n\
         - Always include: call or text 988 (Suicide & Crisis Lifeline), text HOME to 741741 \
         (Crisis Text Line), call 911 if in immediate danger.\n\
         - Never give medical advice, diagnoses, or medication guidance.\n\
         - Keep it under 480 characters: this is delivered by SMS."
    )
}
