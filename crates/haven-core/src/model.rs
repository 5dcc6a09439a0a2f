//! Persistent data model: users, alerts, wellness scores, follow-up stages.
//!
//! All timestamps are Unix epoch milliseconds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MS_PER_MINUTE: i64 = 60 * 1000;
pub const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;
pub const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// Role tag for inbound messages in the recent-message ring.
pub const ROLE_USER: &str = "user";
/// Role tag for messages Haven sent.
pub const ROLE_ASSISTANT: &str = "assistant";

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// Lifecycle phase of a caregiver. Only `Active` users are watched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JourneyPhase {
    #[default]
    Active,
    Maintenance,
    Churned,
}

impl JourneyPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Maintenance => "maintenance",
            Self::Churned => "churned",
        }
    }
}

impl FromStr for JourneyPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "maintenance" => Ok(Self::Maintenance),
            "churned" => Ok(Self::Churned),
            other => Err(format!("unknown journey phase: {other}")),
        }
    }
}

/// One entry of the bounded recent-message ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentMessage {
    /// "user" or "assistant".
    pub role: String,
    pub content: String,
    pub timestamp: i64,
}

impl RecentMessage {
    pub fn inbound(content: &str, timestamp: i64) -> Self {
        Self {
            role: ROLE_USER.to_string(),
            content: content.to_string(),
            timestamp,
        }
    }

    pub fn outbound(content: &str, timestamp: i64) -> Self {
        Self {
            role: ROLE_ASSISTANT.to_string(),
            content: content.to_string(),
            timestamp,
        }
    }

    pub fn is_inbound(&self) -> bool {
        self.role == ROLE_USER
    }
}

/// Consent flags captured at signup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consent {
    pub emergency: bool,
    pub marketing: bool,
}

/// Person to notify when a crisis is detected (only with emergency consent).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyContact {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Marker set on a user after a follow-up check-in went out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwaitingFollowUp {
    pub alert_id: String,
    pub stage: FollowUpStage,
}

/// A caregiver known to Haven.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// External identity (the messaging gateway's user key).
    pub id: String,
    pub first_name: Option<String>,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    /// IANA zone name, e.g. `America/Chicago`.
    pub timezone: Option<String>,
    pub journey_phase: JourneyPhase,
    pub subscribed: bool,
    pub consent: Consent,
    pub emergency_contact: Option<EmergencyContact>,
    pub total_interaction_count: i64,
    pub conversation_start_at: Option<i64>,
    pub thread_id: Option<String>,
    /// Oldest first.
    pub recent_messages: Vec<RecentMessage>,
    pub awaiting_followup: Option<AwaitingFollowUp>,
}

impl User {
    /// A fresh, subscribed, active user with no history.
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            first_name: None,
            phone_number: None,
            email: None,
            timezone: None,
            journey_phase: JourneyPhase::Active,
            subscribed: true,
            consent: Consent::default(),
            emergency_contact: None,
            total_interaction_count: 0,
            conversation_start_at: None,
            thread_id: None,
            recent_messages: Vec::new(),
            awaiting_followup: None,
        }
    }

    /// Messages (any role) at or after `since_ms`.
    pub fn messages_since(&self, since_ms: i64) -> impl Iterator<Item = &RecentMessage> {
        self.recent_messages
            .iter()
            .filter(move |m| m.timestamp >= since_ms)
    }

    /// Inbound messages at or after `since_ms`.
    pub fn inbound_since(&self, since_ms: i64) -> impl Iterator<Item = &RecentMessage> {
        self.messages_since(since_ms).filter(|m| m.is_inbound())
    }

    /// Whether the user sent anything strictly after `after_ms`.
    pub fn has_inbound_after(&self, after_ms: i64) -> bool {
        self.recent_messages
            .iter()
            .any(|m| m.is_inbound() && m.timestamp > after_ms)
    }

    /// Phone number to reach the user, ignoring blank values.
    pub fn reachable_phone(&self) -> Option<&str> {
        self.phone_number
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }

    /// Emergency contact email, only when the user consented to notifications.
    pub fn notifiable_contact(&self) -> Option<&str> {
        if !self.consent.emergency {
            return None;
        }
        self.emergency_contact
            .as_ref()
            .and_then(|c| c.email.as_deref())
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Disengagement,
    HighStress,
    WellnessDecline,
    CrisisDetected,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disengagement => "disengagement",
            Self::HighStress => "high_stress",
            Self::WellnessDecline => "wellness_decline",
            Self::CrisisDetected => "crisis_detected",
        }
    }
}

impl FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disengagement" => Ok(Self::Disengagement),
            "high_stress" => Ok(Self::HighStress),
            "wellness_decline" => Ok(Self::WellnessDecline),
            "crisis_detected" => Ok(Self::CrisisDetected),
            other => Err(format!("unknown alert type: {other}")),
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPattern {
    SuddenDrop,
    CrisisBurst,
    WorseningScores,
    /// Inline crisis-term hit during message intake.
    CrisisTerms,
}

impl AlertPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuddenDrop => "sudden_drop",
            Self::CrisisBurst => "crisis_burst",
            Self::WorseningScores => "worsening_scores",
            Self::CrisisTerms => "crisis_terms",
        }
    }
}

impl FromStr for AlertPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sudden_drop" => Ok(Self::SuddenDrop),
            "crisis_burst" => Ok(Self::CrisisBurst),
            "worsening_scores" => Ok(Self::WorseningScores),
            "crisis_terms" => Ok(Self::CrisisTerms),
            other => Err(format!("unknown alert pattern: {other}")),
        }
    }
}

impl fmt::Display for AlertPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Urgent,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
            Self::Critical => "critical",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// Severity assigned by the crisis term detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrisisSeverity {
    Low,
    Medium,
    High,
}

impl CrisisSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Map detector severity onto the stored alert scale, one step up.
    pub fn to_alert_severity(self) -> Severity {
        match self {
            Self::High => Severity::Critical,
            Self::Medium => Severity::High,
            Self::Low => Severity::Medium,
        }
    }
}

impl FromStr for CrisisSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown crisis severity: {other}")),
        }
    }
}

/// Dedup key: at most one unresolved alert may exist per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlertKey {
    pub user_id: String,
    pub alert_type: AlertType,
    pub pattern: AlertPattern,
}

impl AlertKey {
    pub fn new(user_id: &str, alert_type: AlertType, pattern: AlertPattern) -> Self {
        Self {
            user_id: user_id.to_string(),
            alert_type,
            pattern,
        }
    }
}

/// A persisted record of a detected condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub pattern: AlertPattern,
    pub severity: Severity,
    pub message: String,
    /// Detection evidence.
    pub context: serde_json::Value,
    pub created_at: i64,
    pub resolved_at: Option<i64>,
    /// Set once the emergency contact was notified for this alert.
    pub notified_at: Option<i64>,
}

impl Alert {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    pub fn key(&self) -> AlertKey {
        AlertKey::new(&self.user_id, self.alert_type, self.pattern)
    }
}

/// Candidate alert handed to the store's compare-and-insert.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub user_id: String,
    pub alert_type: AlertType,
    pub pattern: AlertPattern,
    pub severity: Severity,
    pub message: String,
    pub context: serde_json::Value,
    pub created_at: i64,
}

impl NewAlert {
    pub fn key(&self) -> AlertKey {
        AlertKey::new(&self.user_id, self.alert_type, self.pattern)
    }
}

// ---------------------------------------------------------------------------
// Wellness scores
// ---------------------------------------------------------------------------

/// One burnout assessment result. Higher `overall_score` means worse burnout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WellnessScore {
    pub user_id: String,
    pub overall_score: f64,
    pub band: String,
    #[serde(default)]
    pub pressure_zones: Vec<String>,
    pub recorded_at: i64,
}

// ---------------------------------------------------------------------------
// Follow-ups
// ---------------------------------------------------------------------------

/// Which tier of the crisis follow-up is in play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpStage {
    /// Check-in a day after the crisis.
    T24h,
    /// Terminal nudge after a negative or unsure answer.
    T72h,
}

impl FollowUpStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::T24h => "t24h",
            Self::T72h => "t72h",
        }
    }
}

impl FromStr for FollowUpStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "t24h" => Ok(Self::T24h),
            "t72h" => Ok(Self::T72h),
            other => Err(format!("unknown follow-up stage: {other}")),
        }
    }
}

/// A caregiver's answer to a follow-up check-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpAnswer {
    Yes,
    No,
    Unsure,
}

impl FollowUpAnswer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
            Self::Unsure => "unsure",
        }
    }

    /// Interpret a short SMS reply. Anything else is an ordinary message.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text
            .trim()
            .trim_end_matches(['.', '!', '?'])
            .to_lowercase();
        match word.as_str() {
            "yes" | "y" | "yeah" | "yep" => Some(Self::Yes),
            "no" | "n" | "nope" => Some(Self::No),
            "unsure" | "not sure" | "maybe" => Some(Self::Unsure),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Escalation runs
// ---------------------------------------------------------------------------

/// Step cursor of one crisis escalation.
///
/// `Detected -> Logged -> Responded -> Notified -> FollowUpScheduled`, with
/// `Failed` reachable from any non-terminal state once retries run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationState {
    Detected,
    Logged,
    Responded,
    Notified,
    FollowUpScheduled,
    Failed,
}

impl EscalationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detected => "detected",
            Self::Logged => "logged",
            Self::Responded => "responded",
            Self::Notified => "notified",
            Self::FollowUpScheduled => "followup_scheduled",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FollowUpScheduled | Self::Failed)
    }
}

impl FromStr for EscalationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "detected" => Ok(Self::Detected),
            "logged" => Ok(Self::Logged),
            "responded" => Ok(Self::Responded),
            "notified" => Ok(Self::Notified),
            "followup_scheduled" => Ok(Self::FollowUpScheduled),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown escalation state: {other}")),
        }
    }
}

/// Persisted progress of one crisis event through the escalation steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationRun {
    /// Idempotency key of the triggering event (the inbound external id).
    pub id: String,
    pub user_id: String,
    pub thread_id: Option<String>,
    pub message_text: String,
    pub terms: Vec<String>,
    pub severity: CrisisSeverity,
    pub state: EscalationState,
    pub alert_id: Option<String>,
    pub reply_text: Option<String>,
    /// Failed attempts of the current step.
    pub attempts: u32,
    /// When the scheduler may pick the run up again.
    pub next_attempt_at: Option<i64>,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl EscalationRun {
    pub fn new(
        id: &str,
        user_id: &str,
        thread_id: Option<&str>,
        message_text: &str,
        terms: Vec<String>,
        severity: CrisisSeverity,
        now: i64,
    ) -> Self {
        Self {
            id: id.to_string(),
            user_id: user_id.to_string(),
            thread_id: thread_id.map(str::to_string),
            message_text: message_text.to_string(),
            terms,
            severity,
            state: EscalationState::Detected,
            alert_id: None,
            reply_text: None,
            attempts: 0,
            next_attempt_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_followup_answer_parse() {
        assert_eq!(FollowUpAnswer::parse("YES"), Some(FollowUpAnswer::Yes));
        assert_eq!(FollowUpAnswer::parse(" yes! "), Some(FollowUpAnswer::Yes));
        assert_eq!(FollowUpAnswer::parse("No."), Some(FollowUpAnswer::No));
        assert_eq!(FollowUpAnswer::parse("not sure"), Some(FollowUpAnswer::Unsure));
        assert_eq!(FollowUpAnswer::parse("yes I called them"), None);
        assert_eq!(FollowUpAnswer::parse(""), None);
    }

    #[test]
    fn test_escalation_terminal_states() {
        assert!(EscalationState::FollowUpScheduled.is_terminal());
        assert!(EscalationState::Failed.is_terminal());
        assert!(!EscalationState::Notified.is_terminal());
        assert_eq!(
            "followup_scheduled".parse::<EscalationState>().unwrap(),
            EscalationState::FollowUpScheduled
        );
    }

    #[test]
    fn test_crisis_severity_maps_one_step_up() {
        assert_eq!(CrisisSeverity::High.to_alert_severity(), Severity::Critical);
        assert_eq!(CrisisSeverity::Medium.to_alert_severity(), Severity::High);
        assert_eq!(CrisisSeverity::Low.to_alert_severity(), Severity::Medium);
    }

    #[test]
    fn test_enum_strings_parse_back() {
        for t in [
            AlertType::Disengagement,
            AlertType::HighStress,
            AlertType::WellnessDecline,
            AlertType::CrisisDetected,
        ] {
            assert_eq!(t.as_str().parse::<AlertType>().unwrap(), t);
        }
        assert_eq!("t72h".parse::<FollowUpStage>().unwrap(), FollowUpStage::T72h);
        assert!("weekly".parse::<FollowUpStage>().is_err());
    }

    #[test]
    fn test_inbound_queries_ignore_assistant_turns() {
        let mut user = User::new("u1");
        user.recent_messages = vec![
            RecentMessage::inbound("hi", 1_000),
            RecentMessage::outbound("hello", 5_000),
        ];
        assert!(user.has_inbound_after(999));
        assert!(!user.has_inbound_after(1_000));
        assert_eq!(user.inbound_since(1_000).count(), 1);
        assert_eq!(user.inbound_since(2_000).count(), 0);
        assert_eq!(user.messages_since(2_000).count(), 1);
    }

    #[test]
    fn test_notifiable_contact_requires_consent() {
        let mut user = User::new("u1");
        user.emergency_contact = Some(EmergencyContact {
            name: Some("Sam".into()),
            email: Some("sam@example.com".into()),
        });
        assert_eq!(user.notifiable_contact(), None);
        user.consent.emergency = true;
        assert_eq!(user.notifiable_contact(), Some("sam@example.com"));
        user.emergency_contact = Some(EmergencyContact {
            name: Some("Sam".into()),
            email: Some("  ".into()),
        });
        assert_eq!(user.notifiable_contact(), None);
    }

    #[test]
    fn test_reachable_phone_ignores_blank() {
        let mut user = User::new("u1");
        assert_eq!(user.reachable_phone(), None);
        user.phone_number = Some(" ".into());
        assert_eq!(user.reachable_phone(), None);
        user.phone_number = Some("+15555550100".into());
        assert_eq!(user.reachable_phone(), Some("+15555550100"));
    }
}
