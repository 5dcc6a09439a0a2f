//! Audit log: records every safety-relevant outbound send.

use haven_core::error::HavenError;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

/// What kind of message was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditKind {
    CrisisReply,
    /// Canned safety text sent in place of a generated reply.
    CannedSafety,
    EmergencyNotification,
    FollowUpCheckIn,
    FollowUpNudge,
    FollowUpClosing,
    FollowUpReminder,
    WellnessCheckIn,
    SignupPrompt,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CrisisReply => "crisis_reply",
            Self::CannedSafety => "canned_safety",
            Self::EmergencyNotification => "emergency_notification",
            Self::FollowUpCheckIn => "followup_checkin",
            Self::FollowUpNudge => "followup_nudge",
            Self::FollowUpClosing => "followup_closing",
            Self::FollowUpReminder => "followup_reminder",
            Self::WellnessCheckIn => "wellness_checkin",
            Self::SignupPrompt => "signup_prompt",
        }
    }
}

/// Status of an audited send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    Ok,
    Error,
    Skipped,
}

impl AuditStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Skipped => "skipped",
        }
    }
}

/// An entry to write to the audit log.
pub struct AuditEntry {
    pub channel: String,
    pub user_id: String,
    pub kind: AuditKind,
    pub recipient: Option<String>,
    pub body: String,
    pub status: AuditStatus,
    /// Error text or skip reason.
    pub detail: Option<String>,
}

/// Audit logger backed by SQLite.
#[derive(Clone)]
pub struct AuditLogger {
    pool: SqlitePool,
}

impl AuditLogger {
    /// Create a new audit logger sharing the given pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Write an entry to the audit log.
    pub async fn log(&self, entry: &AuditEntry, now: i64) -> Result<(), HavenError> {
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO audit_log \
             (id, channel, user_id, kind, recipient, body, status, detail, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&entry.channel)
        .bind(&entry.user_id)
        .bind(entry.kind.as_str())
        .bind(&entry.recipient)
        .bind(&entry.body)
        .bind(entry.status.as_str())
        .bind(&entry.detail)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| HavenError::Memory(format!("audit log write failed: {e}")))?;

        debug!(
            "audit: {} {} {} [{}] {}",
            entry.channel,
            entry.user_id,
            entry.kind.as_str(),
            entry.status.as_str(),
            truncate(&entry.body, 80)
        );

        Ok(())
    }

    /// Number of entries of a kind with a given status for a user.
    pub async fn count(
        &self,
        user_id: &str,
        kind: AuditKind,
        status: AuditStatus,
    ) -> Result<i64, HavenError> {
        let (n,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM audit_log WHERE user_id = ? AND kind = ? AND status = ?",
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| HavenError::Memory(format!("audit count failed: {e}")))?;
        Ok(n)
    }
}

/// Truncate on a char boundary.
pub fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
