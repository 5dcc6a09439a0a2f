use super::Store;
use haven_core::{
    error::HavenError,
    model::{FollowUpAnswer, FollowUpStage},
};
use uuid::Uuid;

impl Store {
    /// Record a caregiver's answer to a follow-up check-in. The first answer
    /// per alert and stage is kept; returns whether this call stored it.
    pub async fn record_followup_feedback(
        &self,
        user_id: &str,
        alert_id: &str,
        stage: FollowUpStage,
        answer: FollowUpAnswer,
        now: i64,
    ) -> Result<bool, HavenError> {
        let id = Uuid::new_v4().to_string();
        let result = sqlx::query(
            "INSERT OR IGNORE INTO followup_feedback \
             (id, user_id, alert_id, stage, response, connected_with_crisis_line, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(alert_id)
        .bind(stage.as_str())
        .bind(answer.as_str())
        .bind(answer == FollowUpAnswer::Yes)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| HavenError::Memory(format!("record followup feedback failed: {e}")))?;
        Ok(result.rows_affected() == 1)
    }

    /// Feedback rows for an alert as `(stage, response, connected)`, oldest first.
    pub async fn followup_feedback_for_alert(
        &self,
        alert_id: &str,
    ) -> Result<Vec<(String, String, bool)>, HavenError> {
        let rows: Vec<(String, String, bool)> = sqlx::query_as(
            "SELECT stage, response, connected_with_crisis_line FROM followup_feedback \
             WHERE alert_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(alert_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HavenError::Memory(format!("get followup feedback failed: {e}")))?;
        Ok(rows)
    }
}
