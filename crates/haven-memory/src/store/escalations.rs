//! Escalation run ledger: one row per crisis event, keyed by the event id.

use super::{parse_column, Store};
use haven_core::{
    error::HavenError,
    model::{CrisisSeverity, EscalationRun, EscalationState},
};

type EscalationRow = (
    String,
    String,
    Option<String>,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    i64,
    Option<i64>,
    Option<String>,
    i64,
    i64,
);

const ESCALATION_COLUMNS: &str = "id, user_id, thread_id, message_text, terms, severity, state, \
     alert_id, reply_text, attempts, next_attempt_at, last_error, created_at, updated_at";

fn run_from_row(row: EscalationRow) -> Result<EscalationRun, HavenError> {
    let (
        id,
        user_id,
        thread_id,
        message_text,
        terms,
        severity,
        state,
        alert_id,
        reply_text,
        attempts,
        next_attempt_at,
        last_error,
        created_at,
        updated_at,
    ) = row;
    Ok(EscalationRun {
        id,
        user_id,
        thread_id,
        message_text,
        terms: serde_json::from_str(&terms)?,
        severity: parse_column::<CrisisSeverity>(&severity, "escalation")?,
        state: parse_column::<EscalationState>(&state, "escalation")?,
        alert_id,
        reply_text,
        attempts: attempts.max(0) as u32,
        next_attempt_at,
        last_error,
        created_at,
        updated_at,
    })
}

impl Store {
    /// Persist a new run unless one already exists for the same event id.
    ///
    /// Returns the stored run and whether it was created by this call.
    pub async fn create_escalation(
        &self,
        run: &EscalationRun,
    ) -> Result<(EscalationRun, bool), HavenError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO escalations \
             (id, user_id, thread_id, message_text, terms, severity, state, alert_id, \
              reply_text, attempts, next_attempt_at, last_error, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&run.id)
        .bind(&run.user_id)
        .bind(&run.thread_id)
        .bind(&run.message_text)
        .bind(serde_json::to_string(&run.terms)?)
        .bind(run.severity.as_str())
        .bind(run.state.as_str())
        .bind(&run.alert_id)
        .bind(&run.reply_text)
        .bind(i64::from(run.attempts))
        .bind(run.next_attempt_at)
        .bind(&run.last_error)
        .bind(run.created_at)
        .bind(run.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| HavenError::Memory(format!("create escalation failed: {e}")))?;

        let created = result.rows_affected() == 1;
        let stored = self
            .get_escalation(&run.id)
            .await?
            .ok_or_else(|| HavenError::Memory(format!("escalation {} vanished", run.id)))?;
        Ok((stored, created))
    }

    pub async fn get_escalation(&self, id: &str) -> Result<Option<EscalationRun>, HavenError> {
        let row: Option<EscalationRow> = sqlx::query_as(&format!(
            "SELECT {ESCALATION_COLUMNS} FROM escalations WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| HavenError::Memory(format!("get escalation failed: {e}")))?;
        row.map(run_from_row).transpose()
    }

    /// Write back the mutable part of a run (cursor, outputs, retry bookkeeping).
    pub async fn save_escalation(&self, run: &EscalationRun) -> Result<(), HavenError> {
        sqlx::query(
            "UPDATE escalations SET state = ?, alert_id = ?, reply_text = ?, attempts = ?, \
             next_attempt_at = ?, last_error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(run.state.as_str())
        .bind(&run.alert_id)
        .bind(&run.reply_text)
        .bind(i64::from(run.attempts))
        .bind(run.next_attempt_at)
        .bind(&run.last_error)
        .bind(run.updated_at)
        .bind(&run.id)
        .execute(&self.pool)
        .await
        .map_err(|e| HavenError::Memory(format!("save escalation failed: {e}")))?;
        Ok(())
    }

    /// Non-terminal runs whose next attempt is due.
    pub async fn due_escalations(
        &self,
        now: i64,
        limit: i64,
    ) -> Result<Vec<EscalationRun>, HavenError> {
        let rows: Vec<EscalationRow> = sqlx::query_as(&format!(
            "SELECT {ESCALATION_COLUMNS} FROM escalations \
             WHERE state NOT IN ('followup_scheduled', 'failed') \
               AND next_attempt_at IS NOT NULL AND next_attempt_at <= ? \
             ORDER BY next_attempt_at ASC LIMIT ?"
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HavenError::Memory(format!("due escalations failed: {e}")))?;
        rows.into_iter().map(run_from_row).collect()
    }
}
