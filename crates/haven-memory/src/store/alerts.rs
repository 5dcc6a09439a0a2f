//! Alerts: compare-and-insert on the open-alert key, one alert per
//! escalation run, batched dedup lookup.

use super::{json_ids, parse_column, Store};
use haven_core::{
    error::HavenError,
    model::{Alert, AlertKey, AlertPattern, AlertType, NewAlert, Severity},
};
use std::collections::HashSet;
use uuid::Uuid;

/// Outcome of [`Store::insert_alert_if_absent`].
#[derive(Debug, Clone)]
pub struct InsertedAlert {
    /// The new row, or the existing row that already held the key.
    pub alert: Alert,
    pub created: bool,
}

type AlertRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    i64,
    Option<i64>,
    Option<i64>,
);

const ALERT_COLUMNS: &str =
    "id, user_id, type, pattern, severity, message, context, created_at, resolved_at, notified_at";

fn alert_from_row(row: AlertRow) -> Result<Alert, HavenError> {
    let (id, user_id, alert_type, pattern, severity, message, context, created_at, resolved_at, notified_at) =
        row;
    Ok(Alert {
        id,
        user_id,
        alert_type: parse_column::<AlertType>(&alert_type, "alert")?,
        pattern: parse_column::<AlertPattern>(&pattern, "alert")?,
        severity: parse_column::<Severity>(&severity, "alert")?,
        message,
        context: serde_json::from_str(&context)?,
        created_at,
        resolved_at,
        notified_at,
    })
}

impl Store {
    /// Insert an alert unless an unresolved one with the same key exists.
    ///
    /// The partial unique index on `(user_id, type, pattern)` over unresolved
    /// rows without an escalation makes this a single atomic compare-and-insert
    /// across writers.
    pub async fn insert_alert_if_absent(&self, new: &NewAlert) -> Result<InsertedAlert, HavenError> {
        let id = Uuid::new_v4().to_string();
        let result = sqlx::query(
            "INSERT OR IGNORE INTO alerts \
             (id, user_id, type, pattern, severity, message, context, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&new.user_id)
        .bind(new.alert_type.as_str())
        .bind(new.pattern.as_str())
        .bind(new.severity.as_str())
        .bind(&new.message)
        .bind(serde_json::to_string(&new.context)?)
        .bind(new.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| HavenError::Memory(format!("insert alert failed: {e}")))?;

        let created = result.rows_affected() == 1;
        let alert = if created {
            self.get_alert(&id).await?
        } else {
            self.find_unresolved_alert(&new.key()).await?
        };

        match alert {
            Some(alert) => Ok(InsertedAlert { alert, created }),
            // The conflicting row was resolved between the insert and the read.
            None => Err(HavenError::Memory(format!(
                "alert for {}/{}/{} changed concurrently",
                new.user_id, new.alert_type, new.pattern
            ))),
        }
    }

    /// Insert the alert owned by one escalation run. Every run gets its own
    /// row; repeating the call for the same run returns the existing one.
    pub async fn insert_escalation_alert(
        &self,
        escalation_id: &str,
        new: &NewAlert,
    ) -> Result<InsertedAlert, HavenError> {
        let id = Uuid::new_v4().to_string();
        let result = sqlx::query(
            "INSERT OR IGNORE INTO alerts \
             (id, user_id, type, pattern, severity, message, context, escalation_id, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&new.user_id)
        .bind(new.alert_type.as_str())
        .bind(new.pattern.as_str())
        .bind(new.severity.as_str())
        .bind(&new.message)
        .bind(serde_json::to_string(&new.context)?)
        .bind(escalation_id)
        .bind(new.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| HavenError::Memory(format!("insert escalation alert failed: {e}")))?;

        let row: Option<AlertRow> = sqlx::query_as(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts WHERE escalation_id = ?"
        ))
        .bind(escalation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| HavenError::Memory(format!("get escalation alert failed: {e}")))?;

        match row {
            Some(row) => Ok(InsertedAlert {
                alert: alert_from_row(row)?,
                created: result.rows_affected() == 1,
            }),
            None => Err(HavenError::Memory(format!(
                "alert for escalation {escalation_id} missing after insert"
            ))),
        }
    }

    pub async fn get_alert(&self, id: &str) -> Result<Option<Alert>, HavenError> {
        let row: Option<AlertRow> =
            sqlx::query_as(&format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| HavenError::Memory(format!("get alert failed: {e}")))?;

        row.map(alert_from_row).transpose()
    }

    pub async fn find_unresolved_alert(&self, key: &AlertKey) -> Result<Option<Alert>, HavenError> {
        let row: Option<AlertRow> = sqlx::query_as(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts \
             WHERE user_id = ? AND type = ? AND pattern = ? AND resolved_at IS NULL \
             LIMIT 1"
        ))
        .bind(&key.user_id)
        .bind(key.alert_type.as_str())
        .bind(key.pattern.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| HavenError::Memory(format!("find unresolved alert failed: {e}")))?;

        row.map(alert_from_row).transpose()
    }

    /// Keys of every unresolved alert of the given types for the given users,
    /// in one query regardless of how many users are passed.
    pub async fn unresolved_alert_keys(
        &self,
        user_ids: &[String],
        types: &[AlertType],
    ) -> Result<HashSet<AlertKey>, HavenError> {
        if user_ids.is_empty() || types.is_empty() {
            return Ok(HashSet::new());
        }
        let type_names: Vec<String> = types.iter().map(|t| t.as_str().to_string()).collect();

        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT user_id, type, pattern FROM alerts \
             WHERE resolved_at IS NULL \
               AND user_id IN (SELECT value FROM json_each(?)) \
               AND type IN (SELECT value FROM json_each(?))",
        )
        .bind(json_ids(user_ids)?)
        .bind(json_ids(&type_names)?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HavenError::Memory(format!("batched alert lookup failed: {e}")))?;

        rows.into_iter()
            .map(|(user_id, alert_type, pattern)| {
                Ok(AlertKey {
                    user_id,
                    alert_type: parse_column(&alert_type, "alert")?,
                    pattern: parse_column(&pattern, "alert")?,
                })
            })
            .collect()
    }

    /// Set `resolved_at`. Returns `false` if the alert is missing or already resolved.
    pub async fn resolve_alert(&self, id: &str, now: i64) -> Result<bool, HavenError> {
        let result =
            sqlx::query("UPDATE alerts SET resolved_at = ? WHERE id = ? AND resolved_at IS NULL")
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| HavenError::Memory(format!("resolve alert failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    /// Record that the emergency contact was notified for this alert.
    pub async fn mark_alert_notified(&self, id: &str, now: i64) -> Result<(), HavenError> {
        sqlx::query("UPDATE alerts SET notified_at = ? WHERE id = ? AND notified_at IS NULL")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| HavenError::Memory(format!("mark alert notified failed: {e}")))?;
        Ok(())
    }

    /// Unresolved alerts, newest first.
    pub async fn list_unresolved_alerts(&self, limit: i64) -> Result<Vec<Alert>, HavenError> {
        let rows: Vec<AlertRow> = sqlx::query_as(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts WHERE resolved_at IS NULL \
             ORDER BY created_at DESC LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HavenError::Memory(format!("list alerts failed: {e}")))?;

        rows.into_iter().map(alert_from_row).collect()
    }

    /// Unresolved alert counts grouped by type.
    pub async fn alert_counts(&self) -> Result<Vec<(String, i64)>, HavenError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT type, COUNT(*) FROM alerts WHERE resolved_at IS NULL \
             GROUP BY type ORDER BY type",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HavenError::Memory(format!("alert counts failed: {e}")))?;
        Ok(rows)
    }
}
