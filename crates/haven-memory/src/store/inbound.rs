//! Inbound receipts: at-most-once processing of redelivered gateway messages.

use super::Store;
use haven_core::{
    error::HavenError,
    message::{Agent, RoutingDecision},
};

/// What intake remembers about one external message id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundReceipt {
    pub user_id: String,
    /// `None` while the first delivery is still being processed.
    pub decision: Option<RoutingDecision>,
}

impl Store {
    /// Claim an external message id. Returns `false` if it was seen before.
    pub async fn claim_inbound(
        &self,
        external_id: &str,
        user_id: &str,
        now: i64,
    ) -> Result<bool, HavenError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO inbound_receipts (external_id, user_id, received_at) \
             VALUES (?, ?, ?)",
        )
        .bind(external_id)
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| HavenError::Memory(format!("claim inbound failed: {e}")))?;
        Ok(result.rows_affected() == 1)
    }

    /// Store the routing decision made for a claimed message.
    pub async fn complete_inbound(
        &self,
        external_id: &str,
        decision: &RoutingDecision,
    ) -> Result<(), HavenError> {
        sqlx::query("UPDATE inbound_receipts SET agent = ?, thread_id = ? WHERE external_id = ?")
            .bind(decision.agent.as_str())
            .bind(&decision.thread_id)
            .bind(external_id)
            .execute(&self.pool)
            .await
            .map_err(|e| HavenError::Memory(format!("complete inbound failed: {e}")))?;
        Ok(())
    }

    /// Drop an unfinished claim so a redelivery is processed again.
    pub async fn release_inbound(&self, external_id: &str) -> Result<(), HavenError> {
        sqlx::query("DELETE FROM inbound_receipts WHERE external_id = ? AND agent IS NULL")
            .bind(external_id)
            .execute(&self.pool)
            .await
            .map_err(|e| HavenError::Memory(format!("release inbound failed: {e}")))?;
        Ok(())
    }

    pub async fn get_inbound_receipt(
        &self,
        external_id: &str,
    ) -> Result<Option<InboundReceipt>, HavenError> {
        let row: Option<(String, Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT user_id, agent, thread_id FROM inbound_receipts WHERE external_id = ?",
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| HavenError::Memory(format!("get inbound receipt failed: {e}")))?;

        Ok(row.map(|(user_id, agent, thread_id)| InboundReceipt {
            user_id,
            decision: agent
                .as_deref()
                .and_then(Agent::parse)
                .map(|agent| RoutingDecision { agent, thread_id }),
        }))
    }
}
