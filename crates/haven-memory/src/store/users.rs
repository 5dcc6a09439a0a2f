//! Caregiver profiles, the recent-message ring, and follow-up markers.

use super::{parse_column, Store};
use haven_core::{
    error::HavenError,
    model::{
        AwaitingFollowUp, Consent, EmergencyContact, FollowUpStage, JourneyPhase, RecentMessage,
        User,
    },
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::warn;
use uuid::Uuid;

const USER_COLUMNS: &str = "id, first_name, phone_number, email, timezone, journey_phase, \
     subscribed, consent_emergency, consent_marketing, emergency_contact_name, \
     emergency_contact_email, total_interaction_count, conversation_start_at, thread_id, \
     recent_messages, awaiting_followup_alert, awaiting_followup_stage";

fn user_from_row(row: &SqliteRow) -> Result<User, HavenError> {
    let get_err = |e: sqlx::Error| HavenError::Memory(format!("read user row failed: {e}"));

    let phase: String = row.try_get("journey_phase").map_err(get_err)?;
    let ring: String = row.try_get("recent_messages").map_err(get_err)?;
    let contact_name: Option<String> = row.try_get("emergency_contact_name").map_err(get_err)?;
    let contact_email: Option<String> = row.try_get("emergency_contact_email").map_err(get_err)?;
    let awaiting_alert: Option<String> = row.try_get("awaiting_followup_alert").map_err(get_err)?;
    let awaiting_stage: Option<String> = row.try_get("awaiting_followup_stage").map_err(get_err)?;

    let awaiting_followup = match (awaiting_alert, awaiting_stage) {
        (Some(alert_id), Some(stage)) => Some(AwaitingFollowUp {
            alert_id,
            stage: parse_column::<FollowUpStage>(&stage, "user")?,
        }),
        _ => None,
    };
    let emergency_contact = if contact_name.is_some() || contact_email.is_some() {
        Some(EmergencyContact {
            name: contact_name,
            email: contact_email,
        })
    } else {
        None
    };

    Ok(User {
        id: row.try_get("id").map_err(get_err)?,
        first_name: row.try_get("first_name").map_err(get_err)?,
        phone_number: row.try_get("phone_number").map_err(get_err)?,
        email: row.try_get("email").map_err(get_err)?,
        timezone: row.try_get("timezone").map_err(get_err)?,
        journey_phase: parse_column::<JourneyPhase>(&phase, "user")?,
        subscribed: row.try_get("subscribed").map_err(get_err)?,
        consent: Consent {
            emergency: row.try_get("consent_emergency").map_err(get_err)?,
            marketing: row.try_get("consent_marketing").map_err(get_err)?,
        },
        emergency_contact,
        total_interaction_count: row.try_get("total_interaction_count").map_err(get_err)?,
        conversation_start_at: row.try_get("conversation_start_at").map_err(get_err)?,
        thread_id: row.try_get("thread_id").map_err(get_err)?,
        recent_messages: serde_json::from_str(&ring)?,
        awaiting_followup,
    })
}

/// Keep only the newest `limit` entries.
fn trim_ring(ring: &mut Vec<RecentMessage>, limit: usize) {
    if ring.len() > limit {
        let excess = ring.len() - limit;
        ring.drain(..excess);
    }
}

impl Store {
    /// Insert a user, or update the profile fields of an existing one.
    ///
    /// Conversation state (ring, counters, thread, follow-up marker) is only
    /// written on first insert; afterwards intake owns it.
    pub async fn upsert_user(&self, user: &User, now: i64) -> Result<(), HavenError> {
        let contact = user.emergency_contact.clone().unwrap_or_default();
        let mut ring = user.recent_messages.clone();
        trim_ring(&mut ring, self.recent_message_limit);
        let ring_json = serde_json::to_string(&ring)?;

        sqlx::query(
            "INSERT INTO users \
             (id, first_name, phone_number, email, timezone, journey_phase, subscribed, \
              consent_emergency, consent_marketing, emergency_contact_name, \
              emergency_contact_email, total_interaction_count, conversation_start_at, \
              thread_id, recent_messages, awaiting_followup_alert, awaiting_followup_stage, \
              created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
               first_name = excluded.first_name, \
               phone_number = excluded.phone_number, \
               email = excluded.email, \
               timezone = excluded.timezone, \
               journey_phase = excluded.journey_phase, \
               subscribed = excluded.subscribed, \
               consent_emergency = excluded.consent_emergency, \
               consent_marketing = excluded.consent_marketing, \
               emergency_contact_name = excluded.emergency_contact_name, \
               emergency_contact_email = excluded.emergency_contact_email, \
               updated_at = excluded.updated_at",
        )
        .bind(&user.id)
        .bind(&user.first_name)
        .bind(&user.phone_number)
        .bind(&user.email)
        .bind(&user.timezone)
        .bind(user.journey_phase.as_str())
        .bind(user.subscribed)
        .bind(user.consent.emergency)
        .bind(user.consent.marketing)
        .bind(&contact.name)
        .bind(&contact.email)
        .bind(user.total_interaction_count)
        .bind(user.conversation_start_at)
        .bind(&user.thread_id)
        .bind(&ring_json)
        .bind(user.awaiting_followup.as_ref().map(|a| a.alert_id.clone()))
        .bind(user.awaiting_followup.as_ref().map(|a| a.stage.as_str()))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| HavenError::Memory(format!("upsert user failed: {e}")))?;

        Ok(())
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<User>, HavenError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| HavenError::Memory(format!("get user failed: {e}")))?;

        row.as_ref().map(user_from_row).transpose()
    }

    /// All users in the `active` journey phase.
    pub async fn list_active_users(&self) -> Result<Vec<User>, HavenError> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE journey_phase = 'active' ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HavenError::Memory(format!("list active users failed: {e}")))?;

        // One undecodable row must not hide every other user from the watchers.
        Ok(rows
            .iter()
            .filter_map(|row| match user_from_row(row) {
                Ok(user) => Some(user),
                Err(e) => {
                    let id: String = row.try_get("id").unwrap_or_default();
                    warn!("memory: skipping unreadable user {id}: {e}");
                    None
                }
            })
            .collect())
    }

    /// Record an inbound message: append it to the ring, bump the interaction
    /// count, start the conversation clock and assign a thread on first contact.
    ///
    /// Returns the updated user, or `None` if the user does not exist.
    pub async fn record_inbound(
        &self,
        user_id: &str,
        text: &str,
        now: i64,
    ) -> Result<Option<User>, HavenError> {
        self.mutate_ring(user_id, RecentMessage::inbound(text, now), true, now)
            .await
    }

    /// Append a message to the ring without counting it as an interaction.
    pub async fn append_recent_message(
        &self,
        user_id: &str,
        message: RecentMessage,
        now: i64,
    ) -> Result<Option<User>, HavenError> {
        self.mutate_ring(user_id, message, false, now).await
    }

    async fn mutate_ring(
        &self,
        user_id: &str,
        message: RecentMessage,
        inbound: bool,
        now: i64,
    ) -> Result<Option<User>, HavenError> {
        // Read-then-write: take the write lock at BEGIN so concurrent
        // writers queue on the busy timeout instead of failing the upgrade.
        let mut tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(|e| HavenError::Memory(format!("begin ring update failed: {e}")))?;

        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| HavenError::Memory(format!("ring read failed: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut user = user_from_row(&row)?;

        user.recent_messages.push(message);
        trim_ring(&mut user.recent_messages, self.recent_message_limit);
        if inbound {
            user.total_interaction_count += 1;
            if user.conversation_start_at.is_none() {
                user.conversation_start_at = Some(now);
            }
            if user.thread_id.is_none() {
                user.thread_id = Some(Uuid::new_v4().to_string());
            }
        }

        sqlx::query(
            "UPDATE users SET recent_messages = ?, total_interaction_count = ?, \
             conversation_start_at = ?, thread_id = ?, updated_at = ? WHERE id = ?",
        )
        .bind(serde_json::to_string(&user.recent_messages)?)
        .bind(user.total_interaction_count)
        .bind(user.conversation_start_at)
        .bind(&user.thread_id)
        .bind(now)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| HavenError::Memory(format!("ring update failed: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| HavenError::Memory(format!("commit ring update failed: {e}")))?;

        Ok(Some(user))
    }

    /// Mark the user as awaiting an answer to a follow-up check-in.
    pub async fn set_awaiting_followup(
        &self,
        user_id: &str,
        marker: &AwaitingFollowUp,
        now: i64,
    ) -> Result<(), HavenError> {
        sqlx::query(
            "UPDATE users SET awaiting_followup_alert = ?, awaiting_followup_stage = ?, \
             updated_at = ? WHERE id = ?",
        )
        .bind(&marker.alert_id)
        .bind(marker.stage.as_str())
        .bind(now)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| HavenError::Memory(format!("set awaiting followup failed: {e}")))?;
        Ok(())
    }

    pub async fn clear_awaiting_followup(&self, user_id: &str, now: i64) -> Result<(), HavenError> {
        sqlx::query(
            "UPDATE users SET awaiting_followup_alert = NULL, awaiting_followup_stage = NULL, \
             updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| HavenError::Memory(format!("clear awaiting followup failed: {e}")))?;
        Ok(())
    }
}
