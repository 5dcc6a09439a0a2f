//! Batched alert dedup: one query loads every open alert key for the batch,
//! detectors check the in-memory index and only misses reach the store.

use haven_core::{
    error::HavenError,
    model::{Alert, AlertKey, AlertType, NewAlert},
};
use haven_memory::Store;
use std::collections::HashSet;
use tracing::debug;

pub(super) struct AlertIndex {
    open: HashSet<AlertKey>,
}

impl AlertIndex {
    pub(super) async fn load(
        store: &Store,
        user_ids: &[String],
        types: &[AlertType],
    ) -> Result<Self, HavenError> {
        let open = store.unresolved_alert_keys(user_ids, types).await?;
        debug!("watcher: {} open alerts for {} users", open.len(), user_ids.len());
        Ok(Self { open })
    }

    pub(super) fn contains(&self, key: &AlertKey) -> bool {
        self.open.contains(key)
    }

    /// Insert the alert unless an unresolved one with the same key exists.
    ///
    /// Returns the new alert, or `None` when the index or the store's
    /// unique index already had one.
    pub(super) async fn raise(
        &mut self,
        store: &Store,
        alert: NewAlert,
    ) -> Result<Option<Alert>, HavenError> {
        let key = alert.key();
        if self.open.contains(&key) {
            return Ok(None);
        }
        let inserted = store.insert_alert_if_absent(&alert).await?;
        self.open.insert(key);
        Ok(inserted.created.then_some(inserted.alert))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haven_core::model::{AlertPattern, Severity};
    use serde_json::json;

    fn candidate(user_id: &str) -> NewAlert {
        NewAlert {
            user_id: user_id.into(),
            alert_type: AlertType::Disengagement,
            pattern: AlertPattern::SuddenDrop,
            severity: Severity::Medium,
            message: "drop".into(),
            context: json!({}),
            created_at: 1_000,
        }
    }

    #[tokio::test]
    async fn test_index_skips_known_keys_and_learns_new_ones() {
        let store = Store::open_in_memory(50).await.unwrap();
        store.insert_alert_if_absent(&candidate("u1")).await.unwrap();

        let ids = vec!["u1".to_string(), "u2".to_string()];
        let mut index = AlertIndex::load(&store, &ids, &[AlertType::Disengagement])
            .await
            .unwrap();
        assert!(index.contains(&candidate("u1").key()));
        assert!(!index.contains(&candidate("u2").key()));

        assert!(index.raise(&store, candidate("u1")).await.unwrap().is_none());
        assert!(index.raise(&store, candidate("u2")).await.unwrap().is_some());
        assert!(index.raise(&store, candidate("u2")).await.unwrap().is_none());
        assert!(index.contains(&candidate("u2").key()));
    }

    #[tokio::test]
    async fn test_store_constraint_catches_stale_index() {
        let store = Store::open_in_memory(50).await.unwrap();
        let mut index = AlertIndex::load(&store, &["u1".to_string()], &[AlertType::Disengagement])
            .await
            .unwrap();
        // Another writer gets there first.
        store.insert_alert_if_absent(&candidate("u1")).await.unwrap();
        assert!(index.raise(&store, candidate("u1")).await.unwrap().is_none());
    }
}
