//! Wellness score time series.

use super::{json_ids, Store};
use haven_core::{error::HavenError, model::WellnessScore};
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

impl Store {
    /// Append one assessment result.
    pub async fn record_wellness_score(&self, score: &WellnessScore) -> Result<String, HavenError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO wellness_scores \
             (id, user_id, overall_score, band, pressure_zones, recorded_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&score.user_id)
        .bind(score.overall_score)
        .bind(&score.band)
        .bind(serde_json::to_string(&score.pressure_zones)?)
        .bind(score.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| HavenError::Memory(format!("record wellness score failed: {e}")))?;
        Ok(id)
    }

    /// The `per_user` most recent scores of every listed user, oldest first,
    /// loaded with one windowed query. Users without scores are absent.
    pub async fn latest_wellness_scores(
        &self,
        user_ids: &[String],
        per_user: i64,
    ) -> Result<HashMap<String, Vec<WellnessScore>>, HavenError> {
        if user_ids.is_empty() || per_user <= 0 {
            return Ok(HashMap::new());
        }

        let rows: Vec<(String, f64, String, String, i64)> = sqlx::query_as(
            "SELECT user_id, overall_score, band, pressure_zones, recorded_at FROM ( \
                 SELECT user_id, overall_score, band, pressure_zones, recorded_at, \
                        ROW_NUMBER() OVER ( \
                            PARTITION BY user_id ORDER BY recorded_at DESC, rowid DESC \
                        ) AS rn \
                 FROM wellness_scores \
                 WHERE user_id IN (SELECT value FROM json_each(?)) \
             ) WHERE rn <= ? \
             ORDER BY user_id, rn DESC",
        )
        .bind(json_ids(user_ids)?)
        .bind(per_user)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HavenError::Memory(format!("latest wellness scores failed: {e}")))?;

        let mut by_user: HashMap<String, Vec<WellnessScore>> = HashMap::new();
        for (user_id, overall_score, band, zones, recorded_at) in rows {
            let pressure_zones = match serde_json::from_str(&zones) {
                Ok(zones) => zones,
                Err(e) => {
                    warn!("memory: skipping wellness score for {user_id} at {recorded_at}: {e}");
                    continue;
                }
            };
            by_user
                .entry(user_id.clone())
                .or_default()
                .push(WellnessScore {
                    user_id,
                    overall_score,
                    band,
                    pressure_zones,
                    recorded_at,
                });
        }
        Ok(by_user)
    }
}
