//! SQLite-backed persistent store.
//!
//! Split into focused submodules:
//! - `users`: caregiver profiles, the recent-message ring, follow-up markers
//! - `alerts`: compare-and-insert alerts and the batched dedup lookup
//! - `wellness`: score time series and the batched latest-N window query
//! - `jobs`: durable delayed jobs with key-based identity and retry
//! - `escalations`: persisted step cursor per crisis event
//! - `feedback`: follow-up answers
//! - `inbound`: inbound receipts for idempotent intake

mod alerts;
mod escalations;
mod feedback;
mod inbound;
mod jobs;
mod users;
mod wellness;

pub use alerts::InsertedAlert;
pub use inbound::InboundReceipt;
pub use jobs::{Job, JobStatus, NewJob};

use haven_core::{config::MemoryConfig, config::shellexpand, error::HavenError};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// How long a writer waits for the database lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Persistent store backed by SQLite.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    recent_message_limit: usize,
}

impl Store {
    /// Create a new store, running migrations on first use.
    pub async fn new(config: &MemoryConfig) -> Result<Self, HavenError> {
        let db_path = shellexpand(&config.db_path);

        // Ensure parent directory exists.
        if let Some(parent) = std::path::Path::new(&db_path).parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| HavenError::Memory(format!("failed to create data dir: {e}")))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))
            .map_err(|e| HavenError::Memory(format!("invalid db path: {e}")))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| HavenError::Memory(format!("failed to connect to sqlite: {e}")))?;

        Self::run_migrations(&pool).await?;

        info!("Store initialized at {db_path}");

        Ok(Self {
            pool,
            recent_message_limit: config.recent_message_limit.max(1),
        })
    }

    /// In-memory store with migrations applied. A single connection keeps
    /// every query on the same database.
    pub async fn open_in_memory(recent_message_limit: usize) -> Result<Self, HavenError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| HavenError::Memory(format!("invalid db path: {e}")))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .map_err(|e| HavenError::Memory(format!("failed to open in-memory sqlite: {e}")))?;
        Self::run_migrations(&pool).await?;
        Ok(Self {
            pool,
            recent_message_limit: recent_message_limit.max(1),
        })
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run SQL migrations, tracking which have already been applied.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), HavenError> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS _migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )
        .execute(pool)
        .await
        .map_err(|e| HavenError::Memory(format!("failed to create migrations table: {e}")))?;

        let migrations: &[(&str, &str)] = &[
            ("001_users", include_str!("../../migrations/001_users.sql")),
            ("002_alerts", include_str!("../../migrations/002_alerts.sql")),
            (
                "003_wellness_scores",
                include_str!("../../migrations/003_wellness_scores.sql"),
            ),
            (
                "004_jobs_escalations",
                include_str!("../../migrations/004_jobs_escalations.sql"),
            ),
            (
                "005_feedback_receipts",
                include_str!("../../migrations/005_feedback_receipts.sql"),
            ),
            (
                "006_audit_log",
                include_str!("../../migrations/006_audit_log.sql"),
            ),
        ];

        for (name, sql) in migrations {
            let applied: Option<(String,)> =
                sqlx::query_as("SELECT name FROM _migrations WHERE name = ?")
                    .bind(name)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        HavenError::Memory(format!("failed to check migration {name}: {e}"))
                    })?;

            if applied.is_some() {
                continue;
            }

            sqlx::raw_sql(sql)
                .execute(pool)
                .await
                .map_err(|e| HavenError::Memory(format!("migration {name} failed: {e}")))?;

            sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
                .bind(name)
                .execute(pool)
                .await
                .map_err(|e| {
                    HavenError::Memory(format!("failed to record migration {name}: {e}"))
                })?;
        }
        Ok(())
    }
}

/// Parse a stored enum column, reporting the table on failure.
pub(crate) fn parse_column<T>(value: &str, what: &str) -> Result<T, HavenError>
where
    T: FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e| HavenError::Memory(format!("corrupt {what} row: {e}")))
}

/// Encode a list of ids as a JSON array for `json_each(?)` batch binds.
pub(crate) fn json_ids(ids: &[String]) -> Result<String, HavenError> {
    Ok(serde_json::to_string(ids)?)
}
