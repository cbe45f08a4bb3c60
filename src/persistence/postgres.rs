//! PostgreSQL implementation of the snapshot store.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::models::SnapshotRow;
use crate::config::RegistryConfig;
use crate::domain::RegistrySnapshot;
use crate::error::RegistryError;

/// PostgreSQL-backed snapshot store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
    cleanup_after_days: u64,
}

impl PostgresPersistence {
    /// Creates a store over an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool, cleanup_after_days: u64) -> Self {
        Self {
            pool,
            cleanup_after_days,
        }
    }

    /// Opens a pool from the database settings in `config` and applies the
    /// bundled migrations.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Persistence`] if the database is unreachable
    /// or a migration fails.
    pub async fn connect(config: &RegistryConfig) -> Result<Self, RegistryError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
            .connect(&config.database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!(
            max_connections = config.database_max_connections,
            "connected snapshot store to postgres"
        );
        Ok(Self::new(pool, config.cleanup_after_days))
    }

    /// Appends a registry snapshot and prunes expired ones.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError::Persistence`] on database failure.
    pub async fn save_snapshot(&self, snapshot: &RegistrySnapshot) -> Result<i64, RegistryError> {
        let payload = serde_json::to_value(snapshot)
            .map_err(|e| RegistryError::Persistence(e.to_string()))?;
        let core_count = i32::try_from(snapshot.cores.len()).unwrap_or(i32::MAX);

        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO core_snapshots (core_count, snapshot, snapshot_at) \
             VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(core_count)
        .bind(payload)
        .bind(snapshot.taken_at)
        .fetch_one(&self.pool)
        .await?;

        if self.cleanup_after_days > 0 {
            let deleted = self.delete_old_snapshots(self.cleanup_after_days).await?;
            if deleted > 0 {
                tracing::debug!(deleted, "pruned expired core snapshots");
            }
        }
        Ok(id)
    }

    /// Loads the most recent snapshot row, if any.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError::Persistence`] on database failure.
    pub async fn load_latest_row(&self) -> Result<Option<SnapshotRow>, RegistryError> {
        let row = sqlx::query_as::<_, (i64, i32, serde_json::Value, DateTime<Utc>)>(
            "SELECT id, core_count, snapshot, snapshot_at FROM core_snapshots \
             ORDER BY snapshot_at DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, core_count, snapshot, snapshot_at)| SnapshotRow {
            id,
            core_count,
            snapshot,
            snapshot_at,
        }))
    }

    /// Loads and decodes the most recent snapshot.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError::Persistence`] on database failure or if
    /// the stored payload cannot be decoded.
    pub async fn load_latest_snapshot(&self) -> Result<Option<RegistrySnapshot>, RegistryError> {
        self.load_latest_row()
            .await?
            .map(SnapshotRow::decode)
            .transpose()
    }

    /// Deletes snapshots older than the given number of days.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError::Persistence`] on database failure.
    pub async fn delete_old_snapshots(&self, before_days: u64) -> Result<u64, RegistryError> {
        let cutoff = i64::try_from(before_days)
            .ok()
            .and_then(chrono::Duration::try_days)
            .and_then(|age| Utc::now().checked_sub_signed(age));
        let Some(cutoff) = cutoff else {
            return Ok(0);
        };

        let result = sqlx::query("DELETE FROM core_snapshots WHERE snapshot_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
