//! Persistence layer: durable registry snapshots.
//!
//! [`PersistenceBackend`] selects where [`RegistrySnapshot`]s go: a JSON
//! file replaced atomically, the `core_snapshots` table in PostgreSQL via
//! `sqlx::PgPool`, or nowhere. Both stores can hand back the latest
//! snapshot so a restarted process can re-register its cores.

pub mod json_file;
pub mod models;
pub mod postgres;

pub use json_file::JsonFilePersistence;
pub use postgres::PostgresPersistence;

use crate::config::{PersistenceKind, RegistryConfig};
use crate::domain::RegistrySnapshot;
use crate::error::RegistryError;

/// Configured snapshot store.
#[derive(Debug, Clone)]
pub enum PersistenceBackend {
    /// Snapshots are dropped.
    Disabled,
    /// One JSON file.
    JsonFile(JsonFilePersistence),
    /// PostgreSQL `core_snapshots` table.
    Postgres(PostgresPersistence),
}

impl PersistenceBackend {
    /// Builds the backend selected by `config`, connecting to PostgreSQL if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Persistence`] if the PostgreSQL store cannot
    /// be reached or migrated.
    pub async fn from_config(config: &RegistryConfig) -> Result<Self, RegistryError> {
        if !config.persistence_enabled {
            return Ok(Self::Disabled);
        }
        match config.persistence_backend {
            PersistenceKind::File => Ok(Self::JsonFile(JsonFilePersistence::new(
                config.persistence_file.clone(),
            ))),
            PersistenceKind::Postgres => {
                Ok(Self::Postgres(PostgresPersistence::connect(config).await?))
            }
        }
    }

    /// Returns `false` for [`PersistenceBackend::Disabled`].
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    /// Writes `snapshot` to the store.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Persistence`] on storage failure.
    pub async fn persist(&self, snapshot: &RegistrySnapshot) -> Result<(), RegistryError> {
        match self {
            Self::Disabled => Ok(()),
            Self::JsonFile(store) => store.save(snapshot).await,
            Self::Postgres(store) => store.save_snapshot(snapshot).await.map(|_| ()),
        }
    }

    /// Reads the most recent snapshot, if one was stored.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Persistence`] on storage failure or an
    /// undecodable snapshot.
    pub async fn load_latest(&self) -> Result<Option<RegistrySnapshot>, RegistryError> {
        match self {
            Self::Disabled => Ok(None),
            Self::JsonFile(store) => store.load().await,
            Self::Postgres(store) => store.load_latest_snapshot().await,
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;

    #[tokio::test]
    async fn disabled_backend_stores_nothing() {
        let Ok(backend) = PersistenceBackend::from_config(&RegistryConfig::default()).await else {
            panic!("disabled backend needs no connection");
        };
        assert!(!backend.is_enabled());
        let snapshot = RegistrySnapshot {
            cores: Vec::new(),
            attributes: BTreeMap::new(),
            taken_at: Utc::now(),
        };
        assert!(backend.persist(&snapshot).await.is_ok());
        assert!(matches!(backend.load_latest().await, Ok(None)));
    }

    #[tokio::test]
    async fn file_backend_is_selected_by_config() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let config = RegistryConfig {
            persistence_enabled: true,
            persistence_file: dir.path().join("snap.json"),
            ..RegistryConfig::default()
        };
        let Ok(PersistenceBackend::JsonFile(store)) = PersistenceBackend::from_config(&config).await
        else {
            panic!("expected the file backend");
        };
        assert_eq!(store.path(), dir.path().join("snap.json"));
    }
}
