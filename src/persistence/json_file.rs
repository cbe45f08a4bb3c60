//! Single-file JSON snapshot store.
//!
//! Every persist writes the whole snapshot to a sibling temporary file and
//! renames it over the target, so readers never observe a partial write.

use std::path::{Path, PathBuf};

use crate::domain::RegistrySnapshot;
use crate::error::RegistryError;

/// Snapshot store backed by one JSON file.
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    /// Creates a store writing to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Target file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Replaces the stored snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Persistence`] if the snapshot cannot be
    /// encoded or the file cannot be written.
    pub async fn save(&self, snapshot: &RegistrySnapshot) -> Result<(), RegistryError> {
        let bytes = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| RegistryError::Persistence(e.to_string()))?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("create directory for", parent, &e))?;
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, &bytes)
            .await
            .map_err(|e| io_error("write", &temp, &e))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| io_error("replace", &self.path, &e))?;

        tracing::debug!(
            path = %self.path.display(),
            cores = snapshot.cores.len(),
            "wrote registry snapshot"
        );
        Ok(())
    }

    /// Reads the stored snapshot. A missing file means nothing was persisted
    /// yet.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Persistence`] if the file exists but cannot
    /// be read or decoded.
    pub async fn load(&self) -> Result<Option<RegistrySnapshot>, RegistryError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("read", &self.path, &e)),
        };
        serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            RegistryError::Persistence(format!("{} is not a snapshot: {e}", self.path.display()))
        })
    }
}

fn io_error(action: &str, path: &Path, err: &std::io::Error) -> RegistryError {
    RegistryError::Persistence(format!("failed to {action} {}: {err}", path.display()))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;
    use crate::domain::{CoreDescriptor, PersistedCore};

    fn snapshot(names: &[&str]) -> RegistrySnapshot {
        RegistrySnapshot {
            cores: names
                .iter()
                .map(|name| PersistedCore {
                    orig_name: (*name).to_string(),
                    loaded: true,
                    descriptor: CoreDescriptor::new(*name, format!("/cores/{name}")),
                })
                .collect(),
            attributes: BTreeMap::new(),
            taken_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let store = JsonFilePersistence::new(dir.path().join("absent.json"));
        assert!(matches!(store.load().await, Ok(None)));
    }

    #[tokio::test]
    async fn save_replaces_previous_snapshot() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let store = JsonFilePersistence::new(dir.path().join("nested/cores.json"));

        assert!(store.save(&snapshot(&["a", "b"])).await.is_ok());
        assert!(store.save(&snapshot(&["c"])).await.is_ok());

        let Ok(Some(loaded)) = store.load().await else {
            panic!("snapshot should load");
        };
        assert_eq!(loaded.cores.len(), 1);
        assert!(loaded.by_orig_name("c").is_some());
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_persistence_error() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let path = dir.path().join("cores.json");
        assert!(tokio::fs::write(&path, b"{ not json").await.is_ok());

        let store = JsonFilePersistence::new(path);
        assert!(matches!(
            store.load().await,
            Err(RegistryError::Persistence(_))
        ));
    }
}
