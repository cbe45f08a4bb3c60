//! Registry error types.
//!
//! [`RegistryError`] is the central error type for lifecycle operations.
//! Each variant carries a stable numeric code and a coarse [`ErrorKind`] so
//! callers can tell "not there" from "try later" without matching on
//! every variant. [`CoreError`] is what external collaborators (loaders,
//! cores, notifiers) report back to the registry.

use std::path::PathBuf;

/// Coarse classification of a [`RegistryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A name was absent where presence was required.
    NotFound,
    /// A name or data directory is already taken.
    Conflict,
    /// The registry cannot serve the request right now (shutdown).
    Unavailable,
    /// Request or configuration validation failed.
    Validation,
    /// An external resource failed to open or close.
    Resource,
    /// Persistence or internal bookkeeping failure.
    Internal,
}

/// Error reported by an external collaborator.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Filesystem failure while opening or closing a resource.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The resource is held by another owner.
    #[error("resource is locked: {0}")]
    Locked(PathBuf),

    /// The descriptor cannot be turned into a working resource.
    #[error("invalid core configuration: {0}")]
    Config(String),

    /// Any other collaborator failure.
    #[error("{0}")]
    Other(String),
}

/// Error enum for every registry and service operation.
///
/// # Error Code Ranges
///
/// | Range     | Category        |
/// |-----------|-----------------|
/// | 1000–1999 | Validation      |
/// | 2000–2999 | State/Not Found |
/// | 3000–3999 | Server/Resource |
/// | 5000–5999 | Unavailable     |
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No core or descriptor is registered under the name.
    #[error("no such core: {0}")]
    CoreNotFound(String),

    /// The target name is already in use.
    #[error("core already exists: {0}")]
    CoreExists(String),

    /// Another core already stores its data in the same directory.
    #[error("data directory {} is already used by core {owner}", path.display())]
    DataDirInUse {
        /// The contested data directory.
        path: PathBuf,
        /// Name of the core that owns it.
        owner: String,
    },

    /// The registry is shutting down and refuses new work.
    #[error("registry is shutting down")]
    ShuttingDown,

    /// The loader failed to open a core.
    #[error("failed to open core {name}: {source}")]
    Open {
        /// Name of the core being opened.
        name: String,
        /// Collaborator failure.
        #[source]
        source: CoreError,
    },

    /// A core failed to release its resources.
    #[error("failed to close core {name}: {source}")]
    Close {
        /// Name of the core being closed.
        name: String,
        /// Collaborator failure.
        #[source]
        source: CoreError,
    },

    /// Snapshot storage failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RegistryError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidConfig(_) => 1001,
            Self::CoreNotFound(_) => 2001,
            Self::CoreExists(_) => 2002,
            Self::DataDirInUse { .. } => 2003,
            Self::Internal(_) => 3000,
            Self::Persistence(_) => 3001,
            Self::Open { .. } => 3002,
            Self::Close { .. } => 3003,
            Self::ShuttingDown => 5001,
        }
    }

    /// Returns the coarse kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::CoreNotFound(_) => ErrorKind::NotFound,
            Self::CoreExists(_) | Self::DataDirInUse { .. } => ErrorKind::Conflict,
            Self::ShuttingDown => ErrorKind::Unavailable,
            Self::InvalidConfig(_) => ErrorKind::Validation,
            Self::Open { .. } | Self::Close { .. } => ErrorKind::Resource,
            Self::Persistence(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns `true` when the caller may retry the same request later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Unavailable)
    }
}

impl From<sqlx::Error> for RegistryError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for RegistryError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_ranges() {
        assert_eq!(RegistryError::CoreNotFound("a".into()).error_code(), 2001);
        assert_eq!(RegistryError::ShuttingDown.error_code(), 5001);
        assert_eq!(RegistryError::InvalidConfig("x".into()).error_code(), 1001);
    }

    #[test]
    fn shutdown_is_retryable_not_found_is_not() {
        assert!(RegistryError::ShuttingDown.is_retryable());
        assert!(!RegistryError::CoreNotFound("a".into()).is_retryable());
        assert_eq!(
            RegistryError::CoreNotFound("a".into()).kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn data_dir_message_names_owner() {
        let err = RegistryError::DataDirInUse {
            path: PathBuf::from("/var/cores/a/data"),
            owner: "a".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/var/cores/a/data"));
        assert!(msg.contains("core a"));
    }

    #[test]
    fn close_error_keeps_source() {
        let err = RegistryError::Close {
            name: "a".to_string(),
            source: CoreError::Other("disk gone".to_string()),
        };
        assert_eq!(err.kind(), ErrorKind::Resource);
        assert!(std::error::Error::source(&err).is_some());
    }
}
