//! Error types for pack-exec
//!
//! All modules use `PackResult<T>` as their return type.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pack-exec operations
pub type PackResult<T> = Result<T, PackError>;

/// Pre-start container operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    CopyIn,
    WriteFile,
    EnsureAccess,
    CopyOut,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CopyIn => write!(f, "copy-in"),
            Self::WriteFile => write!(f, "write-file"),
            Self::EnsureAccess => write!(f, "ensure-access"),
            Self::CopyOut => write!(f, "copy-out"),
        }
    }
}

/// All errors that can occur while running lifecycle phases
#[derive(Error, Debug)]
pub enum PackError {
    // Negotiation errors
    #[error("Builder platform API versions {builder:?} are not supported by this tool (supports {supported:?})")]
    NoSupportedPlatformApi {
        builder: Vec<String>,
        supported: Vec<String>,
    },

    #[error("Invalid API version '{0}'")]
    InvalidApiVersion(String),

    #[error("Failed to inspect builder {builder}: {reason}")]
    BuilderIntrospection { builder: String, reason: String },

    // Reference errors
    #[error("Invalid image reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("Invalid cache image name '{reference}': {reason}")]
    InvalidCacheImage { reference: String, reason: String },

    // Cache errors
    #[error("Failed to prepare {name} cache: {reason}")]
    CachePrepare { name: String, reason: String },

    #[error("Failed to clear cache {name}")]
    CacheClear {
        name: String,
        #[source]
        source: Box<PackError>,
    },

    #[error("Invalid cache options: {0}")]
    InvalidCacheOptions(String),

    // Phase container errors
    #[error("failed to create '{phase}' container")]
    ContainerCreate {
        phase: String,
        #[source]
        source: Box<PackError>,
    },

    #[error("failed to start '{phase}' container")]
    ContainerStart {
        phase: String,
        #[source]
        source: Box<PackError>,
    },

    #[error("failed to attach to '{phase}' container")]
    ContainerAttach {
        phase: String,
        #[source]
        source: Box<PackError>,
    },

    #[error("failed to wait for '{phase}' container")]
    ContainerWait {
        phase: String,
        #[source]
        source: Box<PackError>,
    },

    #[error("failed to remove '{phase}' container")]
    ContainerRemove {
        phase: String,
        #[source]
        source: Box<PackError>,
    },

    #[error("{kind} operation failed: {reason}")]
    Operation { kind: OperationKind, reason: String },

    #[error("{phase} failed with status code: {code}")]
    PhaseFailed { phase: String, code: i64 },

    #[error("{phase} cancelled")]
    Cancelled { phase: String },

    #[error("Cleanup failed: {0}")]
    Cleanup(String),

    #[error("{error} (cleanup also failed: {cleanup})")]
    WithCleanup {
        #[source]
        error: Box<PackError>,
        cleanup: Box<PackError>,
    },

    // Credential errors
    #[error("Registry credentials for {registry}: {reason}")]
    Auth { registry: String, reason: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Archive error: {context}: {reason}")]
    Archive { context: String, reason: String },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl PackError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Create an archive error with context
    pub fn archive(context: impl Into<String>, reason: impl ToString) -> Self {
        Self::Archive {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an invalid reference error
    pub fn invalid_reference(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    pub fn operation(kind: OperationKind, reason: impl ToString) -> Self {
        Self::Operation {
            kind,
            reason: reason.to_string(),
        }
    }

    pub fn container_create(phase: impl Into<String>, source: PackError) -> Self {
        Self::ContainerCreate {
            phase: phase.into(),
            source: Box::new(source),
        }
    }

    pub fn container_start(phase: impl Into<String>, source: PackError) -> Self {
        Self::ContainerStart {
            phase: phase.into(),
            source: Box::new(source),
        }
    }

    pub fn container_attach(phase: impl Into<String>, source: PackError) -> Self {
        Self::ContainerAttach {
            phase: phase.into(),
            source: Box::new(source),
        }
    }

    pub fn container_wait(phase: impl Into<String>, source: PackError) -> Self {
        Self::ContainerWait {
            phase: phase.into(),
            source: Box::new(source),
        }
    }

    pub fn container_remove(phase: impl Into<String>, source: PackError) -> Self {
        Self::ContainerRemove {
            phase: phase.into(),
            source: Box::new(source),
        }
    }

    /// Combine a run outcome with a cleanup outcome.
    ///
    /// A run error always wins; a cleanup error is only returned on its own
    /// when the run succeeded.
    pub fn merge(run: PackResult<()>, cleanup: PackResult<()>) -> PackResult<()> {
        match (run, cleanup) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(cleanup)) => Err(cleanup),
            (Err(error), Ok(())) => Err(error),
            (Err(error), Err(cleanup)) => Err(Self::WithCleanup {
                error: Box::new(error),
                cleanup: Box::new(cleanup),
            }),
        }
    }

    /// The error that caused the run to fail, ignoring secondary cleanup failures
    pub fn primary(&self) -> &PackError {
        match self {
            Self::WithCleanup { error, .. } => error.primary(),
            other => other,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.primary(),
            Self::ContainerStart { .. } | Self::ContainerAttach { .. } | Self::Cleanup(_)
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self.primary() {
            Self::NoSupportedPlatformApi { .. } => {
                Some("Use a newer builder, or upgrade pack-exec to support older lifecycles")
            }
            Self::CommandFailed { .. } => Some("Is the docker CLI installed and on PATH?"),
            Self::InvalidCacheImage { .. } => {
                Some("Cache images must be fully qualified, e.g. registry.example.com/app-cache:build")
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = PackError::PhaseFailed {
            phase: "detector".to_string(),
            code: 7,
        };
        assert_eq!(err.to_string(), "detector failed with status code: 7");
    }

    #[test]
    fn operation_kind_in_message() {
        let err = PackError::operation(OperationKind::EnsureAccess, "chown exited 1");
        assert_eq!(
            err.to_string(),
            "ensure-access operation failed: chown exited 1"
        );
    }

    #[test]
    fn merge_prefers_run_error() {
        let run = Err(PackError::PhaseFailed {
            phase: "builder".to_string(),
            code: 51,
        });
        let cleanup = Err(PackError::Cleanup("volume in use".to_string()));

        let err = PackError::merge(run, cleanup).unwrap_err();
        assert!(matches!(err.primary(), PackError::PhaseFailed { code: 51, .. }));
        assert!(err.to_string().contains("builder failed with status code: 51"));
        assert!(err.to_string().contains("volume in use"));
    }

    #[test]
    fn merge_returns_cleanup_error_alone() {
        let err = PackError::merge(Ok(()), Err(PackError::Cleanup("busy".to_string())))
            .unwrap_err();
        assert!(matches!(err, PackError::Cleanup(_)));
        assert!(PackError::merge(Ok(()), Ok(())).is_ok());
    }

    #[test]
    fn error_hint() {
        let err = PackError::NoSupportedPlatformApi {
            builder: vec!["0.1".to_string()],
            supported: vec!["0.3".to_string()],
        };
        assert!(err.hint().is_some());
        assert_eq!(PackError::User("x".to_string()).hint(), None);
    }

    #[test]
    fn error_retryable() {
        let start = PackError::container_start("detector", PackError::Internal("x".into()));
        assert!(start.is_retryable());
        assert!(!PackError::PhaseFailed {
            phase: "builder".to_string(),
            code: 1
        }
        .is_retryable());
    }
}
