use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the ops-pilot engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {source}")]
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("Invalid action manifest: {message}")]
    Manifest { message: String },

    #[error("Handler '{action}' failed: {message}")]
    Handler { action: String, message: String },

    #[error("{0}")]
    Other(String),
}

impl EngineError {
    /// Create a new IO error with path context
    pub fn io_error(err: std::io::Error, path: Option<impl Into<PathBuf>>) -> Self {
        Self::Io {
            source: err,
            path: path.map(|p| p.into()),
        }
    }

    /// Create a new configuration error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a new parse error
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Create a new manifest error
    pub fn manifest_error(message: impl Into<String>) -> Self {
        Self::Manifest {
            message: message.into(),
        }
    }

    /// Create a new handler error
    pub fn handler_error(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            action: action.into(),
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Whether this error must stop the engine before any trial runs
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidConfig { .. } | EngineError::Manifest { .. }
        )
    }
}

impl From<std::io::Error> for EngineError {
    fn from(error: std::io::Error) -> Self {
        EngineError::io_error(error, None::<PathBuf>)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(error: serde_json::Error) -> Self {
        EngineError::parse_error(error.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(error: toml::de::Error) -> Self {
        EngineError::parse_error(error.to_string())
    }
}

/// Result type alias using EngineError
pub type EngineResult<T> = Result<T, EngineError>;

/// Extension trait for converting errors to EngineError
pub trait ErrorExt<T> {
    /// Convert to EngineResult with added context
    fn with_context(self, message: impl AsRef<str>) -> EngineResult<T>;
}

impl<T, E: fmt::Display> ErrorExt<T> for Result<T, E> {
    fn with_context(self, message: impl AsRef<str>) -> EngineResult<T> {
        self.map_err(|e| EngineError::other(format!("{}: {}", message.as_ref(), e)))
    }
}

/// Contextual error mapping function
pub fn map_io_err<P: Into<PathBuf>>(path: P) -> impl FnOnce(std::io::Error) -> EngineError {
    let path = path.into();
    move |err| EngineError::io_error(err, Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_are_fatal() {
        assert!(EngineError::invalid_config("max_trials must be positive").is_fatal());
        assert!(EngineError::manifest_error("duplicate action").is_fatal());
        assert!(!EngineError::parse_error("bad json").is_fatal());
        assert!(!EngineError::handler_error("deploy_backend", "boom").is_fatal());
    }

    #[test]
    fn test_io_error_keeps_path() {
        let err = map_io_err("/tmp/q_table.json")(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "gone",
        ));
        match err {
            EngineError::Io { path, .. } => {
                assert_eq!(path, Some(PathBuf::from("/tmp/q_table.json")))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_with_context_prefixes_message() {
        let result: Result<(), String> = Err("disk full".to_string());
        let err = result.with_context("Failed to save Q-table").unwrap_err();
        assert_eq!(err.to_string(), "Failed to save Q-table: disk full");
    }
}
