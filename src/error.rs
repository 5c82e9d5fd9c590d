use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort an operation.
///
/// Failures of a single file inside a batch run are not represented here;
/// they are recorded as [`crate::FileError`] in the run summary instead.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// A transformer configuration violates a field invariant.
    #[error("Invalid transformer field '{field}': {message}")]
    Validation {
        /// Name of the first offending field
        field: String,
        /// Error message
        message: String,
    },

    /// The run cannot start with the given configuration.
    #[error("Invalid configuration: {message}")]
    Configuration {
        /// Detailed error message
        message: String,
    },

    /// No transformer matches the given id or name.
    #[error("Transformer '{key}' not found")]
    NotFound {
        /// The id or name that was looked up
        key: String,
    },

    /// A transformer with the same id is already stored.
    #[error("Transformer with id '{id}' already exists")]
    AlreadyExists {
        /// The colliding id
        id: String,
    },

    /// IO error with context about the file path.
    #[error("IO error accessing '{path}': {message}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// JSON serialization error.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message
        message: String,
    },

    /// The completion provider rejected or failed the request.
    #[error("LLM request failed: {message}")]
    Gateway {
        /// Error message
        message: String,
    },

    /// The completion provider did not answer in time.
    #[error("LLM request timed out after {}s", after.as_secs_f64())]
    Timeout {
        /// Configured limit
        after: Duration,
    },

    /// Another run is still active.
    #[error("Transformer '{transformer}' is still running; stop it before starting another run")]
    RunInProgress {
        /// Name of the transformer owning the active run
        transformer: String,
    },
}

impl Error {
    /// Creates a validation error for a named field.
    #[must_use]
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a not found error.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates an already exists error.
    #[must_use]
    pub fn already_exists(id: impl Into<String>) -> Self {
        Self::AlreadyExists { id: id.into() }
    }

    /// Creates an IO error with path context.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: source.to_string(),
        }
    }

    /// Creates a gateway error.
    #[must_use]
    pub fn gateway(message: impl Into<String>) -> Self {
        Self::Gateway {
            message: message.into(),
        }
    }

    /// Returns true if this is an IO error.
    #[must_use]
    pub const fn is_io(&self) -> bool {
        matches!(self, Self::Io { .. })
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Returns true if this is a not found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if this is an already exists error.
    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::config("test message");
        assert!(err.is_config());
        assert!(err.to_string().contains("test message"));
    }

    #[test]
    fn test_validation_names_field() {
        let err = Error::validation("prompt", "must contain {{content}}");
        assert!(err.is_validation());
        assert!(err.to_string().contains("'prompt'"));
    }

    #[test]
    fn test_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::io("/tmp/test.txt", io_err);
        assert!(err.is_io());
        assert!(err.to_string().contains("/tmp/test.txt"));
    }

    #[test]
    fn test_timeout_display() {
        let err = Error::Timeout {
            after: Duration::from_millis(1500),
        };
        assert!(err.to_string().contains("1.5s"));
    }

    #[test]
    fn test_serialization_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(err.to_string().contains("Serialization error"));
    }
}
