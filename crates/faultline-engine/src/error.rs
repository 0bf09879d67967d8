//! Error types for the pipeline domain.

use faultline_core::RunId;

/// The result type used throughout faultline-engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid argument was provided (out-of-range parameter, missing
    /// run identity). Surfaced to the caller, never swallowed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A required resource was unavailable at start (store unreachable,
    /// descriptor insert failed). Suppresses all start-side effects.
    #[error("resource error: {message}")]
    Resource {
        /// Description of the resource failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A run was not found in the store.
    #[error("run not found: {run_id}")]
    RunNotFound {
        /// The run id that was looked up.
        run_id: RunId,
    },

    /// An error from faultline-core.
    #[error("core error: {0}")]
    Core(#[from] faultline_core::Error),
}

impl Error {
    /// Creates a new invalid-argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Creates a new resource error.
    #[must_use]
    pub fn resource(message: impl Into<String>) -> Self {
        Self::Resource {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new resource error with a source cause.
    #[must_use]
    pub fn resource_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Resource {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// True when the error is a caller-side validation failure.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_) | Self::Core(faultline_core::Error::InvalidArgument(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn invalid_argument_display() {
        let err = Error::invalid_argument("rate must be >= shards");
        assert_eq!(err.to_string(), "invalid argument: rate must be >= shards");
        assert!(err.is_validation());
    }

    #[test]
    fn storage_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = Error::storage_with_source("insert failed", source);
        assert!(err.to_string().contains("storage error"));
        assert!(StdError::source(&err).is_some());
        assert!(!err.is_validation());
    }

    #[test]
    fn core_errors_convert() {
        let err: Error = faultline_core::Error::invalid_argument("bad seed").into();
        assert!(err.is_validation());
    }
}
