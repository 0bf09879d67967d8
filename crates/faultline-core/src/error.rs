//! Error types and result aliases shared across faultline.

/// The result type used throughout the core crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid argument was provided by a caller.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The location catalog could not be loaded or validated.
    #[error("catalog error: {message}")]
    Catalog {
        /// Description of the catalog failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },
}

impl Error {
    /// Creates a new catalog error with the given message.
    #[must_use]
    pub fn catalog(message: impl Into<String>) -> Self {
        Self::Catalog {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new catalog error with a source cause.
    #[must_use]
    pub fn catalog_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Catalog {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new invalid-argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Creates a new serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }
}
