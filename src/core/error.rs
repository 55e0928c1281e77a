//! Error types and handling for the exposed model
//!
//! Every store, codec and transport failure is reported through the single
//! [`Error`] enum below. Store errors carry the key they were raised for so
//! that the transport layer can surface them to the remote party verbatim.

use thiserror::Error;

/// Main result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the exposed model
#[derive(Error, Debug)]
pub enum Error {
    /// An element with this key already exists
    #[error("Element already exists: {key}")]
    DuplicateKey {
        /// Key that was added twice
        key: String,
    },

    /// No element with this key exists
    #[error("Unknown element: {key}")]
    UnknownKey {
        /// Key that was looked up
        key: String,
    },

    /// The supplied value has a different type than the stored element
    #[error("Type mismatch for '{key}': expected {expected}, got {actual}")]
    TypeMismatch {
        /// Element key
        key: String,
        /// Type of the stored element
        expected: String,
        /// Type of the rejected value
        actual: String,
    },

    /// The supplied value falls outside the element's constraint
    #[error("Constraint violation for '{key}': {reason}")]
    ConstraintViolation {
        /// Element key
        key: String,
        /// Human-readable description of the violated bound
        reason: String,
    },

    /// An enumerated element was created with a value outside its allowed set
    #[error("Value {value} for '{key}' is not in the allowed set")]
    ValueNotInRestriction {
        /// Element key
        key: String,
        /// Rendered rejected value
        value: String,
    },

    /// The document could not be parsed at all
    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    /// A single state entry of a document could not be applied
    #[error("Malformed update for '{key}': {reason}")]
    MalformedUpdate {
        /// Element key named by the entry
        key: String,
        /// What was wrong with the entry
        reason: String,
    },

    /// The document's declared shape for a key disagrees with the store
    #[error("Schema mismatch for '{key}': document declares {declared}, store holds {known}")]
    SchemaMismatch {
        /// Element key
        key: String,
        /// Shape declared by the document
        declared: String,
        /// Shape known to the store
        known: String,
    },

    /// The store was touched from inside a listener callback on the dispatching thread
    #[error("Re-entrant model access from a listener callback")]
    ReentrantAccess,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors from std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Prometheus metrics errors
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedDocument(err.to_string())
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a malformed document error
    pub fn malformed_document(msg: impl Into<String>) -> Self {
        Self::MalformedDocument(msg.into())
    }

    /// Create a malformed update error for one document entry
    pub fn malformed_update(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedUpdate {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create an unknown key error
    pub fn unknown_key(key: impl Into<String>) -> Self {
        Self::UnknownKey { key: key.into() }
    }

    /// Create a constraint violation error
    pub fn constraint_violation(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Key the error was raised for, if any
    pub fn key(&self) -> Option<&str> {
        match self {
            Error::DuplicateKey { key }
            | Error::UnknownKey { key }
            | Error::TypeMismatch { key, .. }
            | Error::ConstraintViolation { key, .. }
            | Error::ValueNotInRestriction { key, .. }
            | Error::MalformedUpdate { key, .. }
            | Error::SchemaMismatch { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Check if this is a client error (4xx equivalent)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::DuplicateKey { .. }
                | Error::UnknownKey { .. }
                | Error::TypeMismatch { .. }
                | Error::ConstraintViolation { .. }
                | Error::ValueNotInRestriction { .. }
                | Error::MalformedDocument(_)
                | Error::MalformedUpdate { .. }
                | Error::SchemaMismatch { .. }
        )
    }

    /// Check if the request was well-formed but conflicts with the stored state
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::DuplicateKey { .. }
                | Error::TypeMismatch { .. }
                | Error::ConstraintViolation { .. }
                | Error::ValueNotInRestriction { .. }
                | Error::SchemaMismatch { .. }
        )
    }

    /// Check if this is a server error (5xx equivalent)
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err = Error::DuplicateKey { key: "isovalue".into() };
        assert!(err.is_client_error());
        assert!(err.is_conflict());
        assert_eq!(err.key(), Some("isovalue"));

        let err = Error::malformed_document("unexpected end of input");
        assert!(err.is_client_error());
        assert!(!err.is_conflict());
        assert_eq!(err.key(), None);

        assert!(Error::ReentrantAccess.is_server_error());
        assert!(Error::config("bad").is_server_error());
    }

    #[test]
    fn test_json_error_becomes_malformed_document() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::MalformedDocument(_)));
    }

    #[test]
    fn test_error_messages_name_the_key() {
        let err = Error::TypeMismatch {
            key: "timestep".into(),
            expected: "integer".into(),
            actual: "float".into(),
        };
        assert_eq!(
            err.to_string(),
            "Type mismatch for 'timestep': expected integer, got float"
        );
    }
}
