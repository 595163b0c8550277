//! Error types for the synchronization engine.
//!
//! One enum covers every boundary: admission validation, store access,
//! attribute mapping and connector operations. Variants carry a
//! transient/permanent classification so callers can decide whether a retry
//! makes sense.

use thiserror::Error;

use crate::ids::ResourceId;

/// Error that can occur anywhere in the synchronization engine.
#[derive(Debug, Error)]
pub enum SyncError {
    // Admission errors (permanent, nothing is saved)
    /// Configuration was rejected at validation time.
    #[error("validation failed: {message}")]
    Validation { message: String },

    // Cardinality errors (caller errors, never retried)
    /// A filter matched no records where exactly one was expected.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// A filter matched more than one record where exactly one was expected.
    #[error("multiple found: {message}")]
    MultipleFound { message: String },

    // Mapping errors
    /// A required attribute could not be produced by the attribute map.
    #[error("attribute '{attribute}' not resolvable: {message}")]
    AttributeNotResolvable { attribute: String, message: String },

    // Connector errors
    /// A connector-native operation was rejected (retryable at the
    /// orchestrator's discretion).
    #[error("query failed: {message}")]
    Query {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Failed to establish a connection to an external system.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    // Store errors
    /// Optimistic version race on the resource store. The losing writer
    /// must re-read before retrying.
    #[error("conflict on resource {id}: expected version {expected_version}")]
    Conflict {
        id: ResourceId,
        expected_version: u64,
    },

    // Internal errors
    /// Internal error.
    #[error("internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl SyncError {
    /// Check if this error is transient and the operation may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::Query { .. } | SyncError::ConnectionFailed { .. } | SyncError::Conflict { .. }
        )
    }

    /// Check if this error is permanent and retry won't help.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            SyncError::Validation { .. } => "VALIDATION_FAILED",
            SyncError::NotFound { .. } => "NOT_FOUND",
            SyncError::MultipleFound { .. } => "MULTIPLE_FOUND",
            SyncError::AttributeNotResolvable { .. } => "ATTRIBUTE_NOT_RESOLVABLE",
            SyncError::Query { .. } => "QUERY_FAILED",
            SyncError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            SyncError::Conflict { .. } => "CONFLICT",
            SyncError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    // Convenience constructors

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        SyncError::Validation {
            message: message.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        SyncError::NotFound {
            message: message.into(),
        }
    }

    /// Create a multiple-found error.
    pub fn multiple_found(message: impl Into<String>) -> Self {
        SyncError::MultipleFound {
            message: message.into(),
        }
    }

    /// Create an attribute-not-resolvable error.
    pub fn attribute_not_resolvable(
        attribute: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        SyncError::AttributeNotResolvable {
            attribute: attribute.into(),
            message: message.into(),
        }
    }

    /// Create a query error.
    pub fn query(message: impl Into<String>) -> Self {
        SyncError::Query {
            message: message.into(),
            source: None,
        }
    }

    /// Create a query error with source.
    pub fn query_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        SyncError::Query {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        SyncError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        SyncError::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Create an internal error with source.
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        SyncError::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type for synchronization operations.
pub type SyncResult<T> = Result<T, SyncError>;
