//! Core error types.

use std::path::PathBuf;

use rowguard_lang::{AccessType, ParseError};
use thiserror::Error;

/// Outcome of evaluating a predicate that did not produce a value.
#[derive(Debug, Clone, Error)]
pub enum EvaluationError {
    /// The value cannot be determined from the bound values; the predicate
    /// must be deferred to the backing store.
    #[error("not evaluatable: {0}")]
    NotEvaluatable(String),

    /// Mapping metadata does not match the predicate.
    #[error(transparent)]
    Mapping(#[from] MappingError),
}

impl EvaluationError {
    /// Create a not-evaluatable signal.
    pub fn not_evaluatable(message: impl Into<String>) -> Self {
        EvaluationError::NotEvaluatable(message.into())
    }

    /// Check whether this is the not-evaluatable signal.
    pub fn is_not_evaluatable(&self) -> bool {
        matches!(self, EvaluationError::NotEvaluatable(_))
    }
}

/// Result type for evaluation.
pub type EvaluationResult<T> = Result<T, EvaluationError>;

/// Mapping metadata errors. These indicate a setup defect.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MappingError {
    #[error("class {0} is not mapped")]
    UnmappedClass(String),

    #[error("property {property} is not mapped for class {class}")]
    UnknownProperty { class: String, property: String },

    #[error("cannot navigate through collection-valued path {0}")]
    CollectionNavigation(String),

    #[error("cannot navigate through basic property in path {0}")]
    BasicNavigation(String),

    #[error("alias {0} is not declared")]
    UnknownAlias(String),

    #[error("alias {0} is declared more than once")]
    AmbiguousPath(String),

    #[error("invalid class hierarchy: {0}")]
    InvalidHierarchy(String),
}

/// Security-related errors.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// Access was denied, or could not be proven to be granted.
    #[error("{access} access denied for {entity}: {reason}")]
    AccessDenied {
        /// Requested access type.
        access: AccessType,
        /// The entity the check was made for.
        entity: String,
        /// Why access was denied.
        reason: String,
    },

    #[error(transparent)]
    Mapping(#[from] MappingError),

    /// An operation that the secure view does not support.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("index {index} out of bounds for a collection of {len} visible elements")]
    IndexOutOfBounds { index: usize, len: usize },
}

impl SecurityError {
    pub fn access_denied(
        access: AccessType,
        entity: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        SecurityError::AccessDenied {
            access,
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    pub fn is_access_denied(&self) -> bool {
        matches!(self, SecurityError::AccessDenied { .. })
    }
}

/// Result type for security operations.
pub type SecurityResult<T> = Result<T, SecurityError>;

/// Errors raised while loading access rules. Fatal at startup.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid access rule '{rule}': {source}")]
    Parse { rule: String, source: ParseError },

    #[error("access rule '{rule}' guards unmapped class {entity}")]
    UnknownEntity { rule: String, entity: String },
}

/// Errors raised by query filtering.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid query: {0}")]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Security(#[from] SecurityError),
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Rule(#[from] RuleError),
}
