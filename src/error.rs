//! Error types for trackcore
//!
//! Taxonomy:
//! - `NotFound`: a referenced entity is missing (names the entity kind)
//! - `Validation`: domain rule violated (tracker kind mismatch, date ranges)
//! - `Unauthorized`: actor not resolvable or lacks ownership
//! - store-level failures: version conflicts, locking, IO, serialization

use std::path::PathBuf;

use thiserror::Error;

use crate::model::EntityKind;

/// Main error type for trackcore operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Store failures
    #[error("Version conflict on {kind} {id}: expected {expected}, found {found}")]
    VersionConflict {
        kind: EntityKind,
        id: String,
        expected: u64,
        found: u64,
    },

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    /// Shorthand for a missing entity of the given kind.
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// True when the error is a document version conflict that a
    /// read-modify-write loop may retry.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Error::VersionConflict { .. })
    }
}

/// Result type alias for trackcore operations
pub type Result<T> = std::result::Result<T, Error>;
