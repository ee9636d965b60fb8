//! Catalog error types.
//!
//! One error enum covers every failure a catalog operation can report. The
//! HTTP layer maps each variant onto a status code; everything else simply
//! propagates it with `?`.

use thiserror::Error;

/// Result alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Unified errors from catalog operations.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    /// Bad query, missing feature, antimeridian bbox, bad date format.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A scene or sub-index that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A non-overwriting put hit an existing scene.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A vendor or WFS endpoint answered with a non-2xx status.
    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Store, serialization, or parse failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CatalogError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::Unauthenticated(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn upstream(status: u16, msg: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("json: {}", err))
    }
}
