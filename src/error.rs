//! Error types for the Sealdex library.
//!
//! All fallible operations return [`Result`], whose error side is the
//! [`SealdexError`] enum. The variants follow how the indexer and the cache
//! react to a failure:
//!
//! - transient remote failures ([`SealdexError::ServiceUnavailable`],
//!   [`SealdexError::Connection`]) are retried at the index initialization
//!   boundary only,
//! - [`SealdexError::NotFound`] and [`SealdexError::NotAuthorized`] mean the
//!   entity is no longer relevant and are swallowed by per-entity loads,
//! - [`SealdexError::Programming`] marks a broken invariant and is never
//!   retried.
//!
//! # Examples
//!
//! ```
//! use sealdex::error::{Result, SealdexError};
//!
//! fn load() -> Result<()> {
//!     Err(SealdexError::not_found("contact list"))
//! }
//!
//! let err = load().unwrap_err();
//! assert!(err.is_entity_gone());
//! assert!(!err.is_transient());
//! ```

use std::io;

use thiserror::Error;

/// The main error type for Sealdex operations.
#[derive(Error, Debug)]
pub enum SealdexError {
    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The remote service is temporarily unavailable.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The connection to the remote service failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The requested entity does not exist (anymore).
    #[error("Not found: {0}")]
    NotFound(String),

    /// The caller lost access to the requested entity.
    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    /// A broken invariant. Never retried.
    #[error("Programming error: {0}")]
    Programming(String),

    /// Encrypted store errors.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Encryption or decryption failed.
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Binary index encoding errors.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Index maintenance errors.
    #[error("Index error: {0}")]
    Index(String),

    /// Query errors.
    #[error("Query error: {0}")]
    Query(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary serialization errors.
    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Generic error for other cases
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for operations that may fail with SealdexError.
pub type Result<T> = std::result::Result<T, SealdexError>;

impl SealdexError {
    /// Create a new service unavailable error.
    pub fn service_unavailable<S: Into<String>>(msg: S) -> Self {
        SealdexError::ServiceUnavailable(msg.into())
    }

    /// Create a new connection error.
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        SealdexError::Connection(msg.into())
    }

    /// Create a new not found error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        SealdexError::NotFound(msg.into())
    }

    /// Create a new not authorized error.
    pub fn not_authorized<S: Into<String>>(msg: S) -> Self {
        SealdexError::NotAuthorized(msg.into())
    }

    /// Create a new programming error.
    pub fn programming<S: Into<String>>(msg: S) -> Self {
        SealdexError::Programming(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        SealdexError::Storage(msg.into())
    }

    /// Create a new crypto error.
    pub fn crypto<S: Into<String>>(msg: S) -> Self {
        SealdexError::Crypto(msg.into())
    }

    /// Create a new encoding error.
    pub fn encoding<S: Into<String>>(msg: S) -> Self {
        SealdexError::Encoding(msg.into())
    }

    /// Create a new index error.
    pub fn index<S: Into<String>>(msg: S) -> Self {
        SealdexError::Index(msg.into())
    }

    /// Create a new query error.
    pub fn query<S: Into<String>>(msg: S) -> Self {
        SealdexError::Query(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        SealdexError::Other(msg.into())
    }

    /// Create a new invalid config error.
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        SealdexError::Other(format!("Invalid configuration: {}", msg.into()))
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SealdexError::ServiceUnavailable(_) | SealdexError::Connection(_)
        )
    }

    /// Whether the entity an operation referred to is no longer reachable.
    pub fn is_entity_gone(&self) -> bool {
        matches!(self, SealdexError::NotFound(_) | SealdexError::NotAuthorized(_))
    }
}
