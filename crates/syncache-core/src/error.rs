//! Error types for syncache.
//!
//! Three kinds of failure exist and none of them is fatal:
//!
//! - [`SyncError::InvalidRequestShape`]: the caller described a request that
//!   cannot be encoded into a key. Never retried.
//! - [`TransportError`]: the loader failed. For reads it is recorded on the
//!   cache entry (state `Failed`) and the next scheduled revalidation retries.
//! - [`SyncError::MutationFailed`]: a write failed. It is returned to the
//!   caller and the cache is left exactly as it was.
//!
//! # Example
//!
//! ```
//! use syncache_core::{SyncError, TransportError};
//!
//! let err = SyncError::invalid_shape("/items/{id}", "missing path parameter 'id'");
//! assert!(err.is_invalid_shape());
//!
//! let transport = TransportError::status(503, "unavailable");
//! assert!(transport.is_transient());
//! ```

use serde::Serialize;
use thiserror::Error;

use crate::types::Method;

/// Main error type for syncache operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The request could not be encoded into a cache key.
    #[error("invalid request shape for '{template}': {reason}")]
    InvalidRequestShape {
        /// The path template (or raw input) that was rejected
        template: String,
        /// Why it was rejected
        reason: String,
    },

    /// A read failed in the loader.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A write failed; the cache was not touched.
    #[error("mutation {method} {path} failed: {source}")]
    MutationFailed {
        /// Method of the failed write
        method: Method,
        /// Resolved path of the failed write
        path: String,
        /// The loader error, unmodified
        #[source]
        source: TransportError,
    },
}

impl SyncError {
    /// Creates an InvalidRequestShape error.
    pub fn invalid_shape(template: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRequestShape {
            template: template.into(),
            reason: reason.into(),
        }
    }

    /// Creates a MutationFailed error.
    pub fn mutation_failed(method: Method, path: impl Into<String>, source: TransportError) -> Self {
        Self::MutationFailed {
            method,
            path: path.into(),
            source,
        }
    }

    /// Returns true if this is a key encoding failure.
    pub fn is_invalid_shape(&self) -> bool {
        matches!(self, Self::InvalidRequestShape { .. })
    }

    /// Returns true if this is a failed write.
    pub fn is_mutation_failed(&self) -> bool {
        matches!(self, Self::MutationFailed { .. })
    }

    /// Returns the underlying transport error, if any.
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(err) => Some(err),
            Self::MutationFailed { source, .. } => Some(source),
            Self::InvalidRequestShape { .. } => None,
        }
    }
}

/// A loader failure.
///
/// Cloneable so that a single failed network call can be handed to every
/// caller that joined it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportError {
    /// The request could not be sent or the connection failed.
    #[error("request failed: {message}")]
    Request { message: String },

    /// The server answered with a non-success status.
    #[error("server responded with status {status}: {message}")]
    Status { status: u16, message: String },

    /// The response body could not be decoded.
    #[error("failed to decode response: {message}")]
    Decode { message: String },

    /// The loader gave up waiting.
    #[error("request timed out after {millis}ms")]
    Timeout { millis: u64 },

    /// The task driving the request died before settling.
    #[error("request aborted: {message}")]
    Aborted { message: String },
}

impl TransportError {
    /// Creates a Request error.
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
        }
    }

    /// Creates a Status error.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Creates a Decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates an Aborted error.
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::Aborted {
            message: message.into(),
        }
    }

    /// Returns the HTTP status, if the server answered.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true if this is a transient error that might succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request { .. } | Self::Timeout { .. } | Self::Aborted { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Decode { .. } => false,
        }
    }
}

/// Type alias for Results with SyncError.
pub type Result<T> = std::result::Result<T, SyncError>;
