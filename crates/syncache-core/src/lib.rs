//! Syncache Core - Domain types
//!
//! This crate provides the foundational types shared by the syncache engine
//! and its transports: HTTP methods, request parameters, canonical cache keys
//! and the error taxonomy.
//!
//! ## Example
//!
//! ```
//! use syncache_core::{KeyEncoder, Method, RequestParams};
//!
//! let encoder = KeyEncoder::new();
//! let params = RequestParams::new()
//!     .path_param("id", "42")
//!     .query("offset", "0")
//!     .query("limit", "10");
//!
//! let key = encoder.encode(Method::Get, "/logical-things/{id}", &params).unwrap();
//! assert_eq!(key.path(), "/logical-things/42");
//! assert_eq!(key.path_and_query(), "/logical-things/42?limit=10&offset=0");
//! ```

pub mod error;
pub mod key;
pub mod types;

pub use error::{Result, SyncError, TransportError};
pub use key::{CacheKey, KeyEncoder, RequestParams};
pub use types::{ConsumerId, Method};

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
