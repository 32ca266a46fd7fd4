//! Loader trait definition.

use async_trait::async_trait;
use syncache_core::{CacheKey, TransportError};

/// The transport the engine fetches through.
///
/// A loader executes the request a [`CacheKey`] describes (method, path,
/// query, body) and returns the decoded response. The engine is agnostic
/// of the response type and never retries or times out on its own: those
/// are loader concerns.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use syncache_core::{CacheKey, TransportError};
/// use syncache_engine::Loader;
///
/// struct EchoLoader;
///
/// #[async_trait]
/// impl Loader for EchoLoader {
///     type Output = String;
///
///     async fn load(&self, request: &CacheKey) -> Result<String, TransportError> {
///         Ok(request.path_and_query())
///     }
/// }
/// ```
#[async_trait]
pub trait Loader: Send + Sync + 'static {
    /// The decoded response type.
    type Output: Send + Sync + 'static;

    /// Executes the request described by `request`.
    async fn load(&self, request: &CacheKey) -> Result<Self::Output, TransportError>;

    /// Returns the name of this loader, for logging.
    fn name(&self) -> &str {
        "loader"
    }
}
