//! Canonical cache key.

use std::fmt;

use serde::Serialize;

use crate::types::Method;

/// Canonical key of a logical request.
///
/// Keys are produced by [`KeyEncoder`](crate::KeyEncoder) only, so two keys
/// compare equal exactly when their requests are logically identical: same
/// namespace, method, resolved path, sorted query and canonical body.
/// Keys are totally ordered and hashable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CacheKey {
    namespace: Option<String>,
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<String>,
}

impl CacheKey {
    pub(crate) fn from_parts(
        namespace: Option<String>,
        method: Method,
        path: String,
        query: Vec<(String, String)>,
        body: Option<String>,
    ) -> Self {
        Self {
            namespace,
            method,
            path,
            query,
            body,
        }
    }

    /// Returns the namespace the key was encoded under.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Returns the request method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// Returns the resolved (percent-encoded) path, without query.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the query pairs, sorted by name.
    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// Returns the canonical JSON body, if any.
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Returns the path followed by the percent-encoded query string.
    ///
    /// # Example
    ///
    /// ```
    /// use syncache_core::{KeyEncoder, Method, RequestParams};
    ///
    /// let params = RequestParams::new().query("name__icontains", "a b");
    /// let key = KeyEncoder::new().encode(Method::Get, "/things", &params).unwrap();
    /// assert_eq!(key.path_and_query(), "/things?name__icontains=a%20b");
    /// ```
    pub fn path_and_query(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }

        let query = self
            .query
            .iter()
            .map(|(name, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(name),
                    urlencoding::encode(value)
                )
            })
            .collect::<Vec<_>>()
            .join("&");

        format!("{}?{}", self.path, query)
    }

    /// Returns the ancestor collection paths of this key's path, nearest
    /// first. `/items/7/parts` yields `/items/7` then `/items`.
    pub fn collection_paths(&self) -> Vec<&str> {
        let mut paths = Vec::new();
        let mut current = self.path.trim_end_matches('/');

        while let Some(idx) = current.rfind('/') {
            current = &current[..idx];
            if current.is_empty() {
                break;
            }
            paths.push(current);
        }

        paths
    }

    /// Returns true if both keys address the same resource path within the
    /// same namespace, regardless of method or parameters.
    pub fn same_resource(&self, other: &CacheKey) -> bool {
        self.namespace == other.namespace && self.path == other.path
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(namespace) = &self.namespace {
            write!(f, "[{}] ", namespace)?;
        }
        write!(f, "{} {}", self.method, self.path_and_query())?;
        if let Some(body) = &self.body {
            write!(f, " {}", body)?;
        }
        Ok(())
    }
}
