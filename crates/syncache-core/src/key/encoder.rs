//! Key encoding.

use serde_json::Value;

use super::{CacheKey, RequestParams};
use crate::error::{Result, SyncError};
use crate::types::Method;

/// Turns (method, path template, parameters) into a [`CacheKey`].
///
/// Encoding is pure and deterministic:
///
/// - `{name}` placeholders in the template are replaced by the
///   percent-encoded path parameter `name`; a missing one is an
///   `InvalidRequestShape` error. Unused path parameters are ignored.
/// - query pairs are sorted by name; values sharing a name keep their
///   relative order, since `?tag=a&tag=b` and `?tag=b&tag=a` may mean
///   different things to a server.
/// - the JSON body is rendered with object members sorted by name.
///
/// # Example
///
/// ```
/// use syncache_core::{KeyEncoder, Method, RequestParams};
///
/// let encoder = KeyEncoder::with_namespace("djangolang-api");
///
/// let a = RequestParams::new().query("limit", 10).query("offset", 0);
/// let b = RequestParams::new().query("offset", 0).query("limit", 10);
///
/// let key_a = encoder.encode(Method::Get, "/logical-things", &a).unwrap();
/// let key_b = encoder.encode(Method::Get, "/logical-things", &b).unwrap();
/// assert_eq!(key_a, key_b);
/// assert_eq!(key_a.namespace(), Some("djangolang-api"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyEncoder {
    namespace: Option<String>,
}

impl KeyEncoder {
    /// Creates an encoder without namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an encoder whose keys all carry `namespace`.
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
        }
    }

    /// Returns the namespace, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Encodes a logical request into its canonical key.
    ///
    /// # Errors
    ///
    /// `SyncError::InvalidRequestShape` if the template is not an absolute
    /// path, contains a query string or a malformed placeholder, or names a
    /// path parameter that `params` does not provide.
    pub fn encode(&self, method: Method, template: &str, params: &RequestParams) -> Result<CacheKey> {
        let path = resolve_path(template, params)?;

        let mut query = params.query_pairs().to_vec();
        query.sort_by(|a, b| a.0.cmp(&b.0));

        let body = params.json_body().map(canonical_json);

        Ok(CacheKey::from_parts(
            self.namespace.clone(),
            method,
            path,
            query,
            body,
        ))
    }
}

fn resolve_path(template: &str, params: &RequestParams) -> Result<String> {
    if !template.starts_with('/') {
        return Err(SyncError::invalid_shape(template, "path must start with '/'"));
    }
    if template.contains('?') {
        return Err(SyncError::invalid_shape(
            template,
            "query parameters belong in params, not in the path",
        ));
    }

    let mut resolved = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find(['{', '}']) {
        if rest.as_bytes()[open] == b'}' {
            return Err(SyncError::invalid_shape(template, "unmatched '}'"));
        }

        resolved.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| SyncError::invalid_shape(template, "unterminated placeholder"))?;

        let name = &after[..close];
        if name.is_empty() || name.contains('{') {
            return Err(SyncError::invalid_shape(template, "malformed placeholder"));
        }

        let value = params.path_params().get(name).ok_or_else(|| {
            SyncError::invalid_shape(template, format!("missing path parameter '{}'", name))
        })?;
        resolved.push_str(&urlencoding::encode(value));

        rest = &after[close + 1..];
    }
    resolved.push_str(rest);

    Ok(resolved)
}

/// Renders JSON with object members sorted by name, independent of how the
/// `serde_json` map happens to be ordered.
fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (name, member)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(name.clone()).to_string());
                out.push(':');
                write_canonical(member, out);
            }
            out.push('}');
        },
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        },
        scalar => out.push_str(&scalar.to_string()),
    }
}
