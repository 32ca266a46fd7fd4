//! Request parameters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Parameters of a logical request: path parameters, query pairs and an
/// optional JSON body.
///
/// Query pairs are kept in insertion order here; the encoder sorts them.
///
/// # Example
///
/// ```
/// use syncache_core::RequestParams;
///
/// let params = RequestParams::new()
///     .path_param("primaryKey", "7")
///     .query("limit", "50")
///     .body(serde_json::json!({"name": "thing"}));
///
/// assert_eq!(params.path_params().get("primaryKey").map(String::as_str), Some("7"));
/// assert_eq!(params.query_pairs().len(), 1);
/// assert!(params.json_body().is_some());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestParams {
    #[serde(default)]
    path: BTreeMap<String, String>,
    #[serde(default)]
    query: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<serde_json::Value>,
}

impl RequestParams {
    /// Creates an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a path parameter, replacing any previous value for `name`.
    pub fn path_param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.path.insert(name.into(), value.to_string());
        self
    }

    /// Appends a query pair. Repeated names are allowed.
    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    /// Sets the JSON body.
    pub fn body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Replaces every query pair named `name` with a single pair.
    pub fn set_query(&mut self, name: &str, value: impl ToString) {
        self.query.retain(|(n, _)| n != name);
        self.query.push((name.to_string(), value.to_string()));
    }

    /// Returns the path parameters.
    pub fn path_params(&self) -> &BTreeMap<String, String> {
        &self.path
    }

    /// Returns the query pairs in insertion order.
    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    /// Returns the first value of the query parameter `name`.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Returns the JSON body, if any.
    pub fn json_body(&self) -> Option<&serde_json::Value> {
        self.body.as_ref()
    }
}
