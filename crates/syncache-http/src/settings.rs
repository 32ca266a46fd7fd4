//! Settings for the HTTP transport and the watch binary.
//!
//! Settings are layered: built-in defaults, then an optional `syncache.toml`
//! (or any format the `config` crate recognises under that basename), then
//! `SYNCACHE__*` environment variables with `__` separating nested fields:
//!
//! ```text
//! SYNCACHE__BASE_URL=http://api.internal:8080
//! SYNCACHE__ENGINE__DEDUPE_WINDOW_MS=500
//! SYNCACHE__WATCH__POLL_INTERVAL_MS=250
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;
use syncache_core::{Method, RequestParams};
use syncache_engine::EngineConfig;
use thiserror::Error;

const DEFAULT_CONFIG_BASENAME: &str = "syncache";
const ENV_PREFIX: &str = "SYNCACHE";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid setting '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base URL every request path is appended to.
    pub base_url: String,
    /// Per-request timeout enforced by the loader.
    pub request_timeout_ms: u64,
    pub engine: EngineConfig,
    pub watch: WatchSettings,
}

/// The resource `syncache-watch` subscribes to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    pub method: Method,
    pub path: String,
    pub query: BTreeMap<String, String>,
    /// Polling interval; 0 disables polling.
    pub poll_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            request_timeout_ms: 30_000,
            engine: EngineConfig::default(),
            watch: WatchSettings::default(),
        }
    }
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            method: Method::Post,
            path: "/logical-things".to_string(),
            query: BTreeMap::new(),
            poll_interval_ms: 1_000,
        }
    }
}

impl Settings {
    /// Loads settings from `syncache.*` in the working directory (if present)
    /// and the environment.
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_with(None)
    }

    /// Like [`Settings::load`], additionally reading a required file at `path`.
    pub fn load_with(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder()
            .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

        Self::build(builder)
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self, SettingsError> {
        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(SettingsError::Invalid {
                field: "base_url",
                reason: format!("'{}' is not an http(s) URL", self.base_url),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(SettingsError::Invalid {
                field: "request_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if !self.watch.path.starts_with('/') {
            return Err(SettingsError::Invalid {
                field: "watch.path",
                reason: format!("'{}' must start with '/'", self.watch.path),
            });
        }
        Ok(())
    }

    /// Returns the request timeout as a Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl WatchSettings {
    /// Request parameters carrying the configured query.
    pub fn params(&self) -> RequestParams {
        self.query
            .iter()
            .fold(RequestParams::new(), |params, (name, value)| {
                params.query(name.as_str(), value)
            })
    }

    /// Returns the polling interval, or None when polling is disabled.
    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_ms > 0).then(|| Duration::from_millis(self.poll_interval_ms))
    }
}
