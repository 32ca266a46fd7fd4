//! Syncache HTTP - reqwest transport and settings
//!
//! This crate connects the engine to JSON REST APIs:
//!
//! - [`HttpLoader`]: a [`Loader`](syncache_engine::Loader) executing cache
//!   keys as HTTP requests with a per-request timeout
//! - [`Settings`]: layered configuration (defaults, `syncache.toml`,
//!   `SYNCACHE__*` environment variables)
//!
//! ## Example
//!
//! ```no_run
//! use syncache_core::{Method, RequestParams};
//! use syncache_engine::{ResourceOptions, SyncClient};
//! use syncache_http::{HttpLoader, Settings};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let settings = Settings::load()?;
//! let loader = HttpLoader::from_settings(&settings)?;
//! let client = SyncClient::with_loader(loader, settings.engine.clone());
//!
//! let mut things = client.use_resource(
//!     Method::Post,
//!     "/logical-things",
//!     &RequestParams::new(),
//!     ResourceOptions::new().poll_interval_ms(1000),
//! )?;
//! if let Some(state) = things.settled().await {
//!     println!("{:?}", state.data);
//! }
//! # Ok(())
//! # }
//! ```

pub mod loader;
pub mod settings;

pub use loader::HttpLoader;
pub use settings::{Settings, SettingsError, WatchSettings};
