//! # Syncache Engine
//!
//! Client-side data synchronization: a process-wide cache mapping a logical
//! request (method, path, parameters) to its latest response.
//!
//! ## Features
//!
//! - One in-flight request per key; concurrent readers join it
//! - Stale-while-revalidate entries (`Idle -> Fetching -> Fresh | Failed -> Stale`)
//! - Ordered, lossless change notification per subscriber
//! - Per-key polling at the most eager subscriber's interval (configurable)
//! - Mutations that invalidate and refetch the keys they affect, and leave
//!   the cache untouched when they fail
//! - Bounded, idle-expiring retention of unsubscribed entries
//!
//! ## Example
//!
//! ```ignore
//! use syncache_core::{Method, RequestParams};
//! use syncache_engine::{EngineConfig, ResourceOptions, SyncClient};
//!
//! let client = SyncClient::with_loader(HttpLoader::new(&settings)?, EngineConfig::default());
//!
//! let mut things = client.use_resource(
//!     Method::Post,
//!     "/logical-things",
//!     &RequestParams::new(),
//!     ResourceOptions::new().poll_interval_ms(1000),
//! )?;
//!
//! let create = client.use_mutation(Method::Put, "/logical-things");
//! create.mutate(serde_json::json!([{ "name": "x" }])).await?;
//! ```

pub mod client;
pub mod config;
pub mod dedup;
pub mod loader;
pub mod metrics;
pub mod mutation;
pub mod registry;
pub mod scheduler;
pub mod store;

// Re-exports
pub use client::{
    CallbackSubscription, InfiniteHandle, MutationHandle, ResourceHandle, ResourceOptions,
    ResourceState, SyncClient,
};
pub use config::{EngineConfig, IntervalPolicy, InvalidationScope};
pub use dedup::{RequestDeduper, SharedFetch};
pub use loader::Loader;
pub use metrics::{CacheMetrics, register_cache_metrics};
pub use mutation::{MutationCoordinator, MutationOutcome};
pub use registry::{Subscription, SubscriptionHandle, SubscriptionId, SubscriptionRegistry, Unsubscribed};
pub use scheduler::{RevalidationScheduler, TimerHandle};
pub use store::{CacheEntry, CacheStore, EntryState, FetchOutcome, InvalidationResult, MutationDescriptor};

// Re-export syncache_core for consumers
pub use syncache_core;
