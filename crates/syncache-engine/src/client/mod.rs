//! Consumer-facing API.
//!
//! [`SyncClient`] wires the store, deduper, scheduler and mutation
//! coordinator together and hands out handles whose lifetime is the
//! lifetime of a subscription.

mod infinite;
mod resource;
mod sync_client;

pub use infinite::InfiniteHandle;
pub use resource::{CallbackSubscription, MutationHandle, ResourceHandle, ResourceOptions, ResourceState};
pub use sync_client::SyncClient;
