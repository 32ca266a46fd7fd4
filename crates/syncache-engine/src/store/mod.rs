//! Cache store.
//!
//! Holds the last-known value, error and freshness of every key for the
//! lifetime of a client. Entries with subscribers live in the store's live
//! map; once the last subscriber leaves, an entry is retired into a bounded
//! Moka cache that expires it after a period of disuse.

mod cache_store;
mod entry;
mod invalidation;

pub use cache_store::CacheStore;
pub use entry::{CacheEntry, EntryState, FetchOutcome};
pub use invalidation::{InvalidationResult, MutationDescriptor};
