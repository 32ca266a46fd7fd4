//! Revalidation scheduler.
//!
//! One cancellable polling timer per subscribed key, plus one-shot
//! revalidation for mutations and explicit refetches. Every fetch goes
//! through the [`RequestDeduper`](crate::dedup::RequestDeduper), so a tick
//! that fires while a request is outstanding joins it.

mod handle;
mod revalidation;

pub use handle::TimerHandle;
pub use revalidation::RevalidationScheduler;
