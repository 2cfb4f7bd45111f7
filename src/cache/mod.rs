//! Single-flight, time-windowed caching for "fetch all" requests.
//!
//! This module provides a store-agnostic guard that:
//! - Tracks one fetch state per resource type (idle, in flight, resolved at)
//! - Serves locally held records while the last fetch is within its freshness window
//! - Shares one in-flight fetch between every concurrent caller
//! - Resets on failure so the next request retries

mod entry;
mod error;
mod guard;
mod traits;

pub use entry::{EntryStatus, SharedFetch};
pub use error::{GuardError, Unsupported};
pub use guard::{CacheGuard, Fetch, DEFAULT_CACHE_SECONDS};
pub use traits::{Collection, Query, Record, ResourceStore, TypeDescriptor};
