//! Single-flight, time-windowed caching in front of an async record store.
//!
//! [`CacheGuard`] wraps any [`ResourceStore`] and decides, per resource
//! type, whether a "fetch all" request is served from local records, joins
//! a fetch already in flight, or starts a new one.
//!
//! ```ignore
//! let store = RecordStore::new(MemoryStorage::new(), HttpSource::new(url, timeout, None)?);
//! let guard = CacheGuard::new(store).with_cache_seconds(600);
//!
//! // Fetches once; later calls within ten minutes are served locally
//! let widgets = guard.request_all("widgets", None)?.await?;
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod logging;
pub mod store;

pub use cache::{
  CacheGuard, Collection, EntryStatus, Fetch, GuardError, Query, Record, ResourceStore,
  TypeDescriptor, Unsupported,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use store::{HttpSource, MemoryStorage, RecordStorage, RecordStore, Source, SqliteStorage};
