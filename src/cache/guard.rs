//! Cache guard that deduplicates and time-boxes "fetch all" requests.

use color_eyre::{Report, Result};
use futures::future::{BoxFuture, FutureExt, TryFutureExt};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};
use tracing::{debug, trace, warn};

use super::entry::{CacheEntry, EntryStatus, Lookup, SharedFetch};
use super::error::{GuardError, Unsupported};
use super::traits::{Collection, Query, ResourceStore, TypeDescriptor};
use crate::clock::{Clock, SystemClock};

/// Default freshness window in seconds.
pub const DEFAULT_CACHE_SECONDS: u64 = 600;

/// Result of a cached request.
///
/// Either the locally held records, available right away, or a handle on the
/// shared in-flight fetch. Both resolve to the same type when awaited.
pub enum Fetch {
  Cached(Collection),
  InFlight(SharedFetch),
}

impl Fetch {
  /// Whether the request was served without touching the network.
  pub fn is_cached(&self) -> bool {
    matches!(self, Self::Cached(_))
  }

  /// The records, if they were available synchronously.
  pub fn into_cached(self) -> Option<Collection> {
    match self {
      Self::Cached(records) => Some(records),
      Self::InFlight(_) => None,
    }
  }
}

impl Future for Fetch {
  type Output = Result<Collection, GuardError>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    match self.get_mut() {
      // Polling again after completion yields an empty collection
      Self::Cached(records) => Poll::Ready(Ok(std::mem::take(records))),
      Self::InFlight(fetch) => fetch.poll_unpin(cx),
    }
  }
}

impl std::fmt::Debug for Fetch {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Cached(records) => f.debug_tuple("Cached").field(&records.len()).finish(),
      Self::InFlight(_) => f.write_str("InFlight"),
    }
  }
}

struct Inner<S> {
  store: S,
  clock: Arc<dyn Clock>,
  entries: Mutex<HashMap<String, CacheEntry>>,
  next_ticket: AtomicU64,
}

impl<S> Inner<S> {
  fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
    // The map holds no invariants a panicking writer could break halfway
    self
      .entries
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn settle(&self, type_name: &str, ticket: u64, succeeded: bool) {
    let now = self.clock.now();
    let mut entries = self.entries();
    let applied = entries
      .get_mut(type_name)
      .is_some_and(|entry| entry.settle(ticket, succeeded, now));

    if !applied {
      debug!(type_name, ticket, "fetch settled after entry was reset; ignoring");
    } else if succeeded {
      debug!(type_name, ticket, at = now, "fetch resolved");
    } else {
      debug!(type_name, ticket, "fetch failed; entry reset to idle");
    }
  }
}

/// Decorator around a [`ResourceStore`] that caches "fetch all" requests.
///
/// The guard owns the wrapped store. Every fetch and unload, whether it comes
/// through [`request_all`](Self::request_all) or through the guard's own
/// [`ResourceStore`] implementation, updates the per-type entry, so other
/// collaborators can be handed the guard as their store without bypassing
/// the bookkeeping.
pub struct CacheGuard<S: ResourceStore> {
  inner: Arc<Inner<S>>,
  cache_seconds: u64,
}

impl<S: ResourceStore> CacheGuard<S> {
  /// Wrap `store` using the system clock and the default window.
  pub fn new(store: S) -> Self {
    Self::with_clock(store, Arc::new(SystemClock))
  }

  /// Wrap `store` using the given time source.
  pub fn with_clock(store: S, clock: Arc<dyn Clock>) -> Self {
    Self {
      inner: Arc::new(Inner {
        store,
        clock,
        entries: Mutex::new(HashMap::new()),
        next_ticket: AtomicU64::new(1),
      }),
      cache_seconds: DEFAULT_CACHE_SECONDS,
    }
  }

  /// Set the default freshness window.
  pub fn with_cache_seconds(mut self, cache_seconds: u64) -> Self {
    self.cache_seconds = cache_seconds;
    self
  }

  /// The default freshness window in seconds.
  pub fn cache_seconds(&self) -> u64 {
    self.cache_seconds
  }

  /// Request every record of `type_key`.
  ///
  /// Serves the local records when the last successful fetch is younger than
  /// `cache_seconds` (or the configured default), joins the fetch already in
  /// flight if there is one, and otherwise starts a new fetch.
  pub fn request_all(&self, type_key: &str, cache_seconds: Option<u64>) -> Result<Fetch, GuardError> {
    let descriptor = self.resolve(type_key)?;
    let window = cache_seconds.unwrap_or(self.cache_seconds);
    let now = self.inner.clock.now();

    let mut entries = self.inner.entries();
    let entry = entries.entry(descriptor.name.clone()).or_default();

    match entry.lookup(now, window) {
      Lookup::Join(fetch) => {
        trace!(type_name = %descriptor.name, "joining in-flight fetch");
        Ok(Fetch::InFlight(fetch))
      }
      Lookup::Fresh => {
        drop(entries);
        trace!(type_name = %descriptor.name, window, "serving cached records");
        let records = self
          .inner
          .store
          .peek_all(&descriptor.name)
          .map_err(GuardError::store)?;
        Ok(Fetch::Cached(records))
      }
      Lookup::Fetch => Ok(Fetch::InFlight(self.begin_fetch(&descriptor.name, entry))),
    }
  }

  /// Request records of `type_key` using an arbitrary query shape.
  ///
  /// Only [`Query::All`] is cacheable; id lookups and filters are rejected
  /// before anything is fetched.
  pub fn request(
    &self,
    type_key: &str,
    query: Query,
    cache_seconds: Option<u64>,
  ) -> Result<Fetch, GuardError> {
    match query {
      Query::All => self.request_all(type_key, cache_seconds),
      Query::Id(_) => Err(GuardError::UnsupportedOperation(Unsupported::FindById)),
      Query::Filter(_) => Err(GuardError::UnsupportedOperation(Unsupported::Filter)),
    }
  }

  /// Evict the local records of `type_key` and forget when it was fetched.
  pub fn invalidate(&self, type_key: &str) -> Result<(), GuardError> {
    let descriptor = self.resolve(type_key)?;
    self.unload(&descriptor.name)
  }

  /// Forget when `type_key` was fetched, keeping its local records.
  ///
  /// The next [`request_all`](Self::request_all) fetches again.
  pub fn reset_freshness(&self, type_key: &str) -> Result<(), GuardError> {
    let descriptor = self.resolve(type_key)?;
    self.reset(&descriptor.name);
    Ok(())
  }

  /// Current state of the entry for `type_key`.
  pub fn status(&self, type_key: &str) -> Result<EntryStatus, GuardError> {
    let descriptor = self.resolve(type_key)?;
    let entries = self.inner.entries();
    Ok(
      entries
        .get(&descriptor.name)
        .map(CacheEntry::status)
        .unwrap_or(EntryStatus::Idle),
    )
  }

  fn resolve(&self, type_key: &str) -> Result<TypeDescriptor, GuardError> {
    self.inner.store.resolve_type(type_key).map_err(|e| {
      debug!(type_key, error = %e, "type did not resolve");
      GuardError::UnknownType(type_key.to_string())
    })
  }

  fn reset(&self, type_name: &str) {
    let mut entries = self.inner.entries();
    if let Some(entry) = entries.get_mut(type_name) {
      entry.reset();
    }
    debug!(type_name, "entry reset to idle");
  }

  fn unload(&self, type_name: &str) -> Result<(), GuardError> {
    self.reset(type_name);
    self
      .inner
      .store
      .unload_all(type_name)
      .map_err(GuardError::store)
  }

  /// Join the fetch in flight for `type_name`, or start one regardless of
  /// freshness.
  fn join_or_fetch(&self, type_name: &str) -> SharedFetch {
    let mut entries = self.inner.entries();
    let entry = entries.entry(type_name.to_string()).or_default();
    match entry.pending() {
      Some(fetch) => fetch,
      None => self.begin_fetch(type_name, entry),
    }
  }

  /// Start a fetch and move `entry` to `Pending`.
  ///
  /// Must be called with the entry map locked so no second fetch can start
  /// in between.
  fn begin_fetch(&self, type_name: &str, entry: &mut CacheEntry) -> SharedFetch {
    let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
    let request = self.inner.store.fetch_all(type_name);
    let inner: Weak<Inner<S>> = Arc::downgrade(&self.inner);
    let name = type_name.to_string();

    let fetch = async move {
      let result = request.await.map_err(|e| {
        warn!(type_name = %name, error = %e, "fetch failed");
        GuardError::fetch_failed(e)
      });
      if let Some(inner) = inner.upgrade() {
        inner.settle(&name, ticket, result.is_ok());
      }
      result
    }
    .boxed()
    .shared();

    entry.begin(fetch.clone(), ticket);
    debug!(type_name, ticket, "fetch started");

    // Drive the fetch to completion even if every caller drops its handle
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
      handle.spawn(fetch.clone().map(|_| ()));
    }

    fetch
  }
}

impl<S: ResourceStore> Clone for CacheGuard<S> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
      cache_seconds: self.cache_seconds,
    }
  }
}

/// The guard is itself a store: collaborators that fetch or unload through it
/// keep the cache entries consistent.
impl<S: ResourceStore> ResourceStore for CacheGuard<S> {
  fn resolve_type(&self, type_key: &str) -> Result<TypeDescriptor> {
    self.inner.store.resolve_type(type_key)
  }

  fn fetch_all(&self, type_key: &str) -> BoxFuture<'static, Result<Collection>> {
    match self.resolve(type_key) {
      Ok(descriptor) => self
        .join_or_fetch(&descriptor.name)
        .map_err(Report::new)
        .boxed(),
      Err(e) => futures::future::ready(Err(Report::new(e))).boxed(),
    }
  }

  fn peek_all(&self, type_key: &str) -> Result<Collection> {
    let descriptor = self.resolve(type_key)?;
    self.inner.store.peek_all(&descriptor.name)
  }

  fn unload_all(&self, type_key: &str) -> Result<()> {
    let descriptor = self.resolve(type_key)?;
    self.unload(&descriptor.name)?;
    Ok(())
  }
}
