//! Per-type fetch state.
//!
//! Each resource type moves through a small cycle:
//!
//! ```text
//! Idle --fetch starts--> Pending --succeeds--> Resolved
//! Pending --fails--> Idle
//! Resolved --window expires, next request--> Pending
//! Resolved | Pending --invalidate / unload--> Idle
//! ```
//!
//! A pending fetch carries a ticket. Only the fetch holding the current
//! ticket may settle the entry, so a fetch that was invalidated (or
//! superseded) while in flight cannot mark fresh data it no longer owns.

use futures::future::{BoxFuture, Shared};

use super::error::GuardError;
use super::traits::Collection;

/// A fetch that any number of callers can await.
pub type SharedFetch = Shared<BoxFuture<'static, Result<Collection, GuardError>>>;

#[derive(Clone, Default)]
enum EntryState {
  /// Nothing fetched, or the last result was discarded
  #[default]
  Idle,
  /// A fetch is in flight
  Pending { fetch: SharedFetch, ticket: u64 },
  /// The last fetch succeeded at `at` (whole seconds)
  Resolved { at: u64 },
}

/// Observable state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
  Idle,
  Pending,
  Resolved { at: u64 },
}

/// What a request should do given the entry's current state.
pub(crate) enum Lookup {
  /// Attach to the fetch already in flight
  Join(SharedFetch),
  /// Serve the locally held records
  Fresh,
  /// Start a new fetch
  Fetch,
}

#[derive(Clone, Default)]
pub(crate) struct CacheEntry {
  state: EntryState,
}

impl CacheEntry {
  pub fn status(&self) -> EntryStatus {
    match self.state {
      EntryState::Idle => EntryStatus::Idle,
      EntryState::Pending { .. } => EntryStatus::Pending,
      EntryState::Resolved { at } => EntryStatus::Resolved { at },
    }
  }

  /// The in-flight fetch, if any.
  pub fn pending(&self) -> Option<SharedFetch> {
    match &self.state {
      EntryState::Pending { fetch, .. } => Some(fetch.clone()),
      _ => None,
    }
  }

  /// Decide how to serve a request at `now` with a freshness window of
  /// `window` seconds.
  pub fn lookup(&self, now: u64, window: u64) -> Lookup {
    match &self.state {
      EntryState::Pending { fetch, .. } => Lookup::Join(fetch.clone()),
      EntryState::Resolved { at } if now.saturating_sub(*at) < window => Lookup::Fresh,
      EntryState::Resolved { .. } | EntryState::Idle => Lookup::Fetch,
    }
  }

  /// Move to `Pending` with a new fetch.
  pub fn begin(&mut self, fetch: SharedFetch, ticket: u64) {
    self.state = EntryState::Pending { fetch, ticket };
  }

  /// Apply the outcome of the fetch holding `ticket`.
  ///
  /// Returns `false` when the entry no longer belongs to that fetch, in which
  /// case nothing changes.
  pub fn settle(&mut self, ticket: u64, succeeded: bool, now: u64) -> bool {
    match self.state {
      EntryState::Pending { ticket: current, .. } if current == ticket => {
        self.state = if succeeded {
          EntryState::Resolved { at: now }
        } else {
          EntryState::Idle
        };
        true
      }
      _ => false,
    }
  }

  pub fn reset(&mut self) {
    self.state = EntryState::Idle;
  }
}
