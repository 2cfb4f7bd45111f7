//! Errors surfaced by the cache guard.

use color_eyre::Report;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Request shapes the guard refuses to cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unsupported {
  /// Lookup of a single record by id
  FindById,
  /// Filtered query over a collection
  Filter,
}

impl fmt::Display for Unsupported {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::FindById => write!(
        f,
        "cached requests do not support finding by id; read the record from the store directly"
      ),
      Self::Filter => write!(
        f,
        "cached requests do not support queries; fetch the collection and filter it locally"
      ),
    }
  }
}

/// Error returned by [`CacheGuard`](super::CacheGuard) operations.
///
/// Cloneable so a single failed fetch can be handed to every caller that
/// attached to it.
#[derive(Debug, Clone, Error)]
pub enum GuardError {
  #[error("unsupported operation: {0}")]
  UnsupportedOperation(Unsupported),

  #[error("fetch failed: {0}")]
  FetchFailed(Arc<Report>),

  #[error("unknown resource type '{0}'")]
  UnknownType(String),

  #[error("record store error: {0}")]
  Store(Arc<Report>),
}

impl GuardError {
  pub(crate) fn fetch_failed(report: Report) -> Self {
    Self::FetchFailed(Arc::new(report))
  }

  pub(crate) fn store(report: Report) -> Self {
    Self::Store(Arc::new(report))
  }

  pub fn is_unsupported(&self) -> bool {
    matches!(self, Self::UnsupportedOperation(_))
  }

  pub fn is_fetch_failed(&self) -> bool {
    matches!(self, Self::FetchFailed(_))
  }
}
