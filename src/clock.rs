//! Time sources for freshness checks.
//!
//! The guard never reads the wall clock directly; it asks a [`Clock`] for the
//! current time in whole seconds so tests can drive time by hand.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of the current time in whole seconds.
pub trait Clock: Send + Sync {
  fn now(&self) -> u64;
}

/// Wall clock backed by `chrono::Utc`.
///
/// Partial seconds round up, so a fetch that resolves 100ms after a request
/// is stamped one second later.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> u64 {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    millis.div_ceil(1000)
  }
}

/// Manually advanced clock.
#[derive(Debug, Default)]
pub struct ManualClock {
  secs: AtomicU64,
}

impl ManualClock {
  pub fn new(start: u64) -> Self {
    Self {
      secs: AtomicU64::new(start),
    }
  }

  pub fn set(&self, secs: u64) {
    self.secs.store(secs, Ordering::SeqCst);
  }

  pub fn advance(&self, secs: u64) {
    self.secs.fetch_add(secs, Ordering::SeqCst);
  }
}

impl Clock for ManualClock {
  fn now(&self) -> u64 {
    self.secs.load(Ordering::SeqCst)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_manual_clock_set_and_advance() {
    let clock = ManualClock::new(10);
    assert_eq!(clock.now(), 10);

    clock.advance(5);
    assert_eq!(clock.now(), 15);

    clock.set(2);
    assert_eq!(clock.now(), 2);
  }

  #[test]
  fn test_system_clock_is_close_to_chrono() {
    let before = Utc::now().timestamp() as u64;
    let now = SystemClock.now();
    let after = Utc::now().timestamp() as u64;

    assert!(now >= before);
    assert!(now <= after + 1);
  }
}
