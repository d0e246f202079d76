//! Known-dirty flags, the navigation checksum cache and its throttle.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::cache::{CacheKey, CacheManager};
use crate::remote::Checksums;

#[derive(Default)]
struct State {
  dirty: HashSet<CacheKey>,
  /// Server checksums from the last navigation fetch, consumed by the next read
  checksums: Checksums,
  last_validation: Option<Instant>,
}

pub(crate) struct Invalidation {
  state: Mutex<State>,
  throttle: Duration,
}

impl Invalidation {
  pub fn new(throttle: Duration) -> Self {
    Self {
      state: Mutex::new(State::default()),
      throttle,
    }
  }

  fn lock(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Mark `key` dirty. Any checksum held for it predates the write and is dropped.
  pub fn set(&self, key: &CacheKey) {
    let mut state = self.lock();
    state.checksums.remove(&key.to_string());
    state.dirty.insert(key.clone());
  }

  /// Clear the flag for `key`, returning whether it was set.
  pub fn take(&self, key: &CacheKey) -> bool {
    self.lock().dirty.remove(key)
  }

  pub fn is_set(&self, key: &CacheKey) -> bool {
    self.lock().dirty.contains(key)
  }

  pub fn store_checksums(&self, checksums: Checksums) {
    self.lock().checksums = checksums;
  }

  pub fn take_checksum(&self, key: &CacheKey) -> Option<String> {
    self.lock().checksums.remove(&key.to_string())
  }

  /// Claim the navigation slot. False while the previous claim is younger
  /// than the throttle window.
  pub fn begin_validation(&self, now: Instant) -> bool {
    let mut state = self.lock();
    if let Some(last) = state.last_validation {
      if now.saturating_duration_since(last) < self.throttle {
        return false;
      }
    }
    state.last_validation = Some(now);
    true
  }

  pub fn clear(&self) {
    *self.lock() = State::default();
  }
}

/// Flag `key` for this session and blank its stored hash, so the collection
/// still refetches after the flag has been consumed or the process restarts.
pub(crate) async fn mark_dirty(flags: &Invalidation, cache: &CacheManager, key: &CacheKey) {
  flags.set(key);
  cache.clear_hash(key).await;
}
