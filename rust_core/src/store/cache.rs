//! Time-boxed cache with an injectable clock.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        *self.now.lock() += delta;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    stored_at: DateTime<Utc>,
}

/// Single-value cache with a fixed time-to-live.
///
/// Every invalidation bumps a generation counter; a refresh that started
/// before an invalidation must not repopulate the cache with its result.
pub struct TtlCache<T: Clone> {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entry: RwLock<Option<CacheEntry<T>>>,
    generation: AtomicU64,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entry: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Age of the cached value, `None` when empty
    pub fn age(&self) -> Option<Duration> {
        let entry = self.entry.read();
        entry.as_ref().map(|e| {
            (self.clock.now() - e.stored_at)
                .to_std()
                .unwrap_or(Duration::ZERO)
        })
    }

    /// Value if it is younger than the TTL
    pub fn fresh(&self) -> Option<T> {
        self.within(self.ttl)
    }

    /// Value if it is younger than `max_age`
    pub fn within(&self, max_age: Duration) -> Option<T> {
        let entry = self.entry.read();
        let entry = entry.as_ref()?;
        let age = (self.clock.now() - entry.stored_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if age < max_age {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Store `value` unless the cache was invalidated since `generation`
    pub fn store_if_current(&self, value: T, generation: u64) -> bool {
        let mut entry = self.entry.write();
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        *entry = Some(CacheEntry {
            value,
            stored_at: self.clock.now(),
        });
        true
    }

    pub fn invalidate(&self) {
        let mut entry = self.entry.write();
        self.generation.fetch_add(1, Ordering::SeqCst);
        *entry = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> (Arc<ManualClock>, TtlCache<u32>) {
        let clock = Arc::new(ManualClock::default());
        let cache = TtlCache::new(Duration::from_secs(5), clock.clone());
        (clock, cache)
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let (clock, cache) = cache();
        assert!(cache.fresh().is_none());

        assert!(cache.store_if_current(7, cache.generation()));
        clock.advance(Duration::from_millis(4_999));
        assert_eq!(cache.fresh(), Some(7));

        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.fresh(), None);
        assert_eq!(cache.within(Duration::from_secs(30)), Some(7));
    }

    #[test]
    fn test_invalidation_discards_in_flight_refresh() {
        let (_clock, cache) = cache();
        let generation = cache.generation();
        cache.invalidate();
        assert!(!cache.store_if_current(1, generation));
        assert!(cache.fresh().is_none());
        assert!(cache.store_if_current(2, cache.generation()));
        assert_eq!(cache.fresh(), Some(2));
    }
}
