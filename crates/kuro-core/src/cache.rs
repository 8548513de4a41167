//! Throttling of full-tree passes.
//!
//! Each operation kind has one slot holding its last completed result. A
//! request inside the slot's window gets that exact result back (same `Arc`)
//! unless it is forced. Slots are not keyed by arguments.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

/// Source of monotonic time for [`ScanCache`].
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Last result of one operation kind.
#[derive(Debug)]
pub struct Slot<T> {
    window: Duration,
    entry: Mutex<Option<(Instant, Arc<T>)>>,
}

impl<T> Slot<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entry: Mutex::new(None),
        }
    }

    /// The stored result if it is younger than the window.
    pub fn fresh(&self, now: Instant) -> Option<Arc<T>> {
        let entry = self.entry.lock().ok()?;
        entry
            .as_ref()
            .filter(|(at, _)| now.saturating_duration_since(*at) < self.window)
            .map(|(_, value)| Arc::clone(value))
    }

    pub fn store(&self, now: Instant, value: Arc<T>) {
        if let Ok(mut entry) = self.entry.lock() {
            *entry = Some((now, value));
        }
    }
}

/// Per-kind throttle shared by the reconciler and the consistency checker.
#[derive(Debug)]
pub struct ScanCache<I, H, C = SystemClock> {
    clock: C,
    index: Slot<I>,
    health: Slot<H>,
}

impl<I, H, C: Clock> ScanCache<I, H, C> {
    pub fn new(clock: C, index_window: Duration, health_window: Duration) -> Self {
        Self {
            clock,
            index: Slot::new(index_window),
            health: Slot::new(health_window),
        }
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Cached reconciliation result, unless `force` is set.
    pub fn index(&self, force: bool) -> Option<Arc<I>> {
        if force {
            return None;
        }
        let hit = self.index.fresh(self.now());
        if hit.is_some() {
            debug!("Index pass throttled, returning previous result");
        }
        hit
    }

    pub fn store_index(&self, value: Arc<I>) {
        self.index.store(self.now(), value);
    }

    /// Cached consistency report, unless `force` is set.
    pub fn health(&self, force: bool) -> Option<Arc<H>> {
        if force {
            return None;
        }
        let hit = self.health.fresh(self.now());
        if hit.is_some() {
            debug!("Health check throttled, returning previous report");
        }
        hit
    }

    pub fn store_health(&self, value: Arc<H>) {
        self.health.store(self.now(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(clock: &ManualClock) -> ScanCache<u32, String, ManualClock> {
        ScanCache::new(clock.clone(), Duration::from_secs(60), Duration::from_secs(30))
    }

    #[test]
    fn test_empty_cache_misses() {
        let clock = ManualClock::new();
        let cache = cache(&clock);
        assert!(cache.index(false).is_none());
        assert!(cache.health(false).is_none());
    }

    #[test]
    fn test_hit_within_window_returns_same_arc() {
        let clock = ManualClock::new();
        let cache = cache(&clock);
        let value = Arc::new(7);
        cache.store_index(Arc::clone(&value));

        clock.advance(Duration::from_secs(59));
        let hit = cache.index(false).unwrap();
        assert!(Arc::ptr_eq(&hit, &value));
    }

    #[test]
    fn test_expires_after_window() {
        let clock = ManualClock::new();
        let cache = cache(&clock);
        cache.store_index(Arc::new(7));
        cache.store_health(Arc::new("ok".to_string()));

        clock.advance(Duration::from_secs(30));
        assert!(cache.index(false).is_some());
        assert!(cache.health(false).is_none());

        clock.advance(Duration::from_secs(30));
        assert!(cache.index(false).is_none());
    }

    #[test]
    fn test_force_bypasses() {
        let clock = ManualClock::new();
        let cache = cache(&clock);
        cache.store_index(Arc::new(7));
        assert!(cache.index(true).is_none());
        assert!(cache.index(false).is_some());
    }

    #[test]
    fn test_slots_are_independent() {
        let clock = ManualClock::new();
        let cache = cache(&clock);
        cache.store_health(Arc::new("ok".to_string()));
        assert!(cache.index(false).is_none());
        assert_eq!(cache.health(false).as_deref().map(String::as_str), Some("ok"));
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let other = clock.clone();
        let before = clock.now();
        other.advance(Duration::from_secs(5));
        assert_eq!(clock.now() - before, Duration::from_secs(5));
    }
}
