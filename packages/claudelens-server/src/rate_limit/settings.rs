//! Rate-limit settings: the single document §4.6 describes, cached for 60s.
//!
//! Grounded on `RateLimitService.get_settings`/`update_settings` in the
//! original backend: a cached settings snapshot with a TTL, invalidated on
//! update. Per the §9 Design Note on in-memory caches, an update publishes
//! a whole new snapshot (`ArcSwap::store`) rather than mutating fields in
//! place.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use claudelens_core::RateLimitAxis;
use parking_lot::Mutex;

/// Per-axis limit. `limit == 0` means unlimited (§4.6 Limit descriptor).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimitDescriptor {
    pub limit: u64,
    pub window: Duration,
    pub enabled: bool,
}

impl LimitDescriptor {
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            limit: 0,
            window: Duration::from_secs(3600),
            enabled: true,
        }
    }

    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.limit == 0
    }
}

/// The settings document: a descriptor per axis plus a global kill switch.
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub globally_enabled: bool,
    pub axes: BTreeMap<&'static str, LimitDescriptor>,
    pub updated_by: Option<String>,
}

impl RateLimitSettings {
    #[must_use]
    pub fn descriptor_for(&self, axis: RateLimitAxis) -> LimitDescriptor {
        self.axes
            .get(axis.as_str())
            .copied()
            .unwrap_or_else(LimitDescriptor::unlimited)
    }
}

impl Default for RateLimitSettings {
    /// Every axis defaults to unlimited until an admin configures otherwise,
    /// matching the original service's fall-through of `limit == 0`.
    fn default() -> Self {
        let mut axes = BTreeMap::new();
        for axis in RateLimitAxis::ALL {
            axes.insert(axis.as_str(), LimitDescriptor::unlimited());
        }
        Self {
            globally_enabled: true,
            axes,
            updated_by: None,
        }
    }
}

const CACHE_TTL: Duration = Duration::from_secs(60);

/// Process-local, time-based cache over the settings document (§4.6).
pub struct SettingsCache {
    snapshot: ArcSwap<RateLimitSettings>,
    loaded_at: Mutex<Instant>,
}

impl SettingsCache {
    #[must_use]
    pub fn new(initial: RateLimitSettings) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(initial),
            loaded_at: Mutex::new(Instant::now()),
        }
    }

    /// Current snapshot, regardless of cache age -- callers that need a
    /// fresh read should pair this with [`Self::is_stale`] and a reload from
    /// durable storage at their own layer.
    #[must_use]
    pub fn current(&self) -> Arc<RateLimitSettings> {
        self.snapshot.load_full()
    }

    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.loaded_at.lock().elapsed() >= CACHE_TTL
    }

    /// Publishes a whole new snapshot (§9 Design Note: writers replace,
    /// never mutate in place) and resets the cache clock. Used both by a
    /// reload-from-storage path and by the admin "update settings at
    /// runtime" supplemented feature (SPEC_FULL §B).
    pub fn publish(&self, settings: RateLimitSettings) {
        self.snapshot.store(Arc::new(settings));
        *self.loaded_at.lock() = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_unlimited_on_every_axis() {
        let settings = RateLimitSettings::default();
        for axis in RateLimitAxis::ALL {
            assert!(settings.descriptor_for(axis).is_unlimited());
        }
    }

    #[test]
    fn publish_replaces_snapshot_without_mutating_old_one() {
        let cache = SettingsCache::new(RateLimitSettings::default());
        let before = cache.current();

        let mut updated = RateLimitSettings::default();
        updated.axes.insert(
            "ingest",
            LimitDescriptor {
                limit: 10,
                window: Duration::from_secs(60),
                enabled: true,
            },
        );
        updated.updated_by = Some("admin-1".to_string());
        cache.publish(updated);

        assert!(before.descriptor_for(RateLimitAxis::Ingest).is_unlimited());
        assert_eq!(cache.current().descriptor_for(RateLimitAxis::Ingest).limit, 10);
    }

    #[test]
    fn fresh_cache_is_not_stale() {
        let cache = SettingsCache::new(RateLimitSettings::default());
        assert!(!cache.is_stale());
    }
}
