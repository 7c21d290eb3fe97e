//! The Rate-Limit Engine (§4.6): ties settings, the sliding-window usage
//! store, and accounting together behind one `check` entry point.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use claudelens_core::RateLimitAxis;

use super::accounting::AccountingStore;
use super::settings::{RateLimitSettings, SettingsCache};
use super::usage::UsageRecordStore;

/// Outcome of one `check` call (§4.6 Enforcement).
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allowed,
    Denied { retry_after_secs: u64 },
}

impl Decision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Per-axis usage snapshot for the usage-stats endpoint shape (SPEC_FULL
/// §B, grounded on `RateLimitService.get_usage_stats`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct AxisUsage {
    pub axis: RateLimitAxis,
    pub current: u64,
    /// `None` means unlimited.
    pub limit: Option<u64>,
    /// `None` means unlimited.
    pub remaining: Option<u64>,
    pub reset_in_seconds: Option<u64>,
}

pub struct RateLimitEngine {
    settings: SettingsCache,
    usage: UsageRecordStore,
    accounting: AccountingStore,
}

impl RateLimitEngine {
    #[must_use]
    pub fn new(initial_settings: RateLimitSettings, accounting_retention: Duration) -> Self {
        Self {
            settings: SettingsCache::new(initial_settings),
            usage: UsageRecordStore::new(),
            accounting: AccountingStore::new(accounting_retention),
        }
    }

    #[must_use]
    pub fn settings(&self) -> Arc<RateLimitSettings> {
        self.settings.current()
    }

    /// Runtime settings update (SPEC_FULL §B): invalidates the cache by
    /// publishing a whole new snapshot, never mutating the old one.
    pub fn update_settings(&self, updated_by: Option<String>, apply: impl FnOnce(&mut RateLimitSettings)) {
        let mut next = (*self.settings.current()).clone();
        apply(&mut next);
        next.updated_by = updated_by;
        self.settings.publish(next);
    }

    pub fn accounting(&self) -> &AccountingStore {
        &self.accounting
    }

    /// Runs the four-step enforcement algorithm of §4.6 and records the
    /// outcome into accounting regardless of the decision. Accounting never
    /// fails the caller (§4.6 Independence) -- there is nothing to
    /// propagate since recording is infallible by construction.
    pub fn check(
        &self,
        user_id: &str,
        axis: RateLimitAxis,
        now: DateTime<Utc>,
        bytes: u64,
        latency_ms: Option<u64>,
    ) -> Decision {
        let settings = self.settings.current();
        let descriptor = settings.descriptor_for(axis);

        if !settings.globally_enabled || !descriptor.enabled || descriptor.is_unlimited() {
            self.accounting.record(user_id, axis, now, true, 0.0, bytes, latency_ms);
            return Decision::Allowed;
        }

        let since = now - chrono::Duration::from_std(descriptor.window).unwrap_or(chrono::Duration::zero());
        let count = self.usage.count_since(user_id, axis, since);
        let usage_ratio = count as f64 / descriptor.limit as f64;

        if count >= descriptor.limit {
            let retry_after_secs = self.usage.retry_after_secs(user_id, axis, now, descriptor.window);
            self.accounting
                .record(user_id, axis, now, false, usage_ratio, bytes, latency_ms);
            return Decision::Denied { retry_after_secs };
        }

        self.usage.record(user_id, axis, now, descriptor.window);
        self.accounting.record(user_id, axis, now, true, usage_ratio, bytes, latency_ms);
        Decision::Allowed
    }

    /// Per-axis current/limit/remaining/reset-in-seconds snapshot for one
    /// principal, across every axis (SPEC_FULL §B usage stats shape).
    #[must_use]
    pub fn usage_stats(&self, user_id: &str, now: DateTime<Utc>) -> Vec<AxisUsage> {
        let settings = self.settings.current();
        RateLimitAxis::ALL
            .into_iter()
            .map(|axis| {
                let descriptor = settings.descriptor_for(axis);
                if descriptor.is_unlimited() {
                    return AxisUsage {
                        axis,
                        current: self
                            .usage
                            .count_since(user_id, axis, now - chrono::Duration::from_std(descriptor.window).unwrap_or_default()),
                        limit: None,
                        remaining: None,
                        reset_in_seconds: None,
                    };
                }
                let since = now - chrono::Duration::from_std(descriptor.window).unwrap_or_default();
                let current = self.usage.count_since(user_id, axis, since);
                let remaining = descriptor.limit.saturating_sub(current);
                let reset_in_seconds = if current >= descriptor.limit {
                    Some(self.usage.retry_after_secs(user_id, axis, now, descriptor.window))
                } else {
                    None
                };
                AxisUsage {
                    axis,
                    current,
                    limit: Some(descriptor.limit),
                    remaining: Some(remaining),
                    reset_in_seconds,
                }
            })
            .collect()
    }
}
