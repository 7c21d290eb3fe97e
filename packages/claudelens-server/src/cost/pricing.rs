//! Remote pricing table fetch, caching, and per-message cost computation
//! (§4.5). Grounded on the `CostCalculationService` approach in the
//! original backend: a flat `{input, output, cache_creation, cache_read}`
//! per-token price map fetched once per process lifetime, falling back to a
//! built-in default when the remote table has no entry for a model.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use claudelens_core::TokenUsage;
use tracing::warn;

/// Per-token prices for one model, in USD per token.
#[derive(Debug, Clone, Copy, Default, serde::Deserialize)]
pub struct ModelPricing {
    #[serde(default, rename = "input_cost_per_token")]
    pub input: f64,
    #[serde(default, rename = "output_cost_per_token")]
    pub output: f64,
    #[serde(default, rename = "cache_creation_input_token_cost")]
    pub cache_creation: f64,
    #[serde(default, rename = "cache_read_input_token_cost")]
    pub cache_read: f64,
}

impl ModelPricing {
    /// Cost in USD for the given usage, never negative (§4.5).
    #[must_use]
    pub fn cost_usd(&self, usage: TokenUsage) -> f64 {
        let cost = usage.input_tokens as f64 * self.input
            + usage.output_tokens as f64 * self.output
            + usage.cache_creation_input_tokens as f64 * self.cache_creation
            + usage.cache_read_input_tokens as f64 * self.cache_read;
        cost.max(0.0)
    }
}

/// A published pricing snapshot. Readers always see a complete, consistent
/// table (§9 Design Note: writers publish a whole new snapshot rather than
/// mutating in place).
#[derive(Debug, Default)]
struct Snapshot {
    models: HashMap<String, ModelPricing>,
}

/// Built-in default prices, used when the remote table has no entry for a
/// model family (§4.5). Representative of Claude model pricing at time of
/// writing; not authoritative.
fn builtin_defaults() -> HashMap<String, ModelPricing> {
    let mut defaults = HashMap::new();
    defaults.insert(
        "claude-3-5-sonnet".to_string(),
        ModelPricing {
            input: 3.0e-6,
            output: 15.0e-6,
            cache_creation: 3.75e-6,
            cache_read: 0.3e-6,
        },
    );
    defaults.insert(
        "claude-3-opus".to_string(),
        ModelPricing {
            input: 15.0e-6,
            output: 75.0e-6,
            cache_creation: 18.75e-6,
            cache_read: 1.5e-6,
        },
    );
    defaults.insert(
        "claude-3-haiku".to_string(),
        ModelPricing {
            input: 0.25e-6,
            output: 1.25e-6,
            cache_creation: 0.3e-6,
            cache_read: 0.03e-6,
        },
    );
    defaults
}

/// Strips a provider prefix (`"anthropic/claude-3..."` -> `"claude-3..."`)
/// the way `_map_model_name` does in the original service.
fn normalize_model_name(model: &str) -> &str {
    model.strip_prefix("anthropic/").unwrap_or(model)
}

fn family_of(model: &str) -> &str {
    // Strip a trailing date suffix like "-20241022" if present, matching the
    // family-level fallback the original service relies on for unseen
    // snapshot dates of a known model line.
    model.rsplit_once('-').map_or(model, |(prefix, suffix)| {
        if suffix.len() == 8 && suffix.chars().all(|c| c.is_ascii_digit()) {
            prefix
        } else {
            model
        }
    })
}

/// Fetches and caches the remote pricing table, falling back to built-in
/// defaults per model family.
pub struct PricingTable {
    cache: ArcSwap<Snapshot>,
    pricing_url: String,
}

impl PricingTable {
    #[must_use]
    pub fn new(pricing_url: impl Into<String>) -> Self {
        Self {
            cache: ArcSwap::from_pointee(Snapshot::default()),
            pricing_url: pricing_url.into(),
        }
    }

    /// Fetches the remote table once per process lifetime; subsequent calls
    /// return the cached snapshot immediately. Failure to fetch falls back
    /// to an empty remote table (which in turn falls back to built-in
    /// defaults per-model) rather than failing the caller -- cost
    /// computation must never be blocked by a flaky upstream (§4.5,
    /// `UpstreamFailure` retried with bounded backoff at its own layer).
    pub async fn refresh(&self) {
        match reqwest::get(&self.pricing_url).await {
            Ok(resp) => match resp.json::<HashMap<String, ModelPricing>>().await {
                Ok(models) => {
                    self.cache.store(Arc::new(Snapshot { models }));
                }
                Err(err) => warn!(error = %err, "pricing table response was not parseable"),
            },
            Err(err) => warn!(error = %err, "failed to fetch pricing table"),
        }
    }

    /// Looks up per-token pricing for a model, falling back to the built-in
    /// default for its family when the remote table has no entry.
    #[must_use]
    pub fn pricing_for(&self, model: &str) -> ModelPricing {
        let normalized = normalize_model_name(model);
        let snapshot = self.cache.load();
        if let Some(pricing) = snapshot.models.get(normalized) {
            return *pricing;
        }
        let defaults = builtin_defaults();
        defaults
            .get(family_of(normalized))
            .copied()
            .unwrap_or_default()
    }

    /// Computes cost in micro-units of a major currency unit (1 unit =
    /// 1e-6 currency), rounded to six decimal digits of the major unit
    /// before conversion (§4.5, §4.4 Cost computation).
    #[must_use]
    pub fn compute_cost_micros(&self, model: &str, usage: TokenUsage) -> i64 {
        let pricing = self.pricing_for(model);
        let cost_usd = pricing.cost_usd(usage);
        let rounded = (cost_usd * 1_000_000.0).round() / 1_000_000.0;
        (rounded * 1_000_000.0).round() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_model_without_remote_data_yields_zero_pricing() {
        let table = PricingTable::new("http://example.invalid/pricing.json");
        let pricing = table.pricing_for("some-unrecognized-model");
        assert_eq!(pricing.input, 0.0);
    }

    #[test]
    fn known_family_falls_back_to_builtin_default() {
        let table = PricingTable::new("http://example.invalid/pricing.json");
        let pricing = table.pricing_for("claude-3-5-sonnet-20241022");
        assert!(pricing.input > 0.0);
    }

    #[test]
    fn cost_is_never_negative() {
        let pricing = ModelPricing {
            input: 1.0e-6,
            output: 1.0e-6,
            cache_creation: 0.0,
            cache_read: 0.0,
        };
        let usage = TokenUsage {
            input_tokens: 100,
            ..Default::default()
        };
        assert!(pricing.cost_usd(usage) >= 0.0);
    }

    #[test]
    fn compute_cost_micros_sums_all_axes() {
        let table = PricingTable::new("http://example.invalid/pricing.json");
        let usage = TokenUsage {
            input_tokens: 1_000_000,
            output_tokens: 1_000_000,
            cache_creation_input_tokens: 0,
            cache_read_input_tokens: 0,
        };
        let micros = table.compute_cost_micros("claude-3-5-sonnet-20241022", usage);
        // 1M input tokens @ 3.0e-6/token = $3; 1M output @ 15e-6 = $15; total $18.
        assert_eq!(micros, 18_000_000);
    }
}
