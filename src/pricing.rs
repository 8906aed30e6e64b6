//! Pricing resolution and cost calculation
//!
//! Maps model identifiers to per-1k-token rates and computes record costs.
//! Resolution tries, in order: exact table match, bidirectional substring
//! match against cached keys, then a coarse model-family fallback
//! (opus/sonnet/haiku). A model matching none of these yields no cost for the
//! record - never a silent zero.
//!
//! Pricing lives in a local JSON cache file with a single `last_updated`
//! watermark; when the cache is missing or empty a built-in default table
//! seeds the resolver. Refreshing goes through the injectable
//! [`PricingSource`] trait so the transport stays outside the core; the stock
//! [`LiteLlmSource`] (feature `pricing`) pulls the LiteLLM price sheet.

use crate::models::{CostBreakdown, CostMode, CostTotals, ModelPricing, UsageRecord};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Default staleness threshold for the pricing cache, in days.
pub const DEFAULT_MAX_AGE_DAYS: i64 = 7;

/// Provider of a full pricing table. Implementations own the transport
/// (HTTP, fixture, whatever); the resolver only needs the mapping shape.
pub trait PricingSource {
    fn fetch_pricing(&self) -> Result<HashMap<String, ModelPricing>>;
}

/// On-disk cache layout: one shared watermark plus the rate table.
#[derive(Debug, Serialize, Deserialize)]
struct PricingCacheFile {
    last_updated: Option<DateTime<Utc>>,
    pricing: HashMap<String, ModelPricing>,
}

/// Options for constructing a [`PricingResolver`].
#[derive(Debug, Clone)]
pub struct PricingOptions {
    pub mode: CostMode,
    /// Disables all refresh attempts, including forced ones.
    pub offline: bool,
    /// Currency stamped onto refreshed pricing entries.
    pub currency: String,
    pub max_age_days: i64,
}

impl Default for PricingOptions {
    fn default() -> Self {
        Self {
            mode: CostMode::Auto,
            offline: false,
            currency: "USD".to_string(),
            max_age_days: DEFAULT_MAX_AGE_DAYS,
        }
    }
}

/// Status snapshot for callers that surface pricing state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingInfo {
    pub mode: CostMode,
    pub offline: bool,
    pub currency: String,
    pub last_updated: Option<DateTime<Utc>>,
    pub is_stale: bool,
    pub available_models: Vec<String>,
    pub cache_file_exists: bool,
}

/// Resolves model pricing and computes costs.
///
/// Owns its pricing table and watermark; refresh mutates only through
/// `&mut self`, so concurrent callers must serialize refreshes themselves.
pub struct PricingResolver {
    options: PricingOptions,
    cache_path: PathBuf,
    pricing: HashMap<String, ModelPricing>,
    last_updated: Option<DateTime<Utc>>,
}

impl PricingResolver {
    /// Build a resolver from the local cache file, falling back to the
    /// built-in default table when the cache is missing or unreadable.
    /// No refresh is attempted; use [`PricingResolver::with_source`] for the
    /// refresh-on-construction behavior.
    pub fn new(cache_path: impl Into<PathBuf>, options: PricingOptions) -> Self {
        let cache_path = cache_path.into();
        let (pricing, last_updated) = load_pricing_cache(&cache_path);

        let pricing = if pricing.is_empty() {
            info!("Using default pricing data");
            default_pricing().clone()
        } else {
            pricing
        };

        Self {
            options,
            cache_path,
            pricing,
            last_updated,
        }
    }

    /// Like [`PricingResolver::new`], but attempts a refresh through `source`
    /// when the cache is stale and offline mode is off.
    pub fn with_source(
        cache_path: impl Into<PathBuf>,
        options: PricingOptions,
        source: &dyn PricingSource,
    ) -> Self {
        let mut resolver = Self::new(cache_path, options);
        if !resolver.options.offline && resolver.is_stale() {
            if let Err(e) = resolver.refresh(source, false) {
                warn!(error = %e, "Initial pricing refresh failed, keeping cached pricing");
            }
        }
        resolver
    }

    /// True when the last refresh watermark is older than the configured max
    /// age, or when no refresh has ever happened.
    pub fn is_stale(&self) -> bool {
        match self.last_updated {
            None => true,
            Some(ts) => Utc::now() - ts > Duration::days(self.options.max_age_days),
        }
    }

    /// Refresh the pricing table from `source`.
    ///
    /// Returns `Ok(true)` when the table was updated and `Ok(false)` when the
    /// refresh was skipped (offline mode, or cache still fresh and not
    /// forced). A fetch failure is returned as an error and leaves the
    /// existing table untouched. Offline mode skips unconditionally, forced
    /// or not.
    pub fn refresh(&mut self, source: &dyn PricingSource, force: bool) -> Result<bool> {
        if self.options.offline {
            info!("Offline mode enabled, skipping pricing refresh");
            return Ok(false);
        }
        if !force && !self.is_stale() {
            debug!("Pricing cache is fresh, skipping refresh");
            return Ok(false);
        }

        let updated = source
            .fetch_pricing()
            .context("Failed to fetch pricing data")?;

        let now = Utc::now();
        for (model_name, mut pricing) in updated {
            pricing.currency = self.options.currency.clone();
            pricing.last_updated = Some(now);
            self.pricing.insert(model_name, pricing);
        }
        self.last_updated = Some(now);
        info!(models = self.pricing.len(), "Updated pricing data");

        if let Err(e) = self.save_cache() {
            warn!(error = %e, "Failed to persist pricing cache");
        }

        Ok(true)
    }

    /// Best-known pricing for a model: exact match, then substring match in
    /// either direction against cached keys (first match wins, iteration
    /// order unspecified), then the model-family fallback.
    pub fn resolve(&self, model_name: &str) -> Option<&ModelPricing> {
        if let Some(pricing) = self.pricing.get(model_name) {
            return Some(pricing);
        }

        for (cached_model, pricing) in &self.pricing {
            if model_name.contains(cached_model.as_str())
                || cached_model.contains(model_name)
            {
                debug!(cached = %cached_model, requested = %model_name, "Using substring pricing match");
                return Some(pricing);
            }
        }

        let lowered = model_name.to_lowercase();
        let family_key = if lowered.contains("opus") {
            OPUS_DEFAULT
        } else if lowered.contains("sonnet") {
            SONNET_DEFAULT
        } else if lowered.contains("haiku") {
            HAIKU_DEFAULT
        } else {
            warn!(model = %model_name, "No pricing found for model");
            return None;
        };

        default_pricing().get(family_key)
    }

    /// Cost of a single record, or None when its model cannot be priced.
    pub fn cost_for(&self, record: &UsageRecord) -> Option<CostBreakdown> {
        let pricing = self.resolve(&record.model)?;

        let input_cost = (record.input_tokens as f64 / 1000.0) * pricing.input_price_per_1k;
        let output_cost = (record.output_tokens as f64 / 1000.0) * pricing.output_price_per_1k;
        let cache_creation_cost =
            (record.cache_creation_tokens as f64 / 1000.0) * pricing.cache_creation_price_per_1k;
        let cache_read_cost =
            (record.cache_read_tokens as f64 / 1000.0) * pricing.cache_read_price_per_1k;

        Some(CostBreakdown {
            input_cost,
            output_cost,
            cache_creation_cost,
            cache_read_cost,
            total_cost: input_cost + output_cost + cache_creation_cost + cache_read_cost,
            currency: pricing.currency.clone(),
            model: record.model.clone(),
        })
    }

    /// Aggregate cost over a record set, with a per-model cost map. Records
    /// whose model cannot be priced are counted in `failed_calculations` and
    /// contribute nothing to the cost fields.
    pub fn cost_totals(&self, records: &[UsageRecord]) -> CostTotals {
        let mut totals = CostTotals::default();

        for record in records {
            match self.cost_for(record) {
                Some(cost) => {
                    totals.input_cost += cost.input_cost;
                    totals.output_cost += cost.output_cost;
                    totals.cache_creation_cost += cost.cache_creation_cost;
                    totals.cache_read_cost += cost.cache_read_cost;
                    totals.total_cost += cost.total_cost;
                    *totals.model_costs.entry(record.model.clone()).or_insert(0.0) +=
                        cost.total_cost;
                }
                None => totals.failed_calculations += 1,
            }
        }

        if totals.failed_calculations > 0 {
            warn!(
                failed = totals.failed_calculations,
                "Some records could not be priced"
            );
        }

        totals
    }

    /// Models with pricing currently available, sorted.
    pub fn available_models(&self) -> Vec<String> {
        let mut models: Vec<String> = self.pricing.keys().cloned().collect();
        models.sort();
        models
    }

    pub fn pricing_info(&self) -> PricingInfo {
        PricingInfo {
            mode: self.options.mode,
            offline: self.options.offline,
            currency: self.options.currency.clone(),
            last_updated: self.last_updated,
            is_stale: self.is_stale(),
            available_models: self.available_models(),
            cache_file_exists: self.cache_path.exists(),
        }
    }

    fn save_cache(&self) -> Result<()> {
        if let Some(parent) = self.cache_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create cache directory: {}", parent.display()))?;
        }

        let cache = PricingCacheFile {
            last_updated: self.last_updated,
            pricing: self.pricing.clone(),
        };
        let content =
            serde_json::to_string_pretty(&cache).context("Failed to serialize pricing cache")?;
        fs::write(&self.cache_path, content)
            .with_context(|| format!("Failed to write pricing cache: {}", self.cache_path.display()))?;

        debug!(path = %self.cache_path.display(), "Saved pricing cache");
        Ok(())
    }
}

fn load_pricing_cache(cache_path: &Path) -> (HashMap<String, ModelPricing>, Option<DateTime<Utc>>) {
    if !cache_path.exists() {
        return (HashMap::new(), None);
    }

    let content = match fs::read_to_string(cache_path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %cache_path.display(), error = %e, "Error reading pricing cache");
            return (HashMap::new(), None);
        }
    };

    match serde_json::from_str::<PricingCacheFile>(&content) {
        Ok(mut cache) => {
            for pricing in cache.pricing.values_mut() {
                pricing.last_updated = cache.last_updated;
            }
            info!(models = cache.pricing.len(), "Loaded pricing cache");
            (cache.pricing, cache.last_updated)
        }
        Err(e) => {
            warn!(path = %cache_path.display(), error = %e, "Error parsing pricing cache");
            (HashMap::new(), None)
        }
    }
}

const OPUS_DEFAULT: &str = "claude-3-opus-20240229";
const SONNET_DEFAULT: &str = "claude-3-5-sonnet-20241022";
const HAIKU_DEFAULT: &str = "claude-3-haiku-20240307";

/// Built-in rate table used to seed an empty cache and as the family
/// fallback target.
pub fn default_pricing() -> &'static HashMap<String, ModelPricing> {
    static TABLE: OnceLock<HashMap<String, ModelPricing>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let entries = [
            (OPUS_DEFAULT, 15.0, 75.0, 18.75, 1.5),
            (SONNET_DEFAULT, 3.0, 15.0, 3.75, 0.3),
            (HAIKU_DEFAULT, 0.25, 1.25, 0.3, 0.03),
        ];

        entries
            .into_iter()
            .map(|(name, input, output, cache_creation, cache_read)| {
                (
                    name.to_string(),
                    ModelPricing {
                        model_name: name.to_string(),
                        input_price_per_1k: input,
                        output_price_per_1k: output,
                        cache_creation_price_per_1k: cache_creation,
                        cache_read_price_per_1k: cache_read,
                        currency: "USD".to_string(),
                        last_updated: None,
                    },
                )
            })
            .collect()
    })
}

/// Stock pricing source backed by the LiteLLM price sheet. The sheet quotes
/// per-token costs; rates are converted to per-1k on ingest. Cache bucket
/// costs missing from the sheet fall back to the input rate.
#[cfg(feature = "pricing")]
pub struct LiteLlmSource {
    url: String,
}

#[cfg(feature = "pricing")]
impl LiteLlmSource {
    const PRICING_URL: &'static str =
        "https://raw.githubusercontent.com/BerriAI/litellm/main/model_prices_and_context_window.json";

    pub fn new() -> Self {
        Self {
            url: Self::PRICING_URL.to_string(),
        }
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[cfg(feature = "pricing")]
impl Default for LiteLlmSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "pricing")]
impl PricingSource for LiteLlmSource {
    fn fetch_pricing(&self) -> Result<HashMap<String, ModelPricing>> {
        info!("Fetching model pricing from LiteLLM");

        let response = reqwest::blocking::get(&self.url)
            .context("Failed to fetch pricing data from LiteLLM")?;
        let all_pricing: serde_json::Value = response
            .json()
            .context("Failed to parse pricing data JSON")?;

        let mut pricing = HashMap::new();
        if let Some(models) = all_pricing.as_object() {
            for (model_name, data) in models {
                if !model_name.starts_with("claude-") {
                    continue;
                }

                let per_1k = |key: &str| {
                    data.get(key)
                        .and_then(serde_json::Value::as_f64)
                        .map(|v| v * 1000.0)
                };
                let Some(input) = per_1k("input_cost_per_token") else {
                    continue;
                };
                let output = per_1k("output_cost_per_token").unwrap_or(0.0);

                pricing.insert(
                    model_name.clone(),
                    ModelPricing {
                        model_name: model_name.clone(),
                        input_price_per_1k: input,
                        output_price_per_1k: output,
                        cache_creation_price_per_1k: per_1k("cache_creation_input_token_cost")
                            .unwrap_or(input),
                        cache_read_price_per_1k: per_1k("cache_read_input_token_cost")
                            .unwrap_or(input),
                        currency: "USD".to_string(),
                        last_updated: None,
                    },
                );
            }
        }

        info!(models = pricing.len(), "Fetched pricing");
        Ok(pricing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn offline_resolver() -> PricingResolver {
        PricingResolver::new(
            PathBuf::from("/nonexistent/pricing_cache.json"),
            PricingOptions {
                offline: true,
                ..PricingOptions::default()
            },
        )
    }

    fn record(model: &str, input: u64, output: u64) -> UsageRecord {
        UsageRecord {
            timestamp: Utc::now(),
            session_id: "s".to_string(),
            model: model.to_string(),
            input_tokens: input,
            output_tokens: output,
            cache_creation_tokens: 0,
            cache_read_tokens: 0,
            project_id: None,
            project_name: None,
            message_id: None,
            conversation_id: None,
        }
    }

    #[test]
    fn test_exact_match() {
        let resolver = offline_resolver();
        let pricing = resolver.resolve("claude-3-5-sonnet-20241022").unwrap();
        assert_eq!(pricing.input_price_per_1k, 3.0);
    }

    #[test]
    fn test_substring_match() {
        let resolver = offline_resolver();
        // Prefix of a cached key
        let pricing = resolver.resolve("claude-3-opus").unwrap();
        assert_eq!(pricing.input_price_per_1k, 15.0);
    }

    #[test]
    fn test_family_fallback() {
        let resolver = offline_resolver();
        let pricing = resolver.resolve("anthropic/next-haiku-v9").unwrap();
        assert_eq!(pricing.model_name, "claude-3-haiku-20240307");
    }

    #[test]
    fn test_unknown_model() {
        let resolver = offline_resolver();
        assert!(resolver.resolve("mystery-model-9000").is_none());
    }

    #[test]
    fn test_cost_formula() {
        let resolver = offline_resolver();
        let cost = resolver
            .cost_for(&record("claude-3-5-sonnet-20241022", 1000, 500))
            .unwrap();
        // 1000/1000*3 + 500/1000*15
        assert!((cost.input_cost - 3.0).abs() < 1e-9);
        assert!((cost.output_cost - 7.5).abs() < 1e-9);
        assert!((cost.total_cost - 10.5).abs() < 1e-9);
        assert_eq!(cost.currency, "USD");
    }

    #[test]
    fn test_cost_totals_counts_failures() {
        let resolver = offline_resolver();
        let records = vec![
            record("claude-3-5-sonnet-20241022", 1000, 500),
            record("mystery-model-9000", 1000, 500),
        ];

        let totals = resolver.cost_totals(&records);
        assert_eq!(totals.failed_calculations, 1);
        assert!((totals.total_cost - 10.5).abs() < 1e-9);
        assert_eq!(totals.model_costs.len(), 1);
        assert!(!totals.model_costs.contains_key("mystery-model-9000"));
    }

    #[test]
    fn test_staleness_boundaries() {
        let mut resolver = offline_resolver();

        resolver.last_updated = Some(Utc::now() - Duration::days(8));
        assert!(resolver.is_stale());

        resolver.last_updated = Some(Utc::now() - Duration::days(6));
        assert!(!resolver.is_stale());

        resolver.last_updated = None;
        assert!(resolver.is_stale());
    }

    struct FailingSource;
    impl PricingSource for FailingSource {
        fn fetch_pricing(&self) -> Result<HashMap<String, ModelPricing>> {
            anyhow::bail!("network down")
        }
    }

    #[test]
    fn test_refresh_failure_keeps_table() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = PricingResolver::new(
            dir.path().join("pricing_cache.json"),
            PricingOptions::default(),
        );
        let before = resolver.available_models();

        let result = resolver.refresh(&FailingSource, true);
        assert!(result.is_err());
        assert_eq!(resolver.available_models(), before);
    }

    #[test]
    fn test_offline_blocks_forced_refresh() {
        struct PanickingSource;
        impl PricingSource for PanickingSource {
            fn fetch_pricing(&self) -> Result<HashMap<String, ModelPricing>> {
                panic!("refresh must not be attempted in offline mode");
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut resolver = PricingResolver::new(
            dir.path().join("pricing_cache.json"),
            PricingOptions {
                offline: true,
                ..PricingOptions::default()
            },
        );

        assert!(!resolver.refresh(&PanickingSource, true).unwrap());
    }

    struct FixtureSource(HashMap<String, ModelPricing>);
    impl PricingSource for FixtureSource {
        fn fetch_pricing(&self) -> Result<HashMap<String, ModelPricing>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_refresh_persists_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("pricing_cache.json");

        let source = FixtureSource(
            [(
                "claude-test-1".to_string(),
                ModelPricing {
                    model_name: "claude-test-1".to_string(),
                    input_price_per_1k: 1.0,
                    output_price_per_1k: 2.0,
                    cache_creation_price_per_1k: 1.25,
                    cache_read_price_per_1k: 0.1,
                    currency: "USD".to_string(),
                    last_updated: None,
                },
            )]
            .into_iter()
            .collect(),
        );

        let mut resolver =
            PricingResolver::new(cache_path.clone(), PricingOptions::default());
        assert!(resolver.refresh(&source, true).unwrap());

        // A fresh resolver picks the refreshed table up from disk
        let reloaded = PricingResolver::new(cache_path, PricingOptions::default());
        assert!(!reloaded.is_stale());
        let pricing = reloaded.resolve("claude-test-1").unwrap();
        assert_eq!(pricing.output_price_per_1k, 2.0);
    }
}
