//! Core Data Models
//!
//! Data structures for the usage pipeline, in the order they flow:
//!
//! 1. **Normalized input**: [`UsageRecord`] - one canonical usage event extracted
//!    from a JSONL line
//! 2. **Pricing**: [`ModelPricing`] - per-1k-token rates for a model;
//!    [`CostBreakdown`] and [`CostTotals`] - computed costs for a record or a
//!    record set
//! 3. **Reports**: [`ReportEntry`], [`SessionReportEntry`], [`BlockReportEntry`] -
//!    aggregated rows produced by the report aggregator, with a per-model
//!    [`ModelUsage`] breakdown
//!
//! Report rows serialize with camelCase field names so external renderers and
//! exporters can consume them directly. Cost results are transient and never
//! persisted; they are recomputed whenever pricing or the record set changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One normalized model-invocation usage event.
///
/// Every materialized record has a timestamp and a model; lines where either
/// could not be extracted are dropped during normalization, never nulled.
/// Token counts default to zero when the source line omitted them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub project_id: Option<String>,
    pub project_name: Option<String>,
    pub message_id: Option<String>,
    pub conversation_id: Option<String>,
}

impl UsageRecord {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_creation_tokens + self.cache_read_tokens
    }
}

/// Per-model rates, expressed as price per 1000 tokens in each bucket.
///
/// `last_updated` mirrors the shared cache watermark and is not written per
/// entry; the cache file carries a single top-level timestamp instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub model_name: String,
    pub input_price_per_1k: f64,
    pub output_price_per_1k: f64,
    pub cache_creation_price_per_1k: f64,
    pub cache_read_price_per_1k: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(skip)]
    pub last_updated: Option<DateTime<Utc>>,
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Cost of a single record, split by token bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostBreakdown {
    pub input_cost: f64,
    pub output_cost: f64,
    pub cache_creation_cost: f64,
    pub cache_read_cost: f64,
    pub total_cost: f64,
    pub currency: String,
    pub model: String,
}

/// Aggregated cost over a record set.
///
/// Records whose model could not be priced contribute nothing to the cost
/// fields and are counted in `failed_calculations` instead.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CostTotals {
    pub input_cost: f64,
    pub output_cost: f64,
    pub cache_creation_cost: f64,
    pub cache_read_cost: f64,
    pub total_cost: f64,
    pub model_costs: HashMap<String, f64>,
    pub failed_calculations: u64,
}

/// Per-model slice of a report bucket.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsage {
    pub tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub cost: f64,
    pub count: u64,
}

/// One row of a daily/weekly/monthly report. `date` is the bucket anchor:
/// midnight of the day, the configured week start, or the first of the month.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportEntry {
    pub date: DateTime<Utc>,
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub total_cost: f64,
    pub model_breakdown: HashMap<String, ModelUsage>,
    pub record_count: u64,
}

/// One row of a session report, anchored at the session's earliest record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReportEntry {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_minutes: f64,
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub total_cost: f64,
    pub model_breakdown: HashMap<String, ModelUsage>,
    pub models_used: Vec<String>,
    pub message_count: u64,
    pub project_id: Option<String>,
    pub project_name: Option<String>,
}

/// One row of a 5-hour-block report.
///
/// Blocks are hour-of-day aligned and reset at UTC midnight; they are not a
/// rolling 5-hour cadence from the epoch. `block_number` is derived from the
/// epoch (`floor(hours_since_epoch / 5)`) and serves as an identification
/// label only - consecutive blocks are not guaranteed consecutive numbers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockReportEntry {
    pub block_start: DateTime<Utc>,
    pub block_end: DateTime<Utc>,
    pub block_number: i64,
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub total_cost: f64,
    pub model_breakdown: HashMap<String, ModelUsage>,
    pub sessions_count: u64,
    pub active_duration_minutes: f64,
    pub is_current_block: bool,
}

/// Sort order for report rows, by bucket anchor. Defaults to newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Cost calculation mode.
///
/// Carried through configuration and surfaced in pricing status for callers
/// that distinguish pre-computed from derived costs. Cost computation itself
/// does not currently branch on it: all costs are derived from token counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostMode {
    #[default]
    Auto,
    Calculate,
    Display,
}
