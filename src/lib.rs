//! Usage Guru
//!
//! Core pipeline for analyzing AI-model usage logs: heterogeneous
//! newline-delimited JSON records are normalized into canonical usage events,
//! priced against a versioned per-model rate table, and aggregated into
//! time- and entity-partitioned report views.
//!
//! ## Pipeline
//!
//! Data flows strictly downstream, with no component calling back upstream:
//!
//! 1. [`RecordNormalizer`] discovers usage-shaped JSONL files under configured
//!    roots and parses each line into a [`UsageRecord`], tolerating malformed
//!    lines and multiple historical field-naming schemes
//! 2. [`PricingResolver`] maps model identifiers to per-1k-token rates with
//!    exact, substring, and family-fallback matching, backed by a persisted
//!    cache with a staleness policy and an offline mode
//! 3. [`ReportAggregator`] buckets priced records by calendar day/week/month,
//!    by session, and by fixed 5-hour blocks, producing sorted,
//!    cost-annotated report rows
//!
//! The pipeline is synchronous and single-threaded; each component owns its
//! state and exposes explicit reload/refresh operations, so instances are
//! independently constructible and testable.
//!
//! ## Example
//!
//! ```no_run
//! use usage_guru::{
//!     PricingOptions, PricingResolver, RecordNormalizer, ReportAggregator, SortOrder,
//! };
//!
//! # fn example() -> anyhow::Result<()> {
//! let mut normalizer = RecordNormalizer::with_default_paths();
//! let records = normalizer.load_records().to_vec();
//!
//! let pricing = PricingResolver::new("pricing_cache.json", PricingOptions::default());
//! let mut aggregator = ReportAggregator::new(&pricing);
//!
//! let daily = aggregator.daily_report(&records, None, None, SortOrder::Desc)?;
//! for entry in daily {
//!     println!("{}: {} tokens, ${:.2}", entry.date, entry.total_tokens, entry.total_cost);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Types
//!
//! - [`UsageRecord`] - canonical normalized usage event
//! - [`ModelPricing`] - per-1k-token rates for one model
//! - [`CostBreakdown`] / [`CostTotals`] - computed costs, never persisted
//! - [`ReportEntry`] / [`SessionReportEntry`] / [`BlockReportEntry`] -
//!   aggregated report rows owned by the caller once returned

pub mod config;
pub mod logging;
pub mod models;
pub mod normalizer;
pub mod pricing;
pub mod reports;
pub mod timestamp;

pub use config::Config;
pub use models::*;
pub use normalizer::{default_data_paths, Project, RecordNormalizer};
pub use pricing::{PricingInfo, PricingOptions, PricingResolver, PricingSource};
pub use reports::ReportAggregator;
pub use timestamp::TimestampParser;

#[cfg(feature = "pricing")]
pub use pricing::LiteLlmSource;
