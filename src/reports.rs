//! Report aggregation
//!
//! Groups normalized, priced records into calendar (daily/weekly/monthly),
//! session, and fixed 5-hour-block buckets and computes per-bucket totals,
//! per-model breakdowns, and derived metrics. Bucketing is a pure function of
//! record attributes; records are never mutated.
//!
//! Costs are summed from per-record calculations rather than recomputed from
//! group totals, so model-level costs reflect per-model pricing even within a
//! single bucket. Records whose model cannot be priced still count toward
//! token totals but are excluded from cost totals and from their model's cost
//! entry; [`ReportAggregator::failed_calculations`] reports how many were
//! excluded by the most recent report generation.

use crate::models::{
    BlockReportEntry, CostBreakdown, ModelUsage, ReportEntry, SessionReportEntry, SortOrder,
    UsageRecord,
};
use crate::pricing::PricingResolver;
use anyhow::Result;
use chrono::{Datelike, DateTime, Duration, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use std::collections::{HashMap, HashSet};

/// Width of a usage block, in hours. Blocks are hour-of-day aligned and reset
/// at UTC midnight rather than rolling in a strict cadence from the epoch.
const BLOCK_HOURS: u32 = 5;

/// Aggregates usage records into report rows.
pub struct ReportAggregator<'a> {
    pricing: &'a PricingResolver,
    week_start: Weekday,
    failed_calculations: u64,
}

impl<'a> ReportAggregator<'a> {
    pub fn new(pricing: &'a PricingResolver) -> Self {
        Self {
            pricing,
            week_start: Weekday::Mon,
            failed_calculations: 0,
        }
    }

    /// Set the weekday on which weekly buckets begin. Default Monday.
    pub fn with_week_start(mut self, week_start: Weekday) -> Self {
        self.week_start = week_start;
        self
    }

    /// Records excluded from cost totals during the most recent report
    /// generation because their model could not be priced.
    pub fn failed_calculations(&self) -> u64 {
        self.failed_calculations
    }

    /// Usage grouped by calendar date, anchored at midnight UTC.
    pub fn daily_report(
        &mut self,
        records: &[UsageRecord],
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        order: SortOrder,
    ) -> Result<Vec<ReportEntry>> {
        self.calendar_report(records, start, end, order, |r| day_anchor(r.timestamp))
    }

    /// Usage grouped by calendar month, anchored at the first of the month.
    pub fn monthly_report(
        &mut self,
        records: &[UsageRecord],
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        order: SortOrder,
    ) -> Result<Vec<ReportEntry>> {
        self.calendar_report(records, start, end, order, |r| month_anchor(r.timestamp))
    }

    /// Usage grouped by week, anchored at the configured week-start day.
    pub fn weekly_report(
        &mut self,
        records: &[UsageRecord],
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        order: SortOrder,
    ) -> Result<Vec<ReportEntry>> {
        let week_start = self.week_start;
        self.calendar_report(records, start, end, order, move |r| {
            week_anchor(r.timestamp, week_start)
        })
    }

    fn calendar_report(
        &mut self,
        records: &[UsageRecord],
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        order: SortOrder,
        anchor: impl Fn(&UsageRecord) -> DateTime<Utc>,
    ) -> Result<Vec<ReportEntry>> {
        self.failed_calculations = 0;
        let filtered = filter_by_range(records, start, end)?;

        let mut groups: HashMap<DateTime<Utc>, Vec<&UsageRecord>> = HashMap::new();
        for record in filtered {
            groups.entry(anchor(record)).or_default().push(record);
        }

        let mut entries: Vec<ReportEntry> = groups
            .into_iter()
            .map(|(date, group)| {
                let totals = self.accumulate(&group);
                ReportEntry {
                    date,
                    total_tokens: totals.total_tokens,
                    input_tokens: totals.input_tokens,
                    output_tokens: totals.output_tokens,
                    cache_creation_tokens: totals.cache_creation_tokens,
                    cache_read_tokens: totals.cache_read_tokens,
                    total_cost: totals.total_cost,
                    model_breakdown: totals.model_breakdown,
                    record_count: totals.record_count,
                }
            })
            .collect();

        sort_entries(&mut entries, order, |e| e.date);
        Ok(entries)
    }

    /// Usage grouped by session id, anchored at each session's earliest
    /// record. Project attribution comes from the session's first record.
    pub fn session_report(
        &mut self,
        records: &[UsageRecord],
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        order: SortOrder,
    ) -> Result<Vec<SessionReportEntry>> {
        self.failed_calculations = 0;
        let filtered = filter_by_range(records, start, end)?;

        let mut groups: HashMap<&str, Vec<&UsageRecord>> = HashMap::new();
        for record in filtered {
            groups.entry(&record.session_id).or_default().push(record);
        }

        let mut entries: Vec<SessionReportEntry> = groups
            .into_iter()
            .map(|(session_id, mut group)| {
                group.sort_by_key(|r| r.timestamp);
                // Non-empty by construction: groups only exist for seen records
                let first = group[0];
                let last = group[group.len() - 1];
                let duration_minutes =
                    (last.timestamp - first.timestamp).num_seconds() as f64 / 60.0;

                let mut models_used: Vec<String> = group
                    .iter()
                    .map(|r| r.model.clone())
                    .collect::<HashSet<_>>()
                    .into_iter()
                    .collect();
                models_used.sort();

                let project_id = first.project_id.clone();
                let project_name = first.project_name.clone();
                let start_time = first.timestamp;
                let end_time = last.timestamp;

                let totals = self.accumulate(&group);
                SessionReportEntry {
                    session_id: session_id.to_string(),
                    start_time,
                    end_time,
                    duration_minutes,
                    total_tokens: totals.total_tokens,
                    input_tokens: totals.input_tokens,
                    output_tokens: totals.output_tokens,
                    cache_creation_tokens: totals.cache_creation_tokens,
                    cache_read_tokens: totals.cache_read_tokens,
                    total_cost: totals.total_cost,
                    model_breakdown: totals.model_breakdown,
                    models_used,
                    message_count: totals.record_count,
                    project_id,
                    project_name,
                }
            })
            .collect();

        sort_entries(&mut entries, order, |e| e.start_time);
        Ok(entries)
    }

    /// Usage grouped into 5-hour, hour-of-day-aligned blocks.
    pub fn blocks_report(
        &mut self,
        records: &[UsageRecord],
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        order: SortOrder,
    ) -> Result<Vec<BlockReportEntry>> {
        self.failed_calculations = 0;
        let filtered = filter_by_range(records, start, end)?;
        let now = Utc::now();

        let mut groups: HashMap<DateTime<Utc>, Vec<&UsageRecord>> = HashMap::new();
        for record in filtered {
            groups
                .entry(block_start(record.timestamp))
                .or_default()
                .push(record);
        }

        let mut entries: Vec<BlockReportEntry> = groups
            .into_iter()
            .map(|(block_start, mut group)| {
                let block_end = block_start + Duration::hours(BLOCK_HOURS as i64);

                group.sort_by_key(|r| r.timestamp);
                let active_duration_minutes = match (group.first(), group.last()) {
                    (Some(first), Some(last)) => {
                        (last.timestamp - first.timestamp).num_seconds() as f64 / 60.0
                    }
                    _ => 0.0,
                };

                let sessions_count = group
                    .iter()
                    .map(|r| r.session_id.as_str())
                    .collect::<HashSet<_>>()
                    .len() as u64;

                let totals = self.accumulate(&group);
                BlockReportEntry {
                    block_start,
                    block_end,
                    block_number: block_number(block_start),
                    total_tokens: totals.total_tokens,
                    input_tokens: totals.input_tokens,
                    output_tokens: totals.output_tokens,
                    cache_creation_tokens: totals.cache_creation_tokens,
                    cache_read_tokens: totals.cache_read_tokens,
                    total_cost: totals.total_cost,
                    model_breakdown: totals.model_breakdown,
                    sessions_count,
                    active_duration_minutes,
                    is_current_block: block_start <= now && now < block_end,
                }
            })
            .collect();

        sort_entries(&mut entries, order, |e| e.block_start);
        Ok(entries)
    }

    fn accumulate(&mut self, records: &[&UsageRecord]) -> BucketTotals {
        let mut totals = BucketTotals::default();
        for record in records {
            let cost = self.pricing.cost_for(record);
            if cost.is_none() {
                self.failed_calculations += 1;
            }
            totals.add(record, cost.as_ref());
        }
        totals
    }
}

#[derive(Default)]
struct BucketTotals {
    total_tokens: u64,
    input_tokens: u64,
    output_tokens: u64,
    cache_creation_tokens: u64,
    cache_read_tokens: u64,
    total_cost: f64,
    model_breakdown: HashMap<String, ModelUsage>,
    record_count: u64,
}

impl BucketTotals {
    fn add(&mut self, record: &UsageRecord, cost: Option<&CostBreakdown>) {
        self.total_tokens += record.total_tokens();
        self.input_tokens += record.input_tokens;
        self.output_tokens += record.output_tokens;
        self.cache_creation_tokens += record.cache_creation_tokens;
        self.cache_read_tokens += record.cache_read_tokens;
        self.record_count += 1;

        let entry = self.model_breakdown.entry(record.model.clone()).or_default();
        entry.tokens += record.total_tokens();
        entry.input_tokens += record.input_tokens;
        entry.output_tokens += record.output_tokens;
        entry.cache_creation_tokens += record.cache_creation_tokens;
        entry.cache_read_tokens += record.cache_read_tokens;
        entry.count += 1;

        if let Some(cost) = cost {
            self.total_cost += cost.total_cost;
            entry.cost += cost.total_cost;
        }
    }
}

/// Inclusive date-range filter. An inverted range is a contract violation
/// and fails fast rather than silently producing an empty report.
fn filter_by_range(
    records: &[UsageRecord],
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<Vec<&UsageRecord>> {
    if let (Some(s), Some(e)) = (start, end) {
        if e < s {
            anyhow::bail!("Invalid date range: end {} is before start {}", e, s);
        }
    }

    Ok(records
        .iter()
        .filter(|r| start.map_or(true, |s| r.timestamp >= s))
        .filter(|r| end.map_or(true, |e| r.timestamp <= e))
        .collect())
}

fn sort_entries<T, K: Ord>(entries: &mut [T], order: SortOrder, key: impl Fn(&T) -> K) {
    entries.sort_by_key(&key);
    if order == SortOrder::Desc {
        entries.reverse();
    }
}

fn day_anchor(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive().and_time(NaiveTime::MIN).and_utc()
}

fn month_anchor(ts: DateTime<Utc>) -> DateTime<Utc> {
    let date = ts.date_naive();
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
        .unwrap_or(date)
        .and_time(NaiveTime::MIN)
        .and_utc()
}

fn week_anchor(ts: DateTime<Utc>, week_start: Weekday) -> DateTime<Utc> {
    let date = ts.date_naive();
    let days_back =
        (date.weekday().num_days_from_monday() + 7 - week_start.num_days_from_monday()) % 7;
    (date - Duration::days(days_back as i64))
        .and_time(NaiveTime::MIN)
        .and_utc()
}

fn block_start(ts: DateTime<Utc>) -> DateTime<Utc> {
    let hour = (ts.hour() / BLOCK_HOURS) * BLOCK_HOURS;
    let time = NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN);
    ts.date_naive().and_time(time).and_utc()
}

/// Identification label: floor(hours since the Unix epoch / 5). Not proof of
/// contiguous 5-hour spans, since block windows reset at midnight.
fn block_number(block_start: DateTime<Utc>) -> i64 {
    block_start.timestamp().div_euclid(3600 * BLOCK_HOURS as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::TimestampParser;

    fn ts(s: &str) -> DateTime<Utc> {
        TimestampParser::parse(s).unwrap()
    }

    #[test]
    fn test_day_anchor() {
        assert_eq!(
            day_anchor(ts("2024-06-15T17:45:12Z")),
            ts("2024-06-15T00:00:00Z")
        );
    }

    #[test]
    fn test_month_anchor() {
        assert_eq!(
            month_anchor(ts("2024-06-15T17:45:12Z")),
            ts("2024-06-01T00:00:00Z")
        );
    }

    #[test]
    fn test_week_anchor_monday() {
        // 2024-06-15 is a Saturday
        assert_eq!(
            week_anchor(ts("2024-06-15T17:45:12Z"), Weekday::Mon),
            ts("2024-06-10T00:00:00Z")
        );
    }

    #[test]
    fn test_week_anchor_sunday_start() {
        assert_eq!(
            week_anchor(ts("2024-06-15T17:45:12Z"), Weekday::Sun),
            ts("2024-06-09T00:00:00Z")
        );
    }

    #[test]
    fn test_block_start_midnight_aligned() {
        assert_eq!(
            block_start(ts("2024-06-15T06:10:00Z")),
            ts("2024-06-15T05:00:00Z")
        );
        assert_eq!(
            block_start(ts("2024-06-15T07:45:00Z")),
            ts("2024-06-15T05:00:00Z")
        );
        assert_eq!(
            block_start(ts("2024-06-15T11:02:00Z")),
            ts("2024-06-15T10:00:00Z")
        );
        // Blocks reset at midnight, not at a rolling 5h cadence
        assert_eq!(
            block_start(ts("2024-06-15T23:59:00Z")),
            ts("2024-06-15T20:00:00Z")
        );
        assert_eq!(
            block_start(ts("2024-06-16T00:01:00Z")),
            ts("2024-06-16T00:00:00Z")
        );
    }

    #[test]
    fn test_block_number_epoch_label() {
        // 1970-01-01T00:00:00Z is block 0, 05:00 is block 1
        assert_eq!(block_number(ts("1970-01-01T00:00:00Z")), 0);
        assert_eq!(block_number(ts("1970-01-01T05:00:00Z")), 1);
    }
}
