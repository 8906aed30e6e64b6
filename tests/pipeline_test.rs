use chrono::{DateTime, Utc};
use tempfile::TempDir;
use usage_guru::{
    PricingOptions, PricingResolver, RecordNormalizer, ReportAggregator, SortOrder, UsageRecord,
};

mod common;
use common::{usage_line, write_jsonl};

fn offline_pricing() -> PricingResolver {
    PricingResolver::new(
        std::path::PathBuf::from("/nonexistent/pricing_cache.json"),
        PricingOptions {
            offline: true,
            ..PricingOptions::default()
        },
    )
}

fn ts(s: &str) -> DateTime<Utc> {
    usage_guru::TimestampParser::parse(s).unwrap()
}

fn record(timestamp: &str, session_id: &str, model: &str, input: u64, output: u64) -> UsageRecord {
    UsageRecord {
        timestamp: ts(timestamp),
        session_id: session_id.to_string(),
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
fn calendar_reports_preserve_token_totals() -> anyhow::Result<()> {
    let records = vec![
        record("2024-06-01T10:00:00Z", "s1", "claude-3-5-sonnet-20241022", 100, 50),
        record("2024-06-01T22:00:00Z", "s1", "claude-3-5-sonnet-20241022", 200, 80),
        record("2024-06-15T09:00:00Z", "s2", "claude-3-haiku-20240307", 10, 5),
        record("2024-07-02T09:00:00Z", "s3", "claude-3-opus-20240229", 40, 20),
    ];
    let input_total: u64 = records.iter().map(|r| r.total_tokens()).sum();

    let pricing = offline_pricing();
    let mut aggregator = ReportAggregator::new(&pricing);

    for entries in [
        aggregator.daily_report(&records, None, None, SortOrder::Desc)?,
        aggregator.weekly_report(&records, None, None, SortOrder::Desc)?,
        aggregator.monthly_report(&records, None, None, SortOrder::Desc)?,
    ] {
        let bucketed: u64 = entries.iter().map(|e| e.total_tokens).sum();
        assert_eq!(bucketed, input_total);
    }

    let daily = aggregator.daily_report(&records, None, None, SortOrder::Asc)?;
    assert_eq!(daily.len(), 3);
    assert_eq!(daily[0].date, ts("2024-06-01T00:00:00Z"));
    assert_eq!(daily[0].record_count, 2);
    Ok(())
}

#[test]
fn daily_cost_matches_rate_table() -> anyhow::Result<()> {
    let records = vec![record(
        "2024-06-01T10:00:00Z",
        "s1",
        "claude-3-5-sonnet-20241022",
        1000,
        500,
    )];

    let pricing = offline_pricing();
    let mut aggregator = ReportAggregator::new(&pricing);
    let daily = aggregator.daily_report(&records, None, None, SortOrder::Desc)?;

    // 1000/1000*3 + 500/1000*15 = 10.5
    assert!((daily[0].total_cost - 10.5).abs() < 1e-9);
    let breakdown = &daily[0].model_breakdown["claude-3-5-sonnet-20241022"];
    assert!((breakdown.cost - 10.5).abs() < 1e-9);
    assert_eq!(breakdown.count, 1);
    Ok(())
}

#[test]
fn session_report_metrics() -> anyhow::Result<()> {
    let records = vec![
        record("2024-06-01T10:00:00Z", "sess-x", "claude-3-5-sonnet-20241022", 10, 5),
        record("2024-06-01T10:45:00Z", "sess-x", "claude-3-haiku-20240307", 10, 5),
        record("2024-06-01T12:00:00Z", "sess-y", "claude-3-haiku-20240307", 10, 5),
    ];

    let pricing = offline_pricing();
    let mut aggregator = ReportAggregator::new(&pricing);
    let sessions = aggregator.session_report(&records, None, None, SortOrder::Asc)?;

    assert_eq!(sessions.len(), 2);
    let x = &sessions[0];
    assert_eq!(x.session_id, "sess-x");
    assert_eq!(x.message_count, 2);
    assert!((x.duration_minutes - 45.0).abs() < 1e-9);
    assert_eq!(
        x.models_used,
        vec!["claude-3-5-sonnet-20241022", "claude-3-haiku-20240307"]
    );

    let y = &sessions[1];
    assert_eq!(y.message_count, 1);
    assert_eq!(y.duration_minutes, 0.0);
    Ok(())
}

#[test]
fn blocks_are_midnight_aligned_five_hour_windows() -> anyhow::Result<()> {
    let records = vec![
        record("2024-06-15T06:10:00Z", "s1", "claude-3-haiku-20240307", 1, 1),
        record("2024-06-15T07:45:00Z", "s2", "claude-3-haiku-20240307", 1, 1),
        record("2024-06-15T11:02:00Z", "s1", "claude-3-haiku-20240307", 1, 1),
    ];

    let pricing = offline_pricing();
    let mut aggregator = ReportAggregator::new(&pricing);
    let blocks = aggregator.blocks_report(&records, None, None, SortOrder::Asc)?;

    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].block_start, ts("2024-06-15T05:00:00Z"));
    assert_eq!(blocks[0].block_end, ts("2024-06-15T10:00:00Z"));
    assert_eq!(blocks[0].sessions_count, 2);
    assert!((blocks[0].active_duration_minutes - 95.0).abs() < 1e-9);
    assert!(!blocks[0].is_current_block);

    assert_eq!(blocks[1].block_start, ts("2024-06-15T10:00:00Z"));
    assert_eq!(blocks[1].sessions_count, 1);
    assert_eq!(blocks[1].active_duration_minutes, 0.0);
    Ok(())
}

#[test]
fn unpriceable_records_count_tokens_but_not_cost() -> anyhow::Result<()> {
    let records = vec![
        record("2024-06-01T10:00:00Z", "s1", "claude-3-5-sonnet-20241022", 1000, 500),
        record("2024-06-01T11:00:00Z", "s1", "mystery-model-9000", 1000, 500),
    ];

    let pricing = offline_pricing();
    let mut aggregator = ReportAggregator::new(&pricing);
    let daily = aggregator.daily_report(&records, None, None, SortOrder::Desc)?;

    assert_eq!(daily.len(), 1);
    let entry = &daily[0];
    // Tokens from both records, cost only from the priced one
    assert_eq!(entry.total_tokens, 3000);
    assert!((entry.total_cost - 10.5).abs() < 1e-9);

    let mystery = &entry.model_breakdown["mystery-model-9000"];
    assert_eq!(mystery.tokens, 1500);
    assert_eq!(mystery.cost, 0.0);

    assert_eq!(aggregator.failed_calculations(), 1);
    Ok(())
}

#[test]
fn inverted_date_range_fails_fast() {
    let pricing = offline_pricing();
    let mut aggregator = ReportAggregator::new(&pricing);

    let result = aggregator.daily_report(
        &[],
        Some(ts("2024-06-02T00:00:00Z")),
        Some(ts("2024-06-01T00:00:00Z")),
        SortOrder::Desc,
    );
    assert!(result.is_err());
}

#[test]
fn date_range_filter_is_inclusive() -> anyhow::Result<()> {
    let records = vec![
        record("2024-06-01T00:00:00Z", "s1", "claude-3-haiku-20240307", 1, 1),
        record("2024-06-02T12:00:00Z", "s1", "claude-3-haiku-20240307", 1, 1),
        record("2024-06-03T00:00:00Z", "s1", "claude-3-haiku-20240307", 1, 1),
        record("2024-06-04T00:00:00Z", "s1", "claude-3-haiku-20240307", 1, 1),
    ];

    let pricing = offline_pricing();
    let mut aggregator = ReportAggregator::new(&pricing);
    let daily = aggregator.daily_report(
        &records,
        Some(ts("2024-06-01T00:00:00Z")),
        Some(ts("2024-06-03T00:00:00Z")),
        SortOrder::Asc,
    )?;

    assert_eq!(daily.len(), 3);
    assert_eq!(daily[0].date, ts("2024-06-01T00:00:00Z"));
    assert_eq!(daily[2].date, ts("2024-06-03T00:00:00Z"));
    Ok(())
}

#[test]
fn sort_order_defaults_to_descending_anchors() -> anyhow::Result<()> {
    let records = vec![
        record("2024-06-01T10:00:00Z", "s1", "claude-3-haiku-20240307", 1, 1),
        record("2024-06-02T10:00:00Z", "s1", "claude-3-haiku-20240307", 1, 1),
    ];

    let pricing = offline_pricing();
    let mut aggregator = ReportAggregator::new(&pricing);

    let desc = aggregator.daily_report(&records, None, None, SortOrder::default())?;
    assert!(desc[0].date > desc[1].date);

    let asc = aggregator.daily_report(&records, None, None, SortOrder::Asc)?;
    assert!(asc[0].date < asc[1].date);
    Ok(())
}

#[test]
fn end_to_end_files_to_daily_report() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    write_jsonl(
        &temp.path().join("projects").join("-home-user-app"),
        "session.jsonl",
        &[
            usage_line("2024-06-01T10:00:00Z", "sess-1", "claude-3-5-sonnet-20241022", 1000, 500),
            "{broken".to_string(),
            usage_line("2024-06-02T10:00:00Z", "sess-2", "claude-3-haiku-20240307", 1000, 0),
        ],
    )?;

    let mut normalizer = RecordNormalizer::new(vec![temp.path().to_path_buf()]);
    let records = normalizer.load_records().to_vec();
    assert_eq!(records.len(), 2);

    let pricing = offline_pricing();
    let mut aggregator = ReportAggregator::new(&pricing);
    let daily = aggregator.daily_report(&records, None, None, SortOrder::Asc)?;

    assert_eq!(daily.len(), 2);
    assert!((daily[0].total_cost - 10.5).abs() < 1e-9);
    // haiku: 1000/1000 * 0.25
    assert!((daily[1].total_cost - 0.25).abs() < 1e-9);
    assert_eq!(aggregator.failed_calculations(), 0);
    Ok(())
}
