// Aggregation engine tests: validation, windowing, rollups, determinism.

mod common;

use common::{batch, sample};
use dashcore::engine::{DEFAULT_WINDOW_POINTS, process, process_with_progress};
use dashcore::error::DashboardError;
use dashcore::models::{Field, Stamp};

#[test]
fn empty_batch_is_a_processing_error() {
    let err = process(&[], DEFAULT_WINDOW_POINTS).unwrap_err();
    assert!(matches!(err, DashboardError::Processing(_)));
}

#[test]
fn all_invalid_batch_is_a_processing_error_not_empty_success() {
    let mut s = sample(1000, "/api/a", "10.0.0.1");
    s.cpu_usage = Field::from("not a number");
    let err = process(&[s], DEFAULT_WINDOW_POINTS).unwrap_err();
    assert!(matches!(err, DashboardError::Processing(_)));
}

#[test]
fn invalid_samples_are_dropped_not_the_batch() {
    let good = sample(1000, "/api/a", "10.0.0.1");
    let mut bad = sample(2000, "/api/b", "10.0.0.2");
    bad.timestamp = Stamp::Text("yesterday-ish".to_string());
    let out = process(&[good, bad], DEFAULT_WINDOW_POINTS).unwrap();
    assert_eq!(out.time_series.len(), 1);
    assert_eq!(out.endpoint_stats.len(), 1);
    assert_eq!(out.endpoint_stats[0].endpoint, "/api/a");
}

#[test]
fn numeric_strings_are_coerced() {
    let mut s = sample(1000, "/api/a", "10.0.0.1");
    s.cpu_usage = Field::from("42.5");
    s.active_connections = Field::from("7");
    s.http_status = Field::from("429");
    let out = process(&[s], DEFAULT_WINDOW_POINTS).unwrap();
    assert_eq!(out.time_series[0].cpu, 42.5);
    assert_eq!(out.connection_series[0].total, 7);
    assert_eq!(out.ip_stats[0].rate_limited_count, 1);
}

#[test]
fn rfc3339_timestamps_are_accepted() {
    let mut s = sample(0, "/api/a", "10.0.0.1");
    s.timestamp = Stamp::Text("2026-08-28T12:00:00Z".to_string());
    let out = process(&[s], DEFAULT_WINDOW_POINTS).unwrap();
    assert!(out.time_series[0].timestamp_ms > 0);
}

#[test]
fn process_is_deterministic() {
    let samples = batch(30);
    let a = process(&samples, DEFAULT_WINDOW_POINTS).unwrap();
    let b = process(&samples, DEFAULT_WINDOW_POINTS).unwrap();
    assert_eq!(a, b);
}

#[test]
fn input_order_does_not_change_the_result() {
    let samples = batch(30);
    let mut reversed = samples.clone();
    reversed.reverse();
    let a = process(&samples, DEFAULT_WINDOW_POINTS).unwrap();
    let b = process(&reversed, DEFAULT_WINDOW_POINTS).unwrap();
    assert_eq!(a, b);
}

#[test]
fn tied_timestamps_do_not_make_the_result_order_dependent() {
    let mut a = sample(1000, "/api/a", "10.0.0.1");
    a.authenticated_connections = Field::from(9.0);
    a.anonymous_connections = Field::from(1.0);
    let mut b = sample(1000, "/api/a", "10.0.0.1");
    b.authenticated_connections = Field::from(2.0);
    b.anonymous_connections = Field::from(8.0);

    let fwd = process(&[a.clone(), b.clone()], DEFAULT_WINDOW_POINTS).unwrap();
    let rev = process(&[b, a], DEFAULT_WINDOW_POINTS).unwrap();
    assert_eq!(fwd, rev);

    // The tie breaks on the connection counts, so the split comes from the
    // sample with the higher authenticated count in both orders.
    assert_eq!(fwd.auth_split.authenticated, 9);
    assert_eq!(fwd.auth_split.anonymous, 1);
}

#[test]
fn window_keeps_only_the_most_recent_points() {
    // 30 samples across 30 distinct endpoints, window 24.
    let samples = batch(30);
    let out = process(&samples, 24).unwrap();
    assert_eq!(out.time_series.len(), 24);
    assert_eq!(out.connection_series.len(), 24);
    // Most recent 24 by timestamp: samples 6..30.
    assert_eq!(out.time_series[0].timestamp_ms, 6_000);
    assert_eq!(out.time_series[23].timestamp_ms, 29_000);
    // Rollups and summary still cover the full batch.
    assert_eq!(out.endpoint_stats.len(), 30);
    assert_eq!(out.summary.unique_ips, 30);
}

#[test]
fn endpoint_avg_duration_is_the_mean() {
    let mut a = sample(1000, "/api/users", "10.0.0.1");
    a.avg_connection_duration = Field::from(100.0);
    let mut b = sample(2000, "/api/users", "10.0.0.2");
    b.avg_connection_duration = Field::from(300.0);
    let out = process(&[a, b], DEFAULT_WINDOW_POINTS).unwrap();
    assert_eq!(out.endpoint_stats.len(), 1);
    assert_eq!(out.endpoint_stats[0].avg_duration_ms, 200.0);
    assert_eq!(out.endpoint_stats[0].requests, 2);
}

#[test]
fn endpoint_auth_rate_is_a_percentage() {
    let mut a = sample(1000, "/api/users", "10.0.0.1");
    a.authenticated = true;
    let mut b = sample(2000, "/api/users", "10.0.0.1");
    b.authenticated = false;
    let out = process(&[a, b], DEFAULT_WINDOW_POINTS).unwrap();
    assert_eq!(out.endpoint_stats[0].auth_rate, 50.0);
}

#[test]
fn stats_sort_descending_by_requests_with_lexical_ties() {
    let samples = vec![
        sample(1000, "/api/zeta", "10.0.0.9"),
        sample(2000, "/api/alpha", "10.0.0.9"),
        sample(3000, "/api/mid", "10.0.0.1"),
        sample(4000, "/api/mid", "10.0.0.1"),
    ];
    let out = process(&samples, DEFAULT_WINDOW_POINTS).unwrap();
    let endpoints: Vec<&str> = out
        .endpoint_stats
        .iter()
        .map(|e| e.endpoint.as_str())
        .collect();
    assert_eq!(endpoints, vec!["/api/mid", "/api/alpha", "/api/zeta"]);
    let ips: Vec<&str> = out.ip_stats.iter().map(|i| i.ip.as_str()).collect();
    assert_eq!(ips, vec!["10.0.0.1", "10.0.0.9"]);
}

#[test]
fn auth_split_comes_from_the_latest_sample() {
    let mut older = sample(1000, "/api/a", "10.0.0.1");
    older.authenticated_connections = Field::from(100.0);
    older.anonymous_connections = Field::from(100.0);
    let mut newest = sample(9000, "/api/a", "10.0.0.1");
    newest.authenticated_connections = Field::from(8.0);
    newest.anonymous_connections = Field::from(1.0);
    // Input unordered on purpose.
    let out = process(&[newest.clone(), older], DEFAULT_WINDOW_POINTS).unwrap();
    assert_eq!(out.auth_split.authenticated, 8);
    assert_eq!(out.auth_split.anonymous, 1);
}

#[test]
fn ip_rollup_counts_distinct_endpoints_and_rate_limits() {
    let mut limited = sample(1000, "/api/a", "10.0.0.1");
    limited.http_status = Field::from(429.0);
    let samples = vec![
        limited,
        sample(2000, "/api/b", "10.0.0.1"),
        sample(3000, "/api/b", "10.0.0.1"),
        sample(4000, "/api/a", "10.0.0.2"),
    ];
    let out = process(&samples, DEFAULT_WINDOW_POINTS).unwrap();
    let top = &out.ip_stats[0];
    assert_eq!(top.ip, "10.0.0.1");
    assert_eq!(top.requests, 3);
    assert_eq!(top.distinct_endpoints, 2);
    assert_eq!(top.rate_limited_count, 1);
}

#[test]
fn summary_error_rate_counts_5xx_only() {
    let mut server_err = sample(1000, "/api/a", "10.0.0.1");
    server_err.http_status = Field::from(503.0);
    let mut client_err = sample(2000, "/api/a", "10.0.0.1");
    client_err.http_status = Field::from(404.0);
    let samples = vec![
        server_err,
        client_err,
        sample(3000, "/api/a", "10.0.0.1"),
        sample(4000, "/api/a", "10.0.0.1"),
    ];
    let out = process(&samples, DEFAULT_WINDOW_POINTS).unwrap();
    assert_eq!(out.summary.error_rate, 0.25);
}

#[test]
fn summary_connection_stats_cover_the_full_batch_not_the_window() {
    let mut samples = batch(30);
    // Oldest sample (outside a window of 24) carries the peak.
    samples[0].active_connections = Field::from(500.0);
    let out = process(&samples, 24).unwrap();
    assert_eq!(out.summary.peak_active_connections, 500);
}

#[test]
fn progress_milestones_are_monotonic_and_end_at_100() {
    let mut seen = Vec::new();
    let samples = batch(5);
    process_with_progress(&samples, 24, |p| seen.push(p)).unwrap();
    assert_eq!(seen, vec![20, 45, 70, 90, 100]);
}
