// Aggregation engine: raw sample batch -> dashboard-ready aggregates.
// Pure computation, deterministic for identical input; runs on the engine
// task spawned by channel::EngineHandle, never on the interactive side.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::DashboardError;
use crate::models::{
    AuthSplit, ConnectionPoint, DashboardSummary, EndpointStat, IpStat, ProcessedDashboardData,
    RawMetricSample, SeriesPoint,
};

/// Trailing window length when the caller does not supply one.
pub const DEFAULT_WINDOW_POINTS: usize = 24;

/// Coarse progress milestones (0..=100) emitted while a batch is processed.
pub const PROGRESS_VALIDATED: u8 = 20;
pub const PROGRESS_SERIES: u8 = 45;
pub const PROGRESS_ENDPOINTS: u8 = 70;
pub const PROGRESS_IPS: u8 = 90;
pub const PROGRESS_DONE: u8 = 100;

/// A sample whose fields all coerced to finite values.
struct ValidSample {
    timestamp_ms: i64,
    cpu: f64,
    memory: f64,
    disk: f64,
    active: u64,
    authenticated_conns: u64,
    anonymous_conns: u64,
    duration_ms: f64,
    endpoint: String,
    http_status: u16,
    client_ip: String,
    authenticated: bool,
}

/// Coerces one raw sample; None drops the sample, never the batch.
fn validate(s: &RawMetricSample) -> Option<ValidSample> {
    Some(ValidSample {
        timestamp_ms: s.timestamp.as_epoch_ms()?,
        cpu: s.cpu_usage.as_f64()?,
        memory: s.memory_usage.as_f64()?,
        disk: s.disk_usage.as_f64()?,
        active: s.active_connections.as_count()?,
        authenticated_conns: s.authenticated_connections.as_count()?,
        anonymous_conns: s.anonymous_connections.as_count()?,
        duration_ms: s.avg_connection_duration.as_f64()?,
        endpoint: s.endpoint.clone(),
        http_status: u16::try_from(s.http_status.as_count()?).ok()?,
        client_ip: s.client_ip.clone(),
        authenticated: s.authenticated,
    })
}

/// Total order over validated samples. Timestamp first, then every other
/// field, so two batches with the same samples sort identically no matter
/// how they arrived.
fn total_order(a: &ValidSample, b: &ValidSample) -> std::cmp::Ordering {
    a.timestamp_ms
        .cmp(&b.timestamp_ms)
        .then_with(|| a.endpoint.cmp(&b.endpoint))
        .then_with(|| a.client_ip.cmp(&b.client_ip))
        .then_with(|| a.http_status.cmp(&b.http_status))
        .then_with(|| a.active.cmp(&b.active))
        .then_with(|| a.authenticated_conns.cmp(&b.authenticated_conns))
        .then_with(|| a.anonymous_conns.cmp(&b.anonymous_conns))
        .then_with(|| a.cpu.total_cmp(&b.cpu))
        .then_with(|| a.memory.total_cmp(&b.memory))
        .then_with(|| a.disk.total_cmp(&b.disk))
        .then_with(|| a.duration_ms.total_cmp(&b.duration_ms))
        .then_with(|| a.authenticated.cmp(&b.authenticated))
}

/// Processes a batch without progress reporting (tests, ad-hoc callers).
pub fn process(
    samples: &[RawMetricSample],
    window: usize,
) -> Result<ProcessedDashboardData, DashboardError> {
    process_with_progress(samples, window, |_| {})
}

/// Full pipeline: validate, sort by timestamp, trailing-window series,
/// endpoint/IP rollups, summary scalars. An all-invalid batch is an explicit
/// error so callers can tell "no data" from "nothing survived validation".
pub fn process_with_progress(
    samples: &[RawMetricSample],
    window: usize,
    mut on_progress: impl FnMut(u8),
) -> Result<ProcessedDashboardData, DashboardError> {
    let mut valid: Vec<ValidSample> = samples.iter().filter_map(validate).collect();
    if valid.is_empty() {
        let cause = if samples.is_empty() {
            "empty sample batch"
        } else {
            "no samples survived validation"
        };
        return Err(DashboardError::Processing(cause.to_string()));
    }
    let dropped = samples.len() - valid.len();
    if dropped > 0 {
        tracing::debug!(dropped, total = samples.len(), "invalid samples dropped");
    }
    on_progress(PROGRESS_VALIDATED);

    // Input order is not guaranteed, and arrival order must not leak into
    // the result: ties on timestamp are broken by every remaining field.
    valid.sort_by(total_order);

    let start = valid.len().saturating_sub(window);
    let tail = &valid[start..];
    let time_series: Vec<SeriesPoint> = tail
        .iter()
        .map(|s| SeriesPoint {
            timestamp_ms: s.timestamp_ms,
            cpu: s.cpu,
            memory: s.memory,
            disk: s.disk,
            duration_ms: s.duration_ms,
        })
        .collect();
    let connection_series: Vec<ConnectionPoint> = tail
        .iter()
        .map(|s| ConnectionPoint {
            timestamp_ms: s.timestamp_ms,
            total: s.active,
            authenticated: s.authenticated_conns,
            anonymous: s.anonymous_conns,
        })
        .collect();

    // Latest sample, not an average.
    let last = &valid[valid.len() - 1];
    let auth_split = AuthSplit {
        authenticated: last.authenticated_conns,
        anonymous: last.anonymous_conns,
    };
    on_progress(PROGRESS_SERIES);

    let endpoint_stats = endpoint_rollup(&valid);
    on_progress(PROGRESS_ENDPOINTS);

    let ip_stats = ip_rollup(&valid);
    on_progress(PROGRESS_IPS);

    let summary = summarize(&valid, ip_stats.len() as u64);
    on_progress(PROGRESS_DONE);

    Ok(ProcessedDashboardData {
        time_series,
        connection_series,
        auth_split,
        endpoint_stats,
        ip_stats,
        summary,
    })
}

/// Group by endpoint; descending by request count, ties lexical by endpoint.
/// This ordering defines "top" for any caller-side windowing.
fn endpoint_rollup(valid: &[ValidSample]) -> Vec<EndpointStat> {
    struct Acc {
        requests: u64,
        duration_sum: f64,
        authenticated: u64,
    }
    let mut by_endpoint: BTreeMap<&str, Acc> = BTreeMap::new();
    for s in valid {
        let acc = by_endpoint.entry(s.endpoint.as_str()).or_insert(Acc {
            requests: 0,
            duration_sum: 0.0,
            authenticated: 0,
        });
        acc.requests += 1;
        acc.duration_sum += s.duration_ms;
        if s.authenticated {
            acc.authenticated += 1;
        }
    }
    let mut out: Vec<EndpointStat> = by_endpoint
        .into_iter()
        .map(|(endpoint, acc)| EndpointStat {
            endpoint: endpoint.to_string(),
            requests: acc.requests,
            avg_duration_ms: acc.duration_sum / acc.requests as f64,
            auth_rate: acc.authenticated as f64 / acc.requests as f64 * 100.0,
        })
        .collect();
    out.sort_by(|a, b| {
        b.requests
            .cmp(&a.requests)
            .then_with(|| a.endpoint.cmp(&b.endpoint))
    });
    out
}

/// Group by source address; same ordering contract as the endpoint rollup.
fn ip_rollup(valid: &[ValidSample]) -> Vec<IpStat> {
    struct Acc<'a> {
        requests: u64,
        endpoints: BTreeSet<&'a str>,
        rate_limited: u64,
    }
    let mut by_ip: BTreeMap<&str, Acc> = BTreeMap::new();
    for s in valid {
        let acc = by_ip.entry(s.client_ip.as_str()).or_insert(Acc {
            requests: 0,
            endpoints: BTreeSet::new(),
            rate_limited: 0,
        });
        acc.requests += 1;
        acc.endpoints.insert(s.endpoint.as_str());
        if s.http_status == 429 {
            acc.rate_limited += 1;
        }
    }
    let mut out: Vec<IpStat> = by_ip
        .into_iter()
        .map(|(ip, acc)| IpStat {
            ip: ip.to_string(),
            requests: acc.requests,
            distinct_endpoints: acc.endpoints.len() as u64,
            rate_limited_count: acc.rate_limited,
        })
        .collect();
    out.sort_by(|a, b| b.requests.cmp(&a.requests).then_with(|| a.ip.cmp(&b.ip)));
    out
}

/// Scalar rollups over the full valid set, not the trailing window.
fn summarize(valid: &[ValidSample], unique_ips: u64) -> DashboardSummary {
    let n = valid.len() as f64;
    let errors = valid.iter().filter(|s| s.http_status >= 500).count();
    DashboardSummary {
        avg_cpu: valid.iter().map(|s| s.cpu).sum::<f64>() / n,
        avg_memory: valid.iter().map(|s| s.memory).sum::<f64>() / n,
        avg_duration_ms: valid.iter().map(|s| s.duration_ms).sum::<f64>() / n,
        error_rate: errors as f64 / n,
        unique_ips,
        peak_active_connections: valid.iter().map(|s| s.active).max().unwrap_or(0),
        avg_active_connections: valid.iter().map(|s| s.active as f64).sum::<f64>() / n,
    }
}
