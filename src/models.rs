// Wire and derived data model for the telemetry dashboard.
// Wire types mirror the remote feed JSON (camelCase); derived types are
// produced by the aggregation engine and replaced wholesale on each cycle.

use serde::{Deserialize, Serialize};

/// Numeric feed field that may arrive as a JSON number or a numeric-looking
/// string. Coercion happens at validation time; a field that coerces to a
/// non-finite or unparseable value rejects the sample, not the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Field {
    Num(f64),
    Text(String),
}

impl Field {
    /// Coerces to a finite f64, or None if the value is non-numeric.
    pub fn as_f64(&self) -> Option<f64> {
        let v = match self {
            Field::Num(n) => *n,
            Field::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        v.is_finite().then_some(v)
    }

    /// Coerces to a non-negative integer count.
    pub fn as_count(&self) -> Option<u64> {
        let v = self.as_f64()?;
        (v >= 0.0).then_some(v as u64)
    }
}

impl From<f64> for Field {
    fn from(v: f64) -> Self {
        Field::Num(v)
    }
}

impl From<&str> for Field {
    fn from(v: &str) -> Self {
        Field::Text(v.to_string())
    }
}

/// Sample timestamp: epoch milliseconds (number or numeric string) or an
/// RFC3339 string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Stamp {
    Num(f64),
    Text(String),
}

impl Stamp {
    /// Resolves to epoch milliseconds, or None if unparseable.
    pub fn as_epoch_ms(&self) -> Option<i64> {
        match self {
            Stamp::Num(n) => n.is_finite().then_some(*n as i64),
            Stamp::Text(s) => {
                let s = s.trim();
                if let Ok(n) = s.parse::<f64>() {
                    return n.is_finite().then_some(n as i64);
                }
                chrono::DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|dt| dt.timestamp_millis())
            }
        }
    }
}

impl From<i64> for Stamp {
    fn from(v: i64) -> Self {
        Stamp::Num(v as f64)
    }
}

/// One raw sample from the remote metrics feed. Immutable once received.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMetricSample {
    pub timestamp: Stamp,
    pub cpu_usage: Field,
    pub memory_usage: Field,
    pub disk_usage: Field,
    pub active_connections: Field,
    pub authenticated_connections: Field,
    pub anonymous_connections: Field,
    pub avg_connection_duration: Field,
    pub endpoint: String,
    pub http_status: Field,
    #[serde(default)]
    pub client_ip: String,
    #[serde(default)]
    pub authenticated: bool,
}

/// Response body of the metrics read endpoint. The server-side summary is
/// ignored; all rollups are computed locally from the raw samples.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsFeed {
    pub metrics: Vec<RawMetricSample>,
    #[serde(default)]
    pub summary: serde_json::Value,
}

/// Error payload carried by non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

/// One point of the resource time series (trailing window).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPoint {
    pub timestamp_ms: i64,
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
    pub duration_ms: f64,
}

/// One point of the connection-count series (trailing window).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionPoint {
    pub timestamp_ms: i64,
    pub total: u64,
    pub authenticated: u64,
    pub anonymous: u64,
}

/// Authenticated/anonymous split taken from the most recent sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSplit {
    pub authenticated: u64,
    pub anonymous: u64,
}

/// Per-endpoint rollup over the full valid batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStat {
    pub endpoint: String,
    pub requests: u64,
    pub avg_duration_ms: f64,
    /// Percentage of requests to this endpoint that were authenticated.
    pub auth_rate: f64,
}

/// Per-source-address rollup over the full valid batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IpStat {
    pub ip: String,
    pub requests: u64,
    pub distinct_endpoints: u64,
    /// Requests answered with HTTP 429.
    pub rate_limited_count: u64,
}

/// Scalar rollups over the full valid batch (not the trailing window).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub avg_cpu: f64,
    pub avg_memory: f64,
    pub avg_duration_ms: f64,
    /// Fraction of samples with http_status >= 500.
    pub error_rate: f64,
    pub unique_ips: u64,
    pub peak_active_connections: u64,
    pub avg_active_connections: f64,
}

/// Everything the presentation layer consumes. Built once per successful
/// cycle and handed over as a whole; never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedDashboardData {
    pub time_series: Vec<SeriesPoint>,
    pub connection_series: Vec<ConnectionPoint>,
    pub auth_split: AuthSplit,
    pub endpoint_stats: Vec<EndpointStat>,
    pub ip_stats: Vec<IpStat>,
    pub summary: DashboardSummary,
}

/// Per-user auto-refresh preference, persisted by the settings store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSettings {
    pub enabled: bool,
    pub interval_minutes: u32,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: 5,
        }
    }
}
