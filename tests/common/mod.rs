// Shared sample builder for integration tests.

use dashcore::models::{Field, RawMetricSample, Stamp};

/// A valid sample with fixed gauges; endpoint/ip/timestamp vary per test.
pub fn sample(ts_ms: i64, endpoint: &str, ip: &str) -> RawMetricSample {
    RawMetricSample {
        timestamp: Stamp::from(ts_ms),
        cpu_usage: Field::from(10.0),
        memory_usage: Field::from(50.0),
        disk_usage: Field::from(70.0),
        active_connections: Field::from(5.0),
        authenticated_connections: Field::from(3.0),
        anonymous_connections: Field::from(2.0),
        avg_connection_duration: Field::from(100.0),
        endpoint: endpoint.to_string(),
        http_status: Field::from(200.0),
        client_ip: ip.to_string(),
        authenticated: true,
    }
}

/// n valid samples, one second apart, across distinct endpoints/ips.
pub fn batch(n: usize) -> Vec<RawMetricSample> {
    (0..n)
        .map(|i| {
            sample(
                i as i64 * 1000,
                &format!("/api/e{i}"),
                &format!("10.0.0.{i}"),
            )
        })
        .collect()
}
