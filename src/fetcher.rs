// Authenticated read of the raw metrics feed. This layer only classifies
// failures; retry policy belongs to the coordinator.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::DashboardError;
use crate::models::{ErrorBody, MetricsFeed, RawMetricSample};

pub const METRICS_PATH: &str = "/api/metrics/raw";

/// Seam for the remote feed so the coordinator can be driven by a fake in
/// tests.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn fetch(&self, token: &str) -> Result<Vec<RawMetricSample>, DashboardError>;
}

pub struct HttpSampleFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSampleFetcher {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl MetricsSource for HttpSampleFetcher {
    async fn fetch(&self, token: &str) -> Result<Vec<RawMetricSample>, DashboardError> {
        if token.is_empty() {
            return Err(DashboardError::Auth { status: 401 });
        }

        let url = format!("{}{}", self.base_url, METRICS_PATH);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| DashboardError::Network(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(DashboardError::Auth {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let detail = resp
                .text()
                .await
                .ok()
                .and_then(|body| serde_json::from_str::<ErrorBody>(&body).ok())
                .map(|b| b.detail)
                .unwrap_or_else(|| format!("status {}", status.as_u16()));
            // 5xx is a (retryable) server failure, everything else a broken
            // request/response exchange.
            return if status.is_server_error() {
                Err(DashboardError::Network(detail))
            } else {
                Err(DashboardError::Protocol(detail))
            };
        }

        let feed: MetricsFeed = resp
            .json()
            .await
            .map_err(|e| DashboardError::Protocol(e.to_string()))?;
        Ok(feed.metrics)
    }
}
