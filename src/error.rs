// Error taxonomy for the refresh pipeline. Variants are Clone so the latest
// error can live in the coordinator's published state.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DashboardError {
    /// Transport failure (DNS, connection refused, timeout) or a 5xx from
    /// the metrics service. Retryable; existing data stays visible.
    #[error("network error: {0}")]
    Network(String),

    /// 401/403 from the metrics service, or a missing token. The coordinator
    /// invokes the forced-logout callback; never retried.
    #[error("authentication rejected (status {status})")]
    Auth { status: u16 },

    /// Non-JSON or schema-violating response body.
    #[error("malformed response: {0}")]
    Protocol(String),

    /// Validation or aggregation failure inside the engine.
    #[error("processing failed: {0}")]
    Processing(String),

    /// The engine task failed to start or died and could not be recreated.
    #[error("aggregation engine unavailable: {0}")]
    EngineFatal(String),
}

impl DashboardError {
    /// True for 401/403-class failures that must force a logout.
    pub fn is_auth(&self) -> bool {
        matches!(self, DashboardError::Auth { .. })
    }
}
