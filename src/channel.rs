// Message boundary between the interactive side and the engine task.
// One request per cycle: a PROCESS_DATA in, zero or more PROGRESS_UPDATEs
// out, then exactly one terminal PROCESSED_DATA or PROCESS_ERROR.
// Everything crosses by value; the two sides share no mutable state.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::engine;
use crate::error::DashboardError;
use crate::models::{ProcessedDashboardData, RawMetricSample};

/// Closed envelope for both directions of the engine channel. The tag values
/// are part of the protocol; adding a variant is a protocol change.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum EngineMessage {
    #[serde(rename = "PROCESS_DATA")]
    ProcessData {
        data: Vec<RawMetricSample>,
        window: usize,
    },
    #[serde(rename = "PROGRESS_UPDATE")]
    ProgressUpdate { progress: u8 },
    #[serde(rename = "PROCESSED_DATA")]
    ProcessedData { data: ProcessedDashboardData },
    #[serde(rename = "PROCESS_ERROR")]
    ProcessError { error: String },
}

struct CycleRequest {
    msg: EngineMessage,
    reply: mpsc::Sender<EngineMessage>,
}

// Internal control plane; never serialized, never crosses the envelope.
enum Request {
    Process(CycleRequest),
    Shutdown,
}

/// Handle to the engine task. Dropping the last handle closes the request
/// channel and the task drains and exits; a cycle receiver left waiting sees
/// its stream end instead of hanging.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Request>,
}

impl EngineHandle {
    /// Spawns the engine task. Called lazily by the coordinator on the first
    /// cycle and again after a fatal engine loss.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(run(rx));
        Self { tx }
    }

    /// True once the engine task is gone (recv loop exited or never started).
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Stops the task after the cycle in flight, even while other handle
    /// clones are alive. Requests queued behind the shutdown are dropped and
    /// their reply streams end without a terminal message.
    pub fn shutdown(&self) {
        let _ = self.tx.try_send(Request::Shutdown);
    }

    /// Posts one batch; the returned receiver yields progress updates
    /// followed by exactly one terminal message. A closed engine is reported
    /// as fatal so the caller can recreate it.
    pub async fn request(
        &self,
        samples: Vec<RawMetricSample>,
        window: usize,
    ) -> Result<mpsc::Receiver<EngineMessage>, DashboardError> {
        let (reply_tx, reply_rx) = mpsc::channel(16);
        let req = CycleRequest {
            msg: EngineMessage::ProcessData {
                data: samples,
                window,
            },
            reply: reply_tx,
        };
        self.tx
            .send(Request::Process(req))
            .await
            .map_err(|_| DashboardError::EngineFatal("engine task is not running".to_string()))?;
        Ok(reply_rx)
    }
}

async fn run(mut rx: mpsc::Receiver<Request>) {
    debug!("engine task started");
    while let Some(req) = rx.recv().await {
        let CycleRequest { msg, reply } = match req {
            Request::Process(cycle) => cycle,
            Request::Shutdown => break,
        };
        let EngineMessage::ProcessData { data, window } = msg else {
            debug!("non-request envelope on engine channel; ignored");
            continue;
        };

        // The compute is CPU-bound, so it runs off the async workers. A
        // structural failure in it must not take the task down; it becomes
        // a terminal error for this cycle only.
        let progress = reply.clone();
        let result = tokio::task::spawn_blocking(move || {
            engine::process_with_progress(&data, window, |pct| {
                let _ = progress.try_send(EngineMessage::ProgressUpdate { progress: pct });
            })
        })
        .await;

        let terminal = match result {
            Ok(Ok(data)) => EngineMessage::ProcessedData { data },
            Ok(Err(DashboardError::Processing(cause))) => {
                EngineMessage::ProcessError { error: cause }
            }
            Ok(Err(e)) => EngineMessage::ProcessError {
                error: e.to_string(),
            },
            Err(e) if e.is_panic() => EngineMessage::ProcessError {
                error: "aggregation panicked".to_string(),
            },
            Err(_) => EngineMessage::ProcessError {
                error: "aggregation canceled".to_string(),
            },
        };
        if reply.send(terminal).await.is_err() {
            debug!("cycle receiver dropped before terminal message");
        }
    }
    debug!("engine task shutting down");
}
