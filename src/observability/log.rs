use super::traits::{Observer, ObserverEvent, ObserverMetric};
use tracing::{info, warn};

/// Writes worker events and metrics through `tracing`.
pub struct LogObserver;

impl LogObserver {
    pub fn new() -> Self {
        Self
    }
}

fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Observer for LogObserver {
    fn record_event(&self, event: &ObserverEvent) {
        match event {
            ObserverEvent::WorkerStarted { pending_batches } => {
                info!(pending = pending_batches, "worker.start");
            }
            ObserverEvent::WorkerStopped { pending_batches } => {
                info!(pending = pending_batches, "worker.stop");
            }
            ObserverEvent::WorkerRestarted { reason } => {
                warn!(reason = %reason, "worker.restart");
            }
            ObserverEvent::BatchSealed {
                batch_id,
                requests,
                bytes,
            } => {
                info!(batch_id = %batch_id, requests, bytes, "batch.sealed");
            }
            ObserverEvent::BatchSent {
                batch_id,
                requests,
                attempt,
                duration,
            } => {
                info!(
                    batch_id = %batch_id,
                    requests,
                    attempt,
                    duration_ms = millis(*duration),
                    "batch.sent"
                );
            }
            ObserverEvent::SendFailed {
                batch_id,
                attempt,
                error,
            } => {
                warn!(batch_id = %batch_id, attempt, error = %error, "batch.send_failed");
            }
            ObserverEvent::BatchEscalated {
                batch_id,
                requests,
                attempts,
            } => {
                warn!(batch_id = %batch_id, requests, attempts, "batch.escalated");
            }
        }
    }

    fn record_metric(&self, metric: &ObserverMetric) {
        match metric {
            ObserverMetric::IntakeDepth(d) => {
                info!(depth = d, "metric.intake_depth");
            }
            ObserverMetric::PendingBatches(n) => {
                info!(batches = n, "metric.pending_batches");
            }
            ObserverMetric::BatchBytes(b) => {
                info!(bytes = b, "metric.batch_bytes");
            }
            ObserverMetric::SendLatency(d) => {
                info!(latency_ms = millis(*d), "metric.send_latency");
            }
        }
    }

    fn name(&self) -> &str {
        "log"
    }
}
