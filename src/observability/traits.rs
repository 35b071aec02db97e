use std::time::Duration;
use uuid::Uuid;

/// Events the observer can record
#[derive(Debug, Clone)]
pub enum ObserverEvent {
    WorkerStarted {
        pending_batches: usize,
    },
    WorkerStopped {
        pending_batches: usize,
    },
    WorkerRestarted {
        reason: String,
    },
    BatchSealed {
        batch_id: Uuid,
        requests: usize,
        bytes: usize,
    },
    BatchSent {
        batch_id: Uuid,
        requests: usize,
        attempt: u32,
        duration: Duration,
    },
    SendFailed {
        batch_id: Uuid,
        attempt: u32,
        error: String,
    },
    BatchEscalated {
        batch_id: Uuid,
        requests: usize,
        attempts: u32,
    },
}

/// Numeric metrics
#[derive(Debug, Clone)]
pub enum ObserverMetric {
    IntakeDepth(u64),
    PendingBatches(u64),
    BatchBytes(u64),
    SendLatency(Duration),
}

/// Sink for upload worker events and metrics.
pub trait Observer: Send + Sync {
    /// Record a discrete event
    fn record_event(&self, event: &ObserverEvent);

    /// Record a numeric metric
    fn record_metric(&self, metric: &ObserverMetric);

    /// Flush any buffered data (no-op for most backends)
    fn flush(&self) {}

    /// Human-readable name of this observer
    fn name(&self) -> &str;
}
