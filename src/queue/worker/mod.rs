use super::batch::{Batch, BatchAccumulator};
use super::intake::{IntakeDrain, IntakeQueue};
use super::notifier::{EscalationAlert, EscalationNotifier};
use super::request::ScoreUpdateRequest;
use super::retry::{RetryDecision, RetryPolicy};
use super::sender::BatchSender;
use crate::config::QueueConfig;
use crate::error::{QueueError, SendError};
use crate::observability::{Observer, ObserverEvent, ObserverMetric};
use futures_util::FutureExt;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;


/// Tunables of one upload worker, resolved from `[queue]`.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub max_batch_size: usize,
    pub wait_time: Duration,
    pub retry: RetryPolicy,
    pub recipients: Vec<String>,
}

impl QueueSettings {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            max_batch_size: config.max_batch_bytes(),
            wait_time: config.wait_time(),
            retry: RetryPolicy::new(
                config.retry_backoff,
                config.max_retries,
                config.wait_time(),
                config.max_retry_delay(),
            ),
            recipients: config.recipients(),
        }
    }
}

/// Collaborators injected into a worker.
#[derive(Clone)]
pub struct QueueDeps {
    pub sender: Arc<dyn BatchSender>,
    pub notifier: Arc<dyn EscalationNotifier>,
    pub observer: Arc<dyn Observer>,
}

enum WorkerState {
    Idle(Vec<Batch>),
    Running(JoinHandle<WorkerExit>),
    Stopped(Vec<Batch>),
}

/// What a worker task hands back when it ends, cleanly or not.
struct WorkerExit {
    pending: Vec<Batch>,
    panic: Option<String>,
}

/// Owned upload worker: drains an [`IntakeQueue`] into size-bounded batches
/// and delivers them with bounded retries.
///
/// A queue runs at most once. After [`stop`](Self::stop), its unsent batches
/// are handed to a successor through [`into_pending`](Self::into_pending) and
/// [`UploadQueue::new`].
pub struct UploadQueue {
    settings: QueueSettings,
    deps: QueueDeps,
    intake: IntakeQueue,
    shutdown_tx: watch::Sender<bool>,
    state: WorkerState,
}

impl UploadQueue {
    /// Build a worker over `intake`, seeded with a predecessor's `pending` batches.
    pub fn new(
        settings: QueueSettings,
        intake: IntakeQueue,
        deps: QueueDeps,
        pending: Vec<Batch>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            settings,
            deps,
            intake,
            shutdown_tx,
            state: WorkerState::Idle(pending),
        }
    }

    pub fn submit(&self, request: ScoreUpdateRequest) {
        self.intake.submit(request);
    }

    pub fn intake(&self) -> &IntakeQueue {
        &self.intake
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn deps(&self) -> &QueueDeps {
        &self.deps
    }

    /// Spawn the worker task on the current tokio runtime.
    pub fn start(&mut self) -> Result<(), QueueError> {
        let pending = match &mut self.state {
            WorkerState::Idle(pending) => std::mem::take(pending),
            WorkerState::Running(_) => return Err(QueueError::AlreadyStarted),
            WorkerState::Stopped(_) => return Err(QueueError::AlreadyStopped),
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.state = WorkerState::Idle(pending);
            return Err(QueueError::NoRuntime);
        };

        let worker = Worker {
            accumulator: BatchAccumulator::new(self.settings.max_batch_size),
            settings: self.settings.clone(),
            deps: self.deps.clone(),
            pending: pending.into(),
            shutdown: self.shutdown_tx.subscribe(),
        };
        let intake = self.intake.clone();
        self.state = WorkerState::Running(runtime.spawn(worker.run(intake)));
        tracing::info!(
            endpoint = self.deps.sender.endpoint(),
            max_batch_size = self.settings.max_batch_size,
            wait_ms = u64::try_from(self.settings.wait_time.as_millis()).unwrap_or(u64::MAX),
            max_retries = self.settings.retry.max_retries(),
            "upload worker started"
        );
        Ok(())
    }

    /// Signal the worker to stop. Idempotent; an in-flight send completes first.
    pub fn stop(&self) {
        if !self.shutdown_tx.send_replace(true) {
            tracing::info!("upload worker stop requested");
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(&self.state, WorkerState::Running(handle) if !handle.is_finished())
    }

    /// True when the worker task ended without being asked to stop.
    pub fn has_crashed(&self) -> bool {
        matches!(&self.state, WorkerState::Running(handle) if handle.is_finished())
            && !*self.shutdown_tx.borrow()
    }

    /// Wait for the worker task to finish and collect its unsent batches.
    ///
    /// A worker that panicked still hands back every batch it held; the
    /// error carries the panic message.
    pub async fn join(&mut self) -> Result<(), QueueError> {
        match std::mem::replace(&mut self.state, WorkerState::Stopped(Vec::new())) {
            WorkerState::Running(handle) => match handle.await {
                Ok(WorkerExit {
                    pending,
                    panic: None,
                }) => {
                    self.state = WorkerState::Stopped(pending);
                    Ok(())
                }
                Ok(WorkerExit {
                    pending,
                    panic: Some(message),
                }) => {
                    self.state = WorkerState::Stopped(pending);
                    Err(QueueError::WorkerPanicked(message))
                }
                Err(e) => {
                    tracing::error!("upload worker terminated abnormally: {e}");
                    Err(QueueError::WorkerPanicked(e.to_string()))
                }
            },
            other => {
                self.state = other;
                Ok(())
            }
        }
    }

    /// Stop and wait in one call.
    pub async fn shutdown(&mut self) -> Result<(), QueueError> {
        self.stop();
        self.join().await
    }

    /// Unsent batches held outside the worker task: the seed before
    /// [`start`](Self::start), or everything the worker held once it was
    /// asked to stop or has ended. Waits for a stopping worker to finish.
    ///
    /// Fails with [`QueueError::StillRunning`] while the worker runs and no
    /// stop was requested.
    pub async fn pending_batches(&mut self) -> Result<&[Batch], QueueError> {
        self.settle().await?;
        let pending: &[Batch] = match &self.state {
            WorkerState::Idle(pending) | WorkerState::Stopped(pending) => pending,
            WorkerState::Running(_) => &[],
        };
        Ok(pending)
    }

    /// Like [`pending_batches`](Self::pending_batches), but moves them out.
    pub async fn take_pending(&mut self) -> Result<Vec<Batch>, QueueError> {
        self.settle().await?;
        Ok(match &mut self.state {
            WorkerState::Idle(pending) | WorkerState::Stopped(pending) => std::mem::take(pending),
            WorkerState::Running(_) => Vec::new(),
        })
    }

    pub async fn into_pending(mut self) -> Result<Vec<Batch>, QueueError> {
        self.take_pending().await
    }

    async fn settle(&mut self) -> Result<(), QueueError> {
        if let WorkerState::Running(handle) = &self.state {
            if !handle.is_finished() && !*self.shutdown_tx.borrow() {
                return Err(QueueError::StillRunning);
            }
            if let Err(e) = self.join().await {
                tracing::warn!("collecting batches from a worker that ended abnormally: {e}");
            }
        }
        Ok(())
    }
}

enum Wake {
    Request(ScoreUpdateRequest),
    Timer,
    Stop,
}

/// State owned by the worker task. Nothing else touches batches.
struct Worker {
    settings: QueueSettings,
    deps: QueueDeps,
    accumulator: BatchAccumulator,
    pending: VecDeque<Batch>,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self, intake: IntakeQueue) -> WorkerExit {
        let mut drain = intake.acquire().await;
        let outcome = AssertUnwindSafe(self.drive(&mut drain, &intake))
            .catch_unwind()
            .await;
        let panic = outcome.err().map(|payload| panic_message(payload.as_ref()));

        let pending = self.collect(&mut drain);
        let pending_requests = pending.iter().map(Batch::len).sum::<usize>();
        match &panic {
            None => {
                self.deps.observer.record_event(&ObserverEvent::WorkerStopped {
                    pending_batches: pending.len(),
                });
                tracing::info!(
                    pending_batches = pending.len(),
                    pending_requests,
                    "upload worker stopped"
                );
            }
            Some(message) => tracing::error!(
                pending_batches = pending.len(),
                pending_requests,
                "upload worker panicked: {message}"
            ),
        }
        WorkerExit { pending, panic }
    }

    async fn drive(&mut self, drain: &mut IntakeDrain, intake: &IntakeQueue) {
        self.deps.observer.record_event(&ObserverEvent::WorkerStarted {
            pending_batches: self.pending.len(),
        });

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let now = Instant::now();
            if let Some(batch) = self.accumulator.flush_due(now, self.settings.wait_time) {
                self.seal(batch);
            }

            if let Some(batch) = self.take_due(now) {
                self.deliver(batch).await;
                continue;
            }

            let deadline = self.next_deadline();
            let wake = tokio::select! {
                biased;
                _ = self.shutdown.wait_for(|stop| *stop) => Wake::Stop,
                request = drain.recv() => request.map_or(Wake::Stop, Wake::Request),
                () = sleep_until(deadline) => Wake::Timer,
            };

            match wake {
                Wake::Request(request) => self.accept(request, intake),
                Wake::Timer => {}
                Wake::Stop => break,
            }
        }
    }

    /// Fold buffered intake and the open batch into the pending list.
    /// Touches no collaborator, so it is safe after a panic.
    fn collect(&mut self, drain: &mut IntakeDrain) -> Vec<Batch> {
        while let Some(request) = drain.try_recv() {
            self.pending.extend(self.accumulator.push(request));
        }
        self.pending.extend(self.accumulator.take());
        std::mem::take(&mut self.pending).into()
    }

    fn accept(&mut self, request: ScoreUpdateRequest, intake: &IntakeQueue) {
        for batch in self.accumulator.push(request) {
            self.seal(batch);
        }
        self.deps
            .observer
            .record_metric(&ObserverMetric::IntakeDepth(intake.len() as u64));
    }

    fn seal(&mut self, batch: Batch) {
        let (batch_id, requests, bytes) = (batch.id(), batch.len(), batch.size_bytes());
        self.pending.push_back(batch);

        tracing::debug!(%batch_id, requests, bytes, "batch sealed");
        self.deps.observer.record_event(&ObserverEvent::BatchSealed {
            batch_id,
            requests,
            bytes,
        });
        self.deps
            .observer
            .record_metric(&ObserverMetric::BatchBytes(bytes as u64));
    }

    fn take_due(&mut self, now: Instant) -> Option<Batch> {
        let index = self.pending.iter().position(|batch| batch.is_due(now))?;
        self.pending.remove(index)
    }

    fn next_deadline(&self) -> Option<Instant> {
        let retry = self.pending.iter().filter_map(Batch::retry_at).min();
        let flush = self.accumulator.flush_deadline(self.settings.wait_time);
        match (retry, flush) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    async fn deliver(&mut self, mut batch: Batch) {
        let attempt = batch.attempts() + 1;
        let started = Instant::now();

        let sent = AssertUnwindSafe(async { self.deps.sender.send(&batch).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(SendError::Panicked {
                    endpoint: self.deps.sender.endpoint().to_string(),
                    message: panic_message(payload.as_ref()),
                })
            });

        match sent {
            Ok(()) => {
                let duration = started.elapsed();
                tracing::info!(
                    batch_id = %batch.id(),
                    requests = batch.len(),
                    bytes = batch.size_bytes(),
                    attempt,
                    "batch uploaded"
                );
                self.deps.observer.record_event(&ObserverEvent::BatchSent {
                    batch_id: batch.id(),
                    requests: batch.len(),
                    attempt,
                    duration,
                });
                self.deps
                    .observer
                    .record_metric(&ObserverMetric::SendLatency(duration));
            }
            Err(err) => {
                let failed = batch.record_failure();
                tracing::warn!(
                    batch_id = %batch.id(),
                    attempt = failed,
                    max_retries = self.settings.retry.max_retries(),
                    "batch upload failed: {err}"
                );
                let event = ObserverEvent::SendFailed {
                    batch_id: batch.id(),
                    attempt: failed,
                    error: err.to_string(),
                };

                match self.settings.retry.decide(failed) {
                    RetryDecision::Retry { delay } => {
                        batch.schedule_retry(Instant::now() + delay);
                        self.pending.push_back(batch);
                        self.deps.observer.record_event(&event);
                    }
                    RetryDecision::Exhausted => {
                        self.escalate(&batch, &err).await;
                        self.deps.observer.record_event(&event);
                        self.deps.observer.record_event(&ObserverEvent::BatchEscalated {
                            batch_id: batch.id(),
                            requests: batch.len(),
                            attempts: batch.attempts(),
                        });
                    }
                }
            }
        }

        self.deps
            .observer
            .record_metric(&ObserverMetric::PendingBatches(self.pending.len() as u64));
    }

    async fn escalate(&self, batch: &Batch, err: &SendError) {
        let alert = EscalationAlert::for_batch(
            batch,
            self.deps.sender.endpoint(),
            &err.to_string(),
            &self.settings.recipients,
        );
        tracing::error!(
            batch_id = %batch.id(),
            requests = batch.len(),
            attempts = batch.attempts(),
            "batch dropped after exhausting retries"
        );

        let notified = AssertUnwindSafe(async { self.deps.notifier.notify(&alert).await })
            .catch_unwind()
            .await;
        let failure = match notified {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(payload) => format!("notifier panicked: {}", panic_message(payload.as_ref())),
        };
        tracing::error!(
            batch_id = %batch.id(),
            notifier = self.deps.notifier.name(),
            "escalation notification failed: {failure}"
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
