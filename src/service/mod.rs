use crate::error::QueueError;
use crate::observability::ObserverEvent;
use crate::queue::{Batch, IntakeQueue, QueueDeps, QueueSettings, ScoreUpdateRequest, UploadQueue};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;


/// Supervised owner of the current upload worker.
///
/// Producers submit through the service without caring which worker is
/// live: the intake is shared across workers, so requests submitted while a
/// worker is being replaced simply wait in the buffer.
#[derive(Clone)]
pub struct UploadService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    intake: IntakeQueue,
    queue: Mutex<UploadQueue>,
    shutdown_tx: watch::Sender<bool>,
}

impl UploadService {
    pub fn start(settings: QueueSettings, deps: QueueDeps) -> Result<Self, QueueError> {
        Self::start_with_pending(settings, deps, Vec::new())
    }

    /// Start with batches recovered from an earlier worker.
    pub fn start_with_pending(
        settings: QueueSettings,
        deps: QueueDeps,
        pending: Vec<Batch>,
    ) -> Result<Self, QueueError> {
        let intake = IntakeQueue::new();
        let mut queue = UploadQueue::new(settings, intake.clone(), deps, pending);
        queue.start()?;

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(ServiceInner {
                intake,
                queue: Mutex::new(queue),
                shutdown_tx,
            }),
        })
    }

    /// Fire-and-forget submission, callable from any thread.
    pub fn submit(&self, request: ScoreUpdateRequest) {
        self.inner.intake.submit(request);
    }

    pub fn intake(&self) -> &IntakeQueue {
        &self.inner.intake
    }

    pub fn is_shut_down(&self) -> bool {
        *self.inner.shutdown_tx.borrow()
    }

    /// Replace the worker with one built from new settings.
    ///
    /// The old worker is stopped and its unsent batches are handed to the
    /// successor. Returns the number of batches handed over.
    pub async fn reconfigure(
        &self,
        settings: QueueSettings,
        deps: QueueDeps,
    ) -> Result<usize, QueueError> {
        if self.is_shut_down() {
            return Err(QueueError::AlreadyStopped);
        }

        let mut queue = self.inner.queue.lock().await;
        queue.stop();
        let pending = queue.take_pending().await?;
        let handed_over = pending.len();

        *queue = UploadQueue::new(settings, self.inner.intake.clone(), deps, pending);
        queue.start()?;
        tracing::info!(handed_over, "upload worker reconfigured");
        Ok(handed_over)
    }

    /// Restart the worker if it died without being asked to stop.
    ///
    /// Returns `true` when a restart happened. The dead worker's batches and
    /// the buffered intake both carry over to its successor.
    pub async fn ensure_running(&self) -> bool {
        if self.is_shut_down() {
            return false;
        }

        let mut queue = self.inner.queue.lock().await;
        if !queue.has_crashed() {
            return false;
        }

        let reason = match queue.join().await {
            Err(e) => e.to_string(),
            Ok(()) => "worker exited unexpectedly".to_string(),
        };

        let settings = queue.settings().clone();
        let deps = queue.deps().clone();
        let pending = match queue.take_pending().await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!("could not recover batches from the dead worker: {e}");
                Vec::new()
            }
        };
        let handed_over = pending.len();
        tracing::error!(
            handed_over,
            buffered = self.inner.intake.len(),
            "upload worker died, restarting: {reason}"
        );
        deps.observer
            .record_event(&ObserverEvent::WorkerRestarted { reason });

        *queue = UploadQueue::new(settings, self.inner.intake.clone(), deps, pending);
        match queue.start() {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("failed to restart upload worker: {e}");
                false
            }
        }
    }

    /// Periodically check the worker and restart it after a crash.
    pub fn spawn_watchdog(&self, interval: Duration) -> JoinHandle<()> {
        let service = self.clone();
        let mut shutdown = self.inner.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if service.ensure_running().await {
                            tracing::warn!("watchdog restarted the upload worker");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() { break; }
                    }
                }
            }
        })
    }

    /// Stop the worker for good and return its unsent batches.
    pub async fn shutdown(&self) -> Vec<Batch> {
        self.inner.shutdown_tx.send_replace(true);

        let mut queue = self.inner.queue.lock().await;
        queue.stop();
        let pending = match queue.take_pending().await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!("could not collect unsent batches: {e}");
                Vec::new()
            }
        };
        if !self.inner.intake.is_empty() {
            tracing::warn!(
                buffered = self.inner.intake.len(),
                "requests submitted after shutdown remain unsent"
            );
        }
        pending
    }
}
