use super::request::ScoreUpdateRequest;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};

/// Multi-producer hand-off buffer between callers and the upload worker.
///
/// Cloning is cheap and every clone feeds the same buffer. The receiving side
/// sits behind an async mutex: a worker holds it for its whole lifetime, so at
/// most one worker drains at a time and buffered requests outlive any
/// individual worker.
#[derive(Clone)]
pub struct IntakeQueue {
    tx: mpsc::UnboundedSender<ScoreUpdateRequest>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<ScoreUpdateRequest>>>,
    depth: Arc<AtomicUsize>,
}

impl IntakeQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            depth: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Enqueue a request. Never blocks and never rejects on batch fullness.
    pub fn submit(&self, request: ScoreUpdateRequest) {
        self.depth.fetch_add(1, Ordering::AcqRel);
        if let Err(err) = self.tx.send(request) {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            tracing::warn!(
                content_id = err.0.content_id(),
                "intake closed, dropping score update"
            );
        }
    }

    /// Requests buffered and not yet taken by a worker.
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take exclusive ownership of the receiving side, waiting for any
    /// previous holder to release it.
    pub(crate) async fn acquire(&self) -> IntakeDrain {
        IntakeDrain {
            rx: Arc::clone(&self.rx).lock_owned().await,
            depth: Arc::clone(&self.depth),
        }
    }
}

/// Exclusive receiving handle; released on drop, including during unwinding.
pub(crate) struct IntakeDrain {
    rx: OwnedMutexGuard<mpsc::UnboundedReceiver<ScoreUpdateRequest>>,
    depth: Arc<AtomicUsize>,
}

impl IntakeDrain {
    pub(crate) async fn recv(&mut self) -> Option<ScoreUpdateRequest> {
        let request = self.rx.recv().await;
        if request.is_some() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
        }
        request
    }

    pub(crate) fn try_recv(&mut self) -> Option<ScoreUpdateRequest> {
        let request = self.rx.try_recv().ok();
        if request.is_some() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
        }
        request
    }
}
