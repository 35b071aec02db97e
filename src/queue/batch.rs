use super::request::ScoreUpdateRequest;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Ordered group of score updates sent in one upload call.
#[derive(Debug, Clone)]
pub struct Batch {
    id: Uuid,
    requests: Vec<ScoreUpdateRequest>,
    size_bytes: usize,
    attempts: u32,
    opened_at: Instant,
    created_at: DateTime<Utc>,
    retry_at: Option<Instant>,
}

impl Batch {
    pub(crate) fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            requests: Vec::new(),
            size_bytes: 0,
            attempts: 0,
            opened_at: Instant::now(),
            created_at: Utc::now(),
            retry_at: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn requests(&self) -> &[ScoreUpdateRequest] {
        &self.requests
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Sum of the encoded sizes of the contained requests.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Number of failed send attempts so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn content_ids(&self) -> impl Iterator<Item = &str> {
        self.requests.iter().map(ScoreUpdateRequest::content_id)
    }

    fn push(&mut self, request: ScoreUpdateRequest) {
        self.size_bytes = self.size_bytes.saturating_add(request.encoded_len());
        self.requests.push(request);
    }

    /// Count one more failed attempt and return the new total.
    pub(crate) fn record_failure(&mut self) -> u32 {
        self.attempts = self.attempts.saturating_add(1);
        self.attempts
    }

    pub(crate) fn schedule_retry(&mut self, at: Instant) {
        self.retry_at = Some(at);
    }

    /// When a scheduled retry becomes due; `None` means send as soon as possible.
    pub(crate) fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    pub(crate) fn is_due(&self, now: Instant) -> bool {
        self.retry_at.is_none_or(|at| at <= now)
    }
}

/// Packs incoming requests into batches no larger than `max_size` bytes.
///
/// A request that does not fit the open batch's remaining capacity closes it
/// and starts a new one. A request larger than `max_size` on its own is never
/// merged with others: it is sealed alone, immediately.
#[derive(Debug)]
pub struct BatchAccumulator {
    max_size: usize,
    open: Option<Batch>,
}

impl BatchAccumulator {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            open: None,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Append `request`, returning the batches it caused to be sealed, oldest first.
    pub fn push(&mut self, request: ScoreUpdateRequest) -> Vec<Batch> {
        let size = request.encoded_len();
        let mut sealed = Vec::new();

        if size > self.max_size {
            sealed.extend(self.open.take());
            let mut solo = Batch::new();
            solo.push(request);
            sealed.push(solo);
            return sealed;
        }

        let fits = self
            .open
            .as_ref()
            .is_none_or(|batch| batch.size_bytes() + size <= self.max_size);
        if !fits {
            sealed.extend(self.open.take());
        }
        self.open.get_or_insert_with(Batch::new).push(request);
        sealed
    }

    /// Instant at which the open batch's wait window elapses.
    pub fn flush_deadline(&self, wait: Duration) -> Option<Instant> {
        self.open.as_ref().map(|batch| batch.opened_at() + wait)
    }

    /// Seal the open batch if it has been open for at least `wait`.
    pub fn flush_due(&mut self, now: Instant, wait: Duration) -> Option<Batch> {
        let due = self
            .open
            .as_ref()
            .is_some_and(|batch| now.saturating_duration_since(batch.opened_at()) >= wait);
        if due { self.open.take() } else { None }
    }

    /// Seal whatever is open, regardless of age.
    pub fn take(&mut self) -> Option<Batch> {
        self.open.take()
    }

    pub fn open_len(&self) -> usize {
        self.open.as_ref().map_or(0, Batch::len)
    }
}
