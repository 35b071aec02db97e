use thiserror::Error;

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("validation failed: {0}")]
    Validation(String),
}

// ─── Request errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("content id must not be empty")]
    EmptyContentId,

    #[error("confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f64),

    #[error("score for {property} is not a finite number")]
    NonFiniteScore { property: String },

    #[error("property {property} holds an invalid decimal: {value:?}")]
    InvalidDecimal { property: String, value: String },
}

// ─── Sender errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SendError {
    #[error("{endpoint} responded with HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("{endpoint} unreachable{}: {message}", timeout_suffix(.timeout))]
    Transport {
        endpoint: String,
        message: String,
        timeout: bool,
    },

    #[error("sender for {endpoint} panicked: {message}")]
    Panicked { endpoint: String, message: String },
}

fn timeout_suffix(timeout: &bool) -> &'static str {
    if *timeout { " (timed out)" } else { "" }
}

// ─── Escalation errors ──────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("no escalation recipients configured")]
    NoRecipients,

    #[error("invalid mail address {address:?}: {message}")]
    Address { address: String, message: String },

    #[error("failed to compose alert: {0}")]
    Compose(String),

    #[error("mail delivery failed: {0}")]
    Delivery(String),
}

// ─── Worker lifecycle errors ────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("upload worker is already running")]
    AlreadyStarted,

    #[error("upload worker has already stopped; build a successor from its pending batches")]
    AlreadyStopped,

    #[error("upload worker must be started inside a tokio runtime")]
    NoRuntime,

    #[error("upload worker is still running; stop it before collecting pending batches")]
    StillRunning,

    #[error("upload worker terminated abnormally: {0}")]
    WorkerPanicked(String),
}
