pub mod batch;
pub mod intake;
pub mod notifier;
pub mod request;
pub mod retry;
pub mod sender;
pub mod worker;

pub use batch::{Batch, BatchAccumulator};
pub use intake::IntakeQueue;
pub use notifier::{EscalationAlert, EscalationNotifier, LogNotifier, create_notifier};
#[cfg(feature = "email")]
pub use notifier::SmtpNotifier;
pub use request::{ScoreType, ScoreUpdateRequest, has_all_scores};
pub use retry::{RetryBackoff, RetryDecision, RetryPolicy};
pub use sender::{BatchSender, HttpBatchSender};
pub use worker::{QueueDeps, QueueSettings, UploadQueue};
