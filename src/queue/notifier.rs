use super::batch::Batch;
use crate::config::SmtpConfig;
use crate::error::NotifyError;
use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

/// Content ids listed in an alert body before the remainder is summarized.
const MAX_LISTED_IDS: usize = 50;

pub type NotifyFuture<'a> = Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>>;

/// Everything an operator needs to know about a batch that was given up on.
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationAlert {
    pub endpoint: String,
    pub batch_id: Uuid,
    pub request_count: usize,
    pub content_ids: Vec<String>,
    pub attempts: u32,
    pub last_error: String,
    pub batch_created_at: DateTime<Utc>,
    pub recipients: Vec<String>,
}

impl EscalationAlert {
    pub fn for_batch(
        batch: &Batch,
        endpoint: &str,
        last_error: &str,
        recipients: &[String],
    ) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            batch_id: batch.id(),
            request_count: batch.len(),
            content_ids: batch.content_ids().map(str::to_string).collect(),
            attempts: batch.attempts(),
            last_error: last_error.to_string(),
            batch_created_at: batch.created_at(),
            recipients: recipients.to_vec(),
        }
    }

    pub fn subject(&self) -> String {
        format!(
            "Content score upload failed after {} attempts ({} updates dropped)",
            self.attempts, self.request_count
        )
    }

    pub fn body(&self) -> String {
        let mut body = format!(
            "Uploading content scores to {} failed after {} attempts. \
             The batch has been dropped and must be resubmitted manually.\n\n",
            self.endpoint, self.attempts
        );
        let _ = writeln!(body, "Batch:      {}", self.batch_id);
        let _ = writeln!(body, "Created:    {}", self.batch_created_at.to_rfc3339());
        let _ = writeln!(body, "Updates:    {}", self.request_count);
        let _ = writeln!(body, "Last error: {}", self.last_error);
        body.push_str("\nContent ids:\n");
        for id in self.content_ids.iter().take(MAX_LISTED_IDS) {
            let _ = writeln!(body, "  - {id}");
        }
        if self.content_ids.len() > MAX_LISTED_IDS {
            let _ = writeln!(
                body,
                "  ... and {} more",
                self.content_ids.len() - MAX_LISTED_IDS
            );
        }
        body
    }
}

/// Alerts a human when a batch exhausts its retries.
///
/// Failures are reported back to the worker, which only logs them.
pub trait EscalationNotifier: Send + Sync {
    fn name(&self) -> &str;

    fn notify<'a>(&'a self, alert: &'a EscalationAlert) -> NotifyFuture<'a>;
}

/// Writes alerts to the log only. Used when no mail server is configured.
pub struct LogNotifier;

impl EscalationNotifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    fn notify<'a>(&'a self, alert: &'a EscalationAlert) -> NotifyFuture<'a> {
        Box::pin(async move {
            tracing::error!(
                batch_id = %alert.batch_id,
                endpoint = %alert.endpoint,
                requests = alert.request_count,
                attempts = alert.attempts,
                recipients = %alert.recipients.join(","),
                last_error = %alert.last_error,
                "{}",
                alert.subject()
            );
            Ok(())
        })
    }
}

#[cfg(feature = "email")]
pub use smtp::SmtpNotifier;

#[cfg(feature = "email")]
mod smtp {
    use super::{EscalationAlert, EscalationNotifier, NotifyFuture};
    use crate::config::{SmtpConfig, SmtpSecurity};
    use crate::error::NotifyError;
    use lettre::message::Mailbox;
    use lettre::message::header::ContentType;
    use lettre::transport::smtp::authentication::Credentials;
    use lettre::{Message, SmtpTransport, Transport};

    /// Mails alerts to every recipient through an SMTP relay.
    pub struct SmtpNotifier {
        transport: SmtpTransport,
        from: Mailbox,
    }

    impl SmtpNotifier {
        pub fn from_config(config: &SmtpConfig) -> Result<Self, NotifyError> {
            let from = parse_mailbox(&config.from)?;
            let builder = match config.security {
                SmtpSecurity::Tls => SmtpTransport::relay(&config.host),
                SmtpSecurity::Starttls => SmtpTransport::starttls_relay(&config.host),
                SmtpSecurity::None => Ok(SmtpTransport::builder_dangerous(&config.host)),
            }
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

            let mut builder = builder.port(config.port).timeout(Some(config.timeout()));
            if let (Some(username), Some(password)) = (&config.username, &config.password) {
                builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
            }

            Ok(Self {
                transport: builder.build(),
                from,
            })
        }

        pub(crate) fn compose(&self, alert: &EscalationAlert) -> Result<Message, NotifyError> {
            if alert.recipients.is_empty() {
                return Err(NotifyError::NoRecipients);
            }
            let mut builder = Message::builder()
                .from(self.from.clone())
                .subject(alert.subject())
                .header(ContentType::TEXT_PLAIN);
            for recipient in &alert.recipients {
                builder = builder.to(parse_mailbox(recipient)?);
            }
            builder
                .body(alert.body())
                .map_err(|e| NotifyError::Compose(e.to_string()))
        }
    }

    impl EscalationNotifier for SmtpNotifier {
        fn name(&self) -> &str {
            "smtp"
        }

        fn notify<'a>(&'a self, alert: &'a EscalationAlert) -> NotifyFuture<'a> {
            Box::pin(async move {
                let message = self.compose(alert)?;
                let transport = self.transport.clone();
                tokio::task::spawn_blocking(move || transport.send(&message))
                    .await
                    .map_err(|e| NotifyError::Delivery(e.to_string()))?
                    .map_err(|e| NotifyError::Delivery(e.to_string()))?;
                tracing::info!(
                    batch_id = %alert.batch_id,
                    recipients = alert.recipients.len(),
                    "escalation mail sent"
                );
                Ok(())
            })
        }
    }

    fn parse_mailbox(address: &str) -> Result<Mailbox, NotifyError> {
        address
            .trim()
            .parse::<Mailbox>()
            .map_err(|e| NotifyError::Address {
                address: address.to_string(),
                message: e.to_string(),
            })
    }
}

/// Factory: SMTP when a relay is configured, log-only otherwise.
pub fn create_notifier(smtp: Option<&SmtpConfig>) -> anyhow::Result<Arc<dyn EscalationNotifier>> {
    match smtp {
        #[cfg(feature = "email")]
        Some(config) => Ok(Arc::new(SmtpNotifier::from_config(config)?)),
        #[cfg(not(feature = "email"))]
        Some(_) => {
            tracing::warn!("SMTP configured but the `email` feature is disabled; alerts go to the log");
            Ok(Arc::new(LogNotifier))
        }
        None => Ok(Arc::new(LogNotifier)),
    }
}
