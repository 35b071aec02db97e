use super::batch::Batch;
use crate::config::QueueConfig;
use crate::error::SendError;
use reqwest::Client;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

const MAX_ERROR_BODY_CHARS: usize = 512;

pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SendError>> + Send + 'a>>;

/// Delivers one batch to the scoring API.
///
/// Every error is treated the same way by the worker: counted and retried
/// until the retry ceiling, then escalated.
pub trait BatchSender: Send + Sync {
    /// Destination reported in logs and alerts.
    fn endpoint(&self) -> &str;

    fn send<'a>(&'a self, batch: &'a Batch) -> SendFuture<'a>;
}

/// POSTs each batch as a JSON array of score updates.
pub struct HttpBatchSender {
    client: Client,
    endpoint: String,
}

impl HttpBatchSender {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: build_upload_client(timeout),
            endpoint: endpoint.into(),
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.endpoint.clone(), config.send_timeout())
    }
}

pub fn build_upload_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .pool_max_idle_per_host(2)
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Falling back to default HTTP client: {e}");
            Client::new()
        })
}

impl BatchSender for HttpBatchSender {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn send<'a>(&'a self, batch: &'a Batch) -> SendFuture<'a> {
        Box::pin(async move {
            let response = self
                .client
                .post(&self.endpoint)
                .json(batch.requests())
                .send()
                .await
                .map_err(|e| SendError::Transport {
                    endpoint: self.endpoint.clone(),
                    timeout: e.is_timeout(),
                    message: e.to_string(),
                })?;

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }

            let body = response.text().await.unwrap_or_default();
            Err(SendError::Status {
                endpoint: self.endpoint.clone(),
                status: status.as_u16(),
                body: truncate_chars(&body, MAX_ERROR_BODY_CHARS),
            })
        })
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}
