#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wiremock::{MockServer, Request};

use scorerelay::observability::NoopObserver;
use scorerelay::queue::notifier::NotifyFuture;
use scorerelay::queue::{
    EscalationAlert, EscalationNotifier, HttpBatchSender, QueueDeps, QueueSettings, RetryPolicy,
    ScoreType, ScoreUpdateRequest,
};

pub const WAIT: Duration = Duration::from_millis(100);
pub const RECIPIENTS: [&str; 2] = ["some.email@example.com", "another.email@example.com"];

#[derive(Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<EscalationAlert>>,
}

impl RecordingNotifier {
    pub fn alerts(&self) -> Vec<EscalationAlert> {
        self.alerts.lock().unwrap().clone()
    }
}

impl EscalationNotifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    fn notify<'a>(&'a self, alert: &'a EscalationAlert) -> NotifyFuture<'a> {
        Box::pin(async move {
            self.alerts.lock().unwrap().push(alert.clone());
            Ok(())
        })
    }
}

pub fn request(id: &str) -> ScoreUpdateRequest {
    let scores = BTreeMap::from([
        (ScoreType::Unaware, 1.0),
        (ScoreType::Curious, 2.5),
        (ScoreType::Follower, 0.0),
        (ScoreType::Guide, 4.0),
    ]);
    ScoreUpdateRequest::new(id, scores, 0.5).unwrap()
}

pub fn settings(max_retries: u32) -> QueueSettings {
    QueueSettings {
        max_batch_size: 4_000_000,
        wait_time: WAIT,
        retry: RetryPolicy::fixed(max_retries, WAIT),
        recipients: RECIPIENTS.map(str::to_string).to_vec(),
    }
}

pub fn http_deps(endpoint: &str, notifier: &Arc<RecordingNotifier>) -> QueueDeps {
    http_deps_with_timeout(endpoint, notifier, Duration::from_secs(5))
}

pub fn http_deps_with_timeout(
    endpoint: &str,
    notifier: &Arc<RecordingNotifier>,
    timeout: Duration,
) -> QueueDeps {
    QueueDeps {
        sender: Arc::new(HttpBatchSender::new(endpoint, timeout)),
        notifier: notifier.clone(),
        observer: Arc::new(NoopObserver),
    }
}

/// Poll until the server has seen `count` requests or `timeout` elapses.
pub async fn wait_for_requests(server: &MockServer, count: usize, timeout: Duration) -> Vec<Request> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let received = server.received_requests().await.unwrap_or_default();
        if received.len() >= count || tokio::time::Instant::now() >= deadline {
            return received;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Poll `condition` until it holds or `timeout` elapses; returns the last result.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
