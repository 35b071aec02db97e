use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use scorerelay::queue::{IntakeQueue, UploadQueue};

use super::relay_harness::{
    RECIPIENTS, RecordingNotifier, WAIT, http_deps, http_deps_with_timeout, request, settings,
    wait_for_requests, wait_until,
};

#[tokio::test]
async fn batch_is_posted_as_json_array_of_updates() {
    let server = MockServer::start().await;
    let expected_body = json!([
        {
            "contentId": "/content/a",
            "scores": {
                "scoreUnaware": 1.0,
                "scoreCurious": 2.5,
                "scoreFollower": 0.0,
                "scoreGuide": 4.0
            },
            "confidence": 0.5
        },
        {
            "contentId": "/content/b",
            "scores": {
                "scoreUnaware": 1.0,
                "scoreCurious": 2.5,
                "scoreFollower": 0.0,
                "scoreGuide": 4.0
            },
            "confidence": 0.5
        }
    ]);

    Mock::given(method("POST"))
        .and(path("/api/scores"))
        .and(header("content-type", "application/json"))
        .and(body_json(expected_body))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = Arc::new(RecordingNotifier::default());
    let endpoint = format!("{}/api/scores", server.uri());
    let mut queue = UploadQueue::new(
        settings(3),
        IntakeQueue::new(),
        http_deps(&endpoint, &notifier),
        Vec::new(),
    );
    queue.start().unwrap();

    queue.submit(request("/content/a"));
    queue.submit(request("/content/b"));

    let received = wait_for_requests(&server, 1, Duration::from_secs(5)).await;
    assert_eq!(received.len(), 1);

    queue.shutdown().await.unwrap();
    assert!(queue.pending_batches().await.unwrap().is_empty());
    assert!(notifier.alerts().is_empty());
    server.verify().await;
}

#[tokio::test]
async fn server_errors_are_retried_then_escalated_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let notifier = Arc::new(RecordingNotifier::default());
    let mut queue = UploadQueue::new(
        settings(3),
        IntakeQueue::new(),
        http_deps(&server.uri(), &notifier),
        Vec::new(),
    );
    queue.start().unwrap();
    queue.submit(request("/content/doomed"));

    let escalated = wait_until(Duration::from_secs(5), || !notifier.alerts().is_empty()).await;
    assert!(escalated);

    // No fourth attempt after escalation.
    tokio::time::sleep(WAIT * 4).await;
    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 3);

    let alerts = notifier.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].attempts, 3);
    assert_eq!(alerts[0].recipients, RECIPIENTS);
    assert_eq!(alerts[0].content_ids, ["/content/doomed"]);
    assert!(alerts[0].last_error.contains("503"));
    assert!(alerts[0].last_error.contains("maintenance"));

    queue.shutdown().await.unwrap();
    assert!(queue.pending_batches().await.unwrap().is_empty());
}

#[tokio::test]
async fn transient_failures_recover_without_escalation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    let notifier = Arc::new(RecordingNotifier::default());
    let mut queue = UploadQueue::new(
        settings(3),
        IntakeQueue::new(),
        http_deps(&server.uri(), &notifier),
        Vec::new(),
    );
    queue.start().unwrap();
    queue.submit(request("/content/a"));

    let received = wait_for_requests(&server, 3, Duration::from_secs(5)).await;
    assert_eq!(received.len(), 3);
    // Every attempt carries the same batch.
    assert!(received.windows(2).all(|pair| pair[0].body == pair[1].body));

    queue.shutdown().await.unwrap();
    assert!(queue.pending_batches().await.unwrap().is_empty());
    assert!(notifier.alerts().is_empty());
}

#[tokio::test]
async fn slow_endpoint_counts_as_failed_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let notifier = Arc::new(RecordingNotifier::default());
    let mut queue = UploadQueue::new(
        settings(1),
        IntakeQueue::new(),
        http_deps_with_timeout(&server.uri(), &notifier, Duration::from_millis(200)),
        Vec::new(),
    );
    queue.start().unwrap();
    queue.submit(request("/content/slow"));

    let escalated = wait_until(Duration::from_secs(5), || !notifier.alerts().is_empty()).await;
    assert!(escalated);
    assert!(notifier.alerts()[0].last_error.contains("timed out"));

    queue.shutdown().await.unwrap();
}
