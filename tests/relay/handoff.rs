use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use scorerelay::queue::{IntakeQueue, UploadQueue};
use scorerelay::service::UploadService;

use super::relay_harness::{
    RecordingNotifier, WAIT, http_deps, request, settings, wait_for_requests,
};

async fn server_responding(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}

fn content_ids(body: &[u8]) -> Vec<String> {
    let updates: Vec<serde_json::Value> = serde_json::from_slice(body).unwrap();
    updates
        .iter()
        .map(|update| update["contentId"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn reconfigure_moves_pending_batches_to_new_endpoint() {
    let failing = server_responding(503).await;
    let healthy = server_responding(200).await;
    let notifier = Arc::new(RecordingNotifier::default());

    let service = UploadService::start(settings(10), http_deps(&failing.uri(), &notifier)).unwrap();
    service.submit(request("/content/a"));
    assert_eq!(wait_for_requests(&failing, 1, Duration::from_secs(5)).await.len(), 1);

    let handed_over = service
        .reconfigure(settings(10), http_deps(&healthy.uri(), &notifier))
        .await
        .unwrap();
    assert_eq!(handed_over, 1);

    service.submit(request("/content/b"));
    let received = wait_for_requests(&healthy, 2, Duration::from_secs(5)).await;
    let delivered: Vec<String> = received
        .iter()
        .flat_map(|req| content_ids(&req.body))
        .collect();
    assert_eq!(delivered, ["/content/a", "/content/b"]);

    assert!(service.shutdown().await.is_empty());
    assert!(notifier.alerts().is_empty());
}

#[tokio::test]
async fn stopped_queue_hands_every_request_to_successor_once() {
    let failing = server_responding(500).await;
    let notifier = Arc::new(RecordingNotifier::default());
    let intake = IntakeQueue::new();

    let mut first = UploadQueue::new(
        settings(10),
        intake.clone(),
        http_deps(&failing.uri(), &notifier),
        Vec::new(),
    );
    first.start().unwrap();
    for id in ["/content/a", "/content/b", "/content/c"] {
        intake.submit(request(id));
    }
    wait_for_requests(&failing, 1, Duration::from_secs(5)).await;
    first.shutdown().await.unwrap();

    let pending = first.into_pending().await.unwrap();
    let held: usize = pending.iter().map(|batch| batch.len()).sum();
    assert_eq!(held, 3);

    let healthy = server_responding(200).await;
    let mut second = UploadQueue::new(
        settings(10),
        intake,
        http_deps(&healthy.uri(), &notifier),
        pending,
    );
    second.start().unwrap();

    tokio::time::sleep(WAIT * 5).await;
    let mut delivered: Vec<String> = healthy
        .received_requests()
        .await
        .unwrap()
        .iter()
        .flat_map(|req| content_ids(&req.body))
        .collect();
    delivered.sort();
    assert_eq!(delivered, ["/content/a", "/content/b", "/content/c"]);

    second.shutdown().await.unwrap();
    assert!(second.pending_batches().await.unwrap().is_empty());
}
