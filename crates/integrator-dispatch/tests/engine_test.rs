//! Engine lifecycle tests: producer-to-worker flow over the bounded
//! channel, startup, and graceful shutdown.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::Utc;
use integrator_core::{
    models::{AuthMethod, ClaimedRequest, RequestId, RequestStatus, Server, ServerId},
    Destinations,
};
use integrator_dispatch::{
    storage::mock::MockDispatchStorage, DispatchConfig, DispatchEngine,
};
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

fn test_request(id: i64, body: &str) -> ClaimedRequest {
    ClaimedRequest {
        id: RequestId(id),
        source: ServerId(1),
        destination: ServerId(2),
        body: body.to_string(),
        retries: 0,
        content_type: "application/json".to_string(),
        object_type: String::new(),
        body_is_query_params: false,
        submission_id: String::new(),
        url_suffix: String::new(),
        suspended: false,
        status: RequestStatus::Ready,
        status_code: String::new(),
        errors: String::new(),
        response: None,
    }
}

fn test_server(url: &str) -> Server {
    Server {
        id: ServerId(2),
        uid: "SrvTest0001".to_string(),
        name: "dhis2".to_string(),
        username: "admin".to_string(),
        password: "district".to_string(),
        auth_token: String::new(),
        auth_method: AuthMethod::Basic,
        url: url.to_string(),
        http_method: "POST".to_string(),
        cc_urls: Vec::new(),
        callback_url: String::new(),
        allow_callbacks: false,
        allow_copies: false,
        use_async: false,
        use_ssl: false,
        parse_responses: false,
        suspended: false,
        start_submission_period: 0,
        end_submission_period: 23,
        url_params: sqlx::types::Json(HashMap::new()),
        created: Utc::now(),
        updated: Utc::now(),
    }
}

fn fast_config() -> DispatchConfig {
    DispatchConfig {
        max_concurrent: 2,
        process_interval: Duration::from_millis(50),
        shutdown_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

/// Polls the mock until the request reaches `expected` or the deadline
/// passes.
async fn wait_for_status(
    storage: &MockDispatchStorage,
    id: RequestId,
    expected: RequestStatus,
) -> bool {
    for _ in 0..100 {
        if storage.request(id).await.is_some_and(|r| r.status == expected) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn engine_delivers_ready_requests_end_to_end() {
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"response": {"status": "SUCCESS"}}"#),
        )
        .mount(&mock_server)
        .await;

    let storage = Arc::new(MockDispatchStorage::new());
    storage.add_request(test_request(1, r#"{"x":1}"#)).await;
    storage.add_request(test_request(2, r#"{"y":2}"#)).await;

    let destinations = Arc::new(Destinations::from_servers(vec![test_server(&mock_server.uri())]));
    let mut engine = DispatchEngine::new(storage.clone(), destinations, fast_config())
        .expect("engine builds");
    engine.start().await;

    assert!(
        wait_for_status(&storage, RequestId(1), RequestStatus::Completed).await,
        "first request should complete"
    );
    assert!(
        wait_for_status(&storage, RequestId(2), RequestStatus::Completed).await,
        "second request should complete"
    );

    let stats = engine.stats().await;
    assert!(stats.successful_deliveries >= 2);

    engine.shutdown().await.expect("graceful shutdown");
    assert_eq!(storage.open_claims().await, 0);
}

#[tokio::test]
async fn engine_expires_requests_that_exhausted_retries() {
    let storage = Arc::new(MockDispatchStorage::new());
    let mut request = test_request(1, r#"{"x":1}"#);
    request.retries = DispatchConfig::default().max_retries + 1;
    storage.add_request(request).await;

    let destinations = Arc::new(Destinations::from_servers(vec![test_server("http://127.0.0.1:1")]));
    let mut engine = DispatchEngine::new(storage.clone(), destinations, fast_config())
        .expect("engine builds");
    engine.start().await;

    assert!(
        wait_for_status(&storage, RequestId(1), RequestStatus::Expired).await,
        "request should expire"
    );

    engine.shutdown().await.expect("graceful shutdown");
}

#[tokio::test]
async fn failed_requests_stay_in_the_scan_set_until_expiry() {
    // An unreachable destination fails the request with a retry increment
    // each cycle; the producer keeps re-selecting it until the counter
    // passes max_retries and it expires.
    let storage = Arc::new(MockDispatchStorage::new());
    storage.add_request(test_request(1, r#"{"x":1}"#)).await;

    let destinations =
        Arc::new(Destinations::from_servers(vec![test_server("http://127.0.0.1:1")]));
    let config = DispatchConfig { max_retries: 1, ..fast_config() };
    let mut engine =
        DispatchEngine::new(storage.clone(), destinations, config).expect("engine builds");
    engine.start().await;

    assert!(
        wait_for_status(&storage, RequestId(1), RequestStatus::Expired).await,
        "request should eventually expire through repeated failures"
    );

    let expired = storage.request(RequestId(1)).await.expect("request exists");
    assert!(expired.retries > 1, "failure cycles should have incremented retries");

    engine.shutdown().await.expect("graceful shutdown");
}

#[tokio::test]
async fn engine_starts_and_shuts_down_without_work() {
    let storage = Arc::new(MockDispatchStorage::new());
    let destinations = Arc::new(Destinations::from_servers(Vec::new()));

    let mut engine = DispatchEngine::new(storage, destinations, fast_config())
        .expect("engine builds");
    engine.start().await;

    let stats = engine.stats().await;
    assert_eq!(stats.active_workers, 2);

    engine.shutdown().await.expect("graceful shutdown");
}

#[tokio::test]
async fn shutdown_before_start_completes_immediately() {
    let storage = Arc::new(MockDispatchStorage::new());
    let destinations = Arc::new(Destinations::from_servers(Vec::new()));

    let engine = DispatchEngine::new(storage, destinations, fast_config())
        .expect("engine builds");
    engine.shutdown().await.expect("shutdown without start");
}
