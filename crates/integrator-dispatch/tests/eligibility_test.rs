//! Eligibility policy tests: the ordered gating checks a claimed request
//! passes before any delivery is attempted.

use std::{collections::HashMap, sync::Arc};

use chrono::{Timelike, Utc};
use integrator_core::{
    models::{AuthMethod, ClaimedRequest, RequestId, RequestStatus, Server, ServerId},
    Destinations,
};
use integrator_dispatch::{
    storage::mock::MockDispatchStorage, worker::Worker, DeliveryClient, DispatchConfig,
    EngineStats,
};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

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

fn test_worker(storage: Arc<MockDispatchStorage>, server: Server) -> Worker {
    let destinations = Arc::new(Destinations::from_servers(vec![server]));
    Worker::new(
        0,
        storage,
        destinations,
        Arc::new(DeliveryClient::with_defaults().expect("client")),
        DispatchConfig::default(),
        Arc::new(RwLock::new(EngineStats::default())),
        CancellationToken::new(),
    )
}

#[tokio::test]
async fn exhausted_retries_expire_the_request() {
    let storage = Arc::new(MockDispatchStorage::new());
    let mut request = test_request(1, r#"{"x":1}"#);
    request.retries = DispatchConfig::default().max_retries + 1;
    storage.add_request(request).await;

    let worker = test_worker(storage.clone(), test_server("http://127.0.0.1:1"));
    worker.process(RequestId(1)).await.expect("processing succeeds");

    let updated = storage.request(RequestId(1)).await.expect("request exists");
    assert_eq!(updated.status, RequestStatus::Expired);
}

#[tokio::test]
async fn exhausted_retries_win_over_every_other_check() {
    // A blacklisted, empty-bodied request with exhausted retries still
    // expires: the retry check runs first.
    let storage = Arc::new(MockDispatchStorage::new());
    let mut request = test_request(1, "");
    request.retries = DispatchConfig::default().max_retries + 1;
    request.suspended = true;
    storage.add_request(request).await;

    let worker = test_worker(storage.clone(), test_server("http://127.0.0.1:1"));
    worker.process(RequestId(1)).await.expect("processing succeeds");

    let updated = storage.request(RequestId(1)).await.expect("request exists");
    assert_eq!(updated.status, RequestStatus::Expired);
    assert_ne!(updated.status_code, "ERROR7");
}

#[tokio::test]
async fn suspended_destination_leaves_request_untouched() {
    let storage = Arc::new(MockDispatchStorage::new());
    storage.add_request(test_request(1, r#"{"x":1}"#)).await;

    let mut server = test_server("http://127.0.0.1:1");
    server.suspended = true;

    let worker = test_worker(storage.clone(), server);
    worker.process(RequestId(1)).await.expect("processing succeeds");

    let updated = storage.request(RequestId(1)).await.expect("request exists");
    assert_eq!(updated.status, RequestStatus::Ready);
    assert_eq!(updated.retries, 0);
    assert!(updated.errors.is_empty());
}

#[tokio::test]
async fn out_of_submission_period_leaves_request_untouched() {
    let storage = Arc::new(MockDispatchStorage::new());
    storage.add_request(test_request(1, r#"{"x":1}"#)).await;

    // A one-hour window two hours from now can never contain the current
    // hour, whatever the wall clock says.
    let mut server = test_server("http://127.0.0.1:1");
    let excluded = i32::try_from((Utc::now().hour() + 2) % 24).expect("hour fits");
    server.start_submission_period = excluded;
    server.end_submission_period = excluded;

    let worker = test_worker(storage.clone(), server);
    worker.process(RequestId(1)).await.expect("processing succeeds");

    let updated = storage.request(RequestId(1)).await.expect("request exists");
    assert_eq!(updated.status, RequestStatus::Ready);
    assert_eq!(updated.retries, 0);
}

#[tokio::test]
async fn blacklisted_request_is_canceled_with_error7() {
    let storage = Arc::new(MockDispatchStorage::new());
    let mut request = test_request(1, r#"{"x":1}"#);
    request.suspended = true;
    storage.add_request(request).await;

    let worker = test_worker(storage.clone(), test_server("http://127.0.0.1:1"));
    worker.process(RequestId(1)).await.expect("processing succeeds");

    let updated = storage.request(RequestId(1)).await.expect("request exists");
    assert_eq!(updated.status, RequestStatus::Canceled);
    assert_eq!(updated.status_code, "ERROR7");
    assert_eq!(updated.errors, "Blacklisted");
    assert_eq!(updated.retries, 1);
}

#[tokio::test]
async fn empty_body_fails_with_error1_regardless_of_destination_state() {
    for body in ["", "   ", "\n\t "] {
        let storage = Arc::new(MockDispatchStorage::new());
        storage.add_request(test_request(1, body)).await;

        let worker = test_worker(storage.clone(), test_server("http://127.0.0.1:1"));
        worker.process(RequestId(1)).await.expect("processing succeeds");

        let updated = storage.request(RequestId(1)).await.expect("request exists");
        assert_eq!(updated.status, RequestStatus::Failed);
        assert_eq!(updated.status_code, "ERROR1");
        assert_eq!(updated.errors, "Request has empty body");
    }
}

#[tokio::test]
async fn unknown_destination_is_skipped_without_mutation() {
    let storage = Arc::new(MockDispatchStorage::new());
    let mut request = test_request(1, r#"{"x":1}"#);
    request.destination = ServerId(99);
    storage.add_request(request).await;

    let worker = test_worker(storage.clone(), test_server("http://127.0.0.1:1"));
    worker.process(RequestId(1)).await.expect("processing succeeds");

    let updated = storage.request(RequestId(1)).await.expect("request exists");
    assert_eq!(updated.status, RequestStatus::Ready);
}

#[tokio::test]
async fn terminal_request_is_skipped_even_when_enqueued_twice() {
    let storage = Arc::new(MockDispatchStorage::new());
    let mut request = test_request(1, r#"{"x":1}"#);
    request.status = RequestStatus::Completed;
    storage.add_request(request).await;

    let worker = test_worker(storage.clone(), test_server("http://127.0.0.1:1"));
    worker.process(RequestId(1)).await.expect("processing succeeds");

    let updated = storage.request(RequestId(1)).await.expect("request exists");
    assert_eq!(updated.status, RequestStatus::Completed);
    assert_eq!(updated.retries, 0);
}

#[tokio::test]
async fn concurrent_claims_yield_exactly_one_success() {
    let storage = Arc::new(MockDispatchStorage::new());
    storage.add_request(test_request(1, r#"{"x":1}"#)).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let storage = storage.clone();
        handles.push(tokio::spawn(async move {
            use integrator_dispatch::{Claim, DispatchStorage};
            matches!(
                storage.claim(RequestId(1)).await.expect("claim call succeeds"),
                Claim::Claimed(_)
            )
        }));
    }

    let mut successes = 0;
    for handle in handles {
        if handle.await.expect("task joins") {
            successes += 1;
        }
    }

    assert_eq!(successes, 1, "exactly one concurrent claim may win");
    assert_eq!(storage.open_claims().await, 1);
}

#[tokio::test]
async fn claim_is_released_after_processing() {
    let storage = Arc::new(MockDispatchStorage::new());
    storage.add_request(test_request(1, "")).await;

    let worker = test_worker(storage.clone(), test_server("http://127.0.0.1:1"));
    worker.process(RequestId(1)).await.expect("processing succeeds");

    assert_eq!(storage.open_claims().await, 0, "row lock must always be released");
}
