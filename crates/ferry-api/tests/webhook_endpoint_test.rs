//! Webhook endpoint behavior through the full router.

use std::time::Duration;

use axum::http::StatusCode;
use ferry_core::time::Clock;
use ferry_testing::{TestEnv, RELAY_NAME};

#[tokio::test]
async fn signed_event_lands_in_date_partitioned_path() {
    let env = TestEnv::new();
    let builder = env.event();
    env.serve_object(&builder, vec![42u8; 1024]);

    let response = env.post(&builder.build()).await;

    assert_eq!(response.status, StatusCode::OK, "{}", response.body);
    assert_eq!(response.body["status"], "success");
    assert_eq!(response.body["file"], "uploads/report.csv");
    assert!(response.body["processed_at"].is_string());

    let path = env.expected_path("uploads/report.csv");
    assert!(path.ends_with("/report.csv"));
    assert_eq!(env.uploaders.fs().file(&path).unwrap().len(), 1024);
    assert_eq!(env.fetcher.calls(), 1);
    assert_eq!(env.uploaders.counters().connects(), 1);
    assert_eq!(env.uploaders.counters().closes(), 1);
}

#[tokio::test]
async fn wrong_signing_key_is_rejected_without_side_effects() {
    let env = TestEnv::new();
    let builder = env.event().signing_key("not-K");
    env.serve_object(&builder, vec![0u8; 1024]);

    let response = env.post(&builder.build()).await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body["error"], "unauthorized");
    assert!(response.body["message"].is_string());
    assert_eq!(env.fetcher.calls(), 0);
    assert!(env.uploaders.counters().untouched());
}

#[tokio::test]
async fn body_edited_after_signing_is_rejected() {
    let env = TestEnv::new();
    let builder = env.event();
    env.serve_object(&builder, vec![0u8; 1024]);

    let original = builder.build();
    let reformatted = {
        let value: serde_json::Value = serde_json::from_slice(&original.body).unwrap();
        let mut pretty = serde_json::to_vec_pretty(&value).unwrap();
        pretty.push(b'\n');
        pretty
    };

    let response = env.post(&original.with_body(reformatted)).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(env.fetcher.calls(), 0);
}

#[tokio::test]
async fn wrong_or_missing_api_key_is_rejected() {
    let env = TestEnv::new();

    let wrong = env.post(&env.event().api_key("other").build()).await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);

    let missing = env.post(&env.event().build().without_header("x-api-key")).await;
    assert_eq!(missing.status, StatusCode::UNAUTHORIZED);

    assert!(env.uploaders.counters().untouched());
}

#[tokio::test]
async fn stale_timestamp_is_rejected() {
    let env = TestEnv::new();
    let webhook = env.event().build();

    env.clock.advance(Duration::from_secs(301));
    let response = env.post(&webhook).await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(env.fetcher.calls(), 0);
}

#[tokio::test]
async fn missing_required_fields_are_client_errors() {
    for field in ["eventId", "bucket", "key", "size", "presignedUrl"] {
        let env = TestEnv::new();
        let builder = env.event();
        env.serve_object(&builder, vec![0u8; 1024]);

        let response = env.post(&builder.build_without(field)).await;

        assert_eq!(response.status, StatusCode::BAD_REQUEST, "missing {field}");
        assert_eq!(response.body["error"], "invalid_payload");
        assert_eq!(env.fetcher.calls(), 0, "missing {field}");
        assert!(env.uploaders.counters().untouched(), "missing {field}");
    }
}

#[tokio::test]
async fn non_positive_size_and_garbage_are_client_errors() {
    let env = TestEnv::new();

    let zero = env.post(&env.event().size(0).build()).await;
    assert_eq!(zero.status, StatusCode::BAD_REQUEST);

    let garbage = env.post(&env.event().sign(&b"not json"[..])).await;
    assert_eq!(garbage.status, StatusCode::BAD_REQUEST);

    let directory = env.post(&env.event().key("uploads/").build()).await;
    assert_eq!(directory.status, StatusCode::BAD_REQUEST);

    for key in ["uploads/..", "uploads/."] {
        let dot = env.post(&env.event().key(key).build()).await;
        assert_eq!(dot.status, StatusCode::BAD_REQUEST, "{key}");
    }

    assert_eq!(env.fetcher.calls(), 0);
}

#[tokio::test]
async fn unknown_relay_is_not_found() {
    let env = TestEnv::new();
    let response = env.send(env.event().build().request("other")).await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.body["error"], "not_found");
    assert_eq!(env.fetcher.calls(), 0);
}

#[tokio::test]
async fn fetch_failure_is_server_error() {
    let env = TestEnv::new();
    let response = env.post(&env.event().build()).await;

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.body["error"], "transfer_failed");
    assert!(response.body["message"].as_str().unwrap().contains("fetch"));
    assert_eq!(env.uploaders.counters().created(), 0);
}

#[tokio::test]
async fn upload_failure_is_server_error_and_session_is_closed() {
    let env = TestEnv::new();
    let builder = env.event();
    env.serve_object(&builder, vec![1u8; 1024]);
    env.uploaders.set_read_only(true);

    let response = env.post(&builder.build()).await;

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.body["message"].as_str().unwrap().contains("report.csv"));
    assert_eq!(env.uploaders.counters().connects(), 1);
    assert_eq!(env.uploaders.counters().closes(), 1);
    assert!(env.uploaders.fs().paths().is_empty());
}

#[tokio::test]
async fn unreachable_destination_is_server_error() {
    let env = TestEnv::new();
    let builder = env.event();
    env.serve_object(&builder, vec![1u8; 1024]);
    env.uploaders.set_unreachable(true);

    let response = env.post(&builder.build()).await;

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.body["message"].as_str().unwrap().contains("connect"));
}

#[tokio::test]
async fn redelivery_overwrites_same_file() {
    let env = TestEnv::new();
    let builder = env.event();
    env.serve_object(&builder, vec![9u8; 1024]);

    let webhook = builder.build();
    assert_eq!(env.post(&webhook).await.status, StatusCode::OK);
    assert_eq!(env.post(&webhook).await.status, StatusCode::OK);

    assert_eq!(env.uploaders.fs().paths().len(), 1);
    assert_eq!(env.uploaders.counters().uploads(), 2);
    assert_eq!(env.uploaders.counters().mkdirs(), 4);
}

#[tokio::test]
async fn request_id_is_echoed_or_minted() {
    let env = TestEnv::new();

    let minted = env.get("/live").await;
    assert!(minted.request_id.is_some());

    let mut request = env.event().build().request(RELAY_NAME);
    request.headers_mut().insert("x-request-id", "req-123".parse().unwrap());
    let echoed = env.send(request).await;
    assert_eq!(echoed.request_id.as_deref(), Some("req-123"));
}

#[tokio::test]
async fn transfer_past_deadline_is_server_error_not_client_error() {
    let env = TestEnv::with_transfer_timeout(Duration::from_millis(100));
    let builder = env.event();
    env.serve_object(&builder, vec![3u8; 1024]);
    env.fetcher.set_delay(Some(Duration::from_secs(5)));

    let response = env.post(&builder.build()).await;

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.body["error"], "transfer_failed");
    let message = response.body["message"].as_str().unwrap();
    assert!(message.contains("fetch"), "{message}");
    assert!(message.contains("timed out"), "{message}");
    assert_eq!(env.uploaders.counters().created(), 0);
}

#[tokio::test]
async fn handler_panic_is_contained_and_router_keeps_serving() {
    let env = TestEnv::new();
    let builder = env.event();
    env.serve_object(&builder, vec![5u8; 1024]);
    env.fetcher.set_panics(true);

    let panicked = env.post(&builder.build()).await;
    assert_eq!(panicked.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(panicked.body["error"], "internal_error");
    assert_eq!(panicked.body["message"], "internal server error");

    env.fetcher.set_panics(false);
    let next = env.post(&builder.build()).await;
    assert_eq!(next.status, StatusCode::OK, "{}", next.body);
    assert_eq!(env.uploaders.fs().file(&env.expected_path("uploads/report.csv")).unwrap().len(), 1024);
}

#[tokio::test]
async fn replay_after_capability_expiry_is_rejected() {
    let env = TestEnv::new();
    let builder = env.event();
    env.serve_object(&builder, vec![0u8; 1024]);

    // `X-Timestamp` is fresh, but the signed body's expiry has passed.
    env.clock.advance(Duration::from_secs(15 * 60 + 1));
    let replayed = builder.clone().sent_at(env.clock.now_utc()).build();
    let response = env.post(&replayed).await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(env.fetcher.calls(), 0);
    assert!(env.uploaders.counters().untouched());
}

#[tokio::test]
async fn already_expired_capability_is_rejected() {
    let env = TestEnv::new();
    let builder = env.event().expires_at(env.clock.now_utc() - chrono::Duration::seconds(1));
    env.serve_object(&builder, vec![0u8; 1024]);

    let response = env.post(&builder.build()).await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(env.fetcher.calls(), 0);
}
