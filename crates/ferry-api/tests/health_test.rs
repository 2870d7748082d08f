//! Health and liveness checks.

use axum::http::StatusCode;
use ferry_testing::TestEnv;

#[tokio::test]
async fn healthy_when_destination_accepts_sessions() {
    let env = TestEnv::new();
    let response = env.get("/health").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "healthy");
    assert_eq!(response.body["services"]["sftp"], "connected");
    assert_eq!(response.body["services"]["webhook"], "running");
    assert!(response.body["timestamp"].is_string());

    let counters = env.uploaders.counters();
    assert_eq!(counters.connects(), 1);
    assert_eq!(counters.closes(), 1);
    assert_eq!(counters.uploads(), 0);
}

#[tokio::test]
async fn degraded_when_destination_is_down() {
    let env = TestEnv::new();
    env.uploaders.set_unreachable(true);

    let response = env.get("/health").await;

    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.body["status"], "degraded");
    assert_eq!(response.body["services"]["sftp"], "disconnected");
    assert_eq!(response.body["services"]["webhook"], "running");
}

#[tokio::test]
async fn liveness_ignores_dependencies() {
    let env = TestEnv::new();
    env.uploaders.set_unreachable(true);

    let response = env.get("/live").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "alive");
    assert_eq!(env.uploaders.counters().created(), 0);
}
