//! End-to-end tests for `POST /api/proxy` against a stub camera

mod common;

use std::time::{Duration, Instant};

use axum::http::StatusCode as StubStatus;
use camrelay::config::TranscoderConfig;
use camrelay::http_server::ProxyResponse;
use common::{CameraBehavior, StubCamera};
use reqwest::StatusCode;
use serde_json::json;

async fn relay_for(camera: &StubCamera) -> String {
    common::start_relay(common::config(&camera.ptz_url(), TranscoderConfig::default())).await
}

async fn post(base: &str, body: serde_json::Value) -> (StatusCode, ProxyResponse) {
    let response = reqwest::Client::new()
        .post(format!("{}/api/proxy", base))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = response.status();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn test_move_with_digest_auth() {
    let camera = common::start_camera(CameraBehavior::Digest).await;
    let base = relay_for(&camera).await;

    let (status, body) = post(&base, json!({"action": "move", "direction": "left", "speed": 50})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, ProxyResponse::success("Camera moved"));

    let requests = camera.requests();
    assert_eq!(requests.len(), 2, "challenge then authorized request");
    assert!(requests[0].authorization.is_none());
    let authorized = &requests[1];
    assert!(authorized
        .authorization
        .as_deref()
        .unwrap()
        .starts_with("Digest "));
    assert_eq!(authorized.content_type.as_deref(), Some("application/xml"));
    assert!(authorized.body.contains("<pan>-50</pan>"));
    assert!(authorized.body.contains("<tilt>0</tilt>"));
    assert!(authorized.body.contains("<zoom>0</zoom>"));
}

#[tokio::test]
async fn test_cached_challenge_sends_one_request() {
    let camera = common::start_camera(CameraBehavior::Digest).await;
    let base = relay_for(&camera).await;

    post(&base, json!({"action": "move", "direction": "up"})).await;
    let (status, _) = post(&base, json!({"action": "move", "direction": "stop"})).await;

    assert_eq!(status, StatusCode::OK);
    let requests = camera.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[2].authorization.is_some());
    assert!(requests[2].body.contains("<pan>0</pan>"));
}

#[tokio::test]
async fn test_default_speed() {
    let camera = common::start_camera(CameraBehavior::Digest).await;
    let base = relay_for(&camera).await;

    let (status, _) = post(&base, json!({"action": "move", "direction": "zoom_in"})).await;

    assert_eq!(status, StatusCode::OK);
    let last = camera.requests().pop().unwrap();
    assert!(last.body.contains("<zoom>60</zoom>"));
}

#[tokio::test]
async fn test_wrong_password() {
    let camera = common::start_camera(CameraBehavior::RejectAll).await;
    let base = relay_for(&camera).await;

    let (status, body) = post(&base, json!({"action": "move", "direction": "right"})).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body, ProxyResponse::error("Wrong Password"));
    // the handshake is answered once, never retried
    assert_eq!(camera.requests().len(), 2);
}

#[tokio::test]
async fn test_speed_out_of_range_is_not_sent() {
    let camera = common::start_camera(CameraBehavior::Digest).await;
    let base = relay_for(&camera).await;

    for speed in [150, -1] {
        let (status, body) =
            post(&base, json!({"action": "move", "direction": "left", "speed": speed})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.status, "error");
        assert!(body.msg.contains("speed"));
    }
    assert!(camera.requests().is_empty());
}

#[tokio::test]
async fn test_unsupported_action_is_rejected() {
    let camera = common::start_camera(CameraBehavior::Digest).await;
    let base = relay_for(&camera).await;

    let (status, body) = post(&base, json!({"action": "jump", "direction": "left"})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.msg.contains("jump"));
    assert!(camera.requests().is_empty());
}

#[tokio::test]
async fn test_malformed_json() {
    let camera = common::start_camera(CameraBehavior::Digest).await;
    let base = relay_for(&camera).await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/proxy", base))
        .header("content-type", "application/json")
        .body("{\"action\": \"move\"")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ProxyResponse = response.json().await.unwrap();
    assert_eq!(body.status, "error");
    assert!(camera.requests().is_empty());
}

#[tokio::test]
async fn test_unrecognized_direction_sends_stop() {
    let camera = common::start_camera(CameraBehavior::Digest).await;
    let base = relay_for(&camera).await;

    let (status, _) = post(&base, json!({"action": "move", "direction": "sideways"})).await;

    assert_eq!(status, StatusCode::OK);
    let last = camera.requests().pop().unwrap();
    assert!(last.body.contains("<pan>0</pan>"));
    assert!(last.body.contains("<tilt>0</tilt>"));
    assert!(last.body.contains("<zoom>0</zoom>"));
}

#[tokio::test]
async fn test_camera_error_body_is_relayed() {
    let camera = common::start_camera(CameraBehavior::Error(
        StubStatus::INTERNAL_SERVER_ERROR,
        "Invalid Operation",
    ))
    .await;
    let base = relay_for(&camera).await;

    let (status, body) = post(&base, json!({"action": "move", "direction": "down"})).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body, ProxyResponse::error("Invalid Operation"));
}

#[tokio::test]
async fn test_camera_timeout() {
    let camera = common::start_camera(CameraBehavior::Slow(Duration::from_secs(3))).await;
    let base = relay_for(&camera).await;

    let (status, body) = post(&base, json!({"action": "move", "direction": "left"})).await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body.status, "error");
    assert!(body.msg.contains("did not respond"), "{}", body.msg);
}

#[tokio::test]
async fn test_camera_unreachable() {
    let addr = common::closed_port().await;
    let ptz_url = format!("http://{}{}", addr, common::PTZ_PATH);
    let base = common::start_relay(common::config(&ptz_url, TranscoderConfig::default())).await;

    let (status, body) = post(&base, json!({"action": "move", "direction": "left"})).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body.status, "error");
    assert!(!body.msg.is_empty());
    assert!(!body.msg.contains("did not respond"), "{}", body.msg);
}

#[tokio::test]
async fn test_timeout_covers_digest_handshake() {
    // each answer fits the 500 ms timeout, the challenge plus the retry does not
    let camera = common::start_camera(CameraBehavior::SlowDigest(Duration::from_millis(350))).await;
    let base = relay_for(&camera).await;

    let started = Instant::now();
    let (status, body) = post(&base, json!({"action": "move", "direction": "left"})).await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert!(body.msg.contains("did not respond"), "{}", body.msg);
    assert!(started.elapsed() < Duration::from_millis(690));
}

#[tokio::test]
async fn test_health_and_cors() {
    let camera = common::start_camera(CameraBehavior::Digest).await;
    let base = relay_for(&camera).await;

    let response = reqwest::Client::new()
        .get(format!("{}/health", base))
        .header("origin", "http://dashboard.local")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "*"
    );
    assert_eq!(response.text().await.unwrap(), "ok");
}
