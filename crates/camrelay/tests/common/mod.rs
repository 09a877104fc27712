//! Test helpers: a stub ISAPI camera and an in-process relay server

#![allow(dead_code)]

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::put,
    Router,
};
use camrelay::config::{StreamSource, TranscoderConfig};
use camrelay::{create_router, AppState, CameraEndpoint, Config};

pub const PTZ_PATH: &str = "/ISAPI/PTZCtrl/channels/1/continuous";
pub const USERNAME: &str = "operator";
pub const PASSWORD: &str = "test-password";

const CHALLENGE: &str =
    r#"Digest realm="IP Camera", qop="auth", nonce="4e6a4d354e7a4532", algorithm=MD5"#;

/// How the stub camera answers PTZ requests.
#[derive(Clone)]
pub enum CameraBehavior {
    /// 401 with a digest challenge until a digest `Authorization` arrives
    Digest,
    /// 401 with a digest challenge every time (wrong password)
    RejectAll,
    /// Fixed error status with a diagnostic body
    Error(StatusCode, &'static str),
    /// Accept, but only after a delay
    Slow(Duration),
    /// Digest flow with every answer (challenge and acceptance) delayed
    SlowDigest(Duration),
}

/// One request seen by the stub camera.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub body: String,
}

#[derive(Clone)]
struct StubState {
    behavior: CameraBehavior,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

/// Running stub camera.
pub struct StubCamera {
    pub addr: SocketAddr,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

impl StubCamera {
    pub fn ptz_url(&self) -> String {
        format!("http://{}{}", self.addr, PTZ_PATH)
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn challenge() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, CHALLENGE)],
        "Unauthorized",
    )
        .into_response()
}

async fn continuous(State(state): State<StubState>, headers: HeaderMap, body: String) -> Response {
    let authorization = header_value(&headers, header::AUTHORIZATION);
    state.seen.lock().unwrap().push(SeenRequest {
        authorization: authorization.clone(),
        content_type: header_value(&headers, header::CONTENT_TYPE),
        body,
    });

    let digest_ok = authorization
        .as_deref()
        .is_some_and(|a| a.starts_with("Digest ") && a.contains(&format!("username=\"{}\"", USERNAME)));

    if let CameraBehavior::SlowDigest(delay) = state.behavior {
        tokio::time::sleep(delay).await;
    }

    match state.behavior {
        CameraBehavior::Digest | CameraBehavior::SlowDigest(_) if digest_ok => {
            StatusCode::OK.into_response()
        }
        CameraBehavior::SlowDigest(_) => challenge(),
        CameraBehavior::Digest | CameraBehavior::RejectAll => challenge(),
        CameraBehavior::Error(status, text) => (status, text).into_response(),
        CameraBehavior::Slow(delay) => {
            tokio::time::sleep(delay).await;
            StatusCode::OK.into_response()
        }
    }
}

pub async fn start_camera(behavior: CameraBehavior) -> StubCamera {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let state = StubState {
        behavior,
        seen: seen.clone(),
    };
    let app = Router::new()
        .route(PTZ_PATH, put(continuous))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, app).into_future());

    StubCamera { addr, seen }
}

/// A local address with nothing listening on it.
pub async fn closed_port() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Transcoder stand-in: `sh -c <script>`; the source URL lands in `$0`.
pub fn shell_transcoder(script: &str) -> TranscoderConfig {
    TranscoderConfig {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string(), "{source}".to_string()],
        chunk_size: 64,
        max_buffer_bytes: 4096,
        first_frame_timeout_ms: 2000,
        ..TranscoderConfig::default()
    }
}

pub fn config(ptz_url: &str, transcoder: TranscoderConfig) -> Config {
    let mut config = Config {
        listen: "127.0.0.1:0".to_string(),
        camera: CameraEndpoint {
            ptz_url: ptz_url.to_string(),
            username: USERNAME.to_string(),
            password: PASSWORD.to_string(),
            timeout_ms: 500,
        },
        transcoder,
        ..Config::default()
    };
    config.streams.insert(
        "video".to_string(),
        StreamSource::new("rtsp://127.0.0.1:554/Streaming/Channels/102"),
    );
    config.streams.insert(
        "thermal".to_string(),
        StreamSource::new("rtsp://127.0.0.1:554/Streaming/Channels/202"),
    );
    config
}

/// Serve the relay router on an ephemeral port and return its base URL.
pub async fn start_relay(config: Config) -> String {
    config.validate().unwrap();
    let state = AppState::new(Arc::new(config)).unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, create_router(state)).into_future());

    format!("http://{}", addr)
}
