//! HTTP API for the dashboard
//!
//! JSON in/out for PTZ control, `multipart/x-mixed-replace` for video.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};

use crate::config::{Config, THERMAL_STREAM, VIDEO_STREAM};
use crate::ptz::{translate, CameraControlClient, ClientError, Outcome, PtzRequest};
use crate::stream::{MultipartStreamer, StreamError, StreamSupervisor};

/// How long open video streams may keep the server alive after shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ptz: Arc<CameraControlClient>,
    pub supervisor: Arc<StreamSupervisor>,
    pub streamer: MultipartStreamer,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> Result<Self, ClientError> {
        let ptz = CameraControlClient::new(&config.camera)?;
        let supervisor = StreamSupervisor::new(config.transcoder.clone());
        Ok(Self {
            config,
            ptz: Arc::new(ptz),
            supervisor: Arc::new(supervisor),
            streamer: MultipartStreamer::default(),
        })
    }
}

/// JSON response for PTZ commands and error bodies
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProxyResponse {
    pub status: String,
    pub msg: String,
}

impl ProxyResponse {
    pub fn success(msg: impl Into<String>) -> Self {
        Self {
            status: "success".to_string(),
            msg: msg.into(),
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            msg: msg.into(),
        }
    }
}

impl From<&Outcome> for ProxyResponse {
    fn from(outcome: &Outcome) -> Self {
        if outcome.is_success() {
            ProxyResponse::success(outcome.message())
        } else {
            ProxyResponse::error(outcome.message())
        }
    }
}

fn outcome_status(outcome: &Outcome) -> StatusCode {
    match outcome {
        Outcome::Success => StatusCode::OK,
        Outcome::AuthFailed | Outcome::CameraError { .. } | Outcome::ConnectionFailed { .. } => {
            StatusCode::BAD_GATEWAY
        }
        Outcome::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
    }
}

fn stream_status(error: &StreamError) -> StatusCode {
    match error {
        StreamError::UnknownStream(_) => StatusCode::NOT_FOUND,
        StreamError::FirstFrameTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

fn stream_error(error: StreamError) -> Response {
    let status = stream_status(&error);
    if status == StatusCode::NOT_FOUND {
        log::warn!("[HTTP] {}", error);
    } else {
        log::error!("[HTTP] video request failed: {}", error);
    }
    (status, Json(ProxyResponse::error(error.to_string()))).into_response()
}

/// POST /api/proxy - Send a PTZ command to the camera
async fn proxy_command(
    State(state): State<AppState>,
    payload: Result<Json<PtzRequest>, JsonRejection>,
) -> (StatusCode, Json<ProxyResponse>) {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            log::warn!("[PTZ] rejected request body: {}", rejection.body_text());
            return (
                StatusCode::BAD_REQUEST,
                Json(ProxyResponse::error(rejection.body_text())),
            );
        }
    };

    log::info!("[PTZ] received {} (speed {})", request.direction, request.speed);

    let command = match request.validate() {
        Ok(command) => command,
        Err(e) => {
            log::warn!("[PTZ] invalid command: {}", e);
            return (StatusCode::BAD_REQUEST, Json(ProxyResponse::error(e.to_string())));
        }
    };
    if !command.direction.is_recognized() {
        log::warn!(
            "[PTZ] unrecognized direction '{}', sending stop",
            command.direction
        );
    }

    let payload = translate(&command);
    let outcome = state.ptz.send(&payload).await;
    (outcome_status(&outcome), Json(ProxyResponse::from(&outcome)))
}

/// Open a transcoder for `name` and relay it once the first frame is in.
///
/// Waiting for the first frame lets spawn failures, dead sources and garbage
/// output surface as an error status instead of an empty 200 stream.
async fn relay(state: &AppState, name: &str) -> Response {
    let Some(source) = state.config.streams.get(name) else {
        return stream_error(StreamError::UnknownStream(name.to_string()));
    };

    let mut session = match state.supervisor.open(name, source) {
        Ok(session) => session,
        Err(e) => return stream_error(e),
    };

    let timeout = state.config.transcoder.first_frame_timeout();
    let first = match tokio::time::timeout(timeout, session.next_frame()).await {
        Ok(Ok(Some(frame))) => frame,
        Ok(Ok(None)) => return stream_error(StreamError::NoFrames),
        Ok(Err(e)) => return stream_error(e),
        Err(_) => return stream_error(StreamError::FirstFrameTimeout(timeout)),
    };

    state.streamer.into_response(Some(first), session)
}

/// GET /api/video - Optical camera stream
async fn video_stream(State(state): State<AppState>) -> Response {
    relay(&state, VIDEO_STREAM).await
}

/// GET /api/thermal - Thermal camera stream
async fn thermal_stream(State(state): State<AppState>) -> Response {
    relay(&state, THERMAL_STREAM).await
}

/// GET /api/stream/{name} - Any configured stream
async fn named_stream(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    relay(&state, &name).await
}

/// GET /health - Health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

/// Create the HTTP router
pub fn create_router(state: AppState) -> Router {
    // the dashboard is served from another origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/proxy", post(proxy_command))
        .route("/api/video", get(video_stream))
        .route("/api/thermal", get(thermal_stream))
        .route("/api/stream/{name}", get(named_stream))
        .layer(cors)
        .with_state(state)
}

async fn shutdown_requested(mut shutdown: watch::Receiver<()>) {
    // a dropped sender also means shutdown
    let _ = shutdown.changed().await;
}

/// Run the HTTP server until `shutdown` fires.
///
/// Video responses never complete on their own, so after the grace period
/// the remaining connections are dropped, which kills their transcoders.
pub async fn run_http_server(
    state: AppState,
    addr: SocketAddr,
    shutdown: watch::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("[HTTP] listening on {}", listener.local_addr()?);

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_requested(shutdown.clone()))
        .into_future();

    tokio::select! {
        result = server => result?,
        _ = async {
            shutdown_requested(shutdown).await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        } => {
            log::warn!("[HTTP] streams still open after {:?}, closing them", SHUTDOWN_GRACE);
        }
    }

    Ok(())
}
