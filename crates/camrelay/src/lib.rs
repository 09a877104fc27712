//! Camrelay
//!
//! Bridges a browser dashboard and an IP camera:
//!
//! - `POST /api/proxy` turns `{action, direction, speed}` into an ISAPI
//!   continuous-move request with digest authentication.
//! - `GET /api/video` and `GET /api/thermal` spawn a transcoder per viewer,
//!   cut its output into JPEG frames and relay them as
//!   `multipart/x-mixed-replace`.

pub mod config;
pub mod http_server;
pub mod ptz;
pub mod stream;

pub use config::{CameraEndpoint, Config, ConfigError, StreamSource, TranscoderConfig};
pub use http_server::{create_router, run_http_server, AppState};
