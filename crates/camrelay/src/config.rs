use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use reqwest::Url;

/// Environment variables that override the file configuration.
pub const ENV_LISTEN: &str = "CAMRELAY_LISTEN";
pub const ENV_PTZ_URL: &str = "CAMRELAY_PTZ_URL";
pub const ENV_PTZ_USERNAME: &str = "CAMRELAY_PTZ_USERNAME";
pub const ENV_PTZ_PASSWORD: &str = "CAMRELAY_PTZ_PASSWORD";
pub const ENV_VIDEO_URL: &str = "CAMRELAY_VIDEO_URL";
pub const ENV_THERMAL_URL: &str = "CAMRELAY_THERMAL_URL";

/// Stream names served by the fixed dashboard routes.
pub const VIDEO_STREAM: &str = "video";
pub const THERMAL_STREAM: &str = "thermal";

/// PTZ control endpoint of the camera (ISAPI continuous move).
#[derive(Clone, Deserialize)]
pub struct CameraEndpoint {
    /// Full URL of the PTZ endpoint,
    /// e.g. http://192.168.1.19/ISAPI/PTZCtrl/channels/1/continuous
    #[serde(default)]
    pub ptz_url: String,
    /// Digest username
    #[serde(default)]
    pub username: String,
    /// Digest password
    #[serde(default)]
    pub password: String,
    /// Whole-request timeout in milliseconds
    #[serde(default = "default_ptz_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_ptz_timeout_ms() -> u64 {
    2000
}

impl Default for CameraEndpoint {
    fn default() -> Self {
        Self {
            ptz_url: String::new(),
            username: String::new(),
            password: String::new(),
            timeout_ms: default_ptz_timeout_ms(),
        }
    }
}

impl CameraEndpoint {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl std::fmt::Debug for CameraEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraEndpoint")
            .field("ptz_url", &self.ptz_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

/// A video source handed to the transcoder.
#[derive(Clone, Deserialize)]
pub struct StreamSource {
    /// RTSP URL (e.g., rtsp://192.168.1.19:554/Streaming/Channels/102)
    pub url: String,
    /// Optional credentials, injected into the URL at spawn time
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl StreamSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
        }
    }

    /// URL passed to the transcoder, with credentials filled in.
    pub fn authenticated_url(&self) -> Result<String, ConfigError> {
        if self.username.is_none() && self.password.is_none() {
            return Ok(self.url.clone());
        }
        let mut url = Url::parse(&self.url)
            .map_err(|e| ConfigError::ValidationError(format!("invalid stream url: {}", e)))?;
        let invalid = |_| ConfigError::ValidationError("stream url cannot carry credentials".into());
        if let Some(user) = &self.username {
            url.set_username(user).map_err(invalid)?;
        }
        if let Some(pass) = &self.password {
            url.set_password(Some(pass)).map_err(invalid)?;
        }
        Ok(url.to_string())
    }

    /// URL safe to print in logs.
    pub fn redacted_url(&self) -> String {
        match Url::parse(&self.url) {
            Ok(mut url) => {
                if url.password().is_some() {
                    let _ = url.set_password(Some("***"));
                }
                url.to_string()
            }
            Err(_) => self.url.clone(),
        }
    }
}

impl std::fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSource")
            .field("url", &self.redacted_url())
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// External transcoder invocation and frame pipeline limits.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscoderConfig {
    /// Executable to launch
    #[serde(default = "default_program")]
    pub program: String,
    /// Argument template; `{source}`, `{width}` and `{quality}` are substituted
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Output width in pixels (height keeps aspect ratio)
    #[serde(default = "default_width")]
    pub width: u32,
    /// JPEG quality scale (1 = best, 31 = worst)
    #[serde(default = "default_quality")]
    pub quality: u8,
    /// Size of each read from the transcoder's stdout
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Upper bound on buffered bytes while looking for a frame
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: usize,
    /// How long to wait for the first frame before failing the request
    #[serde(default = "default_first_frame_timeout_ms")]
    pub first_frame_timeout_ms: u64,
}

fn default_program() -> String {
    "ffmpeg".to_string()
}

fn default_args() -> Vec<String> {
    [
        "-hide_banner",
        "-loglevel",
        "error",
        "-rtsp_transport",
        "tcp",
        "-i",
        "{source}",
        "-an",
        "-vf",
        "scale={width}:-2",
        "-q:v",
        "{quality}",
        "-f",
        "mjpeg",
        "pipe:1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_width() -> u32 {
    640
}

fn default_quality() -> u8 {
    5
}

fn default_chunk_size() -> usize {
    4096
}

fn default_max_buffer_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_first_frame_timeout_ms() -> u64 {
    10_000
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            width: default_width(),
            quality: default_quality(),
            chunk_size: default_chunk_size(),
            max_buffer_bytes: default_max_buffer_bytes(),
            first_frame_timeout_ms: default_first_frame_timeout_ms(),
        }
    }
}

impl TranscoderConfig {
    /// Substitute placeholders in the argument template.
    pub fn render_args(&self, source_url: &str) -> Vec<String> {
        let width = self.width.to_string();
        let quality = self.quality.to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{source}", source_url)
                    .replace("{width}", &width)
                    .replace("{quality}", &quality)
            })
            .collect()
    }

    pub fn first_frame_timeout(&self) -> Duration {
        Duration::from_millis(self.first_frame_timeout_ms)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address the HTTP server binds to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// PTZ control endpoint
    #[serde(default)]
    pub camera: CameraEndpoint,
    /// Video sources by name (`video`, `thermal`, ...)
    #[serde(default)]
    pub streams: BTreeMap<String, StreamSource>,
    /// Transcoder settings shared by all streams
    #[serde(default)]
    pub transcoder: TranscoderConfig,
}

fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            camera: CameraEndpoint::default(),
            streams: BTreeMap::new(),
            transcoder: TranscoderConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Load the optional file, apply the process environment and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override fields from environment-style lookups.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen) = lookup(ENV_LISTEN) {
            self.listen = listen;
        }
        if let Some(url) = lookup(ENV_PTZ_URL) {
            self.camera.ptz_url = url;
        }
        if let Some(user) = lookup(ENV_PTZ_USERNAME) {
            self.camera.username = user;
        }
        if let Some(pass) = lookup(ENV_PTZ_PASSWORD) {
            self.camera.password = pass;
        }
        for (env, name) in [(ENV_VIDEO_URL, VIDEO_STREAM), (ENV_THERMAL_URL, THERMAL_STREAM)] {
            if let Some(url) = lookup(env) {
                self.streams
                    .entry(name.to_string())
                    .and_modify(|s| s.url = url.clone())
                    .or_insert_with(|| StreamSource::new(url));
            }
        }
    }

    /// Check the merged configuration before the server starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen.parse::<SocketAddr>().map_err(|e| {
            ConfigError::ValidationError(format!("invalid listen address '{}': {}", self.listen, e))
        })?;

        if self.camera.ptz_url.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "camera.ptz_url is not set (config file or {})",
                ENV_PTZ_URL
            )));
        }
        let ptz_url = Url::parse(&self.camera.ptz_url).map_err(|e| {
            ConfigError::ValidationError(format!("invalid camera.ptz_url: {}", e))
        })?;
        if !matches!(ptz_url.scheme(), "http" | "https") {
            return Err(ConfigError::ValidationError(format!(
                "camera.ptz_url must be http or https, got '{}'",
                ptz_url.scheme()
            )));
        }
        if self.camera.username.is_empty() || self.camera.password.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "camera credentials are not set (config file or {} / {})",
                ENV_PTZ_USERNAME, ENV_PTZ_PASSWORD
            )));
        }
        if self.camera.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "camera.timeout_ms must be positive".to_string(),
            ));
        }

        for (name, source) in &self.streams {
            if source.url.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "stream '{}' has no url",
                    name
                )));
            }
            source.authenticated_url()?;
        }

        let t = &self.transcoder;
        if t.program.is_empty() {
            return Err(ConfigError::ValidationError(
                "transcoder.program is empty".to_string(),
            ));
        }
        if !(1..=31).contains(&t.quality) {
            return Err(ConfigError::ValidationError(format!(
                "transcoder.quality must be 1-31, got {}",
                t.quality
            )));
        }
        if t.chunk_size == 0 || t.max_buffer_bytes < t.chunk_size {
            return Err(ConfigError::ValidationError(format!(
                "transcoder.max_buffer_bytes ({}) must be at least chunk_size ({}) and chunk_size positive",
                t.max_buffer_bytes, t.chunk_size
            )));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen
            .parse()
            .map_err(|e| ConfigError::ValidationError(format!("invalid listen address: {}", e)))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}
