//! ISAPI PTZ client with HTTP digest authentication.
//!
//! Commands are sent once. A dropped command leaves the camera in its previous
//! motion state until the next command (usually `stop`) arrives, so nothing is
//! queued or replayed. The only second request is the digest handshake: a
//! `401` carrying a fresh challenge is answered once with credentials.

use std::error::Error as _;
use std::sync::Mutex;

use digest_auth::{AuthContext, HttpMethod, WwwAuthenticateHeader};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{StatusCode, Url};

use super::command::ControlPayload;
use crate::config::CameraEndpoint;

// ── Outcome ─────────────────────────────────────────────────────────

/// Result of one PTZ exchange, as reported to the dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The camera rejected the configured credentials
    AuthFailed,
    /// Any other non-2xx answer; `body` is the vendor diagnostic text
    CameraError { code: u16, body: String },
    /// No complete answer within the configured timeout
    Timeout(std::time::Duration),
    /// Refused connection, DNS or TLS failure
    ConnectionFailed { cause: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    /// Human-readable reason shown in the dashboard status line.
    pub fn message(&self) -> String {
        match self {
            Outcome::Success => "Camera moved".to_string(),
            Outcome::AuthFailed => "Wrong Password".to_string(),
            Outcome::CameraError { code, body } if body.is_empty() => {
                format!("Camera error {}", code)
            }
            Outcome::CameraError { body, .. } => body.clone(),
            Outcome::Timeout(after) => format!("Camera did not respond within {:?}", after),
            Outcome::ConnectionFailed { cause } => cause.clone(),
        }
    }
}

// ── Errors ──────────────────────────────────────────────────────────

/// Errors building the client from configuration.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid PTZ url: {0}")]
    InvalidUrl(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

// ── Client ──────────────────────────────────────────────────────────

/// Sends continuous-move payloads to one camera.
pub struct CameraControlClient {
    client: reqwest::Client,
    url: Url,
    username: String,
    password: String,
    timeout: std::time::Duration,
    /// Last digest challenge; reused so steady-state commands need one request
    challenge: Mutex<Option<WwwAuthenticateHeader>>,
}

impl std::fmt::Debug for CameraControlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraControlClient")
            .field("url", &self.url.as_str())
            .field("username", &self.username)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl CameraControlClient {
    pub fn new(endpoint: &CameraEndpoint) -> Result<Self, ClientError> {
        let url =
            Url::parse(&endpoint.ptz_url).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(endpoint.timeout())
            .build()?;

        Ok(Self {
            client,
            url,
            username: endpoint.username.clone(),
            password: endpoint.password.clone(),
            timeout: endpoint.timeout(),
            challenge: Mutex::new(None),
        })
    }

    /// Send one payload and classify the camera's answer.
    ///
    /// The timeout covers the whole exchange, digest handshake included.
    pub async fn send(&self, payload: &ControlPayload) -> Outcome {
        let outcome = match tokio::time::timeout(self.timeout, self.exchange(payload)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) if e.is_timeout() => Outcome::Timeout(self.timeout),
            Ok(Err(e)) => Outcome::ConnectionFailed {
                cause: describe(&e),
            },
            Err(_) => Outcome::Timeout(self.timeout),
        };

        match &outcome {
            Outcome::Success => log::info!("[PTZ] camera accepted {:?}", payload.vector()),
            Outcome::AuthFailed => {
                log::warn!("[PTZ] authentication failed, check camera username/password")
            }
            Outcome::CameraError { code, body } => {
                log::warn!("[PTZ] camera error {}: {}", code, body)
            }
            Outcome::Timeout(after) => log::error!("[PTZ] camera did not respond within {:?}", after),
            Outcome::ConnectionFailed { cause } => log::error!("[PTZ] connection error: {}", cause),
        }
        outcome
    }

    async fn exchange(&self, payload: &ControlPayload) -> Result<Outcome, reqwest::Error> {
        let cached = self.authorize_cached(payload);
        let response = self.put(payload, cached).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(classify(response).await);
        }

        let Some(mut prompt) = digest_challenge(&response) else {
            log::debug!("[PTZ] 401 without a digest challenge");
            self.store_challenge(None);
            return Ok(Outcome::AuthFailed);
        };
        let Some(authorization) = self.authorize(&mut prompt, payload) else {
            return Ok(Outcome::AuthFailed);
        };
        self.store_challenge(Some(prompt));

        let response = self.put(payload, Some(authorization)).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            self.store_challenge(None);
        }
        Ok(classify(response).await)
    }

    async fn put(
        &self,
        payload: &ControlPayload,
        authorization: Option<String>,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut request = self
            .client
            .put(self.url.clone())
            .header(CONTENT_TYPE, ControlPayload::CONTENT_TYPE)
            .body(payload.body().to_string());
        if let Some(value) = authorization {
            request = request.header(AUTHORIZATION, value);
        }
        request.send().await
    }

    fn authorize_cached(&self, payload: &ControlPayload) -> Option<String> {
        let mut guard = self.challenge.lock().ok()?;
        let prompt = guard.as_mut()?;
        self.authorize(prompt, payload)
    }

    fn authorize(&self, prompt: &mut WwwAuthenticateHeader, payload: &ControlPayload) -> Option<String> {
        let uri = request_uri(&self.url);
        let context = AuthContext::new_with_method(
            self.username.as_str(),
            self.password.as_str(),
            uri.as_str(),
            Some(payload.body().as_bytes()),
            HttpMethod::from("PUT"),
        );
        match prompt.respond(&context) {
            Ok(header) => Some(header.to_header_string()),
            Err(e) => {
                log::warn!("[PTZ] cannot answer digest challenge: {}", e);
                None
            }
        }
    }

    fn store_challenge(&self, prompt: Option<WwwAuthenticateHeader>) {
        if let Ok(mut guard) = self.challenge.lock() {
            *guard = prompt;
        }
    }
}

/// Error text with its source chain.
fn describe(error: &reqwest::Error) -> String {
    let mut cause = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        cause.push_str(": ");
        cause.push_str(&inner.to_string());
        source = inner.source();
    }
    cause
}

async fn classify(response: reqwest::Response) -> Outcome {
    let status = response.status();
    if status.is_success() {
        return Outcome::Success;
    }
    if status == StatusCode::UNAUTHORIZED {
        return Outcome::AuthFailed;
    }
    let body = response.text().await.unwrap_or_default();
    Outcome::CameraError {
        code: status.as_u16(),
        body: body.trim().to_string(),
    }
}

/// Pick the digest challenge among the `WWW-Authenticate` headers.
fn digest_challenge(response: &reqwest::Response) -> Option<WwwAuthenticateHeader> {
    response
        .headers()
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| is_digest(value))
        .and_then(|value| digest_auth::parse(value).ok())
}

fn is_digest(header: &str) -> bool {
    header
        .trim_start()
        .get(..6)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("digest"))
}

/// Request-URI used in the digest response (path and query).
fn request_uri(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_messages() {
        assert_eq!(Outcome::Success.message(), "Camera moved");
        assert_eq!(Outcome::AuthFailed.message(), "Wrong Password");
        assert_eq!(
            Outcome::CameraError {
                code: 403,
                body: "<ResponseStatus>Forbidden</ResponseStatus>".into()
            }
            .message(),
            "<ResponseStatus>Forbidden</ResponseStatus>"
        );
        assert_eq!(
            Outcome::CameraError {
                code: 500,
                body: String::new()
            }
            .message(),
            "Camera error 500"
        );
        assert_eq!(
            Outcome::ConnectionFailed {
                cause: "refused".into()
            }
            .message(),
            "refused"
        );
        assert_eq!(
            Outcome::Timeout(std::time::Duration::from_secs(2)).message(),
            "Camera did not respond within 2s"
        );
        assert!(Outcome::Success.is_success());
        assert!(!Outcome::AuthFailed.is_success());
    }

    #[test]
    fn test_request_uri() {
        let url = Url::parse("http://10.0.0.5/ISAPI/PTZCtrl/channels/1/continuous").unwrap();
        assert_eq!(request_uri(&url), "/ISAPI/PTZCtrl/channels/1/continuous");

        let url = Url::parse("http://10.0.0.5:8080/ptz?channel=2").unwrap();
        assert_eq!(request_uri(&url), "/ptz?channel=2");
    }

    #[test]
    fn test_is_digest() {
        assert!(is_digest(r#"Digest realm="IP Camera", nonce="abc", qop="auth""#));
        assert!(is_digest(" digest realm=\"x\""));
        assert!(!is_digest("Basic realm=\"x\""));
        assert!(!is_digest(""));
    }

    #[test]
    fn test_new_rejects_bad_url() {
        let endpoint = CameraEndpoint {
            ptz_url: "not a url".into(),
            ..CameraEndpoint::default()
        };
        assert!(matches!(
            CameraControlClient::new(&endpoint),
            Err(ClientError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_debug_hides_password() {
        let endpoint = CameraEndpoint {
            ptz_url: "http://10.0.0.5/ISAPI/PTZCtrl/channels/1/continuous".into(),
            username: "admin".into(),
            password: "hunter2".into(),
            timeout_ms: 2000,
        };
        let client = CameraControlClient::new(&endpoint).unwrap();
        assert!(!format!("{:?}", client).contains("hunter2"));
    }
}
