//! Generation clients: the boundary to whatever actually synthesizes images.
//!
//! The batch runner sees a single operation, [`GenerationClient::generate`],
//! and a three-kind error taxonomy:
//!
//! | Kind | Meaning | Runner reaction |
//! |------|---------|-----------------|
//! | [`Transient`](GenerationError::Transient) | timeout, rate limit, 5xx, empty response | bounded retry with backoff |
//! | [`Resource`](GenerationError::Resource) | out of memory, quota exhausted | recorded, not retried |
//! | [`Fatal`](GenerationError::Fatal) | bad credentials, rejected request | recorded, may abort the run |
//!
//! Two implementations exist, chosen by [`from_config`]:
//!
//! - [`RemoteBackend`]: a cloud text-to-image API (Gemini `generateContent`).
//! - [`LocalBackend`]: a diffusion server on this machine exposing a
//!   `txt2img` endpoint.

mod local;
mod remote;

pub use local::LocalBackend;
pub use remote::RemoteBackend;

use crate::config::{BackendConfig, BackendKind, ConfigError};
use crate::prompt::GenerationRequest;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Failure of a single generation attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("resource exhausted: {0}")]
    Resource(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Error kind recorded in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Resource,
    Fatal,
    /// The image came back but could not be validated or written.
    Persistence,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Resource => "resource",
            ErrorKind::Fatal => "fatal",
            ErrorKind::Persistence => "persistence",
        }
    }
}

impl GenerationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GenerationError::Transient(_) => ErrorKind::Transient,
            GenerationError::Resource(_) => ErrorKind::Resource,
            GenerationError::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// The reason without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            GenerationError::Transient(m)
            | GenerationError::Resource(m)
            | GenerationError::Fatal(m) => m,
        }
    }
}

/// Raw image returned by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    /// MIME type as reported by the backend. May be wrong; the runner sniffs
    /// the bytes before writing.
    pub mime_type: String,
}

/// A text-to-image backend.
///
/// One call renders one image. Implementations must map every failure onto
/// the [`GenerationError`] taxonomy; the runner never sees transport errors.
pub trait GenerationClient {
    fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage, GenerationError>;
}

impl<T: GenerationClient + ?Sized> GenerationClient for Box<T> {
    fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage, GenerationError> {
        (**self).generate(request)
    }
}

/// Build the backend selected by the config.
///
/// Fails before any generation when the backend cannot be constructed, e.g.
/// the API key variable is unset.
pub fn from_config(config: &BackendConfig) -> Result<Box<dyn GenerationClient>, ConfigError> {
    let timeout = Duration::from_secs(config.timeout_secs);
    match config.kind {
        BackendKind::Remote => {
            let env = &config.remote.api_key_env;
            let api_key = std::env::var(env)
                .ok()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| {
                    ConfigError::Validation(format!(
                        "environment variable {env} must hold the API key for the remote backend"
                    ))
                })?;
            Ok(Box::new(RemoteBackend::new(&config.remote, api_key, timeout)?))
        }
        BackendKind::Local => Ok(Box::new(LocalBackend::new(&config.local, timeout)?)),
    }
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::blocking::Client, ConfigError> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ConfigError::Validation(format!("cannot build HTTP client: {e}")))
}

/// Map a transport-level failure (no HTTP status) onto the taxonomy.
pub(crate) fn classify_transport(err: &reqwest::Error) -> GenerationError {
    if err.is_timeout() {
        GenerationError::Transient(format!("request timed out: {err}"))
    } else if err.is_connect() {
        GenerationError::Transient(format!("connection failed: {err}"))
    } else if err.is_builder() {
        GenerationError::Fatal(format!("invalid request: {err}"))
    } else {
        GenerationError::Transient(err.to_string())
    }
}

/// Map a non-success HTTP response onto the taxonomy.
///
/// 408, 429 and 5xx are transient, except that a 429 whose body talks about
/// quota is a resource failure (waiting a few seconds will not help), and any
/// status whose body reports running out of memory is a resource failure.
/// Everything else in the 4xx range is fatal.
pub(crate) fn classify_http(status: StatusCode, body: &str) -> GenerationError {
    let message = extract_error_message(status, body);
    let lower = body.to_ascii_lowercase();
    if lower.contains("out of memory") || lower.contains("outofmemory") {
        return GenerationError::Resource(message);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        if lower.contains("quota") {
            return GenerationError::Resource(message);
        }
        return GenerationError::Transient(message);
    }
    if status == StatusCode::REQUEST_TIMEOUT || status.is_server_error() {
        return GenerationError::Transient(message);
    }
    GenerationError::Fatal(message)
}

/// Pull a readable message out of an error body: `{"error":{"message":…}}`,
/// `{"message":…}`, `{"detail":…}`, or a truncated raw snippet.
pub(crate) fn extract_error_message(status: StatusCode, body: &str) -> String {
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(body) {
        let msg = v
            .get("error")
            .and_then(|e| e.get("message").or(Some(e)))
            .and_then(|m| m.as_str())
            .or_else(|| v.get("message").and_then(|m| m.as_str()))
            .or_else(|| v.get("detail").and_then(|m| m.as_str()));
        if let Some(msg) = msg {
            return format!("HTTP {}: {}", status.as_u16(), msg);
        }
    }
    let trimmed = body.trim();
    let snippet = if trimmed.len() > 400 {
        let mut end = 400;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &trimmed[..end])
    } else {
        trimmed.to_string()
    };
    format!("HTTP {}: {}", status.as_u16(), snippet)
}
