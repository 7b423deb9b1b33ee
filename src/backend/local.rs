//! Local backend: a diffusion server exposing an Automatic1111-compatible
//! `POST /sdapi/v1/txt2img`.
//!
//! Model loading, device selection and caching are the server's business.
//! A CUDA/MPS out-of-memory error surfaces as a 500 with the message in the
//! body and is classified as a resource failure.

use super::{GeneratedImage, GenerationClient, GenerationError, classify_http, classify_transport};
use crate::config::{ConfigError, LocalConfig};
use crate::prompt::GenerationRequest;
use base64::Engine;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub struct LocalBackend {
    client: Client,
    url: String,
    cfg_scale: f32,
}

impl LocalBackend {
    pub fn new(config: &LocalConfig, timeout: Duration) -> Result<Self, ConfigError> {
        if config.endpoint.trim().is_empty() {
            return Err(ConfigError::Validation(
                "backend.local.endpoint must not be empty".into(),
            ));
        }
        Ok(Self {
            client: super::http_client(timeout)?,
            url: format!("{}/sdapi/v1/txt2img", config.endpoint.trim_end_matches('/')),
            cfg_scale: config.cfg_scale,
        })
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Txt2ImgRequest<'a> {
    prompt: &'a str,
    negative_prompt: &'a str,
    width: u32,
    height: u32,
    steps: u32,
    /// -1 asks the server for a random seed.
    seed: i64,
    cfg_scale: f32,
    batch_size: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Txt2ImgResponse {
    #[serde(default)]
    images: Vec<String>,
}

pub(crate) fn request_body(request: &GenerationRequest, cfg_scale: f32) -> Txt2ImgRequest<'_> {
    Txt2ImgRequest {
        prompt: &request.prompt,
        negative_prompt: &request.negative_prompt,
        width: request.width,
        height: request.height,
        steps: request.steps,
        seed: request.seed.map(i64::from).unwrap_or(-1),
        cfg_scale,
        batch_size: 1,
    }
}

pub(crate) fn extract_image(response: Txt2ImgResponse) -> Result<GeneratedImage, GenerationError> {
    let first = response
        .images
        .into_iter()
        .next()
        .ok_or_else(|| GenerationError::Transient("server returned no images".into()))?;
    // Some servers prefix a data URL.
    let data = first
        .split_once("base64,")
        .map(|(_, d)| d)
        .unwrap_or(first.as_str());
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.trim().as_bytes())
        .map_err(|e| GenerationError::Transient(format!("invalid base64 image data: {e}")))?;
    Ok(GeneratedImage {
        bytes,
        mime_type: "image/png".to_string(),
    })
}

impl GenerationClient for LocalBackend {
    fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage, GenerationError> {
        debug!(url = %self.url, steps = request.steps, "local txt2img");
        let response = self
            .client
            .post(&self.url)
            .json(&request_body(request, self.cfg_scale))
            .send()
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        let text = response.text().map_err(|e| classify_transport(&e))?;
        if !status.is_success() {
            return Err(classify_http(status, &text));
        }
        let parsed: Txt2ImgResponse = serde_json::from_str(&text)
            .map_err(|e| GenerationError::Transient(format!("malformed response: {e}")))?;
        extract_image(parsed)
    }
}
