//! Cloud backend: Gemini image models via `models/{model}:generateContent`.
//!
//! The API has no negative-prompt or step parameters, so the negative prompt
//! is folded into the text and `steps` is ignored. Output size is requested
//! as the closest supported aspect ratio.

use super::{GeneratedImage, GenerationClient, GenerationError, classify_http, classify_transport};
use crate::config::{ConfigError, RemoteConfig};
use crate::prompt::GenerationRequest;
use base64::Engine;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub struct RemoteBackend {
    client: Client,
    url: String,
    api_key: String,
}

impl RemoteBackend {
    pub fn new(
        config: &RemoteConfig,
        api_key: String,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        if config.model.trim().is_empty() {
            return Err(ConfigError::Validation(
                "backend.remote.model must not be empty".into(),
            ));
        }
        Ok(Self {
            client: super::http_client(timeout)?,
            url: format!(
                "{}/v1beta/models/{}:generateContent",
                config.endpoint.trim_end_matches('/'),
                config.model
            ),
            api_key,
        })
    }
}

impl GenerationClient for RemoteBackend {
    fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage, GenerationError> {
        debug!(url = %self.url, seed = ?request.seed, "remote generateContent");
        let response = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body(request))
            .send()
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        let text = response.text().map_err(|e| classify_transport(&e))?;
        if !status.is_success() {
            return Err(classify_http(status, &text));
        }
        let parsed: GenerateContentResponse = serde_json::from_str(&text)
            .map_err(|e| GenerationError::Transient(format!("malformed response: {e}")))?;
        extract_image(parsed)
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerationConfig {
    response_modalities: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u32>,
    image_config: ImageConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ImageConfig {
    aspect_ratio: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

pub(crate) fn request_body(request: &GenerationRequest) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content {
            parts: vec![Part {
                text: Some(request.combined_prompt()),
                inline_data: None,
            }],
        }],
        generation_config: GenerationConfig {
            response_modalities: vec!["TEXT", "IMAGE"],
            seed: request.seed,
            image_config: ImageConfig {
                aspect_ratio: request.aspect_ratio(),
            },
        },
    }
}

/// Take the first inline image from the response.
///
/// A response without an image (safety block, model replied with text only)
/// is treated as transient: the same prompt usually succeeds on a retry.
pub(crate) fn extract_image(
    response: GenerateContentResponse,
) -> Result<GeneratedImage, GenerationError> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(GenerationError::Transient(format!(
            "prompt blocked: {reason}"
        )));
    }
    let mut finish_reason = None;
    for candidate in response.candidates {
        if finish_reason.is_none() {
            finish_reason = candidate.finish_reason;
        }
        let Some(content) = candidate.content else {
            continue;
        };
        for part in content.parts {
            if let Some(inline) = part.inline_data {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(inline.data.as_bytes())
                    .map_err(|e| {
                        GenerationError::Transient(format!("invalid base64 image data: {e}"))
                    })?;
                return Ok(GeneratedImage {
                    bytes,
                    mime_type: inline.mime_type,
                });
            }
        }
    }
    Err(GenerationError::Transient(match finish_reason {
        Some(reason) => format!("no image in response (finish reason {reason})"),
        None => "no image in response".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest {
            prompt: "**SUBJECT:** Ace of Hearts".to_string(),
            negative_prompt: "text".to_string(),
            width: 640,
            height: 1152,
            steps: 9,
            seed: Some(7),
        }
    }

    #[test]
    fn request_body_shape() {
        let json = serde_json::to_value(request_body(&request())).unwrap();
        let text = json["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(text.contains("Ace of Hearts"));
        assert!(text.contains("NEGATIVE PROMPT"));
        assert!(json["contents"][0]["parts"][0].get("inlineData").is_none());
        assert_eq!(json["generationConfig"]["seed"], 7);
        assert_eq!(
            json["generationConfig"]["imageConfig"]["aspectRatio"],
            "9:16"
        );
        assert_eq!(
            json["generationConfig"]["responseModalities"],
            serde_json::json!(["TEXT", "IMAGE"])
        );
    }

    #[test]
    fn request_body_omits_missing_seed() {
        let mut req = request();
        req.seed = None;
        let json = serde_json::to_value(request_body(&req)).unwrap();
        assert!(json["generationConfig"].get("seed").is_none());
    }

    #[test]
    fn extract_image_decodes_inline_data() {
        let data = base64::engine::general_purpose::STANDARD.encode(b"\x89PNGfake");
        let body = format!(
            r#"{{"candidates":[{{"content":{{"parts":[
                {{"text":"Here is your card"}},
                {{"inlineData":{{"mimeType":"image/png","data":"{data}"}}}}
            ]}},"finishReason":"STOP"}}]}}"#
        );
        let parsed: GenerateContentResponse = serde_json::from_str(&body).unwrap();
        let image = extract_image(parsed).unwrap();
        assert_eq!(image.bytes, b"\x89PNGfake");
        assert_eq!(image.mime_type, "image/png");
    }

    #[test]
    fn text_only_response_is_transient() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"sorry"}]},"finishReason":"STOP"}]}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(body).unwrap();
        let err = extract_image(parsed).unwrap_err();
        assert!(matches!(err, GenerationError::Transient(ref m) if m.contains("STOP")));
    }

    #[test]
    fn blocked_prompt_is_transient() {
        let body = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(body).unwrap();
        let err = extract_image(parsed).unwrap_err();
        assert_eq!(err, GenerationError::Transient("prompt blocked: SAFETY".into()));
    }

    #[test]
    fn invalid_base64_is_transient() {
        let body = r#"{"candidates":[{"content":{"parts":[{"inlineData":{"mimeType":"image/png","data":"!!!"}}]}}]}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(body).unwrap();
        assert!(matches!(
            extract_image(parsed),
            Err(GenerationError::Transient(_))
        ));
    }

    #[test]
    fn url_includes_model() {
        let backend = RemoteBackend::new(
            &RemoteConfig::default(),
            "key".into(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            backend.url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash-image:generateContent"
        );
    }
}
