//! HTTP client for the external vision model calls used throughout the OCR
//! pipeline (spec §4.9): line-count consensus, windowed extraction,
//! coherence check, and boost are all opaque prompts sent to the same kind
//! of endpoint.
//!
//! Grounded on `monokrome-foiacquire/src/llm/client/mod.rs`'s
//! `LlmClient`/`LlmError` shape (reqwest JSON client, typed error enum),
//! adapted from a text completion API to a multimodal one that also takes
//! an image.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("api error: {0}")]
    Api(String),
    #[error("failed to parse model response: {0}")]
    Parse(String),
}

#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub request_timeout: std::time::Duration,
}

#[derive(Debug, Serialize)]
struct VisionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    image_base64: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct VisionResponse {
    pub text: String,
    pub tokens_used: u32,
}

/// A single call against one configured vision model endpoint.
pub struct VisionClient {
    config: VisionConfig,
    client: Client,
}

impl VisionClient {
    pub fn new(config: VisionConfig) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("failed to build vision HTTP client");
        Self { config, client }
    }

    pub fn model_name(&self) -> &str {
        &self.config.model
    }

    /// Sends one `(prompt, image)` pair and returns the raw model text plus
    /// reported token usage, used to reconcile the rate limiter's estimate
    /// (spec §4.11).
    pub async fn call(&self, prompt: &str, image_png: &[u8]) -> Result<VisionResponse, VisionError> {
        use base64::Engine;
        let image_base64 = base64::engine::general_purpose::STANDARD.encode(image_png);

        let request = VisionRequest {
            model: &self.config.model,
            prompt,
            image_base64: &image_base64,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| VisionError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(VisionError::Api(format!("HTTP {}", response.status())));
        }

        response
            .json::<VisionResponse>()
            .await
            .map_err(|e| VisionError::Parse(e.to_string()))
    }

    /// Rough pre-call token estimate for the rate limiter's admission check
    /// (spec §4.11): proportional to prompt length plus a fixed per-image
    /// allowance, refined once the real response reports actual usage.
    pub fn estimate_tokens(prompt: &str) -> u32 {
        (prompt.len() as u32 / 4) + 1500
    }
}
