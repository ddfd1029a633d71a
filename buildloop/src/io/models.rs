//! Model-serving runtime and vision model adapters.
//!
//! Both talk to an Ollama-compatible HTTP API. Load and unload are
//! fire-and-forget: failures are logged and swallowed.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::blocking::Client as HttpClient;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument, warn};

/// Loads and unloads models on the shared inference device.
pub trait ModelRuntime {
    fn load(&self, model: &str, keep_alive: &str);
    fn unload(&self, model: &str);
}

/// A vision-capable model that critiques screenshots.
pub trait VisionModel {
    /// Critique one image. Returns an empty string when the model said nothing.
    fn critique(&self, image: &Path, prompt: &str, timeout: Duration) -> Result<String>;
}

/// Client for an Ollama-compatible runtime.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    vision_model: String,
    request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, vision_model: &str, request_timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            vision_model: vision_model.to_string(),
            request_timeout,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn client(&self, timeout: Duration) -> Result<HttpClient> {
        HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("build http client")
    }

    /// True if the runtime answers its model listing endpoint.
    #[instrument(skip_all, fields(base_url = %self.base_url))]
    pub fn reachable(&self) -> bool {
        let Ok(client) = self.client(Duration::from_secs(5)) else {
            return false;
        };
        match client.get(self.endpoint("/api/tags")).send() {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!(err = %err, "runtime not reachable");
                false
            }
        }
    }

    fn set_keep_alive(&self, model: &str, keep_alive: serde_json::Value) -> Result<()> {
        let client = self.client(self.request_timeout)?;
        let response = client
            .post(self.endpoint("/api/generate"))
            .json(&json!({ "model": model, "keep_alive": keep_alive }))
            .send()
            .with_context(|| format!("post keep_alive for {model}"))?;
        if !response.status().is_success() {
            return Err(anyhow!("runtime returned {} for {model}", response.status()));
        }
        Ok(())
    }
}

impl ModelRuntime for OllamaClient {
    #[instrument(skip(self))]
    fn load(&self, model: &str, keep_alive: &str) {
        if let Err(err) = self.set_keep_alive(model, json!(keep_alive)) {
            warn!(err = %format!("{err:#}"), "model load failed (ignored)");
        }
    }

    #[instrument(skip(self))]
    fn unload(&self, model: &str) {
        if let Err(err) = self.set_keep_alive(model, json!(0)) {
            warn!(err = %format!("{err:#}"), "model unload failed (ignored)");
        }
    }
}

impl VisionModel for OllamaClient {
    #[instrument(skip_all, fields(image = %image.display(), model = %self.vision_model))]
    fn critique(&self, image: &Path, prompt: &str, timeout: Duration) -> Result<String> {
        let bytes = fs::read(image).with_context(|| format!("read {}", image.display()))?;
        let encoded = BASE64.encode(bytes);
        let client = self.client(timeout)?;
        let response = client
            .post(self.endpoint("/api/generate"))
            .json(&json!({
                "model": self.vision_model,
                "prompt": prompt,
                "images": [encoded],
                "stream": false,
            }))
            .send()
            .context("post vision critique")?;
        if !response.status().is_success() {
            return Err(anyhow!("vision model returned {}", response.status()));
        }
        let parsed: GenerateResponse = response.json().context("parse vision response")?;
        debug!(len = parsed.response.len(), "critique received");
        Ok(parsed.response.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_strips_trailing_slash() {
        let client = OllamaClient::new("http://127.0.0.1:11434/", "m", Duration::from_secs(1));
        assert_eq!(client.endpoint("/api/tags"), "http://127.0.0.1:11434/api/tags");
    }

    #[test]
    fn unreachable_runtime_is_reported_and_calls_are_swallowed() {
        // Port 9 (discard) is not an HTTP server on test machines.
        let client = OllamaClient::new("http://127.0.0.1:9", "m", Duration::from_millis(200));
        assert!(!client.reachable());
        client.load("coder", "5m");
        client.unload("coder");
    }

    #[test]
    fn generate_response_tolerates_missing_field() {
        let parsed: GenerateResponse = serde_json::from_str("{\"done\":true}").expect("parse");
        assert!(parsed.response.is_empty());
    }
}
