use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

const API_VERSION: &str = "2023-06-01";
const MAX_OUTPUT_TOKENS: u32 = 2048;

/// Prompt in, raw model text out. Implementations must bound their own latency.
pub trait TextGenerator {
    fn generate(&self, prompt: &str) -> PipelineResult<String>;
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

pub struct MessagesApiGenerator {
    client: Client,
    endpoint: String,
    model: String,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [Message<'a>; 1],
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl MessagesApiGenerator {
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            "x-api-key",
            header::HeaderValue::from_str(&config.api_key)
                .context("llm api key contains invalid header characters")?,
        );
        headers.insert(
            "anthropic-version",
            header::HeaderValue::from_static(API_VERSION),
        );

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .context("failed to build http client for text generation")?;

        Ok(Self {
            client,
            endpoint: format!("{}/v1/messages", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
        })
    }
}

impl TextGenerator for MessagesApiGenerator {
    fn generate(&self, prompt: &str) -> PipelineResult<String> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_OUTPUT_TOKENS,
            messages: [Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .map_err(|error| PipelineError::GenerationFailed(format!("request failed: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(PipelineError::GenerationFailed(format!(
                "http status {status}: {}",
                detail.chars().take(300).collect::<String>()
            )));
        }

        let parsed: MessagesResponse = response.json().map_err(|error| {
            PipelineError::GenerationFailed(format!("unreadable response body: {error}"))
        })?;

        let text = collect_text(&parsed);
        debug!(chars = text.len(), model = %self.model, "text generation completed");

        if text.trim().is_empty() {
            return Err(PipelineError::GenerationFailed(
                "response contained no text blocks".to_string(),
            ));
        }

        Ok(text)
    }
}

fn collect_text(response: &MessagesResponse) -> String {
    response
        .content
        .iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text.as_deref())
        .collect::<Vec<&str>>()
        .join("")
}
