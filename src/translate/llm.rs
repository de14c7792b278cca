use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::{GraphlateError, Result};
use super::TranslationClient;

const MAX_RETRIES: u32 = 2;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// OpenAI-compatible chat completions backend
pub struct LlmClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    /// Send the request, retrying 429 and 5xx responses with a short backoff.
    async fn send_with_retry(
        &self,
        request: &ChatRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.endpoint);
        let mut attempt: u32 = 0;

        loop {
            let send = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(request)
                .send();
            let response = tokio::select! {
                response = send => response?,
                _ = cancel.cancelled() => return Err(GraphlateError::Cancelled),
            };

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let retryable = status.as_u16() == 429 || status.is_server_error();
            if !retryable || attempt >= MAX_RETRIES {
                let error_text = response.text().await.unwrap_or_default();
                return Err(GraphlateError::Translation(format!(
                    "LLM API error {}: {}",
                    status,
                    error_text.chars().take(200).collect::<String>()
                )));
            }

            let wait = Duration::from_millis(500 * (1 << attempt));
            warn!(
                attempt,
                status = status.as_u16(),
                wait_ms = wait.as_millis() as u64,
                "LLM request failed, retrying"
            );
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => return Err(GraphlateError::Cancelled),
            }
            attempt += 1;
        }
    }
}

#[async_trait]
impl TranslationClient for LlmClient {
    async fn translate(
        &self,
        text: &str,
        from: &str,
        to: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(GraphlateError::Cancelled);
        }

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: build_system_prompt(from, to),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: text.to_string(),
                },
            ],
            temperature: self.temperature,
            stream: false,
        };

        debug!(model = %self.model, from, to, "sending LLM translation request");
        let response = self.send_with_retry(&request, cancel).await?;

        let parsed: ChatResponse = tokio::select! {
            parsed = response.json::<ChatResponse>() => parsed.map_err(|e| {
                GraphlateError::Translation(format!("Failed to parse response: {}", e))
            })?,
            _ = cancel.cancelled() => return Err(GraphlateError::Cancelled),
        };

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| GraphlateError::Translation("LLM returned no choices".to_string()))?;

        Ok(clean_translation_response(&content))
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}

/// Instruction for prompt translation; keeps weighting and LoRA syntax intact.
fn build_system_prompt(from: &str, to: &str) -> String {
    let target = language_code_to_name(to);
    let source = if from == "auto" {
        "the source language".to_string()
    } else {
        language_code_to_name(from)
    };

    format!(
        "You translate prompts for image and video generation from {} to {}.\n\
         Keep prompt syntax exactly as written: weights like (word:1.2), tags like <lora:name:0.8>, \
         commas, line breaks and any text already in {}.\n\
         Return ONLY the {} translation, without quotes, notes or alternatives.",
        source, target, target, target
    )
}

fn language_code_to_name(code: &str) -> String {
    match code.to_lowercase().as_str() {
        "en" => "English".to_string(),
        "zh" => "Chinese".to_string(),
        "ja" => "Japanese".to_string(),
        "ko" => "Korean".to_string(),
        "fr" => "French".to_string(),
        "de" => "German".to_string(),
        "es" => "Spanish".to_string(),
        "ru" => "Russian".to_string(),
        "it" => "Italian".to_string(),
        "pt" => "Portuguese".to_string(),
        "nl" => "Dutch".to_string(),
        "pl" => "Polish".to_string(),
        "tr" => "Turkish".to_string(),
        "ar" => "Arabic".to_string(),
        "hi" => "Hindi".to_string(),
        "th" => "Thai".to_string(),
        "vi" => "Vietnamese".to_string(),
        "uk" => "Ukrainian".to_string(),
        _ => code.to_string(),
    }
}

/// Drop chatter some models wrap around the answer.
fn clean_translation_response(response: &str) -> String {
    let trimmed = response.trim();
    let unfenced = trimmed
        .strip_prefix("```")
        .and_then(|rest| rest.strip_suffix("```"))
        .map(|inner| match inner.split_once('\n') {
            Some((_language, body)) => body.trim(),
            None => inner.trim(),
        })
        .unwrap_or(trimmed);

    for prefix in ["Translation:", "translation:", "Translated text:", "Here is the translation:"] {
        if let Some(rest) = unfenced.strip_prefix(prefix) {
            return rest.trim().to_string();
        }
    }
    unfenced.to_string()
}
