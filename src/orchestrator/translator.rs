//! Translation collaborator
//!
//! Turns the user's requirement into concise English for the solver agent
//! through an OpenAI-compatible chat-completions endpoint.

use crate::config::{model_preset, TranslationConfig};
use crate::error::AppError;
use crate::orchestrator::types::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage};
use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Instruction sent ahead of every translation request
pub const TRANSLATION_SYSTEM_PROMPT: &str = "You are a professional technical translator. \
Translate the user input into concise, clear English for CFD simulation requirements. \
Preserve numbers, units, symbols, file or solver names. Output English only.";

/// Translates free-form requirement text
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text` with the preset identified by `model_id`
    ///
    /// # Errors
    /// * `AppError::Credential` when no API key is configured
    /// * `AppError::Network` / `AppError::Remote` for transport and HTTP failures
    async fn translate(&self, text: &str, model_id: &str) -> Result<String, AppError>;
}

/// [`Translator`] backed by the DeepSeek chat-completions API
pub struct DeepSeekTranslator {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url_override: Option<String>,
}

impl DeepSeekTranslator {
    /// Create a translator from configuration
    pub fn new(config: &TranslationConfig, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(anyhow!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(
            client,
            config.api_key.clone(),
            config.base_url_override.clone(),
        ))
    }

    /// Create a translator reusing an existing [`reqwest::Client`]
    pub fn with_client(
        client: reqwest::Client,
        api_key: Option<String>,
        base_url_override: Option<String>,
    ) -> Self {
        Self {
            client,
            api_key,
            base_url_override,
        }
    }
}

#[async_trait]
impl Translator for DeepSeekTranslator {
    async fn translate(&self, text: &str, model_id: &str) -> Result<String, AppError> {
        if text.trim().is_empty() {
            return Ok(String::new());
        }
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                AppError::Credential("DEEPSEEK_API_KEY is not set".to_string())
            })?;

        let preset = model_preset(model_id);
        let base_url = self.base_url_override.as_deref().unwrap_or(preset.base_url);
        let url = format!("{}{}", base_url.trim_end_matches('/'), preset.path);

        let request_body = ChatCompletionRequest {
            model: preset.model.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Some(TRANSLATION_SYSTEM_PROMPT.to_string()),
                    reasoning_content: None,
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Some(text.to_string()),
                    reasoning_content: None,
                },
            ],
            stream: false,
            temperature: preset.temperature,
        };

        tracing::debug!(
            url = %url,
            model = %preset.model,
            text_len = text.len(),
            "Calling translation API"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        let raw = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&raw)
                .ok()
                .as_ref()
                .and_then(|v| v.pointer("/error/message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| {
                    format!(
                        "{} {}",
                        status.as_u16(),
                        status.canonical_reason().unwrap_or("Request failed")
                    )
                });
            tracing::error!(
                status_code = status.as_u16(),
                error = %message,
                "Translation API returned error status"
            );
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(AppError::Credential(message));
            }
            return Err(AppError::Remote {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&raw).map_err(|e| AppError::Decode(e.to_string()))?;
        let content = match parsed.choices.into_iter().next() {
            Some(choice) => choice.message.content.unwrap_or_default(),
            None => parsed.output.unwrap_or_default(),
        };
        let content = content.trim().to_string();

        tracing::debug!(response_len = content.len(), "Translation received");
        Ok(content)
    }
}
