// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! LLM client abstraction for judge operators

use async_trait::async_trait;
use evalgraph_core::{LlmProvider, Settings};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

const SYSTEM_PROMPT: &str = "You are an expert evaluator. Respond only with valid JSON.";

/// Trait for LLM clients used by judge operators
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a prompt and get a JSON response body
    async fn evaluate(&self, prompt: String) -> Result<LlmResponse, LlmError>;

    fn model_name(&self) -> &str;
}

/// Response from LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub model: String,
}

impl LlmResponse {
    /// Parse response as JSON.
    ///
    /// Models sometimes wrap JSON in a fenced code block; the fence is stripped.
    pub fn as_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        let content = self.content.trim();
        let content = content
            .strip_prefix("```json")
            .or_else(|| content.strip_prefix("```"))
            .and_then(|c| c.strip_suffix("```"))
            .unwrap_or(content);
        serde_json::from_str(content.trim())
    }
}

/// Token usage information
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Errors from LLM clients
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(LlmError::RateLimitExceeded);
    }
    let error_text = response.text().await?;
    Err(LlmError::ApiError(format!("{}: {}", status, error_text)))
}

fn token_count(value: &serde_json::Value) -> u32 {
    value.as_u64().unwrap_or(0) as u32
}

/// OpenAI chat completions client
pub struct OpenAiClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            base_url: "https://api.openai.com/v1".to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn evaluate(&self, prompt: String) -> Result<LlmResponse, LlmError> {
        let request = serde_json::json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": SYSTEM_PROMPT
                },
                {
                    "role": "user",
                    "content": prompt
                }
            ],
            "temperature": 0.0,
            "response_format": { "type": "json_object" }
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;
        let response_data: serde_json::Value = check_status(response).await?.json().await?;

        let content = response_data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or(LlmError::InvalidResponse("Missing content".to_string()))?
            .to_string();

        let usage_data = &response_data["usage"];
        let usage = TokenUsage {
            prompt_tokens: token_count(&usage_data["prompt_tokens"]),
            completion_tokens: token_count(&usage_data["completion_tokens"]),
            total_tokens: token_count(&usage_data["total_tokens"]),
        };

        Ok(LlmResponse {
            content,
            usage,
            model: self.model.clone(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Anthropic messages client
pub struct AnthropicClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            base_url: "https://api.anthropic.com/v1".to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn evaluate(&self, prompt: String) -> Result<LlmResponse, LlmError> {
        let request = serde_json::json!({
            "model": self.model,
            "max_tokens": 1024,
            "messages": [
                {
                    "role": "user",
                    "content": prompt
                }
            ],
            "system": SYSTEM_PROMPT,
            "temperature": 0.0
        });

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;
        let response_data: serde_json::Value = check_status(response).await?.json().await?;

        let content = response_data["content"][0]["text"]
            .as_str()
            .ok_or(LlmError::InvalidResponse("Missing content".to_string()))?
            .to_string();

        let usage_data = &response_data["usage"];
        let prompt_tokens = token_count(&usage_data["input_tokens"]);
        let completion_tokens = token_count(&usage_data["output_tokens"]);

        Ok(LlmResponse {
            content,
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
            model: self.model.clone(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Build the client configured by `settings`.
///
/// Fails with a configuration error when the provider's credential is absent.
pub fn client_from_settings(settings: &Settings) -> evalgraph_core::Result<Arc<dyn LlmClient>> {
    let key = settings.require_llm_key()?.to_string();
    let model = settings.model().to_string();

    let client: Arc<dyn LlmClient> = match settings.llm_provider {
        LlmProvider::Openai => {
            let client = OpenAiClient::new(key, model);
            Arc::new(match &settings.llm_base_url {
                Some(url) => client.with_base_url(url.clone()),
                None => client,
            })
        }
        LlmProvider::Anthropic => {
            let client = AnthropicClient::new(key, model);
            Arc::new(match &settings.llm_base_url {
                Some(url) => client.with_base_url(url.clone()),
                None => client,
            })
        }
    };
    Ok(client)
}
