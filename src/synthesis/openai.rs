//! OpenAI 호환 Chat Completions 클라이언트
//!
//! ref: https://platform.openai.com/docs/api-reference/chat

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::CompletionService;
use crate::config::{get_api_key, RagConfig};
use crate::error::{RagError, RagResult};

/// Chat Completions 클라이언트
///
/// 한 번만 요청하며 재시도하지 않습니다. 재시도 정책은 서빙 레이어 몫입니다.
#[derive(Debug)]
pub struct OpenAiCompletion {
    api_key: String,
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
}

impl OpenAiCompletion {
    /// 새 완성 클라이언트 생성
    pub fn new(
        api_key: String,
        base_url: &str,
        model: &str,
        temperature: f32,
        timeout: Duration,
    ) -> RagResult<Self> {
        if api_key.trim().is_empty() {
            return Err(RagError::Config("missing OpenAI API key".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
            temperature,
        })
    }

    /// 설정 + OPENAI_API_KEY 환경변수로 생성
    pub fn from_config(config: &RagConfig) -> RagResult<Self> {
        Self::new(
            get_api_key()?,
            &config.openai_base_url,
            &config.completion_model,
            config.temperature,
            config.request_timeout,
        )
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

fn parse_completion(body: &str) -> RagResult<String> {
    let parsed: ChatResponse = serde_json::from_str(body).map_err(|e| {
        RagError::SynthesisUnavailable(format!("Failed to parse completion response: {}", e))
    })?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| {
            RagError::SynthesisUnavailable("Completion response had no content".to_string())
        })
}

#[async_trait]
impl CompletionService for OpenAiCompletion {
    async fn complete(&self, prompt: &str) -> RagResult<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                RagError::SynthesisUnavailable(format!("Failed to call completion API: {}", e))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            RagError::SynthesisUnavailable(format!("Failed to read completion body: {}", e))
        })?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            tracing::warn!("Completion API returned {}: {}", status, message);
            return Err(RagError::SynthesisUnavailable(format!(
                "Completion API error ({}): {}",
                status, message
            )));
        }

        parse_completion(&body)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Tests
// ============================================================================
