//! OpenAI 호환 임베딩 - /embeddings 엔드포인트
//!
//! ref: https://platform.openai.com/docs/api-reference/embeddings

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::EmbeddingProvider;
use crate::error::{RagError, RagResult};

/// text-embedding-3-small 기본 차원
pub const OPENAI_DIMENSION: usize = 1536;

/// 요청당 최대 입력 수
const MAX_BATCH_SIZE: usize = 96;
/// 429/5xx 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 1000;

/// OpenAI 호환 임베딩 구현체
#[derive(Debug)]
pub struct OpenAiEmbedding {
    api_key: String,
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedding {
    /// 새 임베딩 클라이언트 생성
    ///
    /// # Arguments
    /// * `api_key` - API 키
    /// * `base_url` - API 베이스 URL (예: https://api.openai.com/v1)
    /// * `model` - 임베딩 모델 이름
    /// * `dimension` - 요청/검증할 출력 차원
    /// * `timeout` - 요청 타임아웃
    pub fn new(
        api_key: String,
        base_url: &str,
        model: &str,
        dimension: usize,
        timeout: Duration,
    ) -> RagResult<Self> {
        if api_key.trim().is_empty() {
            return Err(RagError::Config("missing OpenAI API key".to_string()));
        }
        if model.trim().is_empty() {
            return Err(RagError::Config("missing embedding model name".to_string()));
        }
        if dimension == 0 {
            return Err(RagError::Config("embedding dimension must be >= 1".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            dimension,
        })
    }

    async fn request_batch(&self, inputs: &[String]) -> RagResult<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.model,
            input: inputs,
            dimensions: requested_dimensions(&self.model, self.dimension),
        };

        let mut last_error: Option<RagError> = None;

        // 재시도 루프 (429/5xx 에러 시 지수 백오프)
        for attempt in 0..=MAX_RETRIES {
            let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));

            let response = match self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(RagError::Embedding(format!(
                        "Failed to send embedding request: {}",
                        e
                    )));
                    if attempt < MAX_RETRIES && (e.is_timeout() || e.is_connect()) {
                        tracing::warn!(
                            "Embedding request failed, retrying in {:?} (attempt {}/{})",
                            backoff,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            let body = response.text().await.map_err(|e| {
                RagError::Embedding(format!("Failed to read response body: {}", e))
            })?;

            // 성공
            if status.is_success() {
                let mut parsed: EmbedResponse = serde_json::from_str(&body).map_err(|e| {
                    RagError::Embedding(format!("Failed to parse embedding response: {}", e))
                })?;
                parsed.data.sort_by_key(|d| d.index);

                if parsed.data.len() != inputs.len() {
                    return Err(RagError::Embedding(format!(
                        "Provider returned {} embeddings for {} inputs",
                        parsed.data.len(),
                        inputs.len()
                    )));
                }

                let vectors: Vec<Vec<f32>> =
                    parsed.data.into_iter().map(|d| d.embedding).collect();
                if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
                    return Err(RagError::DimensionMismatch {
                        expected: self.dimension,
                        actual: bad.len(),
                    });
                }
                return Ok(vectors);
            }

            if status.as_u16() == 429 || status.is_server_error() {
                tracing::warn!(
                    "Embedding API returned {}, backing off {:?} (attempt {}/{})",
                    status,
                    backoff,
                    attempt + 1,
                    MAX_RETRIES
                );
                last_error = Some(RagError::Embedding(format!(
                    "Embedding API error ({})",
                    status
                )));

                if attempt < MAX_RETRIES {
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            } else {
                // 다른 에러 - 즉시 실패
                let message = serde_json::from_str::<ApiError>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                return Err(RagError::Embedding(format!(
                    "Embedding API error ({}): {}",
                    status, message
                )));
            }
        }

        // 모든 재시도 실패
        Err(last_error.unwrap_or_else(|| {
            RagError::Embedding(format!("Embedding failed after {} retries", MAX_RETRIES))
        }))
    }
}

/// 모델 고유 출력 차원 (알려진 모델만)
fn native_dimension(model: &str) -> Option<usize> {
    match model {
        "text-embedding-ada-002" | "text-embedding-3-small" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        _ => None,
    }
}

/// 요청에 실을 `dimensions` 값
///
/// 고유 차원과 같으면 생략합니다 (ada-002는 이 파라미터를 거부함).
fn requested_dimensions(model: &str, dimension: usize) -> Option<usize> {
    match native_dimension(model) {
        Some(native) if native == dimension => None,
        _ => Some(dimension),
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Debug, Deserialize)]
struct EmbedData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// API 에러 응답
#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> RagResult<Vec<f32>> {
        // 빈 텍스트 처리
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let mut vectors = self.request_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::Embedding("Empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());

        for (i, batch) in texts.chunks(MAX_BATCH_SIZE).enumerate() {
            tracing::debug!(
                "Embedding batch {}/{}",
                i + 1,
                texts.len().div_ceil(MAX_BATCH_SIZE)
            );
            results.extend(self.request_batch(batch).await?);
        }

        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Tests
// ============================================================================
