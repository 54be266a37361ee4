//! 임베딩 모듈 - 텍스트 벡터화
//!
//! 텍스트를 고정 차원 벡터로 변환하는 프로바이더들입니다.
//! 같은 텍스트는 프로세스 수명 동안 항상 같은 벡터를 반환해야 합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = create_embedder(&RagConfig::from_env()?)?;
//! let embedding = embedder.embed("How to apply?").await?;
//! ```

mod hash;
mod openai;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{get_api_key, EmbedderKind, RagConfig};
use crate::error::RagResult;

pub use hash::{HashEmbedding, HASH_DIMENSION};
pub use openai::{OpenAiEmbedding, OPENAI_DIMENSION};

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> RagResult<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더/모델 이름 (인덱스 메타데이터에 기록)
    fn name(&self) -> &str;
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정에 따라 임베딩 프로바이더 생성
pub fn create_embedder(config: &RagConfig) -> RagResult<Arc<dyn EmbeddingProvider>> {
    let embedder: Arc<dyn EmbeddingProvider> = match config.embedding_provider {
        EmbedderKind::Hash => Arc::new(HashEmbedding::new(config.embedding_dimension)),
        EmbedderKind::OpenAi => Arc::new(OpenAiEmbedding::new(
            get_api_key()?,
            &config.openai_base_url,
            &config.embedding_model,
            config.embedding_dimension,
            config.request_timeout,
        )?),
    };

    tracing::info!(
        "Using {} embedding (dimension: {})",
        embedder.name(),
        embedder.dimension()
    );
    Ok(embedder)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_hash_embedder() {
        let config = RagConfig {
            embedding_dimension: 64,
            ..Default::default()
        };
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.dimension(), 64);
        assert_eq!(embedder.name(), "hash-trigram-v2");
    }

    #[tokio::test]
    async fn test_default_embed_batch_preserves_order() {
        let embedder = HashEmbedding::new(32);
        let texts = vec!["first text".to_string(), "second text".to_string()];

        let batch = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], embedder.embed("first text").await.unwrap());
        assert_eq!(batch[1], embedder.embed("second text").await.unwrap());
    }
}
