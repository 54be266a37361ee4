//! Retrieval - 쿼리 → 컨텍스트 구절
//!
//! 인덱스 검색 결과를 `{id, text}` 쌍으로 투영합니다.
//! 거리는 내부 순위 신호이므로 공개 계약에 포함하지 않습니다.

use serde::{Deserialize, Serialize};

use super::index::EmbeddingIndex;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, RagResult};

/// 검색된 컨텍스트 구절
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextPassage {
    pub id: String,
    pub text: String,
}

impl ContextPassage {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// 쿼리 검증 (공백만 있는 쿼리 거부)
pub fn validate_query(query_text: &str) -> RagResult<&str> {
    let trimmed = query_text.trim();
    if trimmed.is_empty() {
        return Err(RagError::InvalidQuery("empty query".to_string()));
    }
    Ok(trimmed)
}

/// 인덱스에서 상위 k개 구절 검색
pub async fn retrieve(
    index: &EmbeddingIndex,
    embedder: &dyn EmbeddingProvider,
    query_text: &str,
    k: usize,
) -> RagResult<Vec<ContextPassage>> {
    let query = validate_query(query_text)?;
    let hits = index.search(embedder, query, k).await?;

    Ok(hits
        .into_iter()
        .map(|hit| ContextPassage {
            id: hit.record.record_id,
            text: hit.record.text,
        })
        .collect())
}

// ============================================================================
// Tests
// ============================================================================
