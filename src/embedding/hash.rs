//! 해시 임베딩 - 로컬/오프라인 결정적 임베딩
//!
//! 단어와 문자 trigram, 원문 그대로의 trigram을 해시 버킷에 누적한 뒤
//! 단위 벡터로 정규화합니다.
//! 신경망 모델만큼 의미적이지는 않지만, 네트워크 없이 같은 텍스트에
//! 항상 같은 벡터를 만들어 개발/테스트/오프라인 운영에 사용합니다.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;

use super::EmbeddingProvider;
use crate::error::{RagError, RagResult};

/// 기본 차원 (all-MiniLM-L6-v2와 동일)
pub const HASH_DIMENSION: usize = 384;

/// 원문 문자 trigram 가중치
const RAW_TRIGRAM_WEIGHT: f32 = 0.25;
/// 원문 전체 해시 가중치
const RAW_TEXT_WEIGHT: f32 = 0.5;

const STOP_WORDS: &[&str] = &[
    "the", "is", "at", "which", "on", "a", "an", "as", "are", "was", "were", "for", "to", "of",
    "in", "and", "or", "but", "with", "by", "from", "this", "that", "be", "have", "has", "had",
    "its", "their", "they", "them", "do", "does", "can", "i", "my",
];

/// 해시 기반 임베딩 프로바이더
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dimension: usize,
    stop_words: HashSet<&'static str>,
}

impl HashEmbedding {
    /// 지정 차원으로 생성 (0이면 1로 보정)
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            stop_words: STOP_WORDS.iter().copied().collect(),
        }
    }

    fn tokens(&self, text: &str) -> BTreeMap<String, u32> {
        let lower = text.to_lowercase();
        let mut freq = BTreeMap::new();
        for word in lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.chars().count() >= 2 && !self.stop_words.contains(w))
        {
            *freq.entry(word.to_string()).or_insert(0) += 1;
        }
        freq
    }

    fn bucket(&self, bytes: &[u8], seed: u64) -> usize {
        // FNV-1a
        let hash = bytes.iter().fold(0xcbf2_9ce4_8422_2325u64 ^ seed, |acc, &b| {
            (acc ^ b as u64).wrapping_mul(0x0100_0000_01b3)
        });
        (hash % self.dimension as u64) as usize
    }

    fn generate(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];
        if text.is_empty() {
            return embedding;
        }

        // BTreeMap 순회로 부동소수점 누적 순서까지 고정
        for (word, freq) in self.tokens(text) {
            let weight = freq as f32;
            embedding[self.bucket(word.as_bytes(), 31)] += weight;

            let chars: Vec<char> = word.chars().collect();
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                embedding[self.bucket(trigram.as_bytes(), 37)] += weight.sqrt();
            }
        }

        // 원문 그대로의 특징 (대소문자/구두점/불용어 유지)
        // 정규화 후 같은 토큰이 되는 서로 다른 텍스트도 다른 벡터를 갖게 함
        let raw: Vec<char> = text.chars().collect();
        for window in raw.windows(3) {
            let trigram: String = window.iter().collect();
            embedding[self.bucket(trigram.as_bytes(), 41)] += RAW_TRIGRAM_WEIGHT;
        }
        if raw.len() < 3 {
            embedding[self.bucket(text.as_bytes(), 41)] += RAW_TRIGRAM_WEIGHT;
        }
        embedding[self.bucket(text.as_bytes(), 43)] += RAW_TEXT_WEIGHT;

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut embedding {
                *v /= norm;
            }
        }

        embedding
    }
}

impl Default for HashEmbedding {
    fn default() -> Self {
        Self::new(HASH_DIMENSION)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed(&self, text: &str) -> RagResult<Vec<f32>> {
        let embedding = self.generate(text);
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(RagError::Embedding(
                "Hash embedding produced non-finite values".to_string(),
            ));
        }
        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hash-trigram-v2"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_dimension_and_normalization() {
        let embedder = HashEmbedding::new(128);
        let embedding = embedder.embed("IT Certificates").await.unwrap();

        assert_eq!(embedding.len(), 128);
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_deterministic() {
        let embedder = HashEmbedding::default();
        let a = embedder.embed("How to register a school?").await.unwrap();
        let b = embedder.embed("How to register a school?").await.unwrap();
        assert_eq!(a, b);

        // 별도 인스턴스도 같은 결과
        let other = HashEmbedding::default();
        assert_eq!(a, other.embed("How to register a school?").await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_text_is_zero_vector() {
        let embedder = HashEmbedding::new(16);
        let embedding = embedder.embed("").await.unwrap();
        assert_eq!(embedding.len(), 16);
        assert!(embedding.iter().all(|&x| x == 0.0));
    }

    #[tokio::test]
    async fn test_shared_words_are_closer() {
        let embedder = HashEmbedding::default();
        let query = embedder.embed("apply").await.unwrap();
        let question = embedder.embed("How to apply?").await.unwrap();
        let answer = embedder.embed("Fill the form.").await.unwrap();

        assert!(dot(&query, &question) > dot(&query, &answer));
    }

    #[tokio::test]
    async fn test_case_and_punctuation_close_but_distinct() {
        let embedder = HashEmbedding::default();
        let a = embedder.embed("Apply!").await.unwrap();
        let b = embedder.embed("apply").await.unwrap();
        assert_ne!(a, b);
        assert!(dot(&a, &b) > 0.8, "similarity {}", dot(&a, &b));
    }

    #[tokio::test]
    async fn test_stop_word_variants_are_distinct() {
        let embedder = HashEmbedding::default();
        let a = embedder.embed("How do I renew?").await.unwrap();
        let b = embedder.embed("How to renew").await.unwrap();
        assert_ne!(a, b);
        assert!(dot(&a, &b) > 0.5);

        // 불용어/구두점만 있는 텍스트도 0 벡터가 아님
        let punct = embedder.embed("?!").await.unwrap();
        assert!(punct.iter().any(|&x| x != 0.0));
        assert_ne!(punct, embedder.embed("to do").await.unwrap());
    }

    #[tokio::test]
    async fn test_unicode_text() {
        let embedder = HashEmbedding::default();
        let embedding = embedder
            .embed("ஐடி சான்றிதழுக்கு விண்ணப்பிப்பது எப்படி?")
            .await
            .unwrap();
        assert_eq!(embedding.len(), HASH_DIMENSION);
        assert!(embedding.iter().all(|v| v.is_finite()));
    }
}
