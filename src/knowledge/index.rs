//! Embedding Index - 코퍼스 임베딩 인덱스
//!
//! 평탄화된 레코드를 임베딩하여 불변 인덱스를 만들고,
//! 서빙 레이어가 공유하는 슬롯(`SharedIndex`)에서 원자적으로 교체합니다.
//!
//! - 빌드는 항상 전체 재구성 (증분 추가/삭제 없음)
//! - 읽기는 `Arc` 스냅샷으로 락 없이 수행
//! - 교체 중에도 읽기 측은 이전 또는 새 인덱스 중 하나만 관찰

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::vector::FlatL2Store;
use crate::corpus::CorpusRecord;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, RagResult};

// ============================================================================
// Types
// ============================================================================

/// 공유 가능한 인덱스 참조
pub type IndexHandle = Arc<EmbeddingIndex>;

/// 검색 결과 (레코드 + 거리)
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub record: CorpusRecord,
    /// 제곱 L2 거리
    pub distance: f32,
}

/// 임베딩 인덱스
///
/// 벡터 저장소와 같은 순서의 `corpus_records`를 함께 소유합니다.
#[derive(Debug, Clone)]
pub struct EmbeddingIndex {
    build_id: Uuid,
    model: String,
    created_at: DateTime<Utc>,
    store: FlatL2Store,
    records: Vec<CorpusRecord>,
}

// ============================================================================
// EmbeddingIndex
// ============================================================================

impl EmbeddingIndex {
    /// 레코드 목록으로 인덱스 빌드
    ///
    /// 레코드가 없으면 유효한 빈 인덱스를 반환합니다.
    pub async fn build(
        embedder: &dyn EmbeddingProvider,
        records: Vec<CorpusRecord>,
    ) -> RagResult<IndexHandle> {
        let dimension = embedder.dimension();

        let vectors = if records.is_empty() {
            Vec::new()
        } else {
            let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
            embedder.embed_batch(&texts).await?
        };

        if vectors.len() != records.len() {
            return Err(RagError::Embedding(format!(
                "Embedder returned {} vectors for {} records",
                vectors.len(),
                records.len()
            )));
        }

        let store = FlatL2Store::from_vectors(dimension, vectors)?;
        let index = Self {
            build_id: Uuid::new_v4(),
            model: embedder.name().to_string(),
            created_at: Utc::now(),
            store,
            records,
        };

        tracing::info!(
            "Built index {} ({} records, dimension {}, model {})",
            index.build_id,
            index.len(),
            index.dimension(),
            index.model
        );

        Ok(Arc::new(index))
    }

    /// 저장된 구성요소로 인덱스 재조립 (영속화 로드용)
    pub(crate) fn from_parts(
        build_id: Uuid,
        model: String,
        created_at: DateTime<Utc>,
        store: FlatL2Store,
        records: Vec<CorpusRecord>,
    ) -> RagResult<Self> {
        if store.len() != records.len() {
            return Err(RagError::Persistence(format!(
                "Vector count {} does not match record count {}",
                store.len(),
                records.len()
            )));
        }
        Ok(Self {
            build_id,
            model,
            created_at,
            store,
            records,
        })
    }

    /// k-최근접 레코드 검색
    ///
    /// 빈 인덱스는 쿼리와 k에 관계없이 빈 결과를 반환합니다.
    pub async fn search(
        &self,
        embedder: &dyn EmbeddingProvider,
        query_text: &str,
        k: usize,
    ) -> RagResult<Vec<SearchHit>> {
        if self.records.is_empty() {
            return Ok(Vec::new());
        }
        if k == 0 {
            return Err(RagError::InvalidQuery("k must be >= 1".to_string()));
        }

        // 모델 교체 여부를 임베딩 호출 전에 확인
        if embedder.dimension() != self.dimension() {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension(),
                actual: embedder.dimension(),
            });
        }

        let query = embedder.embed(query_text).await?;
        let hits = self.store.search(&query, k)?;

        tracing::debug!(
            "Search '{}' (k={}) -> {} hits",
            query_text,
            k,
            hits.len()
        );

        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                self.records.get(hit.position).map(|record| SearchHit {
                    record: record.clone(),
                    distance: hit.distance,
                })
            })
            .collect())
    }

    pub fn build_id(&self) -> Uuid {
        self.build_id
    }

    /// 빌드에 사용된 임베딩 모델 이름
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn dimension(&self) -> usize {
        self.store.dimension()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[CorpusRecord] {
        &self.records
    }

    pub(crate) fn store(&self) -> &FlatL2Store {
        &self.store
    }
}

// ============================================================================
// SharedIndex
// ============================================================================

/// 서빙 레이어가 소유하는 인덱스 슬롯
///
/// 참조 교체만 쓰기 락 안에서 수행하고, 검색은 스냅샷에서 수행합니다.
#[derive(Debug, Default)]
pub struct SharedIndex {
    current: RwLock<Option<IndexHandle>>,
    generation: AtomicU64,
    build_lock: tokio::sync::Mutex<()>,
}

impl SharedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// 현재 인덱스 스냅샷 (빌드 전이면 None)
    pub fn snapshot(&self) -> Option<IndexHandle> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        guard.clone()
    }

    /// 새 인덱스로 교체하고 새 세대 번호 반환
    pub fn install(&self, index: IndexHandle) -> u64 {
        let build_id = index.build_id();
        let records = index.len();
        {
            let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
            *guard = Some(index);
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        tracing::info!(
            "Installed index {} ({} records) as generation {}",
            build_id,
            records,
            generation
        );
        generation
    }

    /// 설치된 인덱스 세대 수 (0 = 아직 없음)
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// 빌드 배타 구간 진입
    ///
    /// 동시에 여러 빌드가 실행되지 않도록 직렬화합니다. 검색은 막지 않습니다.
    pub async fn lock_for_build(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.build_lock.lock().await
    }
}

// ============================================================================
// Tests
// ============================================================================
