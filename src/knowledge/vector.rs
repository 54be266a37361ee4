//! Vector Store - 정확한 L2 최근접 이웃 검색
//!
//! 행 우선(row-major) 평면 행렬에 벡터를 저장하고
//! 제곱 유클리드 거리로 전체 비교 검색을 수행합니다 (정규화 없음).

use std::cmp::Ordering;

use crate::error::{RagError, RagResult};

// ============================================================================
// Types
// ============================================================================

/// 검색 히트 (위치 인덱스 + 거리)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorHit {
    /// 저장 순서 기준 위치
    pub position: usize,
    /// 제곱 L2 거리 (낮을수록 관련성 높음)
    pub distance: f32,
}

// ============================================================================
// FlatL2Store
// ============================================================================

/// 평면 L2 벡터 저장소
///
/// 한 번 만들어지면 변경되지 않습니다. 위치 `i`의 벡터는
/// 인덱스의 `corpus_records[i]`에 대응합니다.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatL2Store {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatL2Store {
    /// 빈 저장소 생성
    pub fn empty(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    /// 벡터 목록으로 저장소 생성
    ///
    /// 모든 벡터의 차원은 `dimension`과 같아야 합니다.
    pub fn from_vectors(dimension: usize, vectors: Vec<Vec<f32>>) -> RagResult<Self> {
        let mut data = Vec::with_capacity(dimension * vectors.len());
        for vector in vectors {
            if vector.len() != dimension {
                return Err(RagError::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            data.extend(vector);
        }
        Ok(Self { dimension, data })
    }

    /// 평면 데이터로 저장소 생성 (영속화 로드용)
    pub fn from_flat(dimension: usize, data: Vec<f32>) -> RagResult<Self> {
        if dimension == 0 {
            if data.is_empty() {
                return Ok(Self::empty(0));
            }
            return Err(RagError::Persistence(
                "Zero dimension with non-empty vector data".to_string(),
            ));
        }
        if data.len() % dimension != 0 {
            return Err(RagError::Persistence(format!(
                "Vector data length {} is not a multiple of dimension {}",
                data.len(),
                dimension
            )));
        }
        Ok(Self { dimension, data })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// 저장된 벡터 수
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 평면 데이터 (영속화용)
    pub fn as_flat(&self) -> &[f32] {
        &self.data
    }

    /// k-최근접 검색
    ///
    /// 거리 오름차순, 같은 거리면 저장 순서대로 반환합니다.
    /// `k`가 저장된 벡터 수보다 크면 전체를 반환합니다.
    pub fn search(&self, query: &[f32], k: usize) -> RagResult<Vec<VectorHit>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut hits: Vec<VectorHit> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, row)| VectorHit {
                position,
                distance: squared_l2(row, query),
            })
            .collect();

        hits.sort_by(compare_hits);
        hits.truncate(k);
        Ok(hits)
    }
}

fn compare_hits(a: &VectorHit, b: &VectorHit) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.position.cmp(&b.position))
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 제곱 유클리드 거리
///
/// 길이가 다르면 짧은 쪽 기준으로 계산하므로, 호출 전에 차원을 검증해야 합니다.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

// ============================================================================
// Tests
// ============================================================================
