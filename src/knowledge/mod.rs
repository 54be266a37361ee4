//! Knowledge 모듈 - 임베딩 인덱스와 검색
//!
//! - Vector: 평면 L2 최근접 이웃 검색
//! - Index: 코퍼스 임베딩 인덱스 + 원자적 교체 슬롯
//! - Persist: 벡터/메타데이터 파일 쌍 저장 및 로드
//! - Retrieval: 쿼리 → `{id, text}` 컨텍스트 구절

mod index;
mod persist;
mod retrieval;
mod vector;

// Re-exports
pub use index::{EmbeddingIndex, IndexHandle, SearchHit, SharedIndex};
pub use persist::{load_index, read_metadata, save_index, IndexMetadata, IndexPaths};
pub use retrieval::{retrieve, validate_query, ContextPassage};
pub use vector::{squared_l2, FlatL2Store, VectorHit};
