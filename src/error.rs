//! 에러 타입 - RAG 엔진 공통 에러
//!
//! 호출자가 에러 종류를 구분할 수 있도록 `thiserror` 기반 열거형으로 정의합니다.
//! CLI 레이어는 이 에러를 `anyhow`로 감싸 컨텍스트를 추가합니다.

use thiserror::Error;

/// RAG 엔진 에러
#[derive(Error, Debug)]
pub enum RagError {
    /// 빈 쿼리 또는 잘못된 k (재시도 불가)
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// 인덱스가 아직 빌드되지 않음
    #[error("Index has not been built yet")]
    IndexNotBuilt,

    /// 빌드 시점과 다른 임베딩 차원 (치명적 설정 오류)
    #[error("Embedding dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// 언어 모델 호출 실패 (네트워크, 인증, 쿼터)
    #[error("Synthesis unavailable: {0}")]
    SynthesisUnavailable(String),

    /// 감사 로그 기록 실패
    #[error("Audit write failed: {0}")]
    AuditWriteFailure(String),

    /// 임베딩 프로바이더 실패
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// 인덱스 아티팩트 저장/로드 실패
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// 설정 오류
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// RagError를 사용하는 Result 별칭
pub type RagResult<T> = Result<T, RagError>;

impl RagError {
    /// 호출자가 다시 시도해도 의미가 없는 에러인지 여부
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RagError::DimensionMismatch { .. } | RagError::Config(_) | RagError::Persistence(_)
        )
    }
}
