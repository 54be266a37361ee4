//! citizen-rag - 정부 서비스 지식베이스 RAG 답변 엔진
//!
//! 서비스/하위 서비스/질문 계층 문서를 평탄화하여 임베딩 인덱스를 만들고,
//! 검색된 구절을 근거로 인용이 포함된 답변을 생성합니다.
//! 모든 답변은 감사 로그에 기록된 뒤에만 반환됩니다.

pub mod audit;
pub mod cli;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod knowledge;
pub mod synthesis;

// Re-exports
pub use audit::{count_records, AuditRecord, AuditSink, JsonlAuditLog};
pub use config::{get_api_key, get_data_dir, has_api_key, EmbedderKind, RagConfig};
pub use corpus::{
    flatten, flatten_with_locale, keyword_lookup, load_documents, CorpusRecord, FlattenOutcome,
    KeywordMatch, QaEntry, RecordKind, ServiceDocument, Subservice,
};
pub use embedding::{create_embedder, EmbeddingProvider, HashEmbedding, OpenAiEmbedding};
pub use engine::{BuildReport, GroundedAnswer, RagEngine};
pub use error::{RagError, RagResult};
pub use knowledge::{
    ContextPassage, EmbeddingIndex, IndexHandle, IndexMetadata, IndexPaths, SearchHit,
    SharedIndex,
};
pub use synthesis::{
    build_prompt, AnswerSynthesizer, CompletionService, OpenAiCompletion, UnavailableCompletion,
};
