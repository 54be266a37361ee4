//! 설정 모듈 - 환경변수 기반 엔진 설정
//!
//! 데이터 디렉토리, 로케일, 임베딩/완성 모델 설정을 한곳에서 관리합니다.
//! 저장 위치 기본값: ~/.citizen-rag/

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{RagError, RagResult};

/// 벡터 아티팩트 파일 이름
pub const VECTORS_FILE: &str = "index.vec";
/// 메타데이터 파일 이름
pub const METADATA_FILE: &str = "index.meta.json";
/// 감사 로그 파일 이름
pub const AUDIT_LOG_FILE: &str = "ai_audit_log.jsonl";

/// 기본 검색 결과 수
pub const DEFAULT_TOP_K: usize = 3;
/// 기본 로케일
pub const DEFAULT_LOCALE: &str = "en";
/// 답변 생성 온도 (결정적 응답 지향)
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_COMPLETION_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.citizen-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".citizen-rag")
}

// ============================================================================
// Types
// ============================================================================

/// 임베딩 프로바이더 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedderKind {
    /// 로컬 해시 임베딩 (오프라인, 결정적)
    Hash,
    /// OpenAI 호환 임베딩 API
    OpenAi,
}

impl EmbedderKind {
    /// 프로바이더별 기본 차원
    pub fn default_dimension(&self) -> usize {
        match self {
            EmbedderKind::Hash => crate::embedding::HASH_DIMENSION,
            EmbedderKind::OpenAi => crate::embedding::OPENAI_DIMENSION,
        }
    }
}

impl std::str::FromStr for EmbedderKind {
    type Err = RagError;

    fn from_str(s: &str) -> RagResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hash" => Ok(EmbedderKind::Hash),
            "openai" => Ok(EmbedderKind::OpenAi),
            other => Err(RagError::Config(format!(
                "Unknown embedding provider: {}. Must be 'hash' or 'openai'",
                other
            ))),
        }
    }
}

/// 엔진 설정
#[derive(Debug, Clone)]
pub struct RagConfig {
    pub data_dir: PathBuf,
    pub locale: String,
    pub top_k: usize,
    pub embedding_provider: EmbedderKind,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub completion_model: String,
    pub temperature: f32,
    pub openai_base_url: String,
    pub request_timeout: Duration,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            data_dir: get_data_dir(),
            locale: DEFAULT_LOCALE.to_string(),
            top_k: DEFAULT_TOP_K,
            embedding_provider: EmbedderKind::Hash,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_dimension: EmbedderKind::Hash.default_dimension(),
            completion_model: DEFAULT_COMPLETION_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            openai_base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl RagConfig {
    /// 환경변수에서 설정 로드
    ///
    /// 설정되지 않은 항목은 기본값을 사용합니다.
    pub fn from_env() -> RagResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 키 조회 함수로 설정 구성 (테스트에서 환경변수 없이 사용)
    pub fn from_lookup<F>(lookup: F) -> RagResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(dir) = get("CITIZEN_RAG_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(locale) = get("CITIZEN_RAG_LOCALE") {
            config.locale = locale.trim().to_string();
        }
        if let Some(k) = get("CITIZEN_RAG_TOP_K") {
            config.top_k = parse_number("CITIZEN_RAG_TOP_K", &k)?;
            if config.top_k == 0 {
                return Err(RagError::Config("CITIZEN_RAG_TOP_K must be >= 1".into()));
            }
        }
        if let Some(kind) = get("CITIZEN_RAG_EMBEDDER") {
            config.embedding_provider = kind.parse()?;
            config.embedding_dimension = config.embedding_provider.default_dimension();
        }
        if let Some(model) = get("CITIZEN_RAG_EMBEDDING_MODEL") {
            config.embedding_model = model;
        }
        if let Some(dim) = get("CITIZEN_RAG_EMBEDDING_DIM") {
            config.embedding_dimension = parse_number("CITIZEN_RAG_EMBEDDING_DIM", &dim)?;
            if config.embedding_dimension == 0 {
                return Err(RagError::Config(
                    "CITIZEN_RAG_EMBEDDING_DIM must be >= 1".into(),
                ));
            }
        }
        if let Some(model) = get("CITIZEN_RAG_COMPLETION_MODEL") {
            config.completion_model = model;
        }
        if let Some(url) = get("OPENAI_BASE_URL") {
            config.openai_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(secs) = get("CITIZEN_RAG_TIMEOUT_SECS") {
            let secs: u64 = parse_number("CITIZEN_RAG_TIMEOUT_SECS", &secs)?;
            config.request_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// 벡터 아티팩트 경로
    pub fn vectors_path(&self) -> PathBuf {
        self.data_dir.join(VECTORS_FILE)
    }

    /// 메타데이터 경로
    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir.join(METADATA_FILE)
    }

    /// 감사 로그 경로
    pub fn audit_log_path(&self) -> PathBuf {
        self.data_dir.join(AUDIT_LOG_FILE)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> RagResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| RagError::Config(format!("{} is not a valid number: {}", key, value)))
}

// ============================================================================
// API Key Management
// ============================================================================

/// API 키 로드 (OPENAI_API_KEY 환경변수)
pub fn get_api_key() -> RagResult<String> {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.trim().is_empty() => {
            tracing::debug!("Using API key from OPENAI_API_KEY");
            Ok(key.trim().to_string())
        }
        _ => Err(RagError::Config(
            "API key not found. Set OPENAI_API_KEY environment variable.".to_string(),
        )),
    }
}

/// API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    std::env::var("OPENAI_API_KEY")
        .map(|key| !key.trim().is_empty())
        .unwrap_or(false)
}

// ============================================================================
// Tests
// ============================================================================
