//! RAG Engine - 평탄화, 인덱스, 검색, 답변 생성 통합
//!
//! 서빙 레이어가 소유하는 최상위 객체입니다.
//!
//! - `rebuild`: 문서 전체로 인덱스를 새로 만들고 원자적으로 교체
//! - `search` / `retrieve`: 현재 인덱스 스냅샷에서 읽기 전용 검색
//! - `answer` / `ask`: 근거 기반 답변 생성 (감사 기록 성공 시에만 반환)

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::audit::JsonlAuditLog;
use crate::config::{has_api_key, RagConfig};
use crate::corpus::{flatten_with_locale, ServiceDocument};
use crate::embedding::{create_embedder, EmbeddingProvider};
use crate::error::{RagError, RagResult};
use crate::knowledge::{
    load_index, retrieve, save_index, validate_query, ContextPassage, EmbeddingIndex,
    IndexHandle, IndexPaths, SearchHit, SharedIndex,
};
use crate::synthesis::{
    AnswerSynthesizer, CompletionService, OpenAiCompletion, UnavailableCompletion,
};

// ============================================================================
// Types
// ============================================================================

/// 빌드 결과 요약
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub build_id: Uuid,
    pub records: usize,
    /// id 누락/중복으로 건너뛴 항목 수
    pub skipped: usize,
    pub generation: u64,
    pub persisted: bool,
}

/// 근거 기반 답변
#[derive(Debug, Clone, Serialize)]
pub struct GroundedAnswer {
    pub answer: String,
    /// 프롬프트에 사용된 컨텍스트 (검색 순서)
    pub context: Vec<ContextPassage>,
}

// ============================================================================
// RagEngine
// ============================================================================

/// RAG 답변 엔진
pub struct RagEngine {
    index: SharedIndex,
    embedder: Arc<dyn EmbeddingProvider>,
    synthesizer: AnswerSynthesizer,
    locale: String,
    default_k: usize,
    paths: Option<IndexPaths>,
}

impl RagEngine {
    /// 구성요소로 엔진 생성 (영속화 없음, 로케일 en, k=3)
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, synthesizer: AnswerSynthesizer) -> Self {
        Self {
            index: SharedIndex::new(),
            embedder,
            synthesizer,
            locale: crate::config::DEFAULT_LOCALE.to_string(),
            default_k: crate::config::DEFAULT_TOP_K,
            paths: None,
        }
    }

    /// 설정으로 엔진 생성
    ///
    /// 임베딩 프로바이더, OpenAI 완성 클라이언트, JSONL 감사 로그를 구성합니다.
    /// API 키가 없으면 검색은 가능하고 답변 생성만 `SynthesisUnavailable`로 실패합니다.
    pub fn from_config(config: &RagConfig) -> RagResult<Self> {
        let embedder = create_embedder(config)?;
        let completion: Arc<dyn CompletionService> = if has_api_key() {
            Arc::new(OpenAiCompletion::from_config(config)?)
        } else {
            Arc::new(UnavailableCompletion::new(
                "OPENAI_API_KEY is not set; answer generation is disabled",
            ))
        };
        let audit = Arc::new(JsonlAuditLog::open(&config.audit_log_path())?);

        Ok(Self::new(embedder, AnswerSynthesizer::new(completion, audit))
            .with_locale(&config.locale)
            .with_default_k(config.top_k)
            .with_persistence(IndexPaths::new(
                config.vectors_path(),
                config.metadata_path(),
            )))
    }

    pub fn with_locale(mut self, locale: &str) -> Self {
        self.locale = locale.to_string();
        self
    }

    /// 기본 검색 결과 수 (0이면 무시)
    pub fn with_default_k(mut self, k: usize) -> Self {
        if k > 0 {
            self.default_k = k;
        }
        self
    }

    /// 빌드 시 인덱스 파일 쌍 저장
    pub fn with_persistence(mut self, paths: IndexPaths) -> Self {
        self.paths = Some(paths);
        self
    }

    /// 영속화 비활성화
    pub fn without_persistence(mut self) -> Self {
        self.paths = None;
        self
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }

    pub fn embedder(&self) -> &dyn EmbeddingProvider {
        self.embedder.as_ref()
    }

    /// 현재 인덱스 스냅샷
    pub fn snapshot(&self) -> Option<IndexHandle> {
        self.index.snapshot()
    }

    /// 설치된 인덱스 세대 (0 = 빌드 전)
    pub fn generation(&self) -> u64 {
        self.index.generation()
    }

    // ------------------------------------------------------------------------
    // Build / Load
    // ------------------------------------------------------------------------

    /// 문서 전체로 인덱스 재구성
    ///
    /// 빌드는 직렬화되며, 새 인덱스가 완성된 뒤에만 교체됩니다.
    /// 영속화가 설정되어 있으면 교체 전에 파일 쌍을 저장합니다.
    pub async fn rebuild(&self, documents: &[ServiceDocument]) -> RagResult<BuildReport> {
        let _build = self.index.lock_for_build().await;

        let outcome = flatten_with_locale(documents, &self.locale);
        let skipped = outcome.skipped;
        let handle = EmbeddingIndex::build(self.embedder.as_ref(), outcome.records).await?;

        let persisted = match &self.paths {
            Some(paths) => {
                save_index(&*handle, paths)?;
                true
            }
            None => false,
        };

        let report = BuildReport {
            build_id: handle.build_id(),
            records: handle.len(),
            skipped,
            generation: self.index.install(handle),
            persisted,
        };
        Ok(report)
    }

    /// 저장된 인덱스 로드
    ///
    /// 파일이 둘 다 없으면 `Ok(None)`, 하나만 있거나 불일치하면 에러입니다.
    pub async fn load(&self) -> RagResult<Option<u64>> {
        let Some(paths) = &self.paths else {
            return Ok(None);
        };
        if !paths.any_exists() {
            tracing::debug!("No persisted index at {}", paths.vectors.display());
            return Ok(None);
        }

        let _build = self.index.lock_for_build().await;
        let index = load_index(paths)?;

        if index.dimension() != self.embedder.dimension() {
            return Err(RagError::DimensionMismatch {
                expected: index.dimension(),
                actual: self.embedder.dimension(),
            });
        }
        if index.model() != self.embedder.name() {
            tracing::warn!(
                "Index was built with '{}', current embedder is '{}'",
                index.model(),
                self.embedder.name()
            );
        }

        Ok(Some(self.index.install(Arc::new(index))))
    }

    /// 외부에서 만든 인덱스 설치
    pub fn install(&self, index: IndexHandle) -> RagResult<u64> {
        if index.dimension() != self.embedder.dimension() {
            return Err(RagError::DimensionMismatch {
                expected: index.dimension(),
                actual: self.embedder.dimension(),
            });
        }
        Ok(self.index.install(index))
    }

    // ------------------------------------------------------------------------
    // Query
    // ------------------------------------------------------------------------

    /// 거리 포함 검색
    ///
    /// 빌드 전이거나 빈 인덱스면 빈 결과를 반환합니다.
    pub async fn search(&self, query_text: &str, k: usize) -> RagResult<Vec<SearchHit>> {
        match self.index.snapshot() {
            Some(index) => index.search(self.embedder.as_ref(), query_text, k).await,
            None => {
                tracing::debug!("Search before any build, returning no results");
                Ok(Vec::new())
            }
        }
    }

    /// `{id, text}` 컨텍스트 검색
    ///
    /// 빈 쿼리는 `InvalidQuery`, 빌드 전이면 `IndexNotBuilt`입니다.
    pub async fn retrieve(&self, query_text: &str, k: usize) -> RagResult<Vec<ContextPassage>> {
        validate_query(query_text)?;
        let index = self.index.snapshot().ok_or(RagError::IndexNotBuilt)?;
        retrieve(&index, self.embedder.as_ref(), query_text, k).await
    }

    /// 주어진 컨텍스트로 답변 생성
    ///
    /// 완성 호출과 감사 기록은 별도 태스크에서 실행되므로,
    /// 호출자가 중간에 포기해도 생성된 답변은 반드시 기록됩니다.
    pub async fn answer(&self, query_text: &str, context: &[ContextPassage]) -> RagResult<String> {
        let query = validate_query(query_text)?.to_string();
        let context = context.to_vec();
        let synthesizer = self.synthesizer.clone();

        tokio::spawn(async move { synthesizer.answer(&query, &context).await })
            .await
            .map_err(|e| RagError::SynthesisUnavailable(format!("Synthesis task failed: {}", e)))?
    }

    /// 검색 + 답변 생성
    pub async fn ask(&self, query_text: &str, k: Option<usize>) -> RagResult<GroundedAnswer> {
        let k = k.unwrap_or(self.default_k);
        let context = self.retrieve(query_text, k).await?;
        let answer = self.answer(query_text, &context).await?;
        Ok(GroundedAnswer { answer, context })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditRecord, AuditSink};
    use crate::corpus::tests::{ministry_it, qa, service, subservice};
    use crate::embedding::HashEmbedding;
    use crate::synthesis::tests::{BrokenAudit, StaticCompletion};
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    struct SlowCompletion;

    #[async_trait]
    impl CompletionService for SlowCompletion {
        async fn complete(&self, _prompt: &str) -> RagResult<String> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok("late answer".to_string())
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    fn engine_with(
        dir: &TempDir,
        completion: Arc<dyn CompletionService>,
    ) -> (RagEngine, Arc<JsonlAuditLog>) {
        let audit = Arc::new(JsonlAuditLog::open(&dir.path().join("audit.jsonl")).unwrap());
        let engine = RagEngine::new(
            Arc::new(HashEmbedding::default()),
            AnswerSynthesizer::new(completion, audit.clone()),
        );
        (engine, audit)
    }

    fn engine(dir: &TempDir) -> (RagEngine, Arc<JsonlAuditLog>) {
        engine_with(dir, Arc::new(StaticCompletion::ok("Fill the form [ministry_it-it_cert-q1-a].")))
    }

    fn paths(dir: &TempDir) -> IndexPaths {
        IndexPaths::new(dir.path().join("index.vec"), dir.path().join("index.meta.json"))
    }

    #[tokio::test]
    async fn test_search_before_build_is_empty() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir);

        assert!(engine.search("apply", 3).await.unwrap().is_empty());
        assert!(matches!(
            engine.retrieve("apply", 3).await,
            Err(RagError::IndexNotBuilt)
        ));
    }

    #[tokio::test]
    async fn test_rebuild_and_search() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir);

        let report = engine.rebuild(&ministry_it()).await.unwrap();
        assert_eq!(report.records, 4);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.generation, 1);
        assert!(!report.persisted);

        let hits = engine.search("apply", 1).await.unwrap();
        assert_eq!(hits[0].record.record_id, "ministry_it-it_cert-q1-q");
    }

    #[tokio::test]
    async fn test_rebuild_replaces_wholesale() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir);

        engine.rebuild(&ministry_it()).await.unwrap();
        let docs = vec![service(
            "ministry_education",
            "Ministry of Education",
            vec![subservice(
                "schools",
                "Schools",
                vec![qa("q1", "How to register a school?", "Complete registration form.")],
            )],
        )];
        let report = engine.rebuild(&docs).await.unwrap();
        assert_eq!(report.generation, 2);

        let passages = engine.retrieve("apply", 10).await.unwrap();
        assert_eq!(passages.len(), 4);
        assert!(passages.iter().all(|p| p.id.starts_with("ministry_education")));
    }

    #[tokio::test]
    async fn test_empty_corpus_build() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir);

        let report = engine.rebuild(&[]).await.unwrap();
        assert_eq!(report.records, 0);
        assert!(engine.search("anything", 5).await.unwrap().is_empty());
        assert!(engine.retrieve("anything", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ask_audits_once() {
        let dir = TempDir::new().unwrap();
        let (engine, audit) = engine(&dir);
        engine.rebuild(&ministry_it()).await.unwrap();

        let result = engine.ask("How do I apply?", Some(2)).await.unwrap();
        assert_eq!(result.answer, "Fill the form [ministry_it-it_cert-q1-a].");
        assert_eq!(result.context.len(), 2);
        assert_eq!(audit.count().unwrap(), 1);

        let line = std::fs::read_to_string(audit.path()).unwrap();
        let record: AuditRecord = serde_json::from_str(line.trim()).unwrap();
        let ids: Vec<String> = result.context.iter().map(|p| p.id.clone()).collect();
        assert_eq!(record.context_ids, ids);

        engine.ask("Second question", None).await.unwrap();
        assert_eq!(audit.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_blank_query_never_reaches_model() {
        let dir = TempDir::new().unwrap();
        let completion = Arc::new(StaticCompletion::ok("unused"));
        let (engine, audit) = engine_with(&dir, completion.clone());
        engine.rebuild(&ministry_it()).await.unwrap();

        assert!(matches!(
            engine.ask("   ", None).await,
            Err(RagError::InvalidQuery(_))
        ));
        assert!(matches!(
            engine.answer("", &[]).await,
            Err(RagError::InvalidQuery(_))
        ));
        assert!(completion.prompts.lock().unwrap().is_empty());
        assert_eq!(audit.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_synthesis_failure_propagates() {
        let dir = TempDir::new().unwrap();
        let (engine, audit) = engine_with(&dir, Arc::new(StaticCompletion::failing("timeout")));
        engine.rebuild(&ministry_it()).await.unwrap();

        assert!(matches!(
            engine.ask("How do I apply?", None).await,
            Err(RagError::SynthesisUnavailable(_))
        ));
        assert_eq!(audit.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_audit_failure_fails_ask() {
        let engine = RagEngine::new(
            Arc::new(HashEmbedding::default()),
            AnswerSynthesizer::new(Arc::new(StaticCompletion::ok("answer")), Arc::new(BrokenAudit)),
        );
        engine.rebuild(&ministry_it()).await.unwrap();

        assert!(matches!(
            engine.ask("How do I apply?", None).await,
            Err(RagError::AuditWriteFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_abandoned_caller_is_still_audited() {
        let dir = TempDir::new().unwrap();
        let (engine, audit) = engine_with(&dir, Arc::new(SlowCompletion));
        let context = vec![ContextPassage::new("ministry_it-service", "IT Ministry")];

        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), engine.answer("q", &context)).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(audit.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_persist_and_load() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir);
        let engine = engine.with_persistence(paths(&dir));

        let report = engine.rebuild(&ministry_it()).await.unwrap();
        assert!(report.persisted);

        let (fresh, _) = self::engine(&dir);
        let fresh = fresh.with_persistence(paths(&dir));
        assert_eq!(fresh.load().await.unwrap(), Some(1));
        assert_eq!(fresh.snapshot().unwrap().build_id(), report.build_id);

        let hits = fresh.search("apply", 1).await.unwrap();
        assert_eq!(hits[0].record.record_id, "ministry_it-it_cert-q1-q");
    }

    #[tokio::test]
    async fn test_load_without_artifacts() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir);
        let engine = engine.with_persistence(paths(&dir));
        assert_eq!(engine.load().await.unwrap(), None);

        // 한쪽만 있으면 에러
        std::fs::write(dir.path().join("index.vec"), b"CRAGVEC1").unwrap();
        assert!(paths(&dir).any_exists());
        assert!(!paths(&dir).exists());
        assert!(matches!(engine.load().await, Err(RagError::Persistence(_))));
    }

    #[tokio::test]
    async fn test_load_with_other_dimension_is_fatal() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir);
        engine
            .with_persistence(paths(&dir))
            .rebuild(&ministry_it())
            .await
            .unwrap();

        let audit: Arc<dyn AuditSink> = Arc::new(BrokenAudit);
        let other = RagEngine::new(
            Arc::new(HashEmbedding::new(64)),
            AnswerSynthesizer::new(Arc::new(StaticCompletion::ok("x")), audit),
        )
        .with_persistence(paths(&dir));

        assert!(matches!(
            other.load().await,
            Err(RagError::DimensionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_install_checks_dimension() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir);
        let records = crate::corpus::flatten(&ministry_it()).records;

        let small = EmbeddingIndex::build(&HashEmbedding::new(64), records.clone())
            .await
            .unwrap();
        assert!(matches!(
            engine.install(small),
            Err(RagError::DimensionMismatch { expected: 64, .. })
        ));
        assert!(engine.snapshot().is_none());

        let fitting = EmbeddingIndex::build(engine.embedder(), records).await.unwrap();
        assert_eq!(engine.install(fitting).unwrap(), engine.generation());
        assert_eq!(engine.search("apply", 10).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_searches_during_rebuild_see_whole_index() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir);
        let engine = Arc::new(engine);
        engine.rebuild(&ministry_it()).await.unwrap();

        let big: Vec<ServiceDocument> = (0..20)
            .map(|i| {
                service(
                    &format!("svc{}", i),
                    &format!("Service number {}", i),
                    vec![subservice("sub", "Sub", vec![qa("q1", "Question?", "Answer.")])],
                )
            })
            .collect();

        let rebuild = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.rebuild(&big).await })
        };

        for _ in 0..50 {
            let hits = engine.search("apply", 100).await.unwrap();
            // 이전 인덱스(4) 또는 새 인덱스(80) 중 하나만 관찰
            assert!(hits.len() == 4 || hits.len() == 80, "torn index: {}", hits.len());
            tokio::task::yield_now().await;
        }

        rebuild.await.unwrap().unwrap();
        assert_eq!(engine.search("apply", 100).await.unwrap().len(), 80);
    }
}
