//! Synthesis 모듈 - 근거 기반 답변 생성
//!
//! 검색된 컨텍스트로 프롬프트를 만들고 언어 모델을 한 번 호출한 뒤,
//! 감사 로그에 기록이 성공한 경우에만 답변을 반환합니다.
//!
//! 흐름: 프롬프트 구성 → 완성 호출 (재시도 없음) → 감사 기록 → 반환

mod openai;

use std::sync::Arc;

use async_trait::async_trait;

use crate::audit::{AuditRecord, AuditSink};
use crate::error::{RagError, RagResult};
use crate::knowledge::ContextPassage;

pub use openai::OpenAiCompletion;

// ============================================================================
// CompletionService Trait
// ============================================================================

/// 언어 모델 완성 서비스
///
/// 요청 하나에 응답 하나 (스트리밍 없음). 실패는 `SynthesisUnavailable`로 반환합니다.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &str) -> RagResult<String>;

    /// 서비스/모델 이름
    fn name(&self) -> &str;
}

/// 완성 서비스를 구성할 수 없을 때 사용하는 자리표시자
///
/// 모든 호출을 `SynthesisUnavailable`로 실패시킵니다 (빈 답변을 만들지 않음).
#[derive(Debug, Clone)]
pub struct UnavailableCompletion {
    reason: String,
}

impl UnavailableCompletion {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl CompletionService for UnavailableCompletion {
    async fn complete(&self, _prompt: &str) -> RagResult<String> {
        Err(RagError::SynthesisUnavailable(self.reason.clone()))
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}

// ============================================================================
// Prompt
// ============================================================================

/// 근거 인용 프롬프트 구성
///
/// 컨텍스트는 검색 순서대로 `[id] text` 형식으로 나열됩니다.
pub fn build_prompt(query_text: &str, context: &[ContextPassage]) -> String {
    let context_str = context
        .iter()
        .map(|p| format!("[{}] {}", p.id, p.text))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Answer the question concisely using the context below. \
         Cite the sources using [id].\n\nContext:\n{}\n\nQuestion: {}\nAnswer:",
        context_str, query_text
    )
}

// ============================================================================
// AnswerSynthesizer
// ============================================================================

/// 답변 생성기
///
/// 인덱스 락을 잡지 않으며, 감사 기록이 실패하면 답변도 실패합니다.
#[derive(Clone)]
pub struct AnswerSynthesizer {
    completion: Arc<dyn CompletionService>,
    audit: Arc<dyn AuditSink>,
}

impl AnswerSynthesizer {
    pub fn new(completion: Arc<dyn CompletionService>, audit: Arc<dyn AuditSink>) -> Self {
        Self { completion, audit }
    }

    /// 컨텍스트 기반 답변 생성 + 감사 기록
    pub async fn answer(&self, query_text: &str, context: &[ContextPassage]) -> RagResult<String> {
        let prompt = build_prompt(query_text, context);

        tracing::debug!(
            "Requesting completion from {} ({} context passages)",
            self.completion.name(),
            context.len()
        );

        let completion = self.completion.complete(&prompt).await?;
        let answer = completion.trim();
        if answer.is_empty() {
            return Err(RagError::SynthesisUnavailable(
                "Language model returned an empty completion".to_string(),
            ));
        }

        let record = AuditRecord::now(
            query_text,
            context.iter().map(|p| p.id.clone()).collect(),
            answer,
        );
        self.audit.append(&record).map_err(|e| match e {
            RagError::AuditWriteFailure(_) => e,
            other => RagError::AuditWriteFailure(other.to_string()),
        })?;

        tracing::info!(
            "Answered query with {} cited passages ({} chars)",
            record.context_ids.len(),
            answer.len()
        );
        Ok(answer.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audit::JsonlAuditLog;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// 고정 응답 완성 서비스 (프롬프트 기록)
    pub(crate) struct StaticCompletion {
        pub(crate) reply: Result<String, String>,
        pub(crate) prompts: Mutex<Vec<String>>,
    }

    impl StaticCompletion {
        pub(crate) fn ok(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing(message: &str) -> Self {
            Self {
                reply: Err(message.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionService for StaticCompletion {
        async fn complete(&self, prompt: &str) -> RagResult<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply
                .clone()
                .map_err(RagError::SynthesisUnavailable)
        }

        fn name(&self) -> &str {
            "static"
        }
    }

    /// 항상 실패하는 감사 싱크
    pub(crate) struct BrokenAudit;

    impl AuditSink for BrokenAudit {
        fn append(&self, _record: &AuditRecord) -> RagResult<()> {
            Err(RagError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )))
        }
    }

    fn context() -> Vec<ContextPassage> {
        vec![
            ContextPassage::new("ministry_it-it_cert-q1-q", "How to apply?"),
            ContextPassage::new("ministry_it-it_cert-q1-a", "Fill the form."),
        ]
    }

    #[test]
    fn test_build_prompt() {
        let prompt = build_prompt("How do I apply?", &context());
        assert_eq!(
            prompt,
            "Answer the question concisely using the context below. Cite the sources using [id].\n\n\
             Context:\n[ministry_it-it_cert-q1-q] How to apply?\n\n\
             [ministry_it-it_cert-q1-a] Fill the form.\n\n\
             Question: How do I apply?\nAnswer:"
        );
    }

    #[tokio::test]
    async fn test_answer_is_trimmed_and_audited() {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(JsonlAuditLog::open(&dir.path().join("audit.jsonl")).unwrap());
        let completion = Arc::new(StaticCompletion::ok("  Fill the form [ministry_it-it_cert-q1-a].\n"));
        let synthesizer = AnswerSynthesizer::new(completion.clone(), log.clone());

        let answer = synthesizer.answer("How do I apply?", &context()).await.unwrap();
        assert_eq!(answer, "Fill the form [ministry_it-it_cert-q1-a].");
        assert_eq!(log.count().unwrap(), 1);
        assert_eq!(completion.prompts.lock().unwrap().len(), 1);

        let line = std::fs::read_to_string(log.path()).unwrap();
        let record: AuditRecord = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(
            record.context_ids,
            vec!["ministry_it-it_cert-q1-q", "ministry_it-it_cert-q1-a"]
        );
        assert_eq!(record.answer, answer);
        assert_eq!(record.query, "How do I apply?");
    }

    #[tokio::test]
    async fn test_completion_failure_is_not_audited() {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(JsonlAuditLog::open(&dir.path().join("audit.jsonl")).unwrap());
        let synthesizer =
            AnswerSynthesizer::new(Arc::new(StaticCompletion::failing("quota exceeded")), log.clone());

        let result = synthesizer.answer("q", &context()).await;
        assert!(matches!(result, Err(RagError::SynthesisUnavailable(_))));
        assert_eq!(log.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_completion_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(JsonlAuditLog::open(&dir.path().join("audit.jsonl")).unwrap());
        let synthesizer = AnswerSynthesizer::new(Arc::new(StaticCompletion::ok("   ")), log.clone());

        let result = synthesizer.answer("q", &context()).await;
        assert!(matches!(result, Err(RagError::SynthesisUnavailable(_))));
        assert_eq!(log.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_completion() {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(JsonlAuditLog::open(&dir.path().join("audit.jsonl")).unwrap());
        let synthesizer = AnswerSynthesizer::new(
            Arc::new(UnavailableCompletion::new("no api key")),
            log.clone(),
        );

        let result = synthesizer.answer("q", &context()).await;
        assert!(matches!(result, Err(RagError::SynthesisUnavailable(m)) if m == "no api key"));
        assert_eq!(log.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_audit_failure_fails_answer() {
        let synthesizer =
            AnswerSynthesizer::new(Arc::new(StaticCompletion::ok("answer")), Arc::new(BrokenAudit));

        let result = synthesizer.answer("q", &context()).await;
        assert!(matches!(result, Err(RagError::AuditWriteFailure(_))));
    }
}
