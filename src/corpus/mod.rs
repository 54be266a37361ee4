//! Corpus 모듈 - 서비스 문서 평탄화
//!
//! 서비스 → 하위 서비스 → 질문/답변 계층 문서를
//! 임베딩 가능한 평면 레코드 목록으로 변환합니다.
//!
//! - 레코드 순서 = 벡터 저장소의 위치 인덱스
//! - 빈 텍스트는 건너뜀
//! - id가 없는 노드는 하위 트리와 함께 건너뛰고 개수만 보고

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_LOCALE;
use crate::error::{RagError, RagResult};

// ============================================================================
// Document Types
// ============================================================================

/// 로케일별 텍스트 (예: en, si, ta)
pub type LocalizedText = BTreeMap<String, String>;

/// 서비스 문서 (외부 문서 저장소 소유, 읽기 전용)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceDocument {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: LocalizedText,
    #[serde(default)]
    pub subservices: Vec<Subservice>,
}

/// 하위 서비스
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subservice {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: LocalizedText,
    #[serde(default)]
    pub questions: Vec<QaEntry>,
}

/// 질문/답변 항목
///
/// `downloads`, `location`, `instructions`는 임베딩하지 않는 부가 정보입니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QaEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "q", alias = "question")]
    pub question: LocalizedText,
    #[serde(default)]
    pub answer: LocalizedText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloads: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

// ============================================================================
// Corpus Records
// ============================================================================

/// 레코드 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordKind {
    Service,
    Subservice,
    Question,
    Answer,
}

impl RecordKind {
    /// record_id 접미사
    pub fn suffix(&self) -> &'static str {
        match self {
            RecordKind::Service => "service",
            RecordKind::Subservice => "subservice",
            RecordKind::Question => "q",
            RecordKind::Answer => "a",
        }
    }
}

/// 임베딩 단위 레코드
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusRecord {
    pub record_id: String,
    pub text: String,
    pub kind: RecordKind,
}

/// 평탄화 결과
#[derive(Debug, Clone, Default)]
pub struct FlattenOutcome {
    /// 문서 순서대로 정렬된 레코드
    pub records: Vec<CorpusRecord>,
    /// id 누락 또는 중복으로 건너뛴 항목 수
    pub skipped: usize,
}

// ============================================================================
// Flattener
// ============================================================================

/// 기본 로케일(en)로 평탄화
pub fn flatten(documents: &[ServiceDocument]) -> FlattenOutcome {
    flatten_with_locale(documents, DEFAULT_LOCALE)
}

/// 지정 로케일로 평탄화
///
/// 번역이 없는 필드는 빈 텍스트로 취급되어 건너뜁니다 (다른 로케일로 대체하지 않음).
pub fn flatten_with_locale(documents: &[ServiceDocument], locale: &str) -> FlattenOutcome {
    let mut builder = CorpusBuilder::default();

    for service in documents {
        let Some(service_id) = node_id(&service.id) else {
            tracing::warn!("Skipping service without id");
            builder.skipped += 1;
            continue;
        };

        builder.push(
            format!("{}-service", service_id),
            localized(&service.name, locale),
            RecordKind::Service,
        );

        for sub in &service.subservices {
            let Some(sub_id) = node_id(&sub.id) else {
                tracing::warn!("Skipping subservice without id in service '{}'", service_id);
                builder.skipped += 1;
                continue;
            };

            builder.push(
                format!("{}-{}-subservice", service_id, sub_id),
                localized(&sub.name, locale),
                RecordKind::Subservice,
            );

            for qa in &sub.questions {
                let Some(q_id) = node_id(&qa.id) else {
                    tracing::warn!(
                        "Skipping question without id in '{}-{}'",
                        service_id,
                        sub_id
                    );
                    builder.skipped += 1;
                    continue;
                };

                let prefix = format!("{}-{}-{}", service_id, sub_id, q_id);
                builder.push(
                    format!("{}-q", prefix),
                    localized(&qa.question, locale),
                    RecordKind::Question,
                );
                builder.push(
                    format!("{}-a", prefix),
                    localized(&qa.answer, locale),
                    RecordKind::Answer,
                );
            }
        }
    }

    if builder.skipped > 0 {
        tracing::warn!(
            "Flattened {} records, skipped {} malformed entries",
            builder.records.len(),
            builder.skipped
        );
    } else {
        tracing::debug!("Flattened {} records", builder.records.len());
    }

    FlattenOutcome {
        records: builder.records,
        skipped: builder.skipped,
    }
}

#[derive(Default)]
struct CorpusBuilder {
    records: Vec<CorpusRecord>,
    seen: HashSet<String>,
    skipped: usize,
}

impl CorpusBuilder {
    fn push(&mut self, record_id: String, text: &str, kind: RecordKind) {
        if text.trim().is_empty() {
            return;
        }

        // 저장소에 중복 id가 있어도 한 빌드 내 record_id는 유일해야 함
        if !self.seen.insert(record_id.clone()) {
            tracing::warn!("Duplicate record id '{}', skipping", record_id);
            self.skipped += 1;
            return;
        }

        self.records.push(CorpusRecord {
            record_id,
            text: text.to_string(),
            kind,
        });
    }
}

fn node_id(id: &Option<String>) -> Option<&str> {
    id.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn localized<'a>(text: &'a LocalizedText, locale: &str) -> &'a str {
    text.get(locale).map(String::as_str).unwrap_or("")
}

// ============================================================================
// Document Loading
// ============================================================================

/// JSON 파일에서 서비스 문서 목록 로드
///
/// 문서 저장소 내보내기 형식(서비스 객체의 JSON 배열)을 읽습니다.
pub fn load_documents(path: &Path) -> RagResult<Vec<ServiceDocument>> {
    let raw = std::fs::read_to_string(path)?;
    let documents: Vec<ServiceDocument> = serde_json::from_str(&raw).map_err(|e| {
        RagError::Config(format!(
            "Failed to parse service documents {}: {}",
            path.display(),
            e
        ))
    })?;

    tracing::info!(
        "Loaded {} service documents from {}",
        documents.len(),
        path.display()
    );
    Ok(documents)
}

// ============================================================================
// Keyword Lookup
// ============================================================================

/// 키워드 조회 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeywordMatch {
    pub service: String,
    pub subservice: String,
    pub question: String,
    pub answer: String,
}

/// 부분 문자열 기반 키워드 조회
///
/// 질문 + 하위 서비스 이름 + 서비스 이름을 이어 붙인 문자열에
/// 쿼리가 (대소문자 무시) 포함되면 매칭됩니다. 임베딩 없이 동작합니다.
pub fn keyword_lookup(
    documents: &[ServiceDocument],
    query: &str,
    locale: &str,
) -> Vec<KeywordMatch> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }

    let mut matches = Vec::new();
    for service in documents {
        let service_name = localized(&service.name, locale);
        for sub in &service.subservices {
            let sub_name = localized(&sub.name, locale);
            for qa in &sub.questions {
                let question = localized(&qa.question, locale);
                let haystack = format!("{}{}{}", question, sub_name, service_name).to_lowercase();
                if haystack.contains(&needle) {
                    matches.push(KeywordMatch {
                        service: service_name.to_string(),
                        subservice: sub_name.to_string(),
                        question: question.to_string(),
                        answer: localized(&qa.answer, locale).to_string(),
                    });
                }
            }
        }
    }

    matches
}

// ============================================================================
// Tests
// ============================================================================
