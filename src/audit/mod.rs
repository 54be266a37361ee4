//! Audit 모듈 - 답변 생성 감사 로그
//!
//! 성공한 답변 생성마다 레코드 하나를 추가합니다 (수정/삭제 없음).
//! 저장 형식: JSON Lines (UTF-8, 한 줄에 레코드 하나)

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RagError, RagResult};

// ============================================================================
// Types
// ============================================================================

/// 감사 레코드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// 생성 시각 (ISO-8601 UTC)
    pub timestamp: DateTime<Utc>,
    pub query: String,
    /// 프롬프트에 사용된 컨텍스트 id (검색 순서)
    pub context_ids: Vec<String>,
    pub answer: String,
}

impl AuditRecord {
    /// 현재 시각으로 레코드 생성
    pub fn now(query: impl Into<String>, context_ids: Vec<String>, answer: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            query: query.into(),
            context_ids,
            answer: answer.into(),
        }
    }
}

// ============================================================================
// AuditSink Trait
// ============================================================================

/// 감사 로그 싱크
///
/// 각 `append`는 완결된 레코드 하나를 원자적으로 기록해야 합니다.
pub trait AuditSink: Send + Sync {
    fn append(&self, record: &AuditRecord) -> RagResult<()>;
}

// ============================================================================
// JsonlAuditLog
// ============================================================================

/// JSON Lines 파일 감사 로그
///
/// 레코드를 메모리에서 한 줄로 직렬화한 뒤 `O_APPEND` 핸들에 한 번에 씁니다.
#[derive(Debug)]
pub struct JsonlAuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditLog {
    /// 감사 로그 열기 (부모 디렉토리 생성)
    pub fn open(path: &Path) -> RagResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RagError::AuditWriteFailure(format!(
                        "Failed to create audit directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 기록된 레코드 수 (외부 도구/상태 조회용)
    pub fn count(&self) -> RagResult<usize> {
        count_records(&self.path)
    }
}

/// 감사 로그 파일의 레코드 수 (파일이 없으면 0)
///
/// 읽기 전용이며 디렉토리나 파일을 만들지 않습니다.
pub fn count_records(path: &Path) -> RagResult<usize> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content.lines().filter(|l| !l.trim().is_empty()).count()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

impl AuditSink for JsonlAuditLog {
    fn append(&self, record: &AuditRecord) -> RagResult<()> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| RagError::AuditWriteFailure(format!("Failed to encode record: {}", e)))?;
        line.push('\n');

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                RagError::AuditWriteFailure(format!(
                    "Failed to open {}: {}",
                    self.path.display(),
                    e
                ))
            })?;

        file.write_all(line.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|e| RagError::AuditWriteFailure(format!("Failed to append record: {}", e)))?;

        tracing::debug!(
            "Audit record appended ({} context ids)",
            record.context_ids.len()
        );
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
