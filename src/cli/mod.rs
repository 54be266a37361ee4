//! CLI 모듈
//!
//! citizen-rag CLI 명령어 정의 및 구현
//! (문서 저장소 / 서빙 레이어 역할을 대신합니다)

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::audit::count_records;
use crate::config::{has_api_key, RagConfig};
use crate::corpus::{keyword_lookup, load_documents};
use crate::engine::RagEngine;
use crate::knowledge::{read_metadata, IndexPaths};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "citizen-rag")]
#[command(version, about = "정부 서비스 지식베이스 RAG 답변 엔진", long_about = None)]
pub struct Cli {
    /// 데이터 디렉토리 (기본: ~/.citizen-rag, CITIZEN_RAG_DATA_DIR)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// 로케일 (기본: en, CITIZEN_RAG_LOCALE)
    #[arg(long, global = true)]
    pub locale: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 서비스 문서로 인덱스 빌드
    Build {
        /// 서비스 문서 JSON 파일
        #[arg(short, long)]
        docs: PathBuf,

        /// 인덱스 파일을 저장하지 않음
        #[arg(long)]
        no_persist: bool,
    },

    /// 인덱스 검색 (거리 포함)
    Search {
        /// 검색 쿼리
        query: String,

        /// 결과 개수
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// 근거 기반 답변 생성
    Ask {
        /// 질문
        query: String,

        /// 컨텍스트 구절 개수
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// 임베딩 없이 키워드로 질문 조회
    Lookup {
        /// 서비스 문서 JSON 파일
        #[arg(short, long)]
        docs: PathBuf,

        /// 검색어
        query: String,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = RagConfig::from_env().context("설정 로드 실패")?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(locale) = cli.locale {
        config.locale = locale;
    }

    match cli.command {
        Commands::Build { docs, no_persist } => cmd_build(&config, docs, no_persist).await,
        Commands::Search { query, k } => cmd_search(&config, &query, k).await,
        Commands::Ask { query, k } => cmd_ask(&config, &query, k).await,
        Commands::Lookup { docs, query } => cmd_lookup(&config, docs, &query),
        Commands::Status => cmd_status(&config),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 인덱스 빌드 명령어 (build)
async fn cmd_build(config: &RagConfig, docs: PathBuf, no_persist: bool) -> Result<()> {
    let documents = load_documents(&docs)
        .with_context(|| format!("문서 로드 실패: {}", docs.display()))?;

    let mut engine = RagEngine::from_config(config).context("엔진 초기화 실패")?;
    if no_persist {
        engine = engine.without_persistence();
    }

    println!("[*] 서비스 {} 건 임베딩 중...", documents.len());
    let report = engine.rebuild(&documents).await.context("인덱스 빌드 실패")?;

    println!("[OK] 인덱스 빌드 완료 (build: {})", report.build_id);
    println!("     레코드: {} 건", report.records);
    if report.skipped > 0 {
        println!("[!] 건너뛴 항목: {} 건 (id 누락 또는 중복)", report.skipped);
    }
    if report.persisted {
        println!("     저장 위치: {}", config.data_dir.display());
    }

    Ok(())
}

/// 검색 명령어 (search)
async fn cmd_search(config: &RagConfig, query: &str, k: Option<usize>) -> Result<()> {
    let engine = open_engine(config).await?;
    let k = k.unwrap_or(engine.default_k());

    println!("[*] 검색 중: \"{}\"", query);
    let hits = engine.search(query, k).await.context("검색 실패")?;

    if hits.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", hits.len());
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{}] (distance: {:.4})",
            i + 1,
            hit.record.record_id,
            hit.distance
        );
        println!("   {}", truncate_text(&hit.record.text, 200));
        println!();
    }

    Ok(())
}

/// 답변 명령어 (ask)
async fn cmd_ask(config: &RagConfig, query: &str, k: Option<usize>) -> Result<()> {
    if !has_api_key() {
        println!("[!] OPENAI_API_KEY가 설정되지 않아 답변을 생성할 수 없습니다.");
        println!("    설정: export OPENAI_API_KEY=your-key");
    }

    let engine = open_engine(config).await?;
    let result = engine.ask(query, k).await.context("답변 생성 실패")?;

    println!("{}", result.answer);
    println!();
    println!("[*] 근거 ({} 건):", result.context.len());
    for passage in &result.context {
        println!("  [{}] {}", passage.id, truncate_text(&passage.text, 120));
    }

    Ok(())
}

/// 키워드 조회 명령어 (lookup)
fn cmd_lookup(config: &RagConfig, docs: PathBuf, query: &str) -> Result<()> {
    let documents = load_documents(&docs)
        .with_context(|| format!("문서 로드 실패: {}", docs.display()))?;
    let matches = keyword_lookup(&documents, query, &config.locale);

    if matches.is_empty() {
        println!("[!] 일치하는 질문이 없습니다.");
        return Ok(());
    }

    println!("[OK] 일치 항목 ({} 건):\n", matches.len());
    for m in &matches {
        println!("  {} > {}", m.service, m.subservice);
        println!("  Q: {}", m.question);
        println!("  A: {}", truncate_text(&m.answer, 200));
        println!();
    }

    Ok(())
}

/// 상태 명령어 (status)
fn cmd_status(config: &RagConfig) -> Result<()> {
    println!("citizen-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());
    println!(
        "[*] 임베딩: {:?} (dimension {})",
        config.embedding_provider, config.embedding_dimension
    );

    if has_api_key() {
        println!("[OK] API 키: 설정됨 (model: {})", config.completion_model);
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export OPENAI_API_KEY=your-key");
    }

    let paths = IndexPaths::new(config.vectors_path(), config.metadata_path());
    if paths.exists() {
        match read_metadata(&paths.metadata) {
            Ok(meta) => {
                println!(
                    "[OK] 인덱스: {} 레코드 (model: {}, dimension: {})",
                    meta.record_count, meta.model, meta.dimension
                );
                println!("     빌드: {} ({})", meta.build_id, meta.created_at);
            }
            Err(e) => println!("[!] 인덱스 메타데이터 읽기 실패: {}", e),
        }
    } else if paths.any_exists() {
        println!("[!] 인덱스: 파일 쌍 불완전 (다시 빌드 필요)");
    } else {
        println!("[!] 인덱스: 없음 (citizen-rag build --docs <file>)");
    }

    let audit_path = config.audit_log_path();
    match count_records(&audit_path) {
        Ok(0) if !audit_path.exists() => println!("[*] 감사 로그: 없음"),
        Ok(count) => {
            let size = std::fs::metadata(&audit_path).map(|m| m.len()).unwrap_or(0);
            println!(
                "[OK] 감사 로그: {} 건 ({})",
                count,
                format_bytes(size as usize)
            );
        }
        Err(e) => println!("[!] 감사 로그 읽기 실패: {}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 설정으로 엔진을 만들고 저장된 인덱스 로드
async fn open_engine(config: &RagConfig) -> Result<RagEngine> {
    let engine = RagEngine::from_config(config).context("엔진 초기화 실패")?;
    match engine.load().await {
        Ok(Some(_)) => {}
        Ok(None) => {
            println!("[!] 저장된 인덱스가 없습니다. 먼저 `citizen-rag build --docs <file>`를 실행하세요.");
        }
        Err(e) if !e.is_fatal() => {
            tracing::warn!("Failed to load persisted index: {}", e);
            println!("[!] 인덱스를 읽지 못했습니다: {}", e);
        }
        Err(e) => return Err(e).context("인덱스 로드 실패"),
    }
    Ok(engine)
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
