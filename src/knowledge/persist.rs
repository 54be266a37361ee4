//! Index Persistence - 벡터 아티팩트 + 메타데이터 파일 쌍
//!
//! 두 파일은 항상 함께 쓰고 함께 읽습니다. 하나만으로는 의미가 없습니다.
//!
//! 벡터 파일 형식 (little-endian):
//! ```text
//! magic "CRAGVEC1" | build_id (16 bytes) | dimension u32 | count u64 | f32 * dimension * count
//! ```
//! 메타데이터는 같은 build_id, 레코드 목록, 벡터 파일의 SHA-256을 담은 JSON입니다.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::index::EmbeddingIndex;
use super::vector::FlatL2Store;
use crate::corpus::CorpusRecord;
use crate::error::{RagError, RagResult};

const MAGIC: &[u8; 8] = b"CRAGVEC1";
const HEADER_LEN: usize = 8 + 16 + 4 + 8;

// ============================================================================
// Types
// ============================================================================

/// 메타데이터 파일 내용
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub build_id: Uuid,
    pub model: String,
    pub dimension: usize,
    pub record_count: usize,
    pub vectors_sha256: String,
    pub created_at: DateTime<Utc>,
    pub records: Vec<CorpusRecord>,
}

/// 아티팩트 파일 경로 쌍
#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub vectors: PathBuf,
    pub metadata: PathBuf,
}

impl IndexPaths {
    pub fn new(vectors: impl Into<PathBuf>, metadata: impl Into<PathBuf>) -> Self {
        Self {
            vectors: vectors.into(),
            metadata: metadata.into(),
        }
    }

    /// 두 파일이 모두 존재하는지
    pub fn exists(&self) -> bool {
        self.vectors.exists() && self.metadata.exists()
    }

    /// 두 파일 중 하나라도 존재하는지
    pub fn any_exists(&self) -> bool {
        self.vectors.exists() || self.metadata.exists()
    }
}

// ============================================================================
// Save / Load
// ============================================================================

/// 인덱스를 파일 쌍으로 저장
///
/// 임시 파일에 먼저 쓴 뒤 벡터 → 메타데이터 순서로 rename 합니다.
pub fn save_index(index: &EmbeddingIndex, paths: &IndexPaths) -> RagResult<()> {
    for path in [&paths.vectors, &paths.metadata] {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
    }

    let vector_bytes = encode_vectors(index.build_id(), index.store());
    let metadata = IndexMetadata {
        build_id: index.build_id(),
        model: index.model().to_string(),
        dimension: index.dimension(),
        record_count: index.len(),
        vectors_sha256: sha256_hex(&vector_bytes),
        created_at: index.created_at(),
        records: index.records().to_vec(),
    };
    let metadata_bytes = serde_json::to_vec_pretty(&metadata)
        .map_err(|e| RagError::Persistence(format!("Failed to encode metadata: {}", e)))?;

    let vectors_tmp = tmp_path(&paths.vectors);
    let metadata_tmp = tmp_path(&paths.metadata);
    write_file(&vectors_tmp, &vector_bytes)?;
    write_file(&metadata_tmp, &metadata_bytes)?;

    fs::rename(&vectors_tmp, &paths.vectors)?;
    fs::rename(&metadata_tmp, &paths.metadata)?;

    tracing::info!(
        "Saved index {} ({} records) to {}",
        metadata.build_id,
        metadata.record_count,
        paths.vectors.display()
    );
    Ok(())
}

/// 파일 쌍에서 인덱스 로드
///
/// 한쪽 파일 누락, build_id/개수/차원 불일치, 체크섬 불일치는 모두 에러입니다.
pub fn load_index(paths: &IndexPaths) -> RagResult<EmbeddingIndex> {
    for path in [&paths.vectors, &paths.metadata] {
        if !path.exists() {
            return Err(RagError::Persistence(format!(
                "Index artifact missing: {}",
                path.display()
            )));
        }
    }

    let metadata = read_metadata(&paths.metadata)?;
    let bytes = fs::read(&paths.vectors)?;

    if sha256_hex(&bytes) != metadata.vectors_sha256 {
        return Err(RagError::Persistence(
            "Vector file checksum does not match metadata".to_string(),
        ));
    }

    let (build_id, store) = decode_vectors(&bytes)?;
    if build_id != metadata.build_id {
        return Err(RagError::Persistence(format!(
            "Vector file belongs to build {}, metadata to build {}",
            build_id, metadata.build_id
        )));
    }
    if store.dimension() != metadata.dimension {
        return Err(RagError::Persistence(format!(
            "Vector dimension {} does not match metadata dimension {}",
            store.dimension(),
            metadata.dimension
        )));
    }
    if store.len() != metadata.record_count || metadata.records.len() != metadata.record_count {
        return Err(RagError::Persistence(format!(
            "Record count mismatch: vectors {}, metadata {}, records {}",
            store.len(),
            metadata.record_count,
            metadata.records.len()
        )));
    }

    let index = EmbeddingIndex::from_parts(
        metadata.build_id,
        metadata.model,
        metadata.created_at,
        store,
        metadata.records,
    )?;

    tracing::info!(
        "Loaded index {} ({} records, dimension {})",
        index.build_id(),
        index.len(),
        index.dimension()
    );
    Ok(index)
}

/// 메타데이터만 읽기 (상태 조회용)
pub fn read_metadata(path: &Path) -> RagResult<IndexMetadata> {
    let raw = fs::read(path)?;
    serde_json::from_slice(&raw)
        .map_err(|e| RagError::Persistence(format!("Failed to parse metadata: {}", e)))
}

// ============================================================================
// Encoding
// ============================================================================

fn encode_vectors(build_id: Uuid, store: &FlatL2Store) -> Vec<u8> {
    let data = store.as_flat();
    let mut bytes = Vec::with_capacity(HEADER_LEN + data.len() * 4);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(build_id.as_bytes());
    bytes.extend_from_slice(&(store.dimension() as u32).to_le_bytes());
    bytes.extend_from_slice(&(store.len() as u64).to_le_bytes());
    for value in data {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_vectors(bytes: &[u8]) -> RagResult<(Uuid, FlatL2Store)> {
    if bytes.len() < HEADER_LEN || &bytes[..8] != MAGIC {
        return Err(RagError::Persistence(
            "Not a vector artifact (bad header)".to_string(),
        ));
    }

    let build_id = Uuid::from_slice(&bytes[8..24])
        .map_err(|e| RagError::Persistence(format!("Bad build id: {}", e)))?;
    let dimension = u32::from_le_bytes(read_array(&bytes[24..28])?) as usize;
    let count = u64::from_le_bytes(read_array(&bytes[28..36])?) as usize;

    let body = &bytes[HEADER_LEN..];
    let expected = dimension
        .checked_mul(count)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| RagError::Persistence("Vector header overflows".to_string()))?;
    if body.len() != expected {
        return Err(RagError::Persistence(format!(
            "Vector body is {} bytes, header expects {}",
            body.len(),
            expected
        )));
    }

    let mut data = Vec::with_capacity(dimension * count);
    for chunk in body.chunks_exact(4) {
        data.push(f32::from_le_bytes(read_array(chunk)?));
    }

    let store = if count == 0 {
        FlatL2Store::empty(dimension)
    } else {
        FlatL2Store::from_flat(dimension, data)?
    };
    Ok((build_id, store))
}

fn read_array<const N: usize>(slice: &[u8]) -> RagResult<[u8; N]> {
    slice
        .try_into()
        .map_err(|_| RagError::Persistence("Truncated vector header".to_string()))
}

fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_file(path: &Path, bytes: &[u8]) -> RagResult<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{flatten, tests::ministry_it};
    use crate::embedding::HashEmbedding;
    use tempfile::TempDir;

    async fn built_index() -> std::sync::Arc<EmbeddingIndex> {
        let embedder = HashEmbedding::new(32);
        EmbeddingIndex::build(&embedder, flatten(&ministry_it()).records)
            .await
            .unwrap()
    }

    fn paths(dir: &TempDir) -> IndexPaths {
        IndexPaths::new(
            dir.path().join("index.vec"),
            dir.path().join("index.meta.json"),
        )
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        let index = built_index().await;

        save_index(&*index, &paths).unwrap();
        assert!(paths.exists());

        let loaded = load_index(&paths).unwrap();
        assert_eq!(loaded.build_id(), index.build_id());
        assert_eq!(loaded.records(), index.records());
        assert_eq!(loaded.dimension(), 32);
        assert_eq!(loaded.store(), index.store());

        // 저장 후에도 검색 결과 동일
        let embedder = HashEmbedding::new(32);
        let before = index.search(&embedder, "apply", 2).await.unwrap();
        let after = loaded.search(&embedder, "apply", 2).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_empty_index_round_trip() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        let embedder = HashEmbedding::new(16);
        let index = EmbeddingIndex::build(&embedder, Vec::new()).await.unwrap();

        save_index(&*index, &paths).unwrap();
        let loaded = load_index(&paths).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.dimension(), 16);
    }

    #[tokio::test]
    async fn test_missing_half_is_error() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        save_index(&*built_index().await, &paths).unwrap();

        fs::remove_file(&paths.metadata).unwrap();
        assert!(matches!(load_index(&paths), Err(RagError::Persistence(_))));
    }

    #[tokio::test]
    async fn test_mismatched_pair_is_error() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let a = paths(&dir_a);
        let b = paths(&dir_b);

        save_index(&*built_index().await, &a).unwrap();
        save_index(&*built_index().await, &b).unwrap();

        // 다른 빌드의 메타데이터와 짝지음
        let mixed = IndexPaths::new(a.vectors.clone(), b.metadata.clone());
        assert!(matches!(load_index(&mixed), Err(RagError::Persistence(_))));
    }

    #[tokio::test]
    async fn test_count_mismatch_is_error() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        save_index(&*built_index().await, &paths).unwrap();

        let mut metadata = read_metadata(&paths.metadata).unwrap();
        metadata.records.pop();
        metadata.record_count -= 1;
        fs::write(&paths.metadata, serde_json::to_vec(&metadata).unwrap()).unwrap();

        assert!(matches!(load_index(&paths), Err(RagError::Persistence(_))));
    }

    #[tokio::test]
    async fn test_corrupted_vectors_is_error() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        save_index(&*built_index().await, &paths).unwrap();

        let mut bytes = fs::read(&paths.vectors).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&paths.vectors, bytes).unwrap();

        assert!(matches!(load_index(&paths), Err(RagError::Persistence(_))));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_vectors(b"short").is_err());
        assert!(decode_vectors(&[0u8; HEADER_LEN]).is_err());
    }
}
