//! Index Builder - 청크 → (벡터 인덱스, 메타데이터 저장소) 한 쌍
//!
//! 빌드마다 새 디렉토리에 기록한 뒤 `CURRENT` 포인터를 원자적으로 교체합니다.
//!
//! ```text
//! <index_root>/
//!   CURRENT                      ← 현재 빌드 디렉토리 이름
//!   builds/<timestamp>-<uuid>/
//!     vectors.idx | vectors.lance/
//!     metadata.db
//!     manifest.json
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::embedding::{embed_ordered, EmbeddingProvider, PoolConfig};
use crate::error::RagError;

use super::flat::FlatIndex;
use super::lance::LanceIndex;
use super::record::Chunk;
use super::store::MetadataStore;
use super::vector::Metric;

pub const CURRENT_FILE: &str = "CURRENT";
pub const BUILDS_DIR: &str = "builds";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const VECTORS_FILE: &str = "vectors.idx";
pub const LANCE_DIR: &str = "vectors.lance";
pub const METADATA_FILE: &str = "metadata.db";

/// 매니페스트 포맷 버전
const MANIFEST_VERSION: u32 = 1;

// ============================================================================
// Types
// ============================================================================

/// 벡터 인덱스 백엔드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// 단일 바이너리 파일, 정확 검색
    #[default]
    Flat,
    /// LanceDB 테이블
    Lance,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Flat => "flat",
            Backend::Lance => "lance",
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "flat" => Ok(Backend::Flat),
            "lance" | "lancedb" => Ok(Backend::Lance),
            other => anyhow::bail!("Unknown backend '{}' (expected flat or lance)", other),
        }
    }
}

/// 빌드 결과 기록 (빌드 디렉토리의 `manifest.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    pub backend: Backend,
    pub metric: Metric,
    pub dimension: usize,
    /// 벡터 수 = 메타데이터 행 수
    pub count: usize,
    /// 서로 다른 원본 파일 수
    pub sources: usize,
    pub embedding_model: String,
    pub created_at: DateTime<Utc>,
    /// flat 백엔드의 `vectors.idx` 체크섬
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vectors_sha256: Option<String>,
}

/// 빌드 옵션
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub metric: Metric,
    pub backend: Backend,
    pub pool: PoolConfig,
}

// ============================================================================
// IndexStore - 빌드 디렉토리와 CURRENT 포인터 관리
// ============================================================================

/// 인덱스 루트 디렉토리
#[derive(Debug, Clone)]
pub struct IndexStore {
    root: PathBuf,
}

impl IndexStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn builds_dir(&self) -> PathBuf {
        self.root.join(BUILDS_DIR)
    }

    /// `CURRENT`가 가리키는 빌드 디렉토리
    pub fn current_build_dir(&self) -> Result<PathBuf> {
        let pointer = self.root.join(CURRENT_FILE);
        let name = std::fs::read_to_string(&pointer)
            .map_err(|e| RagError::unavailable(&pointer, e.to_string()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(RagError::unavailable(&pointer, "CURRENT is empty").into());
        }

        let dir = self.builds_dir().join(name);
        if !dir.is_dir() {
            return Err(RagError::unavailable(&dir, "build directory missing").into());
        }
        Ok(dir)
    }

    /// 새 빌드용 디렉토리 생성
    fn create_build_dir(&self) -> Result<PathBuf> {
        let name = format!(
            "{}-{}",
            Utc::now().format("%Y%m%dT%H%M%S%3f"),
            uuid::Uuid::new_v4().simple()
        );
        let dir = self.builds_dir().join(name);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create build directory {:?}", dir))?;
        Ok(dir)
    }

    /// `CURRENT`를 빌드 디렉토리로 교체 (임시 파일 + rename)
    pub fn publish(&self, build_dir: &Path) -> Result<()> {
        let name = build_dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid build directory {:?}", build_dir))?;

        let tmp = self
            .root
            .join(format!("{}.{}.tmp", CURRENT_FILE, uuid::Uuid::new_v4().simple()));
        std::fs::write(&tmp, format!("{}\n", name))
            .with_context(|| format!("Failed to write {:?}", tmp))?;
        std::fs::rename(&tmp, self.root.join(CURRENT_FILE))
            .context("Failed to swap CURRENT pointer")?;

        tracing::info!("Published build {}", name);
        Ok(())
    }

    /// 빌드 디렉토리의 매니페스트
    pub fn read_manifest(&self, build_dir: &Path) -> Result<IndexManifest> {
        let path = build_dir.join(MANIFEST_FILE);
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| RagError::unavailable(&path, e.to_string()))?;
        let manifest: IndexManifest =
            serde_json::from_str(&raw).map_err(|e| RagError::corrupt(&path, e.to_string()))?;

        if manifest.format_version != MANIFEST_VERSION {
            return Err(RagError::corrupt(
                &path,
                format!("unsupported manifest version {}", manifest.format_version),
            )
            .into());
        }
        Ok(manifest)
    }

    /// 현재 빌드를 제외한 오래된 빌드 삭제 (최신 `keep`개 유지)
    pub fn prune(&self, keep: usize) -> Result<usize> {
        let builds = self.builds_dir();
        if !builds.exists() {
            return Ok(0);
        }

        let current = self.current_build_dir().ok();
        let mut found: Vec<PathBuf> = std::fs::read_dir(&builds)
            .context("Failed to list builds")?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        // 이름이 타임스탬프로 시작하므로 이름순 = 생성순
        found.sort();

        let mut removed = 0;
        let excess = found.len().saturating_sub(keep);
        for dir in found.into_iter().take(excess) {
            if current.as_deref() == Some(dir.as_path()) {
                continue;
            }
            std::fs::remove_dir_all(&dir)
                .with_context(|| format!("Failed to remove old build {:?}", dir))?;
            tracing::debug!("Removed old build {:?}", dir);
            removed += 1;
        }
        Ok(removed)
    }

    /// 인덱스 루트 전체 디스크 사용량 (bytes)
    pub fn disk_usage(&self) -> u64 {
        WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter_map(|e| e.metadata().ok())
            .filter(|m| m.is_file())
            .map(|m| m.len())
            .sum()
    }
}

// ============================================================================
// IndexBuilder
// ============================================================================

/// 인덱스 빌더
pub struct IndexBuilder {
    embedder: Arc<dyn EmbeddingProvider>,
    options: BuildOptions,
}

impl IndexBuilder {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, options: BuildOptions) -> Self {
        Self { embedder, options }
    }

    /// 청크를 임베딩해 새 빌드를 만들고 게시
    ///
    /// 어느 단계에서든 실패하면 빌드 디렉토리를 지우고 `CURRENT`는 그대로 둡니다.
    pub async fn build(&self, chunks: &[Chunk], store: &IndexStore) -> Result<IndexManifest> {
        if chunks.is_empty() {
            return Err(RagError::EmptyIndex.into());
        }

        tracing::info!(
            "Embedding {} chunks with {} (concurrency={})",
            chunks.len(),
            self.embedder.name(),
            self.options.pool.concurrency
        );

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_ordered(self.embedder.as_ref(), &texts, &self.options.pool).await?;

        let mut index = FlatIndex::new(self.options.metric);
        for (i, vector) in vectors.into_iter().enumerate() {
            let id = index
                .add(vector)
                .with_context(|| format!("Rejected embedding for chunk {}", i))?;
            debug_assert_eq!(id, i);
        }

        let expected = self.embedder.dimension();
        if index.dimension() != expected {
            return Err(RagError::DimensionMismatch {
                expected,
                actual: index.dimension(),
            }
            .into());
        }

        let build_dir = store.create_build_dir()?;
        match self.write_build(&build_dir, &index, chunks).await {
            Ok(manifest) => {
                store.publish(&build_dir)?;
                tracing::info!(
                    "Index built: {} vectors (dim={}, metric={}, backend={})",
                    manifest.count,
                    manifest.dimension,
                    manifest.metric.as_str(),
                    manifest.backend.as_str()
                );
                Ok(manifest)
            }
            Err(e) => {
                if let Err(cleanup) = std::fs::remove_dir_all(&build_dir) {
                    tracing::warn!("Failed to clean up {:?}: {}", build_dir, cleanup);
                }
                Err(e)
            }
        }
    }

    /// 빌드 디렉토리에 아티팩트 기록
    async fn write_build(
        &self,
        build_dir: &Path,
        index: &FlatIndex,
        chunks: &[Chunk],
    ) -> Result<IndexManifest> {
        let vectors_sha256 = match self.options.backend {
            Backend::Flat => Some(index.save(&build_dir.join(VECTORS_FILE))?),
            Backend::Lance => {
                LanceIndex::create(&build_dir.join(LANCE_DIR), index).await?;
                None
            }
        };

        let metadata = MetadataStore::create(&build_dir.join(METADATA_FILE))?;
        metadata.insert_all(chunks)?;

        let sources: HashSet<&str> = chunks.iter().map(|c| c.source.as_str()).collect();
        let manifest = IndexManifest {
            format_version: MANIFEST_VERSION,
            backend: self.options.backend,
            metric: self.options.metric,
            dimension: index.dimension(),
            count: index.len(),
            sources: sources.len(),
            embedding_model: self.embedder.name().to_string(),
            created_at: Utc::now(),
            vectors_sha256,
        };

        let json = serde_json::to_string_pretty(&manifest).context("Failed to serialize manifest")?;
        std::fs::write(build_dir.join(MANIFEST_FILE), json).context("Failed to write manifest")?;

        Ok(manifest)
    }
}

// ============================================================================
// Tests
// ============================================================================
