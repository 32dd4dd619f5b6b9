//! Index Snapshot - 게시된 빌드 하나를 메모리에 올린 읽기 전용 뷰
//!
//! 검색은 `Arc<IndexSnapshot>`만 읽으므로 잠금이 필요 없습니다.
//! `SharedIndex`는 프로세스 단위 보관소로, 첫 사용 시 로드하고
//! `reload()`로 최신 빌드로 교체합니다. 이미 나눠준 스냅샷은 계속 유효합니다.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::RwLock;

use crate::error::RagError;

use super::builder::{Backend, IndexManifest, IndexStore, LANCE_DIR, METADATA_FILE, VECTORS_FILE};
use super::flat::FlatIndex;
use super::lance::LanceIndex;
use super::record::Chunk;
use super::store::MetadataStore;
use super::vector::VectorIndex;

// ============================================================================
// IndexSnapshot
// ============================================================================

/// 벡터 인덱스 + 메타데이터 (id로 정확히 대응)
pub struct IndexSnapshot {
    build_dir: PathBuf,
    manifest: IndexManifest,
    index: Box<dyn VectorIndex>,
    chunks: Vec<Chunk>,
}

impl IndexSnapshot {
    /// `CURRENT`가 가리키는 빌드 로드
    pub async fn load(store: &IndexStore) -> Result<Self> {
        let build_dir = store.current_build_dir()?;
        Self::load_dir(store, &build_dir).await
    }

    /// 특정 빌드 디렉토리 로드
    ///
    /// 벡터 수, 메타데이터 행 수, 매니페스트 개수가 모두 같아야 합니다.
    pub async fn load_dir(store: &IndexStore, build_dir: &Path) -> Result<Self> {
        let manifest = store.read_manifest(build_dir)?;

        let index: Box<dyn VectorIndex> = match manifest.backend {
            Backend::Flat => Box::new(FlatIndex::load(
                &build_dir.join(VECTORS_FILE),
                manifest.vectors_sha256.as_deref(),
            )?),
            Backend::Lance => Box::new(
                LanceIndex::open(&build_dir.join(LANCE_DIR), manifest.metric, manifest.dimension)
                    .await?,
            ),
        };

        let chunks = MetadataStore::open(&build_dir.join(METADATA_FILE))?.load_all()?;
        let vector_count = index.count().await?;

        if vector_count != chunks.len() || vector_count != manifest.count {
            return Err(RagError::corrupt(
                build_dir,
                format!(
                    "vector count {} / metadata rows {} / manifest count {} disagree",
                    vector_count,
                    chunks.len(),
                    manifest.count
                ),
            )
            .into());
        }
        if index.metric() != manifest.metric || index.dimension() != manifest.dimension {
            return Err(RagError::corrupt(
                build_dir,
                format!(
                    "artifact is {} / dim {}, manifest says {} / dim {}",
                    index.metric().as_str(),
                    index.dimension(),
                    manifest.metric.as_str(),
                    manifest.dimension
                ),
            )
            .into());
        }

        tracing::info!(
            "Loaded index snapshot {:?} ({} chunks, {}, {})",
            build_dir.file_name().unwrap_or_default(),
            chunks.len(),
            manifest.metric.as_str(),
            manifest.backend.as_str()
        );

        Ok(Self {
            build_dir: build_dir.to_path_buf(),
            manifest,
            index,
            chunks,
        })
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn index(&self) -> &dyn VectorIndex {
        self.index.as_ref()
    }

    /// id(벡터 위치)로 청크 조회
    pub fn chunk(&self, id: usize) -> Option<&Chunk> {
        self.chunks.get(id)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

// ============================================================================
// SharedIndex
// ============================================================================

/// 프로세스 단위 스냅샷 보관소
pub struct SharedIndex {
    store: IndexStore,
    current: RwLock<Option<Arc<IndexSnapshot>>>,
}

impl SharedIndex {
    pub fn new(store: IndexStore) -> Self {
        Self {
            store,
            current: RwLock::new(None),
        }
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// 현재 스냅샷 (처음 호출 시 로드)
    pub async fn get(&self) -> Result<Arc<IndexSnapshot>> {
        if let Some(snapshot) = self.current.read().await.as_ref() {
            return Ok(Arc::clone(snapshot));
        }

        let mut slot = self.current.write().await;
        // 대기 중 다른 태스크가 먼저 로드했을 수 있음
        if let Some(snapshot) = slot.as_ref() {
            return Ok(Arc::clone(snapshot));
        }

        let snapshot = Arc::new(IndexSnapshot::load(&self.store).await?);
        *slot = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// `CURRENT`를 다시 읽어 교체
    ///
    /// 로드에 실패하면 기존 스냅샷을 그대로 둡니다.
    pub async fn reload(&self) -> Result<Arc<IndexSnapshot>> {
        let snapshot = Arc::new(IndexSnapshot::load(&self.store).await?);
        *self.current.write().await = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }
}

// ============================================================================
// Tests
// ============================================================================
