//! Flat Vector Index - 정확 검색 + 바이너리 직렬화
//!
//! 벡터를 삽입 순서대로 하나의 연속 버퍼에 저장합니다. 삽입 위치가 곧 id이므로
//! 메타데이터 저장소의 행 번호와 1:1로 대응합니다.
//!
//! 파일 포맷 (little-endian):
//! ```text
//! magic "CRVX" | version u32 | metric u8 | dimension u32 | count u64 | f32 * dimension * count
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::RagError;

use super::vector::{Metric, Neighbor, VectorIndex};

const MAGIC: &[u8; 4] = b"CRVX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 1 + 4 + 8;

// ============================================================================
// FlatIndex
// ============================================================================

/// 메모리 상주 정확 검색 인덱스
#[derive(Debug, Clone)]
pub struct FlatIndex {
    metric: Metric,
    /// 0이면 아직 벡터가 없음 (첫 벡터가 차원을 고정)
    dimension: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            dimension: 0,
            data: Vec::new(),
        }
    }

    /// 벡터 추가 후 id 반환
    ///
    /// 코사인 인덱스면 저장 전에 정규화합니다.
    pub fn add(&mut self, mut vector: Vec<f32>) -> Result<usize, RagError> {
        if vector.is_empty() {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: 0,
            });
        }
        if self.dimension == 0 {
            self.dimension = vector.len();
        } else if vector.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        self.metric.prepare(&mut vector);
        let id = self.len();
        self.data.extend_from_slice(&vector);
        Ok(id)
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// 벡터 차원 (비어 있으면 0)
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 저장된 (변환 후) 벡터
    pub fn vector(&self, id: usize) -> Option<&[f32]> {
        if id >= self.len() {
            return None;
        }
        let start = id * self.dimension;
        Some(&self.data[start..start + self.dimension])
    }

    /// 전수 비교 검색
    ///
    /// 점수가 같으면 id가 작은 쪽이 앞. 결과는 항상 `k`개 슬롯이고
    /// 벡터 수가 부족하면 뒤쪽은 `None`입니다.
    pub fn search_exact(&self, query: &[f32], k: usize) -> Result<Vec<Option<Neighbor>>, RagError> {
        if !self.is_empty() && query.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let order = self.metric.score_order();
        let mut scored: Vec<Neighbor> = (0..self.len())
            .filter_map(|id| {
                self.vector(id).map(|v| Neighbor {
                    id,
                    score: self.metric.score(query, v),
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            if order.is_better(a.score, b.score) {
                std::cmp::Ordering::Less
            } else if order.is_better(b.score, a.score) {
                std::cmp::Ordering::Greater
            } else {
                a.id.cmp(&b.id)
            }
        });

        let mut slots: Vec<Option<Neighbor>> = scored.into_iter().take(k).map(Some).collect();
        slots.resize(k, None);
        Ok(slots)
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    /// 바이너리 인코딩
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.push(self.metric.tag());
        bytes.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        for value in &self.data {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    /// 바이너리 디코딩 (실패 사유는 문자열로)
    fn decode(bytes: &[u8]) -> std::result::Result<Self, String> {
        if bytes.len() < HEADER_LEN {
            return Err(format!("file too short ({} bytes)", bytes.len()));
        }
        if &bytes[0..4] != MAGIC {
            return Err("bad magic".to_string());
        }

        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != FORMAT_VERSION {
            return Err(format!("unsupported format version {}", version));
        }

        let metric =
            Metric::from_tag(bytes[8]).ok_or_else(|| format!("unknown metric tag {}", bytes[8]))?;
        let dimension = u32::from_le_bytes([bytes[9], bytes[10], bytes[11], bytes[12]]) as usize;
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&bytes[13..21]);
        let count = u64::from_le_bytes(count_bytes) as usize;

        let expected_len = dimension
            .checked_mul(count)
            .and_then(|n| n.checked_mul(4))
            .and_then(|n| n.checked_add(HEADER_LEN))
            .ok_or_else(|| "header overflow".to_string())?;
        if bytes.len() != expected_len {
            return Err(format!(
                "expected {} bytes for {} vectors of dimension {}, found {}",
                expected_len,
                count,
                dimension,
                bytes.len()
            ));
        }
        if count > 0 && dimension == 0 {
            return Err("zero dimension with non-empty index".to_string());
        }

        let data = bytes[HEADER_LEN..]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        Ok(Self {
            metric,
            dimension,
            data,
        })
    }

    /// 파일로 저장 후 SHA-256 체크섬(hex) 반환
    pub fn save(&self, path: &Path) -> Result<String> {
        let bytes = self.to_bytes();
        std::fs::write(path, &bytes)
            .with_context(|| format!("Failed to write vector index {:?}", path))?;

        tracing::debug!("Saved {} vectors ({} bytes) to {:?}", self.len(), bytes.len(), path);
        Ok(sha256_hex(&bytes))
    }

    /// 파일에서 로드
    ///
    /// `expected_sha256`가 주어지면 체크섬이 일치해야 합니다.
    pub fn load(path: &Path, expected_sha256: Option<&str>) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| RagError::unavailable(path, e.to_string()))?;

        if let Some(expected) = expected_sha256 {
            let actual = sha256_hex(&bytes);
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(RagError::corrupt(
                    path,
                    format!("checksum mismatch (expected {}, found {})", expected, actual),
                )
                .into());
            }
        }

        let index = Self::decode(&bytes).map_err(|reason| RagError::corrupt(path, reason))?;
        tracing::debug!(
            "Loaded {} vectors (dim={}, metric={}) from {:?}",
            index.len(),
            index.dimension,
            index.metric.as_str(),
            path
        );
        Ok(index)
    }
}

#[async_trait]
impl VectorIndex for FlatIndex {
    fn metric(&self) -> Metric {
        self.metric
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.len())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<Option<Neighbor>>> {
        Ok(self.search_exact(query, k)?)
    }
}

/// SHA-256 hex 문자열
pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn l2_index() -> FlatIndex {
        let mut index = FlatIndex::new(Metric::L2);
        index.add(vec![0.0, 0.0]).unwrap();
        index.add(vec![1.0, 0.0]).unwrap();
        index.add(vec![5.0, 5.0]).unwrap();
        index
    }

    #[test]
    fn test_ids_follow_insertion_order() {
        let mut index = FlatIndex::new(Metric::L2);
        assert_eq!(index.add(vec![1.0, 2.0]).unwrap(), 0);
        assert_eq!(index.add(vec![3.0, 4.0]).unwrap(), 1);
        assert_eq!(index.len(), 2);
        assert_eq!(index.vector(1), Some(&[3.0, 4.0][..]));
        assert_eq!(index.vector(2), None);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut index = FlatIndex::new(Metric::L2);
        index.add(vec![1.0, 2.0]).unwrap();

        let err = index.add(vec![1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_l2_search_nearest_first() {
        let index = l2_index();
        let results = index.search_exact(&[0.9, 0.0], 2).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].unwrap().id, 1);
        assert_eq!(results[1].unwrap().id, 0);
        assert!(results[0].unwrap().score <= results[1].unwrap().score);
    }

    #[test]
    fn test_cosine_search_self_is_best() {
        let mut index = FlatIndex::new(Metric::Cosine);
        index.add(vec![3.0, 4.0]).unwrap();
        index.add(vec![-1.0, 0.2]).unwrap();

        let mut query = vec![6.0, 8.0];
        Metric::Cosine.prepare(&mut query);
        let results = index.search_exact(&query, 2).unwrap();

        let best = results[0].unwrap();
        assert_eq!(best.id, 0);
        assert!((best.score - 1.0).abs() < 1e-5);
        assert!(results[1].unwrap().score < best.score);
    }

    #[test]
    fn test_ties_prefer_lower_id() {
        let mut index = FlatIndex::new(Metric::L2);
        index.add(vec![1.0]).unwrap();
        index.add(vec![-1.0]).unwrap();

        let results = index.search_exact(&[0.0], 2).unwrap();
        assert_eq!(results[0].unwrap().id, 0);
        assert_eq!(results[1].unwrap().id, 1);
    }

    #[test]
    fn test_k_larger_than_count_pads_with_none() {
        let index = l2_index();
        let results = index.search_exact(&[0.0, 0.0], 5).unwrap();

        assert_eq!(results.len(), 5);
        assert_eq!(results.iter().filter(|r| r.is_some()).count(), 3);
        assert!(results[3].is_none() && results[4].is_none());
    }

    #[test]
    fn test_query_dimension_checked() {
        let index = l2_index();
        assert!(matches!(
            index.search_exact(&[1.0, 2.0, 3.0], 1),
            Err(RagError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vectors.idx");

        let index = l2_index();
        let checksum = index.save(&path).unwrap();
        assert_eq!(checksum.len(), 64);

        let loaded = FlatIndex::load(&path, Some(&checksum)).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.dimension(), 2);
        assert_eq!(loaded.metric(), Metric::L2);
        assert_eq!(loaded.vector(2), index.vector(2));
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vectors.idx");

        let bytes = l2_index().to_bytes();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

        let err = FlatIndex::load(&path, None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::IndexCorrupt { .. })
        ));
    }

    #[test]
    fn test_checksum_mismatch_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vectors.idx");
        l2_index().save(&path).unwrap();

        let err = FlatIndex::load(&path, Some("deadbeef")).unwrap_err();
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn test_missing_file_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let err = FlatIndex::load(&dir.path().join("nope.idx"), None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::IndexUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_trait_object_search() {
        let index: Box<dyn VectorIndex> = Box::new(l2_index());
        assert_eq!(index.count().await.unwrap(), 3);
        let results = index.search(&[5.0, 5.0], 1).await.unwrap();
        assert_eq!(results[0].unwrap().id, 2);
    }
}
