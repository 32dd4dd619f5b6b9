//! Retriever - 쿼리 → 상위 k개 청크
//!
//! 쿼리를 빌드와 같은 임베딩 프로바이더로 벡터화하고, 스냅샷의 인덱스에서
//! 이웃을 찾아 메타데이터와 결합합니다. "결과 없음" 슬롯은 건너뜁니다.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::embedding::EmbeddingProvider;
use crate::error::RagError;

use super::record::Chunk;
use super::snapshot::IndexSnapshot;
use super::vector::ScoreOrder;

/// 허용되는 최소 k
pub const MIN_TOP_K: usize = 1;
/// 허용되는 최대 k
pub const MAX_TOP_K: usize = 10;
/// CLI 기본 k
pub const DEFAULT_TOP_K: usize = 5;

// ============================================================================
// Types
// ============================================================================

/// 검색 결과 하나
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    /// 1부터 시작하는 순위
    pub rank: usize,
    /// 인덱스 id
    pub id: usize,
    /// 원시 점수 (방향은 `score_order`)
    pub score: f32,
    pub score_order: ScoreOrder,
    pub chunk: Chunk,
}

// ============================================================================
// Retriever
// ============================================================================

/// 스냅샷 + 임베더로 구성된 검색기
pub struct Retriever {
    snapshot: Arc<IndexSnapshot>,
    embedder: Arc<dyn EmbeddingProvider>,
    min_k: usize,
    max_k: usize,
}

impl Retriever {
    pub fn new(snapshot: Arc<IndexSnapshot>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            snapshot,
            embedder,
            min_k: MIN_TOP_K,
            max_k: MAX_TOP_K,
        }
    }

    /// k 허용 범위 변경
    pub fn with_k_bounds(mut self, min_k: usize, max_k: usize) -> Self {
        self.min_k = min_k.max(1);
        self.max_k = max_k.max(self.min_k);
        self
    }

    pub fn snapshot(&self) -> &Arc<IndexSnapshot> {
        &self.snapshot
    }

    /// k 검증 (범위 밖은 보정하지 않고 거부)
    pub fn validate_k(&self, k: usize) -> Result<(), RagError> {
        if k < self.min_k || k > self.max_k {
            return Err(RagError::InvalidTopK {
                k,
                min: self.min_k,
                max: self.max_k,
            });
        }
        Ok(())
    }

    /// 상위 k개 검색 (좋은 순, 최대 k개)
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<QueryResult>> {
        self.validate_k(k)?;
        if query.trim().is_empty() {
            return Err(RagError::EmptyQuery.into());
        }

        let index = self.snapshot.index();
        let mut vector = self
            .embedder
            .embed(query)
            .await
            .context("Failed to embed query")?;

        if vector.len() != index.dimension() {
            return Err(RagError::DimensionMismatch {
                expected: index.dimension(),
                actual: vector.len(),
            }
            .into());
        }

        let metric = index.metric();
        metric.prepare(&mut vector);

        let slots = index.search(&vector, k).await?;
        let score_order = metric.score_order();

        let mut results = Vec::with_capacity(k);
        for neighbor in slots.into_iter().flatten() {
            let Some(chunk) = self.snapshot.chunk(neighbor.id) else {
                tracing::warn!("Index returned id {} with no metadata row", neighbor.id);
                continue;
            };
            results.push(QueryResult {
                rank: results.len() + 1,
                id: neighbor.id,
                score: neighbor.score,
                score_order,
                chunk: chunk.clone(),
            });
            if results.len() == k {
                break;
            }
        }

        tracing::debug!(
            "Query returned {} results (k={}, {})",
            results.len(),
            k,
            score_order.label()
        );
        Ok(results)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::builder::{BuildOptions, IndexBuilder, IndexStore};
    use crate::knowledge::record::{ChunkStrategy, SourceRecord};
    use crate::knowledge::vector::Metric;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// 단어 해시 버킷 임베더 (같은 텍스트 → 같은 벡터)
    struct BagOfWords;

    #[async_trait]
    impl EmbeddingProvider for BagOfWords {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let mut v = vec![0.0; 32];
            for word in text.split_whitespace() {
                let word = word
                    .trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase();
                let bucket = word.bytes().fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize));
                v[bucket % 32] += 1.0;
            }
            Ok(v)
        }

        fn dimension(&self) -> usize {
            32
        }

        fn name(&self) -> &str {
            "bag-of-words"
        }
    }

    const TEXTS: [&str; 4] = [
        "Shipping takes five business days",
        "Our refund policy allows returns within 30 days",
        "Contact support by email",
        "Gift cards never expire",
    ];

    async fn retriever(metric: Metric) -> (TempDir, Retriever) {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path());
        let record = SourceRecord::new("faq.html", "FAQ", TEXTS.join(" "));
        let chunks: Vec<Chunk> = TEXTS
            .iter()
            .enumerate()
            .map(|(i, t)| Chunk::from_record(&record, i, t.to_string(), ChunkStrategy::Sentence))
            .collect();

        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(BagOfWords);
        IndexBuilder::new(
            Arc::clone(&embedder),
            BuildOptions {
                metric,
                ..Default::default()
            },
        )
        .build(&chunks, &store)
        .await
        .unwrap();

        let snapshot = Arc::new(IndexSnapshot::load(&store).await.unwrap());
        (dir, Retriever::new(snapshot, embedder))
    }

    #[tokio::test]
    async fn test_self_retrieval_l2() {
        let (_dir, retriever) = retriever(Metric::L2).await;

        for (i, text) in TEXTS.iter().enumerate() {
            let results = retriever.search(text, TEXTS.len()).await.unwrap();
            assert_eq!(results[0].id, i);
            assert!(results[0].score.abs() < 1e-4);
            assert_eq!(results[0].score_order, ScoreOrder::LowerIsBetter);
        }
    }

    #[tokio::test]
    async fn test_self_retrieval_cosine() {
        let (_dir, retriever) = retriever(Metric::Cosine).await;

        for (i, text) in TEXTS.iter().enumerate() {
            let results = retriever.search(text, TEXTS.len()).await.unwrap();
            assert_eq!(results[0].id, i);
            assert!((results[0].score - 1.0).abs() < 1e-4);
            assert_eq!(results[0].score_order, ScoreOrder::HigherIsBetter);
        }
    }

    #[tokio::test]
    async fn test_refund_policy_ranks_first() {
        let (_dir, retriever) = retriever(Metric::Cosine).await;

        let results = retriever.search("refund policy", 3).await.unwrap();
        assert!(results[0].chunk.text.contains("refund policy"));
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[0].chunk.source, "faq.html");
    }

    #[tokio::test]
    async fn test_k_larger_than_index_skips_empty_slots() {
        let (_dir, retriever) = retriever(Metric::L2).await;

        let results = retriever.search("email", 10).await.unwrap();
        assert_eq!(results.len(), TEXTS.len());
        let ranks: Vec<usize> = results.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4]);

        // 좋은 순 정렬
        for pair in results.windows(2) {
            assert!(pair[0].score <= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_k_out_of_bounds_rejected() {
        let (_dir, retriever) = retriever(Metric::L2).await;

        for k in [0, 11] {
            let err = retriever.search("refund", k).await.unwrap_err();
            assert!(matches!(
                err.downcast_ref::<RagError>(),
                Some(RagError::InvalidTopK { min: 1, max: 10, .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let (_dir, retriever) = retriever(Metric::L2).await;
        let err = retriever.search("   ", 3).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<RagError>(), Some(RagError::EmptyQuery)));
    }

    #[tokio::test]
    async fn test_custom_k_bounds() {
        let (_dir, retriever) = retriever(Metric::L2).await;
        let retriever = retriever.with_k_bounds(1, 2);

        assert!(retriever.validate_k(2).is_ok());
        assert!(retriever.validate_k(3).is_err());
    }
}
