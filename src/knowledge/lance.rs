//! LanceDB Vector Index - 대용량용 대체 백엔드
//!
//! flat 인덱스와 같은 id(삽입 순서)를 `id` 컬럼으로 보존하므로
//! 메타데이터 저장소와의 대응 관계가 그대로 유지됩니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::DistanceType;

use crate::error::RagError;

use super::flat::FlatIndex;
use super::vector::{Metric, Neighbor, VectorIndex};

/// 벡터 테이블 이름
const TABLE_NAME: &str = "vectors";

// ============================================================================
// LanceIndex
// ============================================================================

/// LanceDB 기반 벡터 인덱스
///
/// 저장되는 벡터는 flat 인덱스와 동일하게 `metric.prepare`가 적용된 값입니다.
pub struct LanceIndex {
    #[allow(dead_code)]
    db: Connection,
    table: lancedb::table::Table,
    metric: Metric,
    dimension: usize,
}

impl LanceIndex {
    /// flat 인덱스의 벡터를 그대로 옮겨 새 테이블 생성
    pub async fn create(path: &Path, source: &FlatIndex) -> Result<Self> {
        if source.is_empty() {
            return Err(RagError::EmptyIndex.into());
        }

        let db = Self::connect(path).await?;
        let dimension = source.dimension();
        let batch = Self::index_to_batch(source)?;
        let schema = batch.schema();

        // RecordBatchIterator로 감싸서 전달
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        let table = db
            .create_table(TABLE_NAME, batches)
            .execute()
            .await
            .context("Failed to create table")?;

        tracing::debug!("Created LanceDB table with {} vectors at {:?}", source.len(), path);

        Ok(Self {
            db,
            table,
            metric: source.metric(),
            dimension,
        })
    }

    /// 기존 테이블 열기
    pub async fn open(path: &Path, metric: Metric, dimension: usize) -> Result<Self> {
        if !path.exists() {
            return Err(RagError::unavailable(path, "LanceDB directory missing").into());
        }

        let db = Self::connect(path).await?;
        let names = db
            .table_names()
            .execute()
            .await
            .context("Failed to list LanceDB tables")?;
        if !names.iter().any(|n| n == TABLE_NAME) {
            return Err(RagError::unavailable(path, "vectors table missing").into());
        }

        let table = db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open existing table")?;

        Ok(Self {
            db,
            table,
            metric,
            dimension,
        })
    }

    async fn connect(path: &Path) -> Result<Connection> {
        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")
    }

    /// 벡터 테이블 스키마 생성
    fn create_schema(dimension: usize) -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension as i32,
                ),
                false,
            ),
        ])
    }

    /// 인덱스 전체를 Arrow RecordBatch로 변환
    fn index_to_batch(source: &FlatIndex) -> Result<RecordBatch> {
        let dimension = source.dimension();
        let ids: Vec<i64> = (0..source.len() as i64).collect();

        let flat: Vec<f32> = (0..source.len())
            .filter_map(|id| source.vector(id))
            .flat_map(|v| v.iter().copied())
            .collect();

        let values = Float32Array::from(flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let vectors = FixedSizeListArray::try_new(
            field,
            dimension as i32,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create vector array")?;

        RecordBatch::try_new(
            Arc::new(Self::create_schema(dimension)),
            vec![Arc::new(Int64Array::from(ids)), Arc::new(vectors)],
        )
        .context("Failed to create RecordBatch")
    }

    fn distance_type(&self) -> DistanceType {
        match self.metric {
            Metric::L2 => DistanceType::L2,
            Metric::Cosine => DistanceType::Cosine,
        }
    }

    /// LanceDB `_distance` → 점수
    ///
    /// L2는 제곱 거리 그대로, 코사인은 `1 - distance` = 유사도.
    fn to_score(&self, distance: f32) -> f32 {
        match self.metric {
            Metric::L2 => distance,
            Metric::Cosine => 1.0 - distance,
        }
    }
}

#[async_trait]
impl VectorIndex for LanceIndex {
    fn metric(&self) -> Metric {
        self.metric
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn count(&self) -> Result<usize> {
        self.table
            .count_rows(None)
            .await
            .context("Failed to count rows")
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<Option<Neighbor>>> {
        if query.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            }
            .into());
        }

        let results = self
            .table
            .vector_search(query.to_vec())
            .context("Failed to create vector search")?
            .distance_type(self.distance_type())
            .limit(k)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        // RecordBatch 스트림에서 결과 추출
        let batches: Vec<RecordBatch> = results.try_collect().await?;

        let mut neighbors = Vec::new();
        for batch in batches {
            let ids = batch
                .column_by_name("id")
                .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing id column"))?;

            // _distance 컬럼 (LanceDB가 자동 추가)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

            for i in 0..batch.num_rows() {
                let id = ids.value(i);
                if id < 0 {
                    continue;
                }
                neighbors.push(Neighbor {
                    id: id as usize,
                    score: self.to_score(distances.value(i)),
                });
            }
        }

        let order = self.metric.score_order();
        neighbors.sort_by(|a, b| {
            if order.is_better(a.score, b.score) {
                std::cmp::Ordering::Less
            } else if order.is_better(b.score, a.score) {
                std::cmp::Ordering::Greater
            } else {
                a.id.cmp(&b.id)
            }
        });

        let mut slots: Vec<Option<Neighbor>> = neighbors.into_iter().take(k).map(Some).collect();
        slots.resize(k, None);
        Ok(slots)
    }
}

// ============================================================================
// Tests
// ============================================================================
