//! Vector Index - 벡터 검색 트레이트 및 유틸리티
//!
//! 인덱스 백엔드(flat 바이너리, LanceDB)가 공유하는 인터페이스와
//! 거리/유사도 계산 함수를 제공합니다.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ============================================================================
// Types
// ============================================================================

/// 유사도 측정 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// 제곱 유클리드 거리 (낮을수록 가까움)
    #[default]
    L2,
    /// 코사인 유사도 = 정규화된 벡터의 내적 (높을수록 가까움)
    ///
    /// 저장 벡터는 빌드 시, 쿼리 벡터는 쿼리 시 정규화합니다.
    Cosine,
}

impl Metric {
    pub fn score_order(&self) -> ScoreOrder {
        match self {
            Metric::L2 => ScoreOrder::LowerIsBetter,
            Metric::Cosine => ScoreOrder::HigherIsBetter,
        }
    }

    /// 벡터 하나를 인덱스 공간으로 변환 (코사인이면 L2 정규화)
    pub fn prepare(&self, vector: &mut [f32]) {
        if *self == Metric::Cosine {
            l2_normalize(vector);
        }
    }

    /// 인덱스 공간의 두 벡터 점수
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::L2 => squared_l2(a, b),
            Metric::Cosine => dot(a, b),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::L2 => "l2",
            Metric::Cosine => "cosine",
        }
    }

    pub(crate) fn tag(&self) -> u8 {
        match self {
            Metric::L2 => 0,
            Metric::Cosine => 1,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Metric::L2),
            1 => Some(Metric::Cosine),
            _ => None,
        }
    }
}

impl std::str::FromStr for Metric {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "l2" => Ok(Metric::L2),
            "cosine" | "cos" => Ok(Metric::Cosine),
            other => anyhow::bail!("Unknown metric '{}' (expected l2 or cosine)", other),
        }
    }
}

/// 점수 방향 - 호출자가 추측하지 않도록 결과에 함께 실림
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreOrder {
    LowerIsBetter,
    HigherIsBetter,
}

impl ScoreOrder {
    /// `a`가 `b`보다 좋은 점수인지
    pub fn is_better(&self, a: f32, b: f32) -> bool {
        match self {
            ScoreOrder::LowerIsBetter => a < b,
            ScoreOrder::HigherIsBetter => a > b,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ScoreOrder::LowerIsBetter => "distance (lower is better)",
            ScoreOrder::HigherIsBetter => "similarity (higher is better)",
        }
    }
}

/// 검색으로 찾은 이웃 (id = 삽입 순서)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: usize,
    pub score: f32,
}

// ============================================================================
// VectorIndex Trait
// ============================================================================

/// 읽기 전용 벡터 인덱스
///
/// `search`는 항상 `k`개의 슬롯을 반환합니다. 채울 수 없는 슬롯은
/// `None`("결과 없음")이며, 호출자는 이를 건너뛰어야 합니다.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// 측정 방식
    fn metric(&self) -> Metric;

    /// 벡터 차원
    fn dimension(&self) -> usize;

    /// 저장된 벡터 수
    async fn count(&self) -> Result<usize>;

    /// 최근접 이웃 검색 (쿼리는 이미 `metric.prepare` 적용된 상태)
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<Option<Neighbor>>>;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산 (-1.0 ~ 1.0)
///
/// 길이가 다르거나 영벡터가 포함되면 0.0을 반환합니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product = dot(a, b);
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// 내적
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// 제곱 유클리드 거리
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// 제자리 L2 정규화 (영벡터는 그대로)
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
}

/// 단어 단위 고정 윈도우 분할
///
/// `chunk_size`개 단어씩, 인접 윈도우는 `overlap`개 단어를 공유합니다.
/// `overlap >= chunk_size`면 진행하지 않으므로 오버랩 없이 자릅니다.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();

    if words.is_empty() || chunk_size == 0 {
        return vec![];
    }

    if words.len() <= chunk_size {
        return vec![words.join(" ")];
    }

    let step = if overlap < chunk_size {
        chunk_size - overlap
    } else {
        chunk_size
    };

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < words.len() {
        let end = (start + chunk_size).min(words.len());
        chunks.push(words[start..end].join(" "));

        if end >= words.len() {
            break;
        }

        start += step;
    }

    chunks
}

// ============================================================================
// Tests
// ============================================================================
