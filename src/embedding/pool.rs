//! 제한된 동시성 임베딩 풀
//!
//! 청크별 임베딩 호출은 서로 독립적이므로 동시에 실행하되,
//! 결과는 반드시 제출 순서대로 재조립합니다. 인덱스 id(삽입 순서)와
//! 메타데이터 순서가 어긋나면 안 되기 때문입니다.

use std::time::Duration;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};

use super::EmbeddingProvider;

/// 풀 설정
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// 동시에 진행 가능한 최대 호출 수
    pub concurrency: usize,
    /// 호출 하나당 타임아웃
    pub call_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            call_timeout: Duration::from_secs(60),
        }
    }
}

/// 텍스트 목록을 임베딩 (입력 순서 보존)
///
/// 하나라도 실패하거나 타임아웃되면 해당 인덱스를 포함한 에러로 전체가 실패합니다.
/// 남은 진행 중 호출은 스트림과 함께 취소됩니다.
pub async fn embed_ordered(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    config: &PoolConfig,
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(vec![]);
    }

    let concurrency = config.concurrency.max(1);
    let call_timeout = config.call_timeout;

    let mut completions = stream::iter(texts.iter().enumerate())
        .map(|(i, text)| async move {
            let result = tokio::time::timeout(call_timeout, provider.embed(text)).await;
            (i, result)
        })
        .buffer_unordered(concurrency);

    // 완료 순서와 무관하게 제출 위치에 저장
    let mut slots: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
    let mut done = 0usize;

    while let Some((i, result)) = completions.next().await {
        let vector = match result {
            Ok(inner) => inner.with_context(|| format!("Embedding failed for item {}", i))?,
            Err(_) => anyhow::bail!(
                "Embedding timed out for item {} after {:?}",
                i,
                call_timeout
            ),
        };
        slots[i] = Some(vector);

        done += 1;
        if done % 100 == 0 || done == texts.len() {
            tracing::debug!("Embedded {}/{}", done, texts.len());
        }
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| slot.ok_or_else(|| anyhow::anyhow!("Missing embedding for item {}", i)))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
