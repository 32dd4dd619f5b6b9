//! Text Chunking Module
//!
//! 정규화 레코드를 검색 단위 청크로 나눕니다. 전략은 레코드마다
//! `ChunkStrategy` 하나로 결정되고 `chunk_record`에서만 분기합니다.
//!
//! - `TableWhole`: 표는 절대 나누지 않음 (행/열 일관성 보존)
//! - `Sentence`: 문장 경계 고정 윈도우 + 문장 단위 오버랩 (PDF 등 페이지 구분 콘텐츠)
//! - `Semantic`: 다음 문장이 현재 청크의 대표 임베딩과 충분히 다르면 경계
//!
//! 크기 단위는 공백으로 구분된 단어입니다.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;

use crate::embedding::{embed_ordered, EmbeddingProvider, PoolConfig};
use crate::error::RagError;

use super::record::{Chunk, ChunkStrategy, SourceRecord};
use super::vector::{chunk_text, cosine_similarity};

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// 청크 최대 크기 (단어 수)
    pub chunk_size: usize,
    /// 인접 윈도우가 공유하는 최대 단어 수 (Sentence 전략)
    pub chunk_overlap: usize,
    /// 의미 경계 임계값 (1 - 코사인 유사도)
    pub semantic_threshold: f32,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            chunk_overlap: 200,
            semantic_threshold: 0.45,
        }
    }
}

impl ChunkConfig {
    /// 설정 검증
    pub fn validate(&self) -> Result<(), RagError> {
        if self.chunk_size == 0 {
            return Err(RagError::InvalidChunkConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::InvalidChunkConfig(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if !(self.semantic_threshold > 0.0 && self.semantic_threshold <= 2.0) {
            return Err(RagError::InvalidChunkConfig(format!(
                "semantic_threshold ({}) must be in (0, 2]",
                self.semantic_threshold
            )));
        }
        Ok(())
    }
}

// ============================================================================
// DocumentChunker
// ============================================================================

/// 레코드 → 청크 변환기
pub struct DocumentChunker {
    config: ChunkConfig,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    pool: PoolConfig,
}

impl DocumentChunker {
    /// 설정으로 생성 (임베더 없음 → Semantic 대신 Sentence 사용)
    pub fn new(config: ChunkConfig) -> Result<Self, RagError> {
        config.validate()?;
        Ok(Self {
            config,
            embedder: None,
            pool: PoolConfig::default(),
        })
    }

    /// 기본 설정으로 생성
    pub fn with_defaults() -> Self {
        Self {
            config: ChunkConfig::default(),
            embedder: None,
            pool: PoolConfig::default(),
        }
    }

    /// 의미 경계 분할용 임베더 지정
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>, pool: PoolConfig) -> Self {
        self.embedder = Some(embedder);
        self.pool = pool;
        self
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// 레코드에 적용할 전략 선택
    pub fn select_strategy(&self, record: &SourceRecord) -> ChunkStrategy {
        if record.is_table() {
            ChunkStrategy::TableWhole
        } else if record.is_page_delimited() || self.embedder.is_none() {
            ChunkStrategy::Sentence
        } else {
            ChunkStrategy::Semantic
        }
    }

    /// 레코드 하나를 청크로 분할
    ///
    /// 빈 레코드는 청크 0개. 의미 분할이 실패하면 이 레코드만 Sentence로 대체합니다.
    pub async fn chunk_record(&self, record: &SourceRecord) -> Vec<Chunk> {
        if record.text.trim().is_empty() {
            return vec![];
        }

        let (strategy, pieces) = match self.select_strategy(record) {
            ChunkStrategy::TableWhole => (ChunkStrategy::TableWhole, vec![record.text.clone()]),
            ChunkStrategy::Sentence => (ChunkStrategy::Sentence, self.sentence_windows(&record.text)),
            ChunkStrategy::Semantic => match self.semantic_split(&record.text).await {
                Ok(pieces) => (ChunkStrategy::Semantic, pieces),
                Err(e) => {
                    tracing::warn!(
                        "Semantic chunking failed for {} ({}), falling back to sentence windows: {:#}",
                        record.source,
                        record.id,
                        e
                    );
                    (ChunkStrategy::Sentence, self.sentence_windows(&record.text))
                }
            },
        };

        pieces
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .enumerate()
            .map(|(i, text)| Chunk::from_record(record, i, text, strategy))
            .collect()
    }

    /// 레코드 전체 분할 (입력 순서 유지)
    pub async fn chunk_records(&self, records: &[SourceRecord]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut by_strategy: HashMap<ChunkStrategy, usize> = HashMap::new();
        let mut empty = 0usize;

        for record in records {
            let record_chunks = self.chunk_record(record).await;
            if record_chunks.is_empty() {
                empty += 1;
            }
            for chunk in &record_chunks {
                *by_strategy.entry(chunk.strategy).or_insert(0) += 1;
            }
            chunks.extend(record_chunks);
        }

        tracing::info!(
            "Chunked {} records into {} chunks (sentence={}, semantic={}, table_whole={}, empty records={})",
            records.len(),
            chunks.len(),
            by_strategy.get(&ChunkStrategy::Sentence).unwrap_or(&0),
            by_strategy.get(&ChunkStrategy::Semantic).unwrap_or(&0),
            by_strategy.get(&ChunkStrategy::TableWhole).unwrap_or(&0),
            empty
        );

        chunks
    }

    /// 문장 경계 고정 윈도우
    ///
    /// 윈도우를 비울 때 뒤쪽 문장 중 합계 `chunk_overlap` 단어 이하만
    /// 다음 윈도우로 넘깁니다. 윈도우보다 긴 문장 하나는 단어 윈도우로 자릅니다.
    fn sentence_windows(&self, text: &str) -> Vec<String> {
        let size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;

        let sentences = split_sentences(text);
        let counts: Vec<usize> = sentences.iter().map(|s| word_count(s)).collect();

        let mut windows = Vec::new();
        // 현재 윈도우의 문장 인덱스, 앞쪽 `carried`개는 이전 윈도우에서 넘어온 오버랩
        let mut window: Vec<usize> = Vec::new();
        let mut carried = 0usize;
        let mut words = 0usize;

        for (i, &count) in counts.iter().enumerate() {
            if count > size {
                if window.len() > carried {
                    windows.push(join_sentences(&sentences, &window));
                }
                windows.extend(chunk_text(sentences[i], size, overlap));
                window.clear();
                carried = 0;
                words = 0;
                continue;
            }

            while words + count > size && !window.is_empty() {
                if window.len() > carried {
                    windows.push(join_sentences(&sentences, &window));

                    let (keep, kept_words) = overlap_tail(&window, &counts, overlap);
                    window.drain(..window.len() - keep);
                    carried = keep;
                    words = kept_words;
                } else {
                    // 오버랩만으로 자리가 없으면 앞에서부터 버림
                    let dropped = window.remove(0);
                    words -= counts[dropped];
                    carried -= 1;
                }
            }

            window.push(i);
            words += count;
        }

        if window.len() > carried {
            windows.push(join_sentences(&sentences, &window));
        }

        windows
    }

    /// 의미 경계 분할
    async fn semantic_split(&self, text: &str) -> Result<Vec<String>> {
        let embedder = self
            .embedder
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No embedder configured for semantic chunking"))?;

        let sentences = split_sentences(text);
        let owned: Vec<String> = sentences.iter().map(|s| s.to_string()).collect();
        let embeddings = embed_ordered(embedder, &owned, &self.pool).await?;

        let size = self.config.chunk_size;
        let threshold = self.config.semantic_threshold;

        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut words = 0usize;
        // 현재 청크의 대표 임베딩 (문장 임베딩의 평균)
        let mut centroid: Vec<f32> = Vec::new();

        for (sentence, embedding) in sentences.iter().zip(embeddings.iter()) {
            let count = word_count(sentence);

            if count > size {
                if !current.is_empty() {
                    chunks.push(current.join(" "));
                }
                chunks.extend(chunk_text(sentence, size, 0));
                current.clear();
                centroid.clear();
                words = 0;
                continue;
            }

            if !current.is_empty() {
                let dissimilarity = 1.0 - cosine_similarity(embedding, &centroid);
                if words + count > size || dissimilarity > threshold {
                    tracing::trace!(
                        "Semantic boundary (words={}, dissimilarity={:.3})",
                        words + count,
                        dissimilarity
                    );
                    chunks.push(current.join(" "));
                    current.clear();
                    centroid.clear();
                    words = 0;
                }
            }

            update_centroid(&mut centroid, embedding, current.len());
            current.push(sentence);
            words += count;
        }

        if !current.is_empty() {
            chunks.push(current.join(" "));
        }

        Ok(chunks)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 단어 수
fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn join_sentences(sentences: &[&str], indices: &[usize]) -> String {
    indices
        .iter()
        .map(|&i| sentences[i])
        .collect::<Vec<_>>()
        .join(" ")
}

/// 윈도우 끝에서 `overlap` 단어 이하로 넘길 문장 수와 단어 수
fn overlap_tail(window: &[usize], counts: &[usize], overlap: usize) -> (usize, usize) {
    let mut keep = 0;
    let mut kept_words = 0;
    for &j in window.iter().rev() {
        if kept_words + counts[j] > overlap {
            break;
        }
        kept_words += counts[j];
        keep += 1;
    }
    (keep, kept_words)
}

/// 평균 임베딩 갱신 (`members` = 기존 문장 수)
fn update_centroid(centroid: &mut Vec<f32>, embedding: &[f32], members: usize) {
    if members == 0 || centroid.len() != embedding.len() {
        centroid.clear();
        centroid.extend_from_slice(embedding);
        return;
    }
    let n = members as f32;
    for (c, e) in centroid.iter_mut().zip(embedding) {
        *c = (*c * n + e) / (n + 1.0);
    }
}

/// 문장 분리
///
/// 경계: `.`/`!`/`?`/`。` 뒤에 공백이 오고 다음 단어가 ASCII 소문자로
/// 시작하지 않을 때(약어 보호), 또는 빈 줄(문단 경계).
pub(crate) fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for (i, c) in text.char_indices() {
        let end = i + c.len_utf8();
        let rest = &text[end..];

        let is_boundary = match c {
            '.' | '!' | '?' | '。' => {
                let trimmed = rest.trim_start();
                rest.is_empty()
                    || (trimmed.len() < rest.len()
                        && !trimmed.starts_with(|ch: char| ch.is_ascii_lowercase()))
            }
            '\n' => rest.trim_start_matches([' ', '\t', '\r']).starts_with('\n'),
            _ => false,
        };

        if is_boundary {
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }

    sentences
}

// ============================================================================
// Tests
// ============================================================================
