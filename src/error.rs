//! 타입 에러 정의
//!
//! 호출자가 분기해야 하는 실패만 `RagError`로 표현합니다.
//! 그 외의 흐름은 `anyhow::Result` + `.context(..)`를 사용합니다.

use std::path::PathBuf;

/// 파이프라인 에러
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    /// 청킹 설정 오류 (overlap >= chunk_size 등)
    #[error("invalid chunk config: {0}")]
    InvalidChunkConfig(String),

    /// 벡터 차원 불일치
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// 빈 청크 집합으로 인덱스 빌드 시도
    #[error("cannot build an index from zero chunks")]
    EmptyIndex,

    /// 인덱스/메타데이터 아티팩트 없음
    #[error("index unavailable at {path}: {reason}")]
    IndexUnavailable { path: PathBuf, reason: String },

    /// 아티팩트 손상 (체크섬, id 불연속, 개수 불일치)
    #[error("index corrupt at {path}: {reason}")]
    IndexCorrupt { path: PathBuf, reason: String },

    /// top-k 범위 위반
    #[error("k must be between {min} and {max} (got {k})")]
    InvalidTopK { k: usize, min: usize, max: usize },

    /// 빈 쿼리
    #[error("query text is empty")]
    EmptyQuery,

    /// API 키 없음
    #[error(
        "API key not found. Set GEMINI_API_KEY or GOOGLE_AI_API_KEY environment variable.\n\
         Get your API key at: https://aistudio.google.com/app/apikey"
    )]
    MissingApiKey,
}

impl RagError {
    pub(crate) fn unavailable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::IndexUnavailable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::IndexCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = RagError::InvalidTopK { k: 11, min: 1, max: 10 };
        assert_eq!(err.to_string(), "k must be between 1 and 10 (got 11)");

        let err = RagError::DimensionMismatch {
            expected: 768,
            actual: 3,
        };
        assert!(err.to_string().contains("expected 768, got 3"));
    }

    #[test]
    fn test_downcast_from_anyhow() {
        let err: anyhow::Error = RagError::unavailable("/tmp/x", "CURRENT missing").into();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::IndexUnavailable { .. })
        ));
    }
}
