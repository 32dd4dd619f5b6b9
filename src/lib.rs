//! citerag - 인용 기반 로컬 RAG 파이프라인
//!
//! Normalizer → Chunker → Embedder → Index Builder → Retriever → Citation Assembler
//!
//! 각 단계는 JSONL 단계 파일과 버전별 인덱스 빌드 디렉토리로 연결됩니다.

pub mod cli;
pub mod collector;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod gemini;
pub mod generation;
pub mod knowledge;

// Re-exports
pub use collector::{CollectedFile, CollectionStats, CollectorConfig, FileCollector, FileType};
pub use embedding::{
    create_embedder, embed_ordered, EmbeddingProvider, GeminiEmbedding, PoolConfig,
};
pub use error::RagError;
pub use extractor::{NormalizeReport, Normalizer, UrlMap};
pub use gemini::{get_api_key, has_api_key};
pub use generation::{AnswerGenerator, GeminiGenerator};
pub use knowledge::{
    build_prompt, get_data_dir, Backend, BuildOptions, Chunk, ChunkConfig, ChunkStrategy,
    CitedContext, Citation, DocumentChunker, IndexBuilder, IndexManifest, IndexSnapshot,
    IndexStore, Metric, QueryResult, Retriever, SharedIndex, SourceRecord,
};
