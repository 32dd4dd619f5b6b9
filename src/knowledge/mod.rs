//! Knowledge 모듈 - 청킹, 인덱스 빌드, 검색, 인용
//!
//! - Chunker: 레코드마다 전략(표 통째 / 문장 윈도우 / 의미 경계) 하나
//! - Builder: 벡터 인덱스 + SQLite 메타데이터를 새 빌드 디렉토리에 기록 후 게시
//! - Snapshot: 게시된 빌드를 메모리에 올린 읽기 전용 뷰
//! - Retriever / Citation: top-k 검색과 번호 붙은 컨텍스트

mod builder;
mod chunker;
mod citation;
mod flat;
mod lance;
mod record;
mod retriever;
mod snapshot;
mod store;
mod vector;

// Re-exports
pub use builder::{
    Backend, BuildOptions, IndexBuilder, IndexManifest, IndexStore, BUILDS_DIR, CURRENT_FILE,
    LANCE_DIR, MANIFEST_FILE, METADATA_FILE, VECTORS_FILE,
};
pub use chunker::{ChunkConfig, DocumentChunker};
pub use citation::{build_prompt, CitedContext, Citation};
pub use flat::FlatIndex;
pub use lance::LanceIndex;
pub use record::{
    read_jsonl, write_jsonl, Chunk, ChunkStrategy, PageRange, SourceRecord, TableFields,
    TABLE_KIND,
};
pub use retriever::{QueryResult, Retriever, DEFAULT_TOP_K, MAX_TOP_K, MIN_TOP_K};
pub use snapshot::{IndexSnapshot, SharedIndex};
pub use store::{get_data_dir, MetadataStore};
pub use vector::{
    chunk_text, cosine_similarity, l2_normalize, Metric, Neighbor, ScoreOrder, VectorIndex,
};
