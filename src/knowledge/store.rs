//! Metadata Store - rusqlite 기반 청크 메타데이터 저장소
//!
//! 벡터 인덱스와 병렬로 존재하며, 행 id가 벡터 id(삽입 순서)와 정확히 같습니다.
//! 빌드 시 한 트랜잭션으로 기록되고, 로드 시 id가 0..N-1로 연속인지 검증합니다.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OpenFlags, Row};

use crate::error::RagError;

use super::record::{Chunk, ChunkStrategy, PageRange, TableFields};

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로
///
/// `CITERAG_HOME`이 설정되어 있으면 그 경로, 아니면 `<로컬 데이터>/.citerag/`.
pub fn get_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("CITERAG_HOME") {
        if !home.trim().is_empty() {
            return PathBuf::from(home);
        }
    }

    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".citerag")
}

// ============================================================================
// MetadataStore
// ============================================================================

const SELECT_COLUMNS: &str = "id, parent_id, chunk_id, text, strategy, source, source_url, title, \
     page, paragraph_id, content_type, table_index, section, pages";

/// 청크 메타데이터 저장소
pub struct MetadataStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl MetadataStore {
    /// 새 저장소 생성 (빌드용)
    pub fn create(path: &Path) -> Result<Self> {
        // 부모 디렉토리 생성
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// 기존 저장소를 읽기 전용으로 열기
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RagError::unavailable(path, "metadata store missing").into());
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| RagError::unavailable(path, e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        })
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY,
                parent_id TEXT NOT NULL,
                chunk_id INTEGER NOT NULL,
                text TEXT NOT NULL,
                strategy TEXT NOT NULL,
                source TEXT NOT NULL,
                source_url TEXT,
                title TEXT NOT NULL,
                page INTEGER,
                paragraph_id INTEGER,
                content_type TEXT,
                table_index INTEGER,
                section TEXT,
                pages TEXT
            )",
            [],
        )
        .context("Failed to create chunks table")?;

        // 부모 레코드 기준 조회용
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_chunks_parent ON chunks(parent_id, chunk_id)",
            [],
        )
        .context("Failed to create parent index")?;

        tracing::debug!("Metadata store initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 청크 전체 기록 (행 id = 슬라이스 위치)
    ///
    /// 비어 있는 저장소에만 호출해야 하며, 하나의 트랜잭션으로 기록됩니다.
    pub fn insert_all(&self, chunks: &[Chunk]) -> Result<usize> {
        let mut conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let existing: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .context("Failed to count existing chunks")?;
        if existing != 0 {
            anyhow::bail!("Metadata store already holds {} chunks", existing);
        }

        let tx = conn.transaction().context("Failed to begin transaction")?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks (id, parent_id, chunk_id, text, strategy, source, source_url,
                    title, page, paragraph_id, content_type, table_index, section, pages)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            )?;

            for (id, chunk) in chunks.iter().enumerate() {
                let pages = chunk
                    .table
                    .pages
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()
                    .context("Failed to serialize page range")?;

                stmt.execute(params![
                    id as i64,
                    chunk.parent_id,
                    chunk.chunk_id as i64,
                    chunk.text,
                    chunk.strategy.as_str(),
                    chunk.source,
                    chunk.source_url,
                    chunk.title,
                    chunk.page,
                    chunk.paragraph_id,
                    chunk.table.kind,
                    chunk.table.table_index.map(|i| i as i64),
                    chunk.table.section,
                    pages,
                ])
                .with_context(|| format!("Failed to insert chunk {}", id))?;
            }
        }
        tx.commit().context("Failed to commit chunks")?;

        tracing::info!("Stored metadata for {} chunks", chunks.len());
        Ok(chunks.len())
    }

    /// 행 수
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .context("Failed to count chunks")?;
        Ok(count as usize)
    }

    /// id로 청크 조회
    pub fn get(&self, id: usize) -> Result<Option<Chunk>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let sql = format!("SELECT {} FROM chunks WHERE id = ?1", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![id as i64])?;

        match rows.next()? {
            Some(row) => Ok(Some(row_to_chunk(row).map_err(|e| {
                RagError::corrupt(&self.db_path, format!("row {}: {}", id, e))
            })?)),
            None => Ok(None),
        }
    }

    /// 전체 청크 로드 (id 순서)
    ///
    /// id가 0부터 빈틈없이 이어지지 않으면 `IndexCorrupt`.
    pub fn load_all(&self) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let sql = format!("SELECT {} FROM chunks ORDER BY id", SELECT_COLUMNS);
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| RagError::corrupt(&self.db_path, e.to_string()))?;
        let mut rows = stmt.query([])?;

        let mut chunks = Vec::new();
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            if id != chunks.len() as i64 {
                return Err(RagError::corrupt(
                    &self.db_path,
                    format!("expected chunk id {}, found {}", chunks.len(), id),
                )
                .into());
            }
            let chunk = row_to_chunk(row)
                .map_err(|e| RagError::corrupt(&self.db_path, format!("row {}: {}", id, e)))?;
            chunks.push(chunk);
        }

        tracing::debug!("Loaded {} chunks from {:?}", chunks.len(), self.db_path);
        Ok(chunks)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 행 → Chunk (컬럼 순서는 `SELECT_COLUMNS`)
fn row_to_chunk(row: &Row<'_>) -> Result<Chunk> {
    let strategy: String = row.get(4)?;
    let strategy = ChunkStrategy::parse(&strategy)
        .ok_or_else(|| anyhow::anyhow!("unknown strategy '{}'", strategy))?;

    let pages: Option<String> = row.get(13)?;
    let pages: Option<PageRange> = pages
        .map(|p| serde_json::from_str(&p))
        .transpose()
        .context("invalid page range")?;

    let chunk_id: i64 = row.get(2)?;
    let table_index: Option<i64> = row.get(11)?;

    Ok(Chunk {
        parent_id: row.get(1)?,
        chunk_id: chunk_id as usize,
        text: row.get(3)?,
        strategy,
        source: row.get(5)?,
        source_url: row.get(6)?,
        title: row.get(7)?,
        page: row.get(8)?,
        paragraph_id: row.get(9)?,
        table: TableFields {
            kind: row.get(10)?,
            table_index: table_index.map(|i| i as usize),
            section: row.get(12)?,
            pages,
        },
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::record::SourceRecord;
    use tempfile::TempDir;

    fn sample_chunks() -> Vec<Chunk> {
        let mut pdf = SourceRecord::new("a.pdf", "Annual report", "page text");
        pdf.source_url = Some("https://example.com/a.pdf".to_string());
        pdf.page = Some(3);

        let mut table = SourceRecord::new("b.docx", "b", "x | y\n1 | 2");
        table.paragraph_id = Some(1);
        table.table = TableFields::table(0, Some("Totals".to_string()), Some(PageRange::All));

        vec![
            Chunk::from_record(&pdf, 0, "first".to_string(), ChunkStrategy::Sentence),
            Chunk::from_record(&pdf, 1, "second".to_string(), ChunkStrategy::Sentence),
            Chunk::from_record(&table, 0, table.text.clone(), ChunkStrategy::TableWhole),
        ]
    }

    fn create_test_store() -> (TempDir, MetadataStore) {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::create(&dir.path().join("metadata.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_insert_and_load_preserves_order() {
        let (_dir, store) = create_test_store();
        let chunks = sample_chunks();

        assert_eq!(store.insert_all(&chunks).unwrap(), 3);
        assert_eq!(store.count().unwrap(), 3);

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded, chunks);
    }

    #[test]
    fn test_get_by_id() {
        let (_dir, store) = create_test_store();
        let chunks = sample_chunks();
        store.insert_all(&chunks).unwrap();

        let table = store.get(2).unwrap().unwrap();
        assert_eq!(table.strategy, ChunkStrategy::TableWhole);
        assert_eq!(table.table.section.as_deref(), Some("Totals"));
        assert_eq!(table.table.pages, Some(PageRange::All));
        assert!(store.get(3).unwrap().is_none());
    }

    #[test]
    fn test_insert_twice_rejected() {
        let (_dir, store) = create_test_store();
        store.insert_all(&sample_chunks()).unwrap();
        assert!(store.insert_all(&sample_chunks()).is_err());
    }

    #[test]
    fn test_gap_in_ids_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metadata.db");
        {
            let store = MetadataStore::create(&path).unwrap();
            store.insert_all(&sample_chunks()).unwrap();
        }
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute("DELETE FROM chunks WHERE id = 1", []).unwrap();
        }

        let store = MetadataStore::open(&path).unwrap();
        let err = store.load_all().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::IndexCorrupt { .. })
        ));
    }

    #[test]
    fn test_open_missing_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let result = MetadataStore::open(&dir.path().join("missing.db"));
        let err = result.err().unwrap();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::IndexUnavailable { .. })
        ));
    }

    #[test]
    fn test_data_dir_name() {
        let dir = get_data_dir();
        if std::env::var("CITERAG_HOME").is_err() {
            assert!(dir.ends_with(".citerag"));
        }
    }
}
