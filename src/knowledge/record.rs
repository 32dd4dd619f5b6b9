//! Record Types - 정규화 레코드와 청크
//!
//! 파이프라인 단계 사이에는 JSONL(한 줄에 JSON 객체 하나)로 저장됩니다.
//! - `SourceRecord`: Normalizer 출력, Chunker 입력
//! - `Chunk`: Chunker 출력, Index Builder 입력 (메타데이터 저장소에도 그대로 보존)

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// 표 레코드의 `type` 값
pub const TABLE_KIND: &str = "table";

// ============================================================================
// Types
// ============================================================================

/// 표가 걸친 페이지 범위
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageRange {
    /// 페이지 정보를 알 수 없음 (문서 전체)
    All,
    /// 1부터 시작하는 페이지 구간 (양 끝 포함)
    Span { first: u32, last: u32 },
}

/// 표 관련 확장 메타데이터
///
/// 레코드/청크 JSON에는 평탄화되어 들어갑니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFields {
    /// 콘텐츠 종류 (`"table"`이면 표)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// 문서 내 표 순번 (0-based)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_index: Option<usize>,
    /// 표가 속한 섹션 제목
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// 표가 걸친 페이지
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<PageRange>,
}

impl TableFields {
    /// 표 메타데이터 생성
    pub fn table(table_index: usize, section: Option<String>, pages: Option<PageRange>) -> Self {
        Self {
            kind: Some(TABLE_KIND.to_string()),
            table_index: Some(table_index),
            section,
            pages,
        }
    }

    pub fn is_table(&self) -> bool {
        self.kind.as_deref() == Some(TABLE_KIND)
    }
}

/// 정규화된 원본 레코드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: String,
    /// 로컬 파일 이름
    pub source: String,
    /// 외부 원본 URL (URL 맵에 있을 때만)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub title: String,
    /// 1부터 시작하는 페이지 번호
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub paragraph_id: Option<u32>,
    pub text: String,
    #[serde(flatten)]
    pub table: TableFields,
}

impl SourceRecord {
    /// 새 레코드 (UUID v4 id 부여)
    pub fn new(source: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            source_url: None,
            title: title.into(),
            page: None,
            paragraph_id: None,
            text: text.into(),
            table: TableFields::default(),
        }
    }

    pub fn is_table(&self) -> bool {
        self.table.is_table()
    }

    /// 페이지 단위로 구분된 콘텐츠인지 (PDF)
    pub fn is_page_delimited(&self) -> bool {
        self.page.is_some() || self.source.to_lowercase().ends_with(".pdf")
    }
}

/// 청킹 전략 태그
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// 문장 경계 고정 윈도우 (오버랩 포함)
    Sentence,
    /// 임베딩 유사도 기반 의미 경계
    Semantic,
    /// 표 전체를 하나의 청크로
    TableWhole,
}

impl ChunkStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStrategy::Sentence => "sentence",
            ChunkStrategy::Semantic => "semantic",
            ChunkStrategy::TableWhole => "table_whole",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sentence" => Some(ChunkStrategy::Sentence),
            "semantic" => Some(ChunkStrategy::Semantic),
            "table_whole" => Some(ChunkStrategy::TableWhole),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChunkStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 검색 단위 청크
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// 원본 레코드 id
    pub parent_id: String,
    /// 부모 내 순번 (0-based)
    pub chunk_id: usize,
    pub text: String,
    pub strategy: ChunkStrategy,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub title: String,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub paragraph_id: Option<u32>,
    #[serde(flatten)]
    pub table: TableFields,
}

impl Chunk {
    /// 부모 레코드의 출처 정보를 물려받아 청크 생성
    pub fn from_record(
        record: &SourceRecord,
        chunk_id: usize,
        text: String,
        strategy: ChunkStrategy,
    ) -> Self {
        Self {
            parent_id: record.id.clone(),
            chunk_id,
            text,
            strategy,
            source: record.source.clone(),
            source_url: record.source_url.clone(),
            title: record.title.clone(),
            page: record.page,
            paragraph_id: record.paragraph_id,
            table: record.table.clone(),
        }
    }

    /// 표시용 링크 (외부 URL 우선, 없으면 로컬 경로)
    pub fn display_link(&self) -> &str {
        match self.source_url.as_deref() {
            Some(url) if !url.trim().is_empty() => url,
            _ => &self.source,
        }
    }
}

// ============================================================================
// JSONL I/O
// ============================================================================

/// JSONL 파일 읽기 (빈 줄 무시)
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let reader = BufReader::new(file);

    let mut items = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {:?}", path))?;
        if line.trim().is_empty() {
            continue;
        }
        let item = serde_json::from_str(&line)
            .with_context(|| format!("Malformed record at {:?}:{}", path, line_no + 1))?;
        items.push(item);
    }

    Ok(items)
}

/// JSONL 파일 쓰기 (부모 디렉토리 자동 생성)
pub fn write_jsonl<T: Serialize>(path: &Path, items: &[T]) -> Result<usize> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
    }

    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut writer = BufWriter::new(file);

    for item in items {
        serde_json::to_writer(&mut writer, item).context("Failed to serialize record")?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    Ok(items.len())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn table_record() -> SourceRecord {
        let mut record = SourceRecord::new("report.docx", "report", "a | b\n1 | 2");
        record.table = TableFields::table(0, Some("Results".to_string()), Some(PageRange::All));
        record
    }

    #[test]
    fn test_table_fields_flattened() {
        let record = table_record();
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["type"], "table");
        assert_eq!(json["table_index"], 0);
        assert_eq!(json["section"], "Results");
        assert_eq!(json["pages"], "all");
        assert!(record.is_table());
    }

    #[test]
    fn test_plain_record_omits_table_fields() {
        let record = SourceRecord::new("a.md", "a", "hello");
        let json = serde_json::to_value(&record).unwrap();

        assert!(json.get("type").is_none());
        assert!(json.get("source_url").is_none());
        assert!(!record.is_table());
    }

    #[test]
    fn test_page_range_span_serde() {
        let range = PageRange::Span { first: 2, last: 3 };
        let json = serde_json::to_string(&range).unwrap();
        assert_eq!(json, r#"{"span":{"first":2,"last":3}}"#);
    }

    #[test]
    fn test_chunk_inherits_provenance() {
        let mut record = table_record();
        record.source_url = Some("https://x/report.docx".to_string());
        record.page = Some(4);

        let chunk = Chunk::from_record(&record, 0, record.text.clone(), ChunkStrategy::TableWhole);

        assert_eq!(chunk.parent_id, record.id);
        assert_eq!(chunk.page, Some(4));
        assert_eq!(chunk.table.section.as_deref(), Some("Results"));
        assert_eq!(chunk.display_link(), "https://x/report.docx");
    }

    #[test]
    fn test_display_link_falls_back_to_source() {
        let mut record = SourceRecord::new("a.md", "a", "text");
        record.source_url = Some("  ".to_string());
        let chunk = Chunk::from_record(&record, 0, "text".to_string(), ChunkStrategy::Sentence);
        assert_eq!(chunk.display_link(), "a.md");
    }

    #[test]
    fn test_strategy_tags() {
        for strategy in [
            ChunkStrategy::Sentence,
            ChunkStrategy::Semantic,
            ChunkStrategy::TableWhole,
        ] {
            assert_eq!(ChunkStrategy::parse(strategy.as_str()), Some(strategy));
            let json = serde_json::to_string(&strategy).unwrap();
            assert_eq!(json, format!("\"{}\"", strategy));
        }
    }

    #[test]
    fn test_jsonl_roundtrip_skips_blank_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/records.jsonl");

        let records = vec![SourceRecord::new("a.md", "a", "one"), table_record()];
        assert_eq!(write_jsonl(&path, &records).unwrap(), 2);

        let mut raw = std::fs::read_to_string(&path).unwrap();
        raw.push_str("\n\n");
        std::fs::write(&path, raw).unwrap();

        let loaded: Vec<SourceRecord> = read_jsonl(&path).unwrap();
        assert_eq!(loaded, records);
    }

    #[test]
    fn test_jsonl_reports_line_number() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, "{\"oops\": 1}\n").unwrap();

        let err = read_jsonl::<SourceRecord>(&path).unwrap_err();
        assert!(format!("{:#}", err).contains(":1"));
    }
}
