//! 파이프라인 통합 테스트
//!
//! 원본 문서 → 레코드 → 청크 → 인덱스 → 검색 → 인용까지 네트워크 없이 실행합니다.

use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;

use citerag::knowledge::{read_jsonl, write_jsonl};
use citerag::{
    Backend, BuildOptions, Chunk, ChunkStrategy, CitedContext, DocumentChunker, EmbeddingProvider,
    FileCollector, IndexBuilder, IndexSnapshot, IndexStore, Metric, Normalizer, RagError,
    Retriever, SharedIndex, SourceRecord, UrlMap,
};

const DIM: usize = 256;

/// 단어 해시 기반 결정적 임베더
struct HashEmbedder;

fn fnv1a(word: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in word.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; DIM];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            vector[(fnv1a(&word) % DIM as u64) as usize] += 1.0;
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn name(&self) -> &str {
        "hash-test"
    }
}

fn write_docx(path: &Path) {
    fn paragraph(text: &str, style: Option<&str>) -> String {
        let props = style
            .map(|s| format!(r#"<w:pPr><w:pStyle w:val="{}"/></w:pPr>"#, s))
            .unwrap_or_default();
        format!("<w:p>{}<w:r><w:t>{}</w:t></w:r></w:p>", props, text)
    }

    let rows = [
        ["Warehouse", "Units"],
        ["Seoul", "1200"],
        ["Busan", "850"],
    ];
    let mut table = String::from("<w:tbl>");
    for row in rows {
        table.push_str("<w:tr>");
        for cell in row {
            table.push_str(&format!("<w:tc>{}</w:tc>", paragraph(cell, None)));
        }
        table.push_str("</w:tr>");
    }
    table.push_str("</w:tbl>");

    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}{}{}</w:body></w:document>"#,
        paragraph("Stock levels are reviewed every Monday morning.", None),
        paragraph("Inventory", Some("Heading1")),
        table
    );

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file("word/document.xml", zip::write::FileOptions::default())
        .unwrap();
    writer.write_all(xml.as_bytes()).unwrap();
    let bytes = writer.finish().unwrap().into_inner();
    std::fs::write(path, bytes).unwrap();
}

/// raw/ 폴더에 문서 3개 + URL 맵
fn write_corpus(root: &Path) -> std::path::PathBuf {
    let raw = root.join("raw");
    std::fs::create_dir_all(&raw).unwrap();

    std::fs::write(
        raw.join("refund.md"),
        "# Refund Policy\n\nOur refund policy allows returns within 30 days of purchase. \
         Refunds go back to the original payment method.\n",
    )
    .unwrap();
    std::fs::write(
        raw.join("shipping.html"),
        "<html><head><title>Shipping</title></head><body>\
         <p>Orders ship within two business days.</p>\
         <p>Express delivery is available for an extra fee.</p></body></html>",
    )
    .unwrap();
    write_docx(&raw.join("report.docx"));
    std::fs::write(raw.join("notes.txt"), "ignored").unwrap();

    let url_map = root.join("url_map.json");
    std::fs::write(
        &url_map,
        r#"{"refund.md": "https://example.com/refund", "shipping.html": "relative/path"}"#,
    )
    .unwrap();

    raw
}

async fn ingest_and_split(root: &Path) -> (Vec<SourceRecord>, Vec<Chunk>) {
    let raw = write_corpus(root);

    let files = FileCollector::with_defaults().collect(&raw).unwrap();
    assert_eq!(files.len(), 3);

    let url_map = UrlMap::load(&root.join("url_map.json")).unwrap();
    let report = Normalizer::new(url_map).normalize_all(&files).await;
    assert_eq!(report.succeeded, 3);
    assert!(report.failed.is_empty());

    let records_path = root.join("records.jsonl");
    write_jsonl(&records_path, &report.records).unwrap();
    let records: Vec<SourceRecord> = read_jsonl(&records_path).unwrap();
    assert_eq!(records, report.records);

    let chunks = DocumentChunker::with_defaults().chunk_records(&records).await;
    let chunks_path = root.join("chunks.jsonl");
    write_jsonl(&chunks_path, &chunks).unwrap();
    let reloaded: Vec<Chunk> = read_jsonl(&chunks_path).unwrap();
    assert_eq!(reloaded, chunks);

    (records, chunks)
}

#[tokio::test]
async fn test_records_carry_provenance() {
    let dir = TempDir::new().unwrap();
    let (records, _) = ingest_and_split(dir.path()).await;

    // refund.md 1, shipping.html 1, report.docx 본문 1 + 표 1
    assert_eq!(records.len(), 4);

    let refund = records.iter().find(|r| r.source == "refund.md").unwrap();
    assert_eq!(refund.source_url.as_deref(), Some("https://example.com/refund"));
    assert_eq!(refund.title, "refund");

    let shipping = records.iter().find(|r| r.source == "shipping.html").unwrap();
    assert_eq!(shipping.title, "Shipping");
    assert!(shipping.source_url.is_none());

    let table = records.iter().find(|r| r.is_table()).unwrap();
    assert_eq!(table.source, "report.docx");
    assert_eq!(table.table.section.as_deref(), Some("Inventory"));
}

#[tokio::test]
async fn test_docx_table_becomes_single_chunk() {
    let dir = TempDir::new().unwrap();
    let (_, chunks) = ingest_and_split(dir.path()).await;

    let tables: Vec<&Chunk> = chunks
        .iter()
        .filter(|c| c.strategy == ChunkStrategy::TableWhole)
        .collect();
    assert_eq!(tables.len(), 1);

    for value in ["Warehouse", "Units", "Seoul", "1200", "Busan", "850"] {
        assert!(tables[0].text.contains(value), "missing {}", value);
    }
}

#[tokio::test]
async fn test_end_to_end_retrieval_with_citations() {
    let dir = TempDir::new().unwrap();
    let (_, chunks) = ingest_and_split(dir.path()).await;

    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbedder);
    let store = IndexStore::new(dir.path().join("index"));
    let options = BuildOptions {
        metric: Metric::Cosine,
        backend: Backend::Flat,
        ..Default::default()
    };

    let manifest = IndexBuilder::new(Arc::clone(&embedder), options)
        .build(&chunks, &store)
        .await
        .unwrap();
    assert_eq!(manifest.count, chunks.len());
    assert_eq!(manifest.sources, 3);
    assert_eq!(manifest.embedding_model, "hash-test");

    let snapshot = Arc::new(IndexSnapshot::load(&store).await.unwrap());
    assert_eq!(snapshot.len(), chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(snapshot.chunk(i), Some(chunk));
    }

    let retriever = Retriever::new(Arc::clone(&snapshot), Arc::clone(&embedder));

    let results = retriever.search("refund policy", 3).await.unwrap();
    assert!(results.len() <= 3);
    assert!(results[0].chunk.text.to_lowercase().contains("refund policy"));

    let cited = CitedContext::assemble(&results);
    assert_eq!(cited.len(), results.len());
    assert!(cited.context.starts_with("[1] "));
    assert_eq!(cited.citations[&1].link, "https://example.com/refund");

    // 자기 자신 검색은 1위, 코사인 ≈ 1
    let k = chunks.len().min(10);
    for (i, chunk) in chunks.iter().enumerate() {
        let results = retriever.search(&chunk.text, k).await.unwrap();
        assert_eq!(results[0].id, i);
        assert!((results[0].score - 1.0).abs() < 1e-4);
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }
}

#[tokio::test]
async fn test_top_k_bounds_and_reload() {
    let dir = TempDir::new().unwrap();
    let (_, chunks) = ingest_and_split(dir.path()).await;

    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbedder);
    let store = IndexStore::new(dir.path().join("index"));
    let builder = IndexBuilder::new(Arc::clone(&embedder), BuildOptions::default());
    builder.build(&chunks[..2], &store).await.unwrap();

    let shared = SharedIndex::new(store.clone());
    let first = shared.get().await.unwrap();
    assert_eq!(first.len(), 2);

    let retriever = Retriever::new(Arc::clone(&first), Arc::clone(&embedder));
    let err = retriever.search("refund", 11).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RagError>(),
        Some(RagError::InvalidTopK { k: 11, .. })
    ));

    // 청크 수보다 큰 k: 있는 만큼만
    let results = retriever.search("refund", 5).await.unwrap();
    assert_eq!(results.len(), 2);

    std::thread::sleep(std::time::Duration::from_millis(10));
    builder.build(&chunks, &store).await.unwrap();

    // 교체 전까지는 기존 스냅샷 유지
    assert_eq!(shared.get().await.unwrap().len(), 2);
    let second = shared.reload().await.unwrap();
    assert_eq!(second.len(), chunks.len());
    assert_eq!(first.len(), 2);
}
