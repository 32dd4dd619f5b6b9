//! Normalizer - 원본 파일 → `SourceRecord`
//!
//! - PDF: 비어 있지 않은 페이지마다 레코드 하나 (`page = n`)
//! - DOCX: 본문 문단 레코드 하나 + 표마다 표 레코드 하나
//! - HTML / Markdown: 공백 정리된 본문 레코드 하나
//!
//! PDF/DOCX 파싱은 CPU 바운드라서 `spawn_blocking`으로 돌립니다.

pub mod docx;
pub mod html;
pub mod markdown;
pub mod pdf;

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};

use crate::collector::{CollectedFile, FileType};
use crate::knowledge::{SourceRecord, TableFields};

/// 섹션 제목을 찾지 못한 표의 `section`
pub const UNKNOWN_SECTION: &str = "Unknown";

// ============================================================================
// URL Map
// ============================================================================

/// 파일 이름 → 원본 URL
#[derive(Debug, Clone, Default)]
pub struct UrlMap {
    entries: HashMap<String, String>,
}

impl UrlMap {
    /// JSON 객체 파일에서 로드
    ///
    /// 파일이 없으면 경고 후 빈 맵, 절대 URL이 아닌 항목은 경고 후 제외합니다.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("URL map not found at {:?}, continuing without source URLs", path);
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read URL map: {:?}", path))?;
        let entries: HashMap<String, String> = serde_json::from_str(&raw)
            .with_context(|| format!("URL map must be a JSON object of strings: {:?}", path))?;

        let map = Self::from_entries(entries);
        tracing::info!("Loaded {} URL map entries from {:?}", map.len(), path);
        Ok(map)
    }

    /// 항목 검증 후 생성
    pub fn from_entries(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        let entries = entries
            .into_iter()
            .filter(|(name, link)| match url::Url::parse(link) {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!("Dropping URL map entry {}: {:?} ({})", name, link, e);
                    false
                }
            })
            .collect();

        Self { entries }
    }

    pub fn get(&self, file_name: &str) -> Option<&str> {
        self.entries.get(file_name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Normalizer
// ============================================================================

/// 여러 파일 정규화 결과
#[derive(Debug, Default)]
pub struct NormalizeReport {
    pub records: Vec<SourceRecord>,
    pub succeeded: usize,
    /// (파일 이름, 오류 메시지)
    pub failed: Vec<(String, String)>,
}

/// 파일 → 레코드 변환기
pub struct Normalizer {
    url_map: UrlMap,
}

impl Normalizer {
    pub fn new(url_map: UrlMap) -> Self {
        Self { url_map }
    }

    pub fn url_map(&self) -> &UrlMap {
        &self.url_map
    }

    /// 파일 하나 정규화 (텍스트가 없으면 빈 목록)
    pub async fn normalize(&self, file: &CollectedFile) -> Result<Vec<SourceRecord>> {
        let records = match file.file_type {
            FileType::Pdf => self.normalize_pdf(file).await?,
            FileType::Docx => self.normalize_docx(file).await?,
            FileType::Html => self.normalize_html(file).await?,
            FileType::Markdown => self.normalize_markdown(file).await?,
        };

        tracing::debug!("{:?} -> {} records", file.path, records.len());
        Ok(records)
    }

    /// 여러 파일 정규화 (실패한 파일은 경고 후 건너뜀)
    pub async fn normalize_all(&self, files: &[CollectedFile]) -> NormalizeReport {
        let mut report = NormalizeReport::default();

        for file in files {
            match self.normalize(file).await {
                Ok(records) => {
                    report.succeeded += 1;
                    report.records.extend(records);
                }
                Err(e) => {
                    tracing::warn!("Failed to normalize {:?}: {:#}", file.path, e);
                    report.failed.push((file.file_name(), format!("{:#}", e)));
                }
            }
        }

        tracing::info!(
            "Normalized {} files into {} records ({} failed)",
            report.succeeded,
            report.records.len(),
            report.failed.len()
        );
        report
    }

    /// 출처 정보가 채워진 레코드
    fn record(&self, file: &CollectedFile, title: &str, text: String) -> SourceRecord {
        let source = file.file_name();
        let mut record = SourceRecord::new(source.clone(), title, text);
        record.source_url = self.url_map.get(&source).map(str::to_string);
        record
    }

    async fn normalize_pdf(&self, file: &CollectedFile) -> Result<Vec<SourceRecord>> {
        let path = file.path.clone();
        let pages = tokio::task::spawn_blocking(move || pdf::extract_pages(&path))
            .await
            .context("PDF extraction task failed")??;

        let title = file.stem();
        Ok(pages
            .into_iter()
            .map(|(page, text)| {
                let mut record = self.record(file, &title, text);
                record.page = Some(page);
                record
            })
            .collect())
    }

    async fn normalize_docx(&self, file: &CollectedFile) -> Result<Vec<SourceRecord>> {
        let path = file.path.clone();
        let content = tokio::task::spawn_blocking(move || docx::extract_docx(&path))
            .await
            .context("DOCX extraction task failed")??;

        let title = file.stem();
        let mut records = Vec::new();

        if !content.paragraphs.is_empty() {
            let mut record = self.record(file, &title, content.paragraphs.join("\n"));
            record.paragraph_id = Some(1);
            records.push(record);
        }

        for (index, table) in content.tables.iter().enumerate() {
            let text = table.to_text();
            if text.trim().is_empty() {
                continue;
            }
            let section = table
                .section
                .clone()
                .unwrap_or_else(|| UNKNOWN_SECTION.to_string());
            let mut record = self.record(file, &title, text);
            record.table = TableFields::table(index, Some(section), None);
            records.push(record);
        }

        Ok(records)
    }

    async fn normalize_html(&self, file: &CollectedFile) -> Result<Vec<SourceRecord>> {
        let raw = read_lossy(&file.path).await?;
        let content = html::extract_html(&raw);
        let title = content.title.unwrap_or_else(|| file.stem());
        Ok(self.single_record(file, &title, content.text))
    }

    async fn normalize_markdown(&self, file: &CollectedFile) -> Result<Vec<SourceRecord>> {
        let raw = read_lossy(&file.path).await?;
        let text = markdown::markdown_to_text(&raw);
        Ok(self.single_record(file, &file.stem(), text))
    }

    fn single_record(&self, file: &CollectedFile, title: &str, text: String) -> Vec<SourceRecord> {
        if text.trim().is_empty() {
            tracing::warn!("No text extracted from {:?}", file.path);
            return vec![];
        }
        let mut record = self.record(file, title, text);
        record.paragraph_id = Some(1);
        vec![record]
    }
}

/// 잘못된 UTF-8 바이트는 대체 문자로
async fn read_lossy(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read file: {:?}", path))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

// ============================================================================
// Tests
// ============================================================================
