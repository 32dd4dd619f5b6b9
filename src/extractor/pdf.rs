//! PDF 텍스트 추출 모듈
//!
//! pdf-extract 크레이트로 전체 텍스트를 뽑은 뒤 폼피드(`\x0c`) 기준으로 페이지를 나눕니다.
//! 페이지 번호는 원본 위치 그대로 유지하며 빈 페이지만 건너뜁니다.

use std::path::Path;
use std::sync::{Once, OnceLock};

use anyhow::{Context, Result};
use regex::Regex;

static TABLE_NOTICE: Once = Once::new();

/// PDF에서 페이지별 텍스트 추출
///
/// `(페이지 번호, 텍스트)` 목록을 돌려줍니다. 페이지 번호는 1부터 시작합니다.
pub fn extract_pages(path: &Path) -> Result<Vec<(u32, String)>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read PDF: {:?}", path))?;

    let text = pdf_extract::extract_text_from_mem(&bytes)
        .with_context(|| format!("Failed to extract text from PDF: {:?}", path))?;

    TABLE_NOTICE.call_once(|| {
        tracing::debug!("PDF table extraction is unavailable, tables are indexed as page text");
    });

    if text.trim().is_empty() {
        tracing::warn!(
            "No text extracted from PDF: {:?}. It might be a scanned document.",
            path
        );
        return Ok(vec![]);
    }

    Ok(split_pdf_pages(&text))
}

/// PDF 텍스트를 페이지별로 분리
///
/// 폼피드가 없으면 `--- Page N ---` 형태의 구분 줄을 시도하고, 그것도 없으면 전체가 1페이지입니다.
pub(crate) fn split_pdf_pages(text: &str) -> Vec<(u32, String)> {
    if text.contains('\x0c') {
        return number_pages(text.split('\x0c'));
    }

    if let Some(marker) = page_marker() {
        if marker.is_match(text) {
            let pages = number_pages(marker.split(text));
            if pages.len() > 1 {
                return pages;
            }
        }
    }

    number_pages(std::iter::once(text))
}

fn page_marker() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"(?m)^[\s]*[-=]+[\s]*(?:Page[\s]*)?(\d+)[\s]*[-=]+[\s]*$").ok()
        })
        .as_ref()
}

/// 위치 기준 번호를 먼저 붙이고 빈 페이지 제거
fn number_pages<'a>(pages: impl Iterator<Item = &'a str>) -> Vec<(u32, String)> {
    pages
        .enumerate()
        .map(|(i, page)| (i as u32 + 1, page.trim().to_string()))
        .filter(|(_, page)| !page.is_empty())
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
