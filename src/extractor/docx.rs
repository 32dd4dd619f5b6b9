//! DOCX 텍스트/표 추출 모듈
//!
//! DOCX는 zip 컨테이너이며 본문은 `word/document.xml`에 있습니다.
//! 태그 단위로 훑으면서 표 밖 문단은 본문으로, `w:tbl`은 행/셀 구조로 모읍니다.
//! ref: ECMA-376 WordprocessingML (`w:p`, `w:t`, `w:tbl`, `w:tr`, `w:tc`)

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;

const DOCUMENT_PART: &str = "word/document.xml";

/// 추출된 DOCX 콘텐츠
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocxContent {
    /// 표 밖의 비어 있지 않은 문단 (문서 순서)
    pub paragraphs: Vec<String>,
    pub tables: Vec<DocxTable>,
}

/// 표 하나
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocxTable {
    /// 표 앞의 가장 가까운 제목 문단
    pub section: Option<String>,
    pub rows: Vec<Vec<String>>,
}

impl DocxTable {
    /// 행은 줄바꿈, 셀은 ` | `로 연결
    pub fn to_text(&self) -> String {
        self.rows
            .iter()
            .map(|row| row.join(" | "))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// 파일에서 추출
pub fn extract_docx(path: &Path) -> Result<DocxContent> {
    let file = File::open(path).with_context(|| format!("Failed to open DOCX: {:?}", path))?;
    extract_docx_from_reader(file).with_context(|| format!("Failed to read DOCX: {:?}", path))
}

/// zip 리더에서 추출
pub fn extract_docx_from_reader<R: Read + Seek>(reader: R) -> Result<DocxContent> {
    let mut archive = zip::ZipArchive::new(reader).context("Not a zip container")?;
    let mut part = archive
        .by_name(DOCUMENT_PART)
        .context("Missing word/document.xml")?;

    let mut xml = String::new();
    part.read_to_string(&mut xml)
        .context("word/document.xml is not valid UTF-8")?;

    Ok(parse_document_xml(&xml))
}

// ============================================================================
// XML Scanner
// ============================================================================

fn token_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"<[^>]*>|[^<]+").ok())
        .as_ref()
}

fn style_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"w:val\s*=\s*"([^"]*)""#).ok())
        .as_ref()
}

/// 스캐너 상태
#[derive(Default)]
struct Scanner {
    content: DocxContent,
    /// 표 중첩 깊이
    table_depth: usize,
    table: Option<DocxTable>,
    row: Option<Vec<String>>,
    cell: Option<String>,
    paragraph: Option<String>,
    paragraph_style: Option<String>,
    in_text: bool,
    last_heading: Option<String>,
}

impl Scanner {
    fn open_tag(&mut self, name: &str, attrs: &str, self_closing: bool) {
        match name {
            "w:tbl" if !self_closing => {
                self.table_depth += 1;
                if self.table_depth == 1 {
                    self.table = Some(DocxTable {
                        section: self.last_heading.clone(),
                        rows: Vec::new(),
                    });
                }
            }
            "w:tr" if self.table_depth == 1 && !self_closing => self.row = Some(Vec::new()),
            "w:tc" if self.table_depth == 1 && !self_closing => self.cell = Some(String::new()),
            "w:p" if !self_closing => {
                self.paragraph = Some(String::new());
                self.paragraph_style = None;
            }
            "w:pStyle" => {
                self.paragraph_style = style_pattern()
                    .and_then(|re| re.captures(attrs))
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string());
            }
            "w:t" if !self_closing => self.in_text = true,
            "w:tab" | "w:br" | "w:cr" => {
                if let Some(p) = self.paragraph.as_mut() {
                    p.push(' ');
                }
            }
            _ => {}
        }
    }

    fn close_tag(&mut self, name: &str) {
        match name {
            "w:t" => self.in_text = false,
            "w:p" => {
                let text = collapse(&self.paragraph.take().unwrap_or_default());
                if self.table_depth > 0 {
                    if let Some(cell) = self.cell.as_mut() {
                        if !text.is_empty() {
                            if !cell.is_empty() {
                                cell.push(' ');
                            }
                            cell.push_str(&text);
                        }
                    }
                } else if !text.is_empty() {
                    if is_heading(self.paragraph_style.as_deref()) {
                        self.last_heading = Some(text.clone());
                    }
                    self.content.paragraphs.push(text);
                }
            }
            "w:tc" if self.table_depth == 1 => {
                if let (Some(cell), Some(row)) = (self.cell.take(), self.row.as_mut()) {
                    row.push(cell);
                }
            }
            "w:tr" if self.table_depth == 1 => {
                if let (Some(row), Some(table)) = (self.row.take(), self.table.as_mut()) {
                    if row.iter().any(|c| !c.is_empty()) {
                        table.rows.push(row);
                    }
                }
            }
            "w:tbl" => {
                if self.table_depth == 1 {
                    if let Some(table) = self.table.take() {
                        if !table.rows.is_empty() {
                            self.content.tables.push(table);
                        }
                    }
                }
                self.table_depth = self.table_depth.saturating_sub(1);
            }
            _ => {}
        }
    }

    fn text(&mut self, raw: &str) {
        if !self.in_text {
            return;
        }
        if let Some(p) = self.paragraph.as_mut() {
            p.push_str(&decode_entities(raw));
        }
    }

    fn finish(mut self) -> DocxContent {
        if self.table.is_some() {
            tracing::warn!("Unterminated table in DOCX, skipping it");
        }
        self.table = None;
        self.content
    }
}

/// `word/document.xml` 파싱
pub(crate) fn parse_document_xml(xml: &str) -> DocxContent {
    let Some(tokens) = token_pattern() else {
        return DocxContent::default();
    };

    let mut scanner = Scanner::default();

    for m in tokens.find_iter(xml) {
        let token = m.as_str();
        if let Some(inner) = token.strip_prefix('<') {
            let inner = inner.trim_end_matches('>');
            if inner.starts_with('?') || inner.starts_with('!') {
                continue;
            }
            if let Some(name) = inner.strip_prefix('/') {
                scanner.close_tag(name.trim());
            } else {
                let self_closing = inner.ends_with('/');
                let inner = inner.trim_end_matches('/');
                let (name, attrs) = match inner.find(char::is_whitespace) {
                    Some(i) => (&inner[..i], &inner[i..]),
                    None => (inner, ""),
                };
                scanner.open_tag(name, attrs, self_closing);
            }
        } else {
            scanner.text(token);
        }
    }

    scanner.finish()
}

fn is_heading(style: Option<&str>) -> bool {
    style
        .map(|s| {
            let s = s.to_ascii_lowercase();
            s.starts_with("heading") || s == "title"
        })
        .unwrap_or(false)
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// XML 엔티티 디코딩
fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let after = &rest[start..];
        let Some(end) = after.find(';') else {
            out.push_str(after);
            return out;
        };

        let entity = &after[1..end];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                .and_then(char::from_u32),
        };

        match decoded {
            Some(c) => out.push(c),
            None => out.push_str(&after[..=end]),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

// ============================================================================
// Tests
// ============================================================================
