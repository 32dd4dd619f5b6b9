//! HTML 텍스트 추출 모듈
//!
//! 제목은 `<title>` → `<h1>` 순서, 본문은 article > main > body 순서로 찾습니다.
//! script/style/noscript 내부 텍스트는 버립니다.

use scraper::{ElementRef, Html, Selector};

/// 본문 후보로 인정하는 최소 길이 (바이트)
const MIN_CONTENT_LEN: usize = 100;

const CONTENT_SELECTORS: [&str; 6] = [
    "article",
    "main",
    "[role=main]",
    ".content",
    "#content",
    "body",
];

const SKIPPED_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

/// 추출된 HTML 콘텐츠
#[derive(Debug, Clone, PartialEq)]
pub struct HtmlContent {
    pub title: Option<String>,
    /// 공백이 정리된 본문
    pub text: String,
}

/// HTML 문자열에서 제목과 본문 추출
pub fn extract_html(html: &str) -> HtmlContent {
    let document = Html::parse_document(html);
    HtmlContent {
        title: extract_title(&document),
        text: extract_content(&document),
    }
}

fn first_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    let element = document.select(&selector).next()?;
    let text = collapse(&element.text().collect::<String>());
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn extract_title(document: &Html) -> Option<String> {
    first_text(document, "title").or_else(|| first_text(document, "h1"))
}

fn extract_content(document: &Html) -> String {
    for selector_str in CONTENT_SELECTORS {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(element) = document.select(&selector).next() {
                let text = element_text(&element);
                if text.len() > MIN_CONTENT_LEN {
                    return text;
                }
            }
        }
    }

    // 짧은 문서: 루트 전체
    element_text(&document.root_element())
}

/// 요소의 텍스트 노드를 공백 하나로 이어 붙임
fn element_text(element: &ElementRef) -> String {
    let mut text = String::new();

    for node in element.descendants() {
        let Some(fragment) = node.value().as_text() else {
            continue;
        };

        let skipped = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .map(|e| SKIPPED_ELEMENTS.contains(&e.name()))
                .unwrap_or(false)
        });
        if skipped {
            continue;
        }

        let trimmed = fragment.trim();
        if !trimmed.is_empty() {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(trimmed);
        }
    }

    collapse(&text)
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
