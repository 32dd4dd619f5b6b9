//! 마크다운 → 평문 변환
//!
//! 렌더링 없이 서식 기호만 걷어냅니다. 링크/이미지는 보이는 텍스트만 남깁니다.

use std::sync::OnceLock;

use regex::Regex;

/// (패턴, 치환) 규칙 - 순서대로 적용
const RULES: [(&str, &str); 12] = [
    // 코드 펜스 줄
    (r"(?m)^\s*(```|~~~).*$", ""),
    // 수평선
    (r"(?m)^\s*([-*_]\s*){3,}$", ""),
    // 제목 기호
    (r"(?m)^\s{0,3}#{1,6}\s+", ""),
    // 인용
    (r"(?m)^\s*>\s?", ""),
    // 목록 기호
    (r"(?m)^\s*([-*+]|\d+[.)])\s+", ""),
    // 이미지, 링크
    (r"!\[([^\]]*)\]\([^)]*\)", "$1"),
    (r"\[([^\]]+)\]\([^)]*\)", "$1"),
    // 인라인 코드
    (r"`([^`]+)`", "$1"),
    // 굵게, 기울임
    (r"(\*\*|__)([^*_\n]+)(\*\*|__)", "$2"),
    (r"\*([^*\n]+)\*", "$1"),
    (r"\b_([^_\n]+)_\b", "$1"),
    // HTML 태그
    (r"<[^>\n]+>", ""),
];

fn compiled_rules() -> &'static [(Regex, &'static str)] {
    static COMPILED: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        RULES
            .iter()
            .filter_map(|(pattern, replacement)| {
                Regex::new(pattern).ok().map(|re| (re, *replacement))
            })
            .collect()
    })
}

/// 마크다운을 공백 정리된 평문으로
pub fn markdown_to_text(markdown: &str) -> String {
    let mut text = markdown.replace("\r\n", "\n");
    for (re, replacement) in compiled_rules() {
        text = re.replace_all(&text, *replacement).into_owned();
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
